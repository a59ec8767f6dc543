//! Call counting and fault injection shared by the provider mocks.

use std::time::Duration;

use tokio::sync::RwLock;

use crate::providers::ProviderError;

/// Records calls and decides whether the next one should fail.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    state: RwLock<FaultState>,
}

#[derive(Debug, Default)]
struct FaultState {
    calls: usize,
    next_error: Option<ProviderError>,
    fail_remaining: u32,
    delay: Option<Duration>,
}

impl Faults {
    /// Count a call and return the injected error for it, if any.
    pub async fn on_call(&self) -> Result<(), ProviderError> {
        let delay = self.state.read().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        state.calls += 1;
        if let Some(err) = state.next_error.take() {
            return Err(err);
        }
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(ProviderError::Http("connection reset by mock".to_string()));
        }
        Ok(())
    }

    pub async fn calls(&self) -> usize {
        self.state.read().await.calls
    }

    pub async fn set_next_error(&self, error: ProviderError) {
        self.state.write().await.next_error = Some(error);
    }

    pub async fn fail_times(&self, n: u32) {
        self.state.write().await.fail_remaining = n;
    }

    pub async fn set_delay(&self, delay: Duration) {
        self.state.write().await.delay = Some(delay);
    }
}

/// Forwards the fault-injection API of a mock to its [`Faults`].
macro_rules! fault_controls {
    ($mock:ty) => {
        impl $mock {
            /// Number of calls made so far, failed ones included.
            pub async fn call_count(&self) -> usize {
                self.faults.calls().await
            }

            /// Fail the next call with `error`.
            pub async fn set_next_error(&self, error: $crate::providers::ProviderError) {
                self.faults.set_next_error(error).await;
            }

            /// Fail the next `n` calls with a transient HTTP error.
            pub async fn fail_times(&self, n: u32) {
                self.faults.fail_times(n).await;
            }

            /// Hold every call for `delay` before answering.
            pub async fn set_delay(&self, delay: std::time::Duration) {
                self.faults.set_delay(delay).await;
            }
        }
    };
}

pub(crate) use fault_controls;
