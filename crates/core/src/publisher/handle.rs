use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::RunEvent;
use crate::metrics::PUBLISH_FAILURES;

/// Envelope wrapping a run event with metadata
#[derive(Debug, Clone)]
pub struct RunEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: RunEvent,
}

/// Handle for emitting run events
///
/// Cheaply cloneable. Events go through a bounded channel to the
/// [`PublishDispatcher`](super::PublishDispatcher). Emitting never blocks and
/// never fails the caller: a full or closed channel drops the event.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: Option<mpsc::Sender<RunEventEnvelope>>,
}

impl PublisherHandle {
    pub fn new(tx: mpsc::Sender<RunEventEnvelope>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A handle that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event, dropping it if it cannot be queued.
    pub fn emit(&self, event: RunEvent) {
        self.try_emit(event);
    }

    /// Emit an event without blocking
    ///
    /// Returns true if the event was queued, false otherwise.
    pub fn try_emit(&self, event: RunEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        let event_name = event.event_name();
        let envelope = RunEventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                PUBLISH_FAILURES.inc();
                tracing::warn!(event = event_name, "Dropped run event: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    fn progress_event(progress: f64) -> RunEvent {
        RunEvent::UpdateProgress {
            orgname: "acme".into(),
            work_item_id: "wi-1".into(),
            stage: StageKind::Summarize,
            progress,
        }
    }

    #[test]
    fn test_try_emit() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = PublisherHandle::new(tx);

        assert!(handle.try_emit(progress_event(0.25)));

        let envelope = rx.try_recv().expect("Should receive event");
        assert_eq!(envelope.event, progress_event(0.25));
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = PublisherHandle::new(tx);

        assert!(handle.try_emit(progress_event(0.1)));
        // Second should be dropped (channel full)
        assert!(!handle.try_emit(progress_event(0.2)));
    }

    #[test]
    fn test_emit_closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::channel::<RunEventEnvelope>(10);
        let handle = PublisherHandle::new(tx);
        drop(rx);

        handle.emit(progress_event(0.5));
        assert!(!handle.try_emit(progress_event(0.6)));
    }

    #[test]
    fn test_disabled_handle_discards() {
        let handle = PublisherHandle::disabled();
        assert!(!handle.try_emit(progress_event(0.5)));
    }
}
