//! Worker pool configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::stage::StageKind;

/// Configuration for the stage worker pools (`[pools]` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// How often an idle pool polls its queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Lease duration (milliseconds). Heartbeats extend it every third of it;
    /// an executor that stops heartbeating loses the item after this long.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_ms: u64,

    /// Per-stage concurrency overrides, keyed by stage name.
    #[serde(default)]
    pub concurrency: HashMap<String, usize>,
}

fn default_poll_interval() -> u64 {
    250
}

fn default_lease_ttl() -> u64 {
    60_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            lease_ttl_ms: default_lease_ttl(),
            concurrency: HashMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Configured concurrency for `stage`, falling back to the stage default.
    pub fn concurrency_for(&self, stage: StageKind) -> usize {
        self.concurrency
            .get(stage.as_str())
            .copied()
            .filter(|n| *n > 0)
            .unwrap_or_else(|| stage.default_concurrency())
    }
}
