use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no subscribers")]
    NoSubscribers,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Live-update transport. Delivery is best effort.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        orgname: &str,
        event_name: &str,
        payload: Value,
    ) -> Result<(), PublishError>;
}
