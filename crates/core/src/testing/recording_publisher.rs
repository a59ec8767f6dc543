//! Publisher that keeps everything it is given.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::publisher::{PublishError, PublishedEvent, Publisher};

/// Mock implementation of [`Publisher`] for assertions on live updates.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: RwLock<Vec<PublishedEvent>>,
    failing: RwLock<bool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail with a transport error until reset.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }

    pub async fn published(&self) -> Vec<PublishedEvent> {
        self.published.read().await.clone()
    }

    /// Published events for one work item, in order.
    pub async fn events_for(&self, work_item_id: &str) -> Vec<PublishedEvent> {
        self.published
            .read()
            .await
            .iter()
            .filter(|e| e.payload["id"] == work_item_id)
            .cloned()
            .collect()
    }

    /// Names of the published events, in order.
    pub async fn event_names(&self) -> Vec<String> {
        self.published
            .read()
            .await
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        orgname: &str,
        event_name: &str,
        payload: Value,
    ) -> Result<(), PublishError> {
        if *self.failing.read().await {
            return Err(PublishError::Transport("mock transport down".to_string()));
        }
        self.published.write().await.push(PublishedEvent {
            orgname: orgname.to_string(),
            event: event_name.to_string(),
            payload,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
