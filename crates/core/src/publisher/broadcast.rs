//! In-process fan-out publisher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{PublishError, Publisher};

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub orgname: String,
    pub event: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Publisher backed by a tokio broadcast channel.
///
/// Subscribers that fall behind lose the oldest events.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to the events of one organization only.
    pub fn subscribe_org(&self, orgname: impl Into<String>) -> OrgSubscription {
        OrgSubscription {
            orgname: orgname.into(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiver that drops every event of other organizations.
pub struct OrgSubscription {
    orgname: String,
    rx: broadcast::Receiver<PublishedEvent>,
}

impl OrgSubscription {
    pub fn orgname(&self) -> &str {
        &self.orgname
    }

    /// Next event of this organization. Lag and close are passed through.
    pub async fn recv(&mut self) -> Result<PublishedEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.orgname == self.orgname {
                return Ok(event);
            }
        }
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(
        &self,
        orgname: &str,
        event_name: &str,
        payload: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            orgname: orgname.to_string(),
            event: event_name.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher
            .publish("acme", "update", json!({"id": "wi-1"}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.orgname, "acme");
        assert_eq!(event.event, "update");
        assert_eq!(event.payload["id"], "wi-1");
    }

    #[tokio::test]
    async fn test_org_subscription_skips_other_orgs() {
        let publisher = BroadcastPublisher::new(16);
        let mut acme = publisher.subscribe_org("acme");
        let mut globex = publisher.subscribe_org("globex");

        publisher
            .publish("globex", "run_created", json!({"id": "wi-g"}))
            .await
            .unwrap();
        publisher
            .publish("acme", "run_created", json!({"id": "wi-a"}))
            .await
            .unwrap();
        publisher
            .publish("globex", "update", json!({"id": "wi-g"}))
            .await
            .unwrap();

        let event = acme.recv().await.unwrap();
        assert_eq!(event.orgname, "acme");
        assert_eq!(event.payload["id"], "wi-a");
        let next = tokio::time::timeout(Duration::from_millis(50), acme.recv()).await;
        assert!(next.is_err(), "no further acme events");

        assert_eq!(globex.recv().await.unwrap().event, "run_created");
        assert_eq!(globex.recv().await.unwrap().event, "update");
    }

    #[tokio::test]
    async fn test_org_subscription_reports_close() {
        let publisher = BroadcastPublisher::new(4);
        let mut acme = publisher.subscribe_org("acme");
        publisher
            .publish("globex", "update", json!({}))
            .await
            .unwrap();
        drop(publisher);

        assert!(matches!(
            acme.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publisher = BroadcastPublisher::new(16);
        let result = publisher.publish("acme", "update", json!({})).await;
        assert!(matches!(result, Err(PublishError::NoSubscribers)));
    }
}
