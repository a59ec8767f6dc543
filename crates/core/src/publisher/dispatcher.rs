use std::sync::Arc;

use tokio::sync::mpsc;

use super::{PublishError, Publisher, PublisherHandle, RunEventEnvelope};
use crate::metrics::PUBLISH_FAILURES;

/// Background task that forwards run events to the publisher
pub struct PublishDispatcher {
    rx: mpsc::Receiver<RunEventEnvelope>,
    publisher: Arc<dyn Publisher>,
}

impl PublishDispatcher {
    pub fn new(rx: mpsc::Receiver<RunEventEnvelope>, publisher: Arc<dyn Publisher>) -> Self {
        Self { rx, publisher }
    }

    /// Run the dispatcher, consuming events until every handle is dropped
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::info!("Publish dispatcher started");

        while let Some(envelope) = self.rx.recv().await {
            let event = envelope.event;
            let result = self
                .publisher
                .publish(event.orgname(), event.event_name(), event.payload())
                .await;

            match result {
                Ok(()) => {}
                // Nobody listening is the normal case between client sessions
                Err(PublishError::NoSubscribers) => {}
                Err(e) => {
                    PUBLISH_FAILURES.inc();
                    tracing::warn!(
                        event = event.event_name(),
                        work_item_id = event.work_item_id(),
                        "Failed to publish run event: {}",
                        e
                    );
                }
            }
        }

        tracing::info!("Publish dispatcher shutting down");
    }
}

/// Create a complete publishing system
///
/// Returns:
/// - `PublisherHandle` - for emitting events (clone this to share across tasks)
/// - `PublishDispatcher` - spawn this as a background task with `tokio::spawn(dispatcher.run())`
pub fn create_publisher_system(
    publisher: Arc<dyn Publisher>,
    buffer_size: usize,
) -> (PublisherHandle, PublishDispatcher) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let handle = PublisherHandle::new(tx);
    let dispatcher = PublishDispatcher::new(rx, publisher);
    (handle, dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::RunEvent;
    use crate::stage::StageKind;
    use crate::testing::RecordingPublisher;

    fn progress_event(progress: f64) -> RunEvent {
        RunEvent::UpdateProgress {
            orgname: "acme".into(),
            work_item_id: "wi-1".into(),
            stage: StageKind::Summarize,
            progress,
        }
    }

    #[tokio::test]
    async fn test_dispatcher_forwards_events_in_order() {
        let publisher = Arc::new(RecordingPublisher::new());
        let (handle, dispatcher) = create_publisher_system(publisher.clone(), 10);
        let task = tokio::spawn(dispatcher.run());

        handle.emit(progress_event(0.25));
        handle.emit(progress_event(0.5));
        drop(handle);
        task.await.unwrap();

        let published = publisher.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].orgname, "acme");
        assert_eq!(published[0].event, "update_progress");
        assert_eq!(published[1].payload["progress"], 0.5);
    }

    #[tokio::test]
    async fn test_dispatcher_survives_publish_failures() {
        let publisher = Arc::new(RecordingPublisher::new());
        publisher.set_failing(true).await;
        let (handle, dispatcher) = create_publisher_system(publisher.clone(), 10);
        let task = tokio::spawn(dispatcher.run());

        handle.emit(progress_event(0.1));
        handle.emit(progress_event(0.2));
        drop(handle);

        // Completes normally despite every publish failing
        task.await.unwrap();
        assert!(publisher.published().await.is_empty());
    }
}
