pub mod alert_events;
pub mod broker;
pub mod event;
#[cfg(test)]
mod tests;

pub use alert_events::AlertEvents;
pub use broker::{create_publisher, EventPublisher, LogPublisher, MessageBroker};
pub use event::{EventMessage, EventType};

#[cfg(test)]
pub(crate) mod test_support {
    use super::broker::EventPublisher;
    use super::event::{EventMessage, EventType};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Publisher that keeps every event in memory
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        events: Mutex<Vec<EventMessage>>,
    }

    impl RecordingPublisher {
        pub(crate) fn events(&self) -> Vec<EventMessage> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn of_type(&self, event_type: &EventType) -> Vec<EventMessage> {
            self.events()
                .into_iter()
                .filter(|e| &e.event_type == event_type)
                .collect()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: EventMessage) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// Publisher whose broker stalls on `slow` event types before accepting them
    pub(crate) struct SlowPublisher {
        pub(crate) inner: Arc<RecordingPublisher>,
        pub(crate) delay: Duration,
        pub(crate) slow: Vec<EventType>,
    }

    #[async_trait]
    impl EventPublisher for SlowPublisher {
        async fn publish(&self, event: EventMessage) -> anyhow::Result<()> {
            if self.slow.contains(&event.event_type) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.publish(event).await
        }
    }

    /// Publisher whose broker is always down
    pub(crate) struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _event: EventMessage) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("broker unreachable"))
        }
    }
}
