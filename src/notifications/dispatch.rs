use crate::error::{Error, Result};
use crate::messaging::{EventMessage, EventPublisher, EventType};
use crate::notifications::messages::OutboundMessage;
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

/// Transport that delivers outbound messages
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, alert_id: &str, message: &OutboundMessage) -> Result<()>;
}

/// Hands messages to the telephony and mail workers over the message broker
pub struct BrokerDispatcher {
    publisher: Arc<dyn EventPublisher>,
}

impl BrokerDispatcher {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Dispatcher for BrokerDispatcher {
    async fn dispatch(&self, alert_id: &str, message: &OutboundMessage) -> Result<()> {
        let event_type = match message {
            OutboundMessage::Dial { .. } => EventType::NotificationDial,
            OutboundMessage::Email { .. } => EventType::NotificationEmail,
        };

        let event = EventMessage::new(event_type, Some(alert_id), message)?;
        self.publisher.publish(event).await.map_err(|e| {
            Error::Delivery(format!(
                "Failed to hand message for {} to the broker: {}",
                message.recipient(),
                e
            ))
        })
    }
}

/// Console-only mode: messages are written to the log
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, alert_id: &str, message: &OutboundMessage) -> Result<()> {
        match message {
            OutboundMessage::Dial { number, uri } => {
                info!("[{}] Dial {} ({})", alert_id, number, uri)
            }
            OutboundMessage::Email { to, subject, body } => {
                info!("[{}] Email to {}: {}\n{}", alert_id, to, subject, body)
            }
        }
        Ok(())
    }
}
