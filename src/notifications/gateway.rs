use crate::alerts::SecurityAlert;
use crate::config::EscalationConfig;
use crate::error::Result;
use crate::notifications::dispatch::Dispatcher;
use crate::notifications::messages::{self, OutboundMessage};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

/// What a channel reported back
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchReceipt {
    /// The dial action was opened; the call itself happens outside the console
    Dispatched { message: OutboundMessage },
    /// The message was accepted for delivery
    Sent { message: OutboundMessage },
}

/// Outbound notifications for an alert. Holds no state of its own.
pub struct NotificationGateway {
    dispatcher: Arc<dyn Dispatcher>,
    config: EscalationConfig,
}

impl NotificationGateway {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: EscalationConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn emergency_number(&self) -> &str {
        &self.config.emergency_number
    }

    /// Open a dial action to `number`.
    ///
    /// Never fails once the number is dialable: a transport failure is logged
    /// and the receipt still reads `Dispatched`.
    pub async fn dial(&self, alert_id: &str, number: &str) -> Result<DispatchReceipt> {
        let message = messages::dial_request(number)?;

        match self.dispatcher.dispatch(alert_id, &message).await {
            Ok(()) => info!("[{}] Dial dispatched to {}", alert_id, number),
            Err(e) => warn!("[{}] Dial to {} may not have opened: {}", alert_id, number, e),
        }

        Ok(DispatchReceipt::Dispatched { message })
    }

    pub async fn notify_vendor(&self, alert: &SecurityAlert) -> Result<DispatchReceipt> {
        let message = messages::vendor_message(alert);
        self.send(&alert.id, message).await
    }

    pub async fn email_authorities(&self, alert: &SecurityAlert) -> Result<DispatchReceipt> {
        let message = messages::authorities_email(alert, &self.config);
        self.send(&alert.id, message).await
    }

    async fn send(&self, alert_id: &str, message: OutboundMessage) -> Result<DispatchReceipt> {
        self.dispatcher.dispatch(alert_id, &message).await?;
        info!("[{}] Message sent to {}", alert_id, message.recipient());
        Ok(DispatchReceipt::Sent { message })
    }
}
