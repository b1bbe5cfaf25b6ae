use crate::alerts::{AlertStore, NotificationChannel, SecurityAlert};
use crate::capture::CaptureDesk;
use crate::error::{Error, Result};
use crate::escalation::{Action, ActionOutcome};
use crate::messaging::AlertEvents;
use crate::notifications::NotificationGateway;
use log::{info, warn};
use std::sync::Arc;

/// Applies operator actions to alerts.
///
/// Call, notify and email clear the alert's urgency before anything is sent,
/// so a delivery failure still leaves the alert marked as handled. Stream
/// actions never touch urgency.
pub struct EscalationController {
    store: Arc<AlertStore>,
    gateway: Arc<NotificationGateway>,
    capture: Arc<CaptureDesk>,
    events: AlertEvents,
}

impl EscalationController {
    pub fn new(
        store: Arc<AlertStore>,
        gateway: Arc<NotificationGateway>,
        capture: Arc<CaptureDesk>,
        events: AlertEvents,
    ) -> Self {
        Self {
            store,
            gateway,
            capture,
            events,
        }
    }

    pub async fn apply_action(&self, alert_id: &str, action: Action) -> Result<ActionOutcome> {
        info!("Applying {} to alert {}", action, alert_id);

        let outcome = match action {
            Action::CallAuthorities => self.call_authorities(&self.admit(alert_id, action)?).await?,
            Action::NotifyVendor => self.notify_vendor(&self.admit(alert_id, action)?).await?,
            Action::EmailAuthorities => {
                self.email_authorities(&self.admit(alert_id, action)?).await?
            }
            Action::StartStream => self.start_stream(&self.admit(alert_id, action)?).await?,
            // A stop with nothing to stop is a no-op, even for unknown ids
            Action::StopStream => self.stop_stream(alert_id).await?,
            Action::Resolve => self.resolve(&self.admit(alert_id, action)?).await?,
        };

        let urgent = self.store.get(alert_id).map(|a| a.urgent).unwrap_or(false);
        self.events
            .action_taken(alert_id, action.as_str(), urgent)
            .await;
        Ok(outcome)
    }

    fn active_alert(&self, alert_id: &str) -> Result<SecurityAlert> {
        let alert = self.store.get(alert_id)?;
        if !alert.is_active() {
            return Err(Error::AlreadyResolved(alert_id.to_string()));
        }
        Ok(alert)
    }

    /// The active alert `action` applies to, with urgency cleared first when the action calls for it
    fn admit(&self, alert_id: &str, action: Action) -> Result<SecurityAlert> {
        let alert = self.active_alert(alert_id)?;
        if action.clears_urgency() {
            self.store.set_urgent(&alert.id, false)?;
            if alert.urgent {
                info!("Urgency cleared for alert {}", alert.id);
            }
        }
        Ok(alert)
    }

    async fn call_authorities(&self, alert: &SecurityAlert) -> Result<ActionOutcome> {
        let receipt = self
            .gateway
            .dial(&alert.id, self.gateway.emergency_number())
            .await?;
        self.store.record_authority_call()?;

        Ok(ActionOutcome::Notified {
            channel: None,
            receipt,
        })
    }

    async fn notify_vendor(&self, alert: &SecurityAlert) -> Result<ActionOutcome> {
        let receipt = self.gateway.notify_vendor(alert).await?;
        self.notified(alert, NotificationChannel::SecurityVendor, receipt)
            .await
    }

    async fn email_authorities(&self, alert: &SecurityAlert) -> Result<ActionOutcome> {
        let receipt = self.gateway.email_authorities(alert).await?;
        self.notified(alert, NotificationChannel::Authorities, receipt)
            .await
    }

    async fn notified(
        &self,
        alert: &SecurityAlert,
        channel: NotificationChannel,
        receipt: crate::notifications::DispatchReceipt,
    ) -> Result<ActionOutcome> {
        self.store.mark_notified(&alert.id, channel)?;
        self.events.alert_notified(&alert.id, channel).await;

        Ok(ActionOutcome::Notified {
            channel: Some(channel),
            receipt,
        })
    }

    async fn start_stream(&self, alert: &SecurityAlert) -> Result<ActionOutcome> {
        if !alert.stream_available {
            return Err(Error::StreamUnavailable(format!(
                "device for alert {} cannot stream",
                alert.id
            )));
        }

        // A concurrent Resolve may remove the alert before the slot is ours
        let session = self
            .capture
            .start_stream_if(&alert.id, || self.active_alert(&alert.id).map(|_| ()))
            .await?;
        Ok(ActionOutcome::StreamStarting { session })
    }

    async fn stop_stream(&self, alert_id: &str) -> Result<ActionOutcome> {
        let teardown = self.capture.stop_stream(alert_id).await?;
        Ok(ActionOutcome::StreamStopped {
            session_id: teardown.as_ref().map(|t| t.session_id),
            artifact: teardown.and_then(|t| t.artifact),
        })
    }

    async fn resolve(&self, alert: &SecurityAlert) -> Result<ActionOutcome> {
        // Tombstone first so no StartStream can open a session after the teardown below
        let resolved = self.store.remove(&alert.id)?;

        // The session is gone on every path; a failed export must not keep the alert open
        let artifact = match self.capture.stop_stream(&alert.id).await {
            Ok(teardown) => teardown.and_then(|t| t.artifact),
            Err(e) => {
                warn!("Evidence for alert {} could not be exported: {}", alert.id, e);
                None
            }
        };

        self.events.alert_resolved(&resolved).await;
        info!("Alert {} resolved", alert.id);

        Ok(ActionOutcome::Resolved {
            alert: resolved,
            artifact,
        })
    }
}
