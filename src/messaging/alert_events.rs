use crate::alerts::{NotificationChannel, SecurityAlert};
use crate::capture::RecordingArtifact;
use crate::messaging::broker::EventPublisher;
use crate::messaging::event::{EventMessage, EventType};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Helper for publishing alert and evidence related events.
///
/// Publishing is best effort: failures are logged and never surface to the
/// operator action that triggered them.
#[derive(Clone)]
pub struct AlertEvents {
    publisher: Arc<dyn EventPublisher>,
}

impl AlertEvents {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn alert_raised(&self, alert: &SecurityAlert) {
        let payload = serde_json::json!({
            "alert_id": alert.id,
            "reporter": alert.reporter.name,
            "role": alert.reporter.role,
            "address": alert.location.address,
            "latitude": alert.location.latitude,
            "longitude": alert.location.longitude,
            "raised_at": alert.raised_at.to_rfc3339(),
            "stream_available": alert.stream_available,
        });
        self.emit(EventType::AlertRaised, Some(&alert.id), payload).await;
    }

    pub async fn action_taken(&self, alert_id: &str, action: &str, urgent: bool) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "action": action,
            "urgent": urgent,
        });
        self.emit(EventType::AlertActionTaken, Some(alert_id), payload).await;
    }

    pub async fn alert_notified(&self, alert_id: &str, channel: NotificationChannel) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "channel": channel,
        });
        self.emit(EventType::AlertNotified, Some(alert_id), payload).await;
    }

    pub async fn alert_resolved(&self, alert: &SecurityAlert) {
        let payload = serde_json::json!({
            "alert_id": alert.id,
            "notifications_sent": alert.notifications_sent,
            "resolved_at": chrono::Utc::now().to_rfc3339(),
        });
        self.emit(EventType::AlertResolved, Some(&alert.id), payload).await;
    }

    /// Ask the external streaming service to connect the device to `ingest_url`
    pub async fn stream_requested(&self, alert_id: &str, ingest_url: &str) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "ingest_url": ingest_url,
        });
        self.emit(EventType::StreamRequested, Some(alert_id), payload).await;
    }

    pub async fn stream_connected(&self, alert_id: &str, session_id: Uuid, audio: bool, video: bool) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "session_id": session_id,
            "audio": audio,
            "video": video,
        });
        self.emit(EventType::StreamConnected, Some(alert_id), payload).await;
    }

    pub async fn stream_failed(&self, alert_id: &str, session_id: Uuid, reason: &str) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "session_id": session_id,
            "reason": reason,
        });
        self.emit(EventType::StreamFailed, Some(alert_id), payload).await;
    }

    pub async fn stream_stopped(&self, alert_id: &str, session_id: Uuid) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "session_id": session_id,
        });
        self.emit(EventType::StreamStopped, Some(alert_id), payload).await;
    }

    pub async fn recording_started(&self, alert_id: &str, session_id: Uuid) {
        let payload = serde_json::json!({
            "alert_id": alert_id,
            "session_id": session_id,
        });
        self.emit(EventType::RecordingStarted, Some(alert_id), payload).await;
    }

    pub async fn recording_completed(&self, artifact: &RecordingArtifact) {
        self.emit(
            EventType::RecordingCompleted,
            Some(&artifact.alert_id),
            artifact,
        )
        .await;
    }

    pub async fn system(&self, event_type: EventType, payload: serde_json::Value) {
        self.emit(event_type, None, payload).await;
    }

    async fn emit<T: Serialize>(&self, event_type: EventType, source_id: Option<&str>, payload: T) {
        let event = match EventMessage::new(event_type.clone(), source_id, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to build {} event: {}", event_type, e);
                return;
            }
        };

        match self.publisher.publish(event).await {
            Ok(()) => info!("Published {} event", event_type),
            Err(e) => warn!("Failed to publish {} event: {}", event_type, e),
        }
    }
}
