use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types published by the security console
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Alert events
    AlertRaised,
    AlertActionTaken,
    AlertNotified,
    AlertResolved,

    // Stream events
    StreamRequested,
    StreamConnected,
    StreamFailed,
    StreamStopped,

    // Recording events
    RecordingStarted,
    RecordingCompleted,

    // Outbound notifications for the telephony / mail workers
    NotificationDial,
    NotificationEmail,

    // System events
    SystemStartup,
    SystemShutdown,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlertRaised => write!(f, "alert.raised"),
            Self::AlertActionTaken => write!(f, "alert.action_taken"),
            Self::AlertNotified => write!(f, "alert.notified"),
            Self::AlertResolved => write!(f, "alert.resolved"),
            Self::StreamRequested => write!(f, "stream.requested"),
            Self::StreamConnected => write!(f, "stream.connected"),
            Self::StreamFailed => write!(f, "stream.failed"),
            Self::StreamStopped => write!(f, "stream.stopped"),
            Self::RecordingStarted => write!(f, "recording.started"),
            Self::RecordingCompleted => write!(f, "recording.completed"),
            Self::NotificationDial => write!(f, "notification.dial"),
            Self::NotificationEmail => write!(f, "notification.email"),
            Self::SystemStartup => write!(f, "system.startup"),
            Self::SystemShutdown => write!(f, "system.shutdown"),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    /// Event type
    pub event_type: EventType,
    /// Event source ID (alert ID)
    pub source_id: Option<String>,
    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Event data payload
    pub payload: serde_json::Value,
}

impl EventMessage {
    /// Create a new event message
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<&str>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id: source_id.map(str::to_string),
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Get the routing key for the event
    pub fn routing_key(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }
}
