use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type AlertId = String;

/// Lifecycle of a panic alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// Channels an alert can be escalated through
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    EmergencyContacts,
    SecurityVendor,
    Authorities,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationChannel::EmergencyContacts => write!(f, "emergency_contacts"),
            NotificationChannel::SecurityVendor => write!(f, "security_vendor"),
            NotificationChannel::Authorities => write!(f, "authorities"),
        }
    }
}

/// Person who pressed the panic button
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reporter {
    pub name: String,
    /// e.g. "therapist" or "customer"
    pub role: String,
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

/// The booking that was in progress when the alert was raised
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedBooking {
    pub booking_id: String,
    pub customer_name: String,
    pub scheduled_time: DateTime<Utc>,
}

/// Security company assigned to the alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityVendor {
    pub name: String,
    pub contact: String,
}

/// Alert record as delivered by the alert feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAlert {
    pub id: AlertId,
    pub reporter: Reporter,
    pub location: Location,
    pub booking: RelatedBooking,
    pub raised_at: DateTime<Utc>,
    pub vendor: SecurityVendor,
    #[serde(default)]
    pub stream_available: bool,
    /// Channels the device already notified before the alert reached the console
    #[serde(default)]
    pub notifications_sent: BTreeSet<NotificationChannel>,
}

/// A live panic alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityAlert {
    pub id: AlertId,
    pub reporter: Reporter,
    pub location: Location,
    pub booking: RelatedBooking,
    pub raised_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub notifications_sent: BTreeSet<NotificationChannel>,
    pub vendor: SecurityVendor,
    pub stream_available: bool,
    /// Drives the flashing indicator
    pub urgent: bool,
}

impl From<NewAlert> for SecurityAlert {
    fn from(alert: NewAlert) -> Self {
        Self {
            id: alert.id,
            reporter: alert.reporter,
            location: alert.location,
            booking: alert.booking,
            raised_at: alert.raised_at,
            status: AlertStatus::Active,
            notifications_sent: alert.notifications_sent,
            vendor: alert.vendor,
            stream_available: alert.stream_available,
            urgent: true,
        }
    }
}

impl SecurityAlert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    pub fn was_notified(&self, channel: NotificationChannel) -> bool {
        self.notifications_sent.contains(&channel)
    }
}

/// Figures shown on the security dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertStats {
    pub active: usize,
    pub urgent: usize,
    pub authority_calls_today: u32,
    pub resolved_today: u32,
}
