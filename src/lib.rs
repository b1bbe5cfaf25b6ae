pub mod alerts;
pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod escalation;
pub mod messaging;
pub mod notifications;
pub mod urgency;

// Re-export main components for easier use
pub use alerts::{AlertStore, NewAlert, NotificationChannel, SecurityAlert};
pub use capture::{CaptureDesk, DeviceRelay, EvidenceCaptureSession, MediaSource};
pub use error::{Error, Result};
pub use escalation::{Action, ActionOutcome, EscalationController};
pub use notifications::NotificationGateway;
pub use urgency::UrgencyTicker;
