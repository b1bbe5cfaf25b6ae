pub mod controller;
#[cfg(test)]
mod tests;

pub use controller::EscalationController;

use crate::alerts::{NotificationChannel, SecurityAlert};
use crate::capture::{RecordingArtifact, SessionSnapshot};
use crate::notifications::DispatchReceipt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Operator responses to an alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CallAuthorities,
    NotifyVendor,
    EmailAuthorities,
    StartStream,
    StopStream,
    Resolve,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallAuthorities => "call_authorities",
            Self::NotifyVendor => "notify_vendor",
            Self::EmailAuthorities => "email_authorities",
            Self::StartStream => "start_stream",
            Self::StopStream => "stop_stream",
            Self::Resolve => "resolve",
        }
    }

    /// Actions that count as the operator handling the alert; urgency is cleared before they run
    pub fn clears_urgency(&self) -> bool {
        matches!(
            self,
            Self::CallAuthorities | Self::NotifyVendor | Self::EmailAuthorities
        )
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What `apply_action` did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Notified {
        /// `None` for the emergency call, which is not a tracked channel
        channel: Option<NotificationChannel>,
        receipt: DispatchReceipt,
    },
    StreamStarting {
        session: SessionSnapshot,
    },
    StreamStopped {
        session_id: Option<Uuid>,
        artifact: Option<RecordingArtifact>,
    },
    Resolved {
        alert: SecurityAlert,
        artifact: Option<RecordingArtifact>,
    },
}
