use crate::alerts::SecurityAlert;
use crate::config::EscalationConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const VENDOR_SUBJECT: &str = "URGENT: Panic Button Activated";

/// A message handed to the telephony or mail worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Dial {
        number: String,
        /// `tel:` URI the platform dialer opens
        uri: String,
    },
    Email {
        to: String,
        subject: String,
        body: String,
    },
}

impl OutboundMessage {
    pub fn recipient(&self) -> &str {
        match self {
            OutboundMessage::Dial { number, .. } => number,
            OutboundMessage::Email { to, .. } => to,
        }
    }
}

/// Build the dial request for a phone number
pub fn dial_request(number: &str) -> Result<OutboundMessage> {
    let digits: String = number
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if digits.is_empty() {
        return Err(Error::Config(format!("Not a dialable number: {:?}", number)));
    }

    let uri = Url::parse(&format!("tel:{}", digits))
        .map_err(|e| Error::Config(format!("Invalid tel URI for {:?}: {}", number, e)))?;

    Ok(OutboundMessage::Dial {
        number: number.trim().to_string(),
        uri: uri.to_string(),
    })
}

/// Message sent to the security vendor assigned to the alert
pub fn vendor_message(alert: &SecurityAlert) -> OutboundMessage {
    OutboundMessage::Email {
        to: alert.vendor.contact.clone(),
        subject: VENDOR_SUBJECT.to_string(),
        body: format!(
            "Panic button activated by {} at {}. Coordinates: {}, {}",
            alert.reporter.name,
            alert.location.address,
            alert.location.latitude,
            alert.location.longitude
        ),
    }
}

/// Structured emergency email to the authorities
pub fn authorities_email(alert: &SecurityAlert, config: &EscalationConfig) -> OutboundMessage {
    let body = format!(
        "EMERGENCY ALERT - Panic Button Activated\n\
         \n\
         User: {name} ({role})\n\
         Contact: {contact}\n\
         Location: {address}\n\
         Coordinates: {lat}, {lng}\n\
         Time: {raised_at}\n\
         \n\
         Service Details:\n\
         - Booking: {booking}\n\
         - Customer: {customer}\n\
         - Scheduled Time: {scheduled}\n\
         \n\
         This is an automated alert from the {org} security system.\n",
        name = alert.reporter.name,
        role = alert.reporter.role,
        contact = alert.reporter.contact,
        address = alert.location.address,
        lat = alert.location.latitude,
        lng = alert.location.longitude,
        raised_at = alert.raised_at.to_rfc3339(),
        booking = alert.booking.booking_id,
        customer = alert.booking.customer_name,
        scheduled = alert.booking.scheduled_time.to_rfc3339(),
        org = config.organisation,
    );

    OutboundMessage::Email {
        to: config.authorities_email.clone(),
        subject: config.authorities_subject.clone(),
        body,
    }
}
