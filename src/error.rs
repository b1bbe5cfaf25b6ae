use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Alert not found: {0}")]
    NotFound(String),

    #[error("Alert already exists: {0}")]
    DuplicateId(String),

    #[error("Alert already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Not recording: {0}")]
    NotRecording(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
