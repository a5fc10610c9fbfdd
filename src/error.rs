//! Error types for the mouse service.

use thiserror::Error;

/// Why a raw report could not be turned into a [`MouseDelta`](crate::domain::models::MouseDelta).
///
/// Decode errors are never surfaced to the consumer: the report is dropped
/// and motion state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no report profile for the connected device")]
    UnknownProfile,

    #[error("short report: expected {expected} bytes, got {actual}")]
    ShortReport { expected: usize, actual: usize },

    #[error("characteristic instance {0} is not a report for this profile")]
    UnhandledInstance(u16),
}

/// Errors reported by the platform GATT transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bluetooth adapter unavailable: {0}")]
    Unavailable(String),

    #[error("GATT operation failed with status {0}")]
    Gatt(i32),

    #[error("No open link")]
    NotConnected,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Coarse classification of [`MouseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportUnavailable,
    CandidateRejected,
    LinkError,
    Decode,
    InvalidModeForOperation,
    ServiceStopped,
}

/// Errors surfaced by [`MouseService`](crate::MouseService).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MouseError {
    /// Radio or adapter missing. Fatal for the session.
    #[error("Bluetooth transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Peripheral failed validation during pairing. Reported as a warning
    /// message; scanning continues.
    #[error("Candidate rejected: {0}")]
    CandidateRejected(String),

    /// Non-success GATT status on an established or pending link.
    #[error("Link error (status {status})")]
    LinkError { status: i32 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{operation} is not allowed in {mode} mode")]
    InvalidModeForOperation {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("Mouse service has shut down")]
    ServiceStopped,
}

impl MouseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            Self::CandidateRejected(_) => ErrorKind::CandidateRejected,
            Self::LinkError { .. } => ErrorKind::LinkError,
            Self::Decode(_) => ErrorKind::Decode,
            Self::InvalidModeForOperation { .. } => ErrorKind::InvalidModeForOperation,
            Self::ServiceStopped => ErrorKind::ServiceStopped,
        }
    }
}

impl From<TransportError> for MouseError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(msg) => MouseError::TransportUnavailable(msg),
            TransportError::Gatt(status) => MouseError::LinkError { status },
            TransportError::NotConnected => MouseError::LinkError { status: -1 },
            TransportError::Other(msg) => MouseError::TransportUnavailable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, MouseError>;
