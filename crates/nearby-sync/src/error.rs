//! Error types for the sync module.

use thiserror::Error;

use crate::envelope::ErrorCode;

/// Failures below the application protocol: the request never produced a
/// usable envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, ...
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded the transport timeout.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx response whose body is not an envelope.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body is not an envelope, or its payload has the wrong shape.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request did not complete.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Well-formed envelope with a non-zero code. `message` is the server's text.
    #[error("{message}")]
    Request { code: ErrorCode, message: String },

    /// Authentication or token refresh failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The caller broke an engine precondition (continuation without more
    /// data, mutation of an unknown entity, ...).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Input rejected before any request was issued.
    #[error("invalid input: {0}")]
    Invalid(#[from] nearby_core::ValidationError),

    /// Request body could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Credential persistence failed.
    #[error("store error: {0}")]
    Store(#[from] nearby_store::StoreError),
}

impl SyncError {
    /// The server code, for request errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SyncError::Request { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, SyncError::Precondition(_))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
