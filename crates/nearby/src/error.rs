//! Error types for the client facade.

use nearby_core::ValidationError;
use nearby_store::StoreError;
use nearby_sync::{ErrorCode, SyncError, TransportError};
use thiserror::Error;

/// Errors surfaced by the entity stores and client assembly.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected before any request was issued.
    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),

    /// Request, session or cache failure. Displays the underlying message
    /// unchanged, so a server rejection reads as the server's own text.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Credential store could not be opened.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// HTTP client could not be built.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Server error code, for rejected requests.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Sync(e) => e.code(),
            _ => None,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, ClientError::Sync(e) if e.is_precondition())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Sync(SyncError::Auth(_)))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
