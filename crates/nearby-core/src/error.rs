//! Error types for the Nearby Core.

use thiserror::Error;

/// Errors raised while interpreting wire data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed page: {0}")]
    MalformedPage(String),

    #[error("decoding error: {0}")]
    DecodingError(#[from] serde_json::Error),
}

/// Client-side validation errors.
///
/// These mirror the server's request validators so obviously bad input is
/// rejected before a request is issued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("latitude must be within -90..=90, got {0}")]
    LatitudeOutOfRange(f64),

    #[error("longitude must be within -180..=180, got {0}")]
    LongitudeOutOfRange(f64),

    #[error("page limit must be within 1..={max}, got {got}")]
    LimitOutOfRange { got: usize, max: usize },

    #[error("search radius must be within (0, {max}] meters, got {got}")]
    RadiusOutOfRange { got: f64, max: f64 },

    #[error("{field} length must be within {min}..={max}, got {got}")]
    LengthOutOfRange {
        field: &'static str,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("{field} contains characters the server does not accept")]
    InvalidCharacters { field: &'static str },

    #[error("too many tags: at most {max}, got {got}")]
    TooManyTags { got: usize, max: usize },

    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("image content must be an http(s) URL")]
    ImageNotUrl,

    #[error("password confirmation does not match")]
    PasswordMismatch,
}
