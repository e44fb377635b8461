//! The server's response envelope.
//!
//! Every endpoint answers `{code, msg, data?}`. `code == 0` is success and
//! `data` may be absent for commands; anything else is an application error
//! whose human-readable text is `msg`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError, TransportError};

/// Application error codes emitted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
    Other(i64),
}

impl ErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1000 => ErrorCode::BadRequest,
            1002 => ErrorCode::Unauthorized,
            1003 => ErrorCode::Forbidden,
            1004 => ErrorCode::NotFound,
            1005 => ErrorCode::Conflict,
            5000 => ErrorCode::Internal,
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::BadRequest => 1000,
            ErrorCode::Unauthorized => 1002,
            ErrorCode::Forbidden => 1003,
            ErrorCode::NotFound => 1004,
            ErrorCode::Conflict => 1005,
            ErrorCode::Internal => 5000,
            ErrorCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Raw envelope as it comes off the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Tagged outcome of one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Success(Option<T>),
    Failure { code: ErrorCode, message: String },
}

impl<T> Envelope<T> {
    pub fn into_reply(self) -> Reply<T> {
        if self.code == 0 {
            Reply::Success(self.data)
        } else {
            Reply::Failure {
                code: ErrorCode::from_code(self.code),
                message: self.msg,
            }
        }
    }
}

impl<T> Reply<T> {
    /// Success payload (possibly absent), or the request error.
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Reply::Success(data) => Ok(data),
            Reply::Failure { code, message } => Err(SyncError::Request { code, message }),
        }
    }
}

/// Parse a raw body into a reply whose payload is still untyped.
pub fn parse(raw: Value) -> std::result::Result<Reply<Value>, TransportError> {
    if !raw.is_object() || raw.get("code").is_none() {
        return Err(TransportError::MalformedEnvelope(format!(
            "expected {{code, msg, data?}}, got {}",
            kind_of(&raw)
        )));
    }
    let envelope: Envelope<Value> = serde_json::from_value(raw)
        .map_err(|e| TransportError::MalformedEnvelope(e.to_string()))?;
    Ok(envelope.into_reply())
}

/// Decode a success payload into `R`. Absent data decodes as `null`, so
/// `()` and `Option<_>` succeed while required payloads fail.
pub fn decode_data<R: DeserializeOwned>(data: Value) -> Result<R> {
    serde_json::from_value(data).map_err(|e| {
        SyncError::Transport(TransportError::MalformedEnvelope(format!(
            "unexpected payload: {e}"
        )))
    })
}

/// Parse and decode in one step.
pub fn decode<R: DeserializeOwned>(raw: Value) -> Result<R> {
    let data = parse(raw)?.into_result()?.unwrap_or(Value::Null);
    decode_data(data)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object without code",
    }
}
