//! Strong type definitions shared by every model.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Numeric identifier of a user account.
///
/// The server is inconsistent about encoding: some endpoints emit a JSON
/// number, others a decimal string. Both decode to the same value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UserId(pub i64);

impl UserId {
    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Self(n)),
            Repr::Text(s) => s
                .trim()
                .parse()
                .map(Self)
                .map_err(|_| serde::de::Error::custom(format!("invalid user id: {s:?}"))),
        }
    }
}

/// Opaque pagination continuation token.
///
/// Produced by the server and echoed back verbatim on the next continuation
/// request. The client never inspects, orders or constructs cursor values;
/// the only meaning of a cursor is "more data may exist after this point".
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(serde_json::Value);

impl Cursor {
    /// Wrap a server-issued token.
    ///
    /// Intended for decoding and tests; application code receives cursors
    /// from pages rather than building them.
    pub fn from_wire(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The token exactly as it must be sent back.
    pub fn as_wire(&self) -> &serde_json::Value {
        &self.0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

/// A point on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Fallback position used when the device cannot be located.
pub const DEFAULT_LOCATION: Coordinates = Coordinates::new(35.16, 112.68);

/// Display name of [`DEFAULT_LOCATION`].
pub const DEFAULT_LOCATION_NAME: &str = "南天门";
