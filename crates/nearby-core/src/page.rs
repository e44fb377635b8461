//! Cursor pages: one server response of a paginated collection.
//!
//! The server emits two layouts for the same information:
//!
//! ```text
//! { "items": [...], "pagination": { "has_more": true, "next_cursor": 17 } }
//! { "items": [...], "has_more": true, "next_cursor": 17 }
//! ```
//!
//! Both decode into the same [`Page`]. Decoding also enforces the page
//! invariant: a page without more data never carries a cursor, and a page
//! that claims more data but carries no cursor is treated as the last page,
//! since the only possible continuation would re-send a null cursor.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Cursor;

/// Default page size for social lists (check-ins, groups, users, conversations).
pub const SOCIAL_PAGE_LIMIT: usize = 10;

/// Default page size for thread-like lists (group members, messages).
pub const THREAD_PAGE_LIMIT: usize = 20;

/// Largest page size the server accepts.
pub const MAX_PAGE_LIMIT: usize = 50;

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "WirePage<T>",
    bound(deserialize = "T: Deserialize<'de>", serialize = "T: Serialize")
)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// A page followed by more data at `cursor`.
    pub fn with_more(items: Vec<T>, cursor: Cursor) -> Self {
        Self {
            items,
            has_more: true,
            next_cursor: Some(cursor),
        }
    }

    /// The final page of a query.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            has_more: false,
            next_cursor: None,
        }
    }

    /// Cursor for the next continuation, if one is possible.
    pub fn continuation(&self) -> Option<&Cursor> {
        if self.has_more {
            self.next_cursor.as_ref()
        } else {
            None
        }
    }
}

impl<T: for<'de> Deserialize<'de>> Page<T> {
    /// Decode a page from the `data` field of a response envelope.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        if !value.is_object() {
            return Err(CoreError::MalformedPage(format!(
                "expected an object, got {value}"
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Deserialize)]
struct PaginationMeta {
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<Cursor>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct WirePage<T> {
    #[serde(alias = "members")]
    items: Vec<T>,
    #[serde(default)]
    pagination: Option<PaginationMeta>,
    #[serde(default)]
    has_more: Option<bool>,
    #[serde(default)]
    next_cursor: Option<Cursor>,
}

impl<T> From<WirePage<T>> for Page<T> {
    fn from(wire: WirePage<T>) -> Self {
        let (has_more, next_cursor) = match wire.pagination {
            Some(meta) => (meta.has_more, meta.next_cursor),
            None => (wire.has_more.unwrap_or(false), wire.next_cursor),
        };

        match (has_more, next_cursor) {
            (true, Some(cursor)) => Page::with_more(wire.items, cursor),
            _ => Page::last(wire.items),
        }
    }
}
