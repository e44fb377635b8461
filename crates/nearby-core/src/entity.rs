//! Entities and the local-first mutations that can be applied to them.
//!
//! The same entity may be cached in several lists at once (a check-in can be
//! in the nearby feed, the author's history and the detail view). A
//! [`Mutation`] describes a change once so it can be replayed on every copy.

use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::Hash;

use crate::checkin::CheckIn;
use crate::group::GroupInfo;
use crate::message::{Conversation, DirectMessage};

/// Anything with a stable identity that may be cached in several collections.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identity used to find every cached copy.
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The entity's id.
    fn id(&self) -> Self::Id;
}

/// A change applied locally to every cached copy of an entity.
pub trait Mutation<T>: fmt::Debug + Send + Sync {
    /// Apply the change to one copy.
    fn apply(&self, target: &mut T);

    /// The change that undoes this one, when one exists.
    fn compensation(&self) -> Option<Box<dyn Mutation<T>>> {
        None
    }
}

/// Mutation built from a closure.
pub struct FnMutation<F> {
    label: &'static str,
    f: F,
}

/// Wrap a closure as a [`Mutation`]. The label only shows up in logs.
pub fn from_fn<T, F>(label: &'static str, f: F) -> FnMutation<F>
where
    F: Fn(&mut T) + Send + Sync,
{
    FnMutation { label, f }
}

impl<F> fmt::Debug for FnMutation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnMutation({})", self.label)
    }
}

impl<T, F> Mutation<T> for FnMutation<F>
where
    F: Fn(&mut T) + Send + Sync,
{
    fn apply(&self, target: &mut T) {
        (self.f)(target)
    }
}

/// Like or unlike a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Like {
    pub liked_by_me: bool,
    pub likes_count_delta: i64,
}

impl Like {
    pub const fn like() -> Self {
        Self {
            liked_by_me: true,
            likes_count_delta: 1,
        }
    }

    pub const fn unlike() -> Self {
        Self {
            liked_by_me: false,
            likes_count_delta: -1,
        }
    }
}

impl Mutation<CheckIn> for Like {
    fn apply(&self, target: &mut CheckIn) {
        target.liked_by_me = self.liked_by_me;
        target.likes_count = (target.likes_count + self.likes_count_delta).max(0);
    }

    fn compensation(&self) -> Option<Box<dyn Mutation<CheckIn>>> {
        Some(Box::new(Like {
            liked_by_me: !self.liked_by_me,
            likes_count_delta: -self.likes_count_delta,
        }))
    }
}

/// Read receipt on a direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkRead {
    pub read_at: DateTime<Utc>,
}

impl MarkRead {
    pub fn now() -> Self {
        Self {
            read_at: Utc::now(),
        }
    }
}

impl Mutation<DirectMessage> for MarkRead {
    fn apply(&self, target: &mut DirectMessage) {
        // first read wins
        if target.read_at.is_none() {
            target.read_at = Some(self.read_at);
        }
    }
}

/// Reset a conversation's unread counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearUnread;

impl Mutation<Conversation> for ClearUnread {
    fn apply(&self, target: &mut Conversation) {
        target.unread_count = 0;
    }
}

/// Membership change of the current user in a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub is_member: bool,
    pub role: String,
}

impl Membership {
    pub fn joined(role: impl Into<String>) -> Self {
        Self {
            is_member: true,
            role: role.into(),
        }
    }

    pub fn left() -> Self {
        Self {
            is_member: false,
            role: String::new(),
        }
    }
}

impl Mutation<GroupInfo> for Membership {
    fn apply(&self, target: &mut GroupInfo) {
        target.is_member = self.is_member;
        target.user_role = self.role.clone();
    }
}
