//! Entity stores.
//!
//! Each store owns the caches for one family of entities and exposes the
//! actions the UI calls. Every action records its outcome in the store's
//! `last_error` (cleared on success, the error text on failure) and
//! returns the error to the caller as well. Fetches raise `loading` while
//! they run.

pub mod auth;
pub mod checkin;
pub mod group;
pub mod message;
pub mod user;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nearby_sync::{Api, ConfirmPolicy, MutationCoordinator, Paginator};

use crate::error::Result;

pub use auth::{AuthStore, Registration};
pub use checkin::{CheckinHistory, CheckinStore, CheckinsByTags, NearbyCheckins};
pub use group::{GroupMembers, GroupStore, GroupsByName, NearbyGroups, UserGroups};
pub use message::{Conversations, DirectHistory, MessageStore, Notifications};
pub use user::{CurrentLocation, NearbyUsers, UserStore, UsersByName};

/// What every data store needs to talk to the server.
#[derive(Clone)]
pub struct Services {
    pub(crate) api: Arc<dyn Api>,
    pub(crate) pages: Paginator,
    pub(crate) mutations: MutationCoordinator,
}

impl Services {
    pub fn new(api: Arc<dyn Api>, policy: ConfirmPolicy) -> Self {
        Self {
            pages: Paginator::new(api.clone()),
            api,
            mutations: MutationCoordinator::new(policy),
        }
    }
}

/// `last_error` and `loading` of one store.
#[derive(Debug, Default)]
pub(crate) struct Status {
    last_error: Mutex<Option<String>>,
    busy: AtomicUsize,
}

impl Status {
    pub(crate) fn last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
    }

    fn set_error(&self, error: Option<String>) {
        match self.last_error.lock() {
            Ok(mut guard) => *guard = error,
            Err(poisoned) => *poisoned.into_inner() = error,
        }
    }

    /// Record the outcome of an action and pass it through.
    pub(crate) fn record<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.set_error(None),
            Err(e) => self.set_error(Some(e.to_string())),
        }
        result
    }

    /// [`Status::record`], with `loading` raised while `action` runs.
    pub(crate) async fn track<T>(&self, action: impl Future<Output = Result<T>>) -> Result<T> {
        let _busy = Busy::enter(&self.busy);
        self.record(action.await)
    }
}

/// Holds `loading` up until dropped, so a cancelled action still lowers it.
struct Busy<'a>(&'a AtomicUsize);

impl<'a> Busy<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
