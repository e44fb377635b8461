//! Entity cache: every cached copy of one entity type.
//!
//! An [`EntityCache`] holds any number of named collections plus a single
//! detail slot, and keeps an index from entity id to the collections that
//! currently list it. The index is what lets a mutation reach every copy
//! of an entity without scanning unrelated collections.
//!
//! All state sits behind one std mutex that is never held across an await.
//! Network work happens in [`crate::pagination`]; this module only applies
//! results.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use nearby_core::{Cursor, Entity, Mutation, Page};

use crate::pagination::PageQuery;

/// Name of one collection within a cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey(String);

impl CollectionKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Key for a per-parent collection, e.g. the members of one group.
    pub fn scoped(name: &str, parent: impl fmt::Display) -> Self {
        Self(format!("{name}:{parent}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Snapshot of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<Cursor>,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_cursor: None,
            loading: false,
            last_error: None,
        }
    }
}

impl<T> Collection<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct Slot<T: Entity> {
    items: Vec<T>,
    has_more: bool,
    next_cursor: Option<Cursor>,
    in_flight: usize,
    last_error: Option<String>,
    epoch: u64,
    query: Option<Arc<dyn PageQuery<Item = T>>>,
}

impl<T: Entity> Default for Slot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_cursor: None,
            in_flight: 0,
            last_error: None,
            epoch: 0,
            query: None,
        }
    }
}

impl<T: Entity> Slot<T> {
    fn view(&self) -> Collection<T> {
        Collection {
            items: self.items.clone(),
            has_more: self.has_more,
            next_cursor: self.next_cursor.clone(),
            loading: self.in_flight > 0,
            last_error: self.last_error.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("len", &self.items.len())
            .field("has_more", &self.has_more)
            .field("next_cursor", &self.next_cursor)
            .field("in_flight", &self.in_flight)
            .field("epoch", &self.epoch)
            .field("query", &self.query)
            .finish()
    }
}

struct Inner<T: Entity> {
    collections: HashMap<CollectionKey, Slot<T>>,
    detail: Option<T>,
    index: HashMap<T::Id, BTreeSet<CollectionKey>>,
}

impl<T: Entity> Inner<T> {
    fn unindex(&mut self, key: &CollectionKey, ids: impl IntoIterator<Item = T::Id>) {
        for id in ids {
            if let Some(homes) = self.index.get_mut(&id) {
                homes.remove(key);
                if homes.is_empty() {
                    self.index.remove(&id);
                }
            }
        }
    }

    fn reindex(&mut self, key: &CollectionKey, ids: impl IntoIterator<Item = T::Id>) {
        for id in ids {
            self.index.entry(id).or_default().insert(key.clone());
        }
    }

    fn replace_items(&mut self, key: &CollectionKey, items: Vec<T>) {
        let slot = self.collections.entry(key.clone()).or_default();
        let old = std::mem::replace(&mut slot.items, items);
        let new_ids: Vec<T::Id> = slot.items.iter().map(Entity::id).collect();
        self.unindex(key, old.iter().map(Entity::id));
        self.reindex(key, new_ids);
    }
}

/// Issued when a fetch starts; checked when its response lands.
#[derive(Debug, Clone)]
pub(crate) struct Ticket {
    pub epoch: u64,
    pub cursor: Option<Cursor>,
}

/// What happened to a response.
pub(crate) enum Landing<T> {
    Applied(Collection<T>),
    Stale(Collection<T>),
}

/// Cache of every collection and the detail slot for one entity type.
pub struct EntityCache<T: Entity> {
    inner: Mutex<Inner<T>>,
}

impl<T: Entity> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                collections: HashMap::new(),
                detail: None,
                index: HashMap::new(),
            }),
        }
    }
}

impl<T: Entity> fmt::Debug for EntityCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("EntityCache")
            .field("collections", &inner.collections)
            .field("has_detail", &inner.detail.is_some())
            .field("indexed_ids", &inner.index.len())
            .finish()
    }
}

impl<T: Entity> EntityCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panic mid-update leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of a collection. Unknown keys read as empty.
    pub fn collection(&self, key: &CollectionKey) -> Collection<T> {
        self.lock()
            .collections
            .get(key)
            .map(Slot::view)
            .unwrap_or_default()
    }

    pub fn items(&self, key: &CollectionKey) -> Vec<T> {
        self.lock()
            .collections
            .get(key)
            .map(|slot| slot.items.clone())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<CollectionKey> {
        let mut keys: Vec<_> = self.lock().collections.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Collections currently listing `id`.
    pub fn homes(&self, id: &T::Id) -> Vec<CollectionKey> {
        self.lock()
            .index
            .get(id)
            .map(|homes| homes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any collection or the detail slot holds `id`.
    pub fn contains(&self, id: &T::Id) -> bool {
        let inner = self.lock();
        inner.index.contains_key(id) || inner.detail.as_ref().is_some_and(|d| &d.id() == id)
    }

    /// First cached copy of `id`, preferring the detail slot.
    pub fn find(&self, id: &T::Id) -> Option<T> {
        let inner = self.lock();
        if let Some(detail) = inner.detail.as_ref().filter(|d| &d.id() == id) {
            return Some(detail.clone());
        }
        let key = inner.index.get(id)?.iter().next()?;
        inner
            .collections
            .get(key)?
            .items
            .iter()
            .find(|item| &item.id() == id)
            .cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Detail slot
    // ─────────────────────────────────────────────────────────────────────────

    pub fn detail(&self) -> Option<T> {
        self.lock().detail.clone()
    }

    pub fn set_detail(&self, item: T) {
        self.lock().detail = Some(item);
    }

    pub fn clear_detail(&self) {
        self.lock().detail = None;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local edits
    // ─────────────────────────────────────────────────────────────────────────

    /// Put `item` at the front of a collection, dropping an older copy
    /// from that collection.
    pub fn prepend(&self, key: &CollectionKey, item: T) {
        let mut inner = self.lock();
        let id = item.id();
        let slot = inner.collections.entry(key.clone()).or_default();
        slot.items.retain(|existing| existing.id() != id);
        slot.items.insert(0, item);
        inner.reindex(key, [id]);
    }

    /// Drop `id` from one collection only. Other homes and the detail slot
    /// keep their copies.
    pub fn remove(&self, key: &CollectionKey, id: &T::Id) -> bool {
        let mut inner = self.lock();
        let Some(slot) = inner.collections.get_mut(key) else {
            return false;
        };
        let before = slot.items.len();
        slot.items.retain(|item| &item.id() != id);
        let removed = slot.items.len() < before;
        if removed {
            inner.unindex(key, [id.clone()]);
        }
        removed
    }

    /// Drop every copy of `id`, including the detail slot. Returns how many
    /// copies were removed.
    pub fn remove_everywhere(&self, id: &T::Id) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;

        if let Some(homes) = inner.index.remove(id) {
            for key in homes {
                if let Some(slot) = inner.collections.get_mut(&key) {
                    let before = slot.items.len();
                    slot.items.retain(|item| &item.id() != id);
                    removed += before - slot.items.len();
                }
            }
        }
        if inner.detail.as_ref().is_some_and(|d| &d.id() == id) {
            inner.detail = None;
            removed += 1;
        }
        removed
    }

    /// Overwrite every copy of `item`'s id with `item`. Returns how many
    /// copies were replaced.
    pub fn replace_everywhere(&self, item: &T) -> usize {
        let id = item.id();
        self.update_everywhere(&id, |copy| *copy = item.clone())
    }

    /// Apply `mutation` to every copy of `id`. Returns how many copies changed.
    pub fn mutate_everywhere(&self, id: &T::Id, mutation: &dyn Mutation<T>) -> usize {
        self.update_everywhere(id, |copy| mutation.apply(copy))
    }

    fn update_everywhere(&self, id: &T::Id, mut f: impl FnMut(&mut T)) -> usize {
        let mut inner = self.lock();
        let mut touched = 0;

        let homes: Vec<CollectionKey> = inner
            .index
            .get(id)
            .map(|homes| homes.iter().cloned().collect())
            .unwrap_or_default();
        for key in homes {
            if let Some(slot) = inner.collections.get_mut(&key) {
                for copy in slot.items.iter_mut().filter(|item| &item.id() == id) {
                    f(copy);
                    touched += 1;
                }
            }
        }
        if let Some(detail) = inner.detail.as_mut().filter(|d| &d.id() == id) {
            f(detail);
            touched += 1;
        }
        touched
    }

    /// Empty a collection. In-flight responses for it are discarded.
    pub fn reset(&self, key: &CollectionKey) {
        let mut inner = self.lock();
        inner.replace_items(key, Vec::new());
        if let Some(slot) = inner.collections.get_mut(key) {
            slot.has_more = false;
            slot.next_cursor = None;
            slot.last_error = None;
            slot.query = None;
            slot.epoch += 1;
        }
    }

    /// Empty every collection and the detail slot.
    pub fn reset_all(&self) {
        let keys = self.keys();
        for key in &keys {
            self.reset(key);
        }
        self.clear_detail();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fetch bookkeeping (used by the paginator)
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a refresh: new epoch, remembered query.
    pub(crate) fn begin_refresh(
        &self,
        key: &CollectionKey,
        query: Arc<dyn PageQuery<Item = T>>,
    ) -> Ticket {
        let mut inner = self.lock();
        let slot = inner.collections.entry(key.clone()).or_default();
        slot.epoch += 1;
        slot.in_flight += 1;
        slot.query = Some(query);
        Ticket {
            epoch: slot.epoch,
            cursor: None,
        }
    }

    /// Start a continuation. Returns `None` (and starts nothing) when the
    /// collection has no more data or no cursor to continue from.
    pub(crate) fn begin_continue(
        &self,
        key: &CollectionKey,
    ) -> Option<(Ticket, Arc<dyn PageQuery<Item = T>>)> {
        let mut inner = self.lock();
        let slot = inner.collections.get_mut(key)?;
        if !slot.has_more {
            return None;
        }
        let cursor = slot.next_cursor.clone()?;
        let query = slot.query.clone()?;
        slot.in_flight += 1;
        Some((
            Ticket {
                epoch: slot.epoch,
                cursor: Some(cursor),
            },
            query,
        ))
    }

    fn is_current(slot: &Slot<T>, ticket: &Ticket) -> bool {
        // a continuation is also stale once another continuation has moved
        // the cursor on
        slot.epoch == ticket.epoch && (ticket.cursor.is_none() || slot.next_cursor == ticket.cursor)
    }

    /// Land a page. Refresh tickets replace (deduplicated by id, first
    /// occurrence wins); continuation tickets append verbatim.
    pub(crate) fn land(&self, key: &CollectionKey, ticket: &Ticket, page: Page<T>) -> Landing<T> {
        let mut inner = self.lock();
        let slot = inner.collections.entry(key.clone()).or_default();
        slot.in_flight = slot.in_flight.saturating_sub(1);

        if !Self::is_current(slot, ticket) {
            return Landing::Stale(slot.view());
        }

        let Page {
            items,
            has_more,
            next_cursor,
        } = page;
        slot.has_more = has_more;
        slot.next_cursor = next_cursor;
        slot.last_error = None;

        if ticket.cursor.is_none() {
            let mut seen = HashSet::new();
            let unique: Vec<T> = items.into_iter().filter(|i| seen.insert(i.id())).collect();
            inner.replace_items(key, unique);
        } else {
            let ids: Vec<T::Id> = items.iter().map(Entity::id).collect();
            slot.items.extend(items);
            inner.reindex(key, ids);
        }

        let view = inner
            .collections
            .get(key)
            .map(Slot::view)
            .unwrap_or_default();
        Landing::Applied(view)
    }

    /// Record a failed fetch. Items and cursor are left alone; a stale
    /// failure does not overwrite the error of the current request.
    pub(crate) fn land_error(&self, key: &CollectionKey, ticket: &Ticket, error: String) {
        let mut inner = self.lock();
        let slot = inner.collections.entry(key.clone()).or_default();
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if Self::is_current(slot, ticket) {
            slot.last_error = Some(error);
        }
    }
}
