//! Cursor pagination engine.
//!
//! Two entry points share one fetch:
//!
//! - [`Paginator::refresh`] fetches the first page and replaces the
//!   collection's items.
//! - [`Paginator::load_more`] fetches the page after the collection's
//!   cursor and appends it.
//!
//! Every refresh starts a new epoch for the collection. A response is
//! applied only if its epoch is still current and, for continuations, the
//! collection's cursor is still the one the request was sent with. Late
//! responses are dropped and the caller gets the collection as it stands.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use nearby_core::validation::validate_limit;
use nearby_core::{Cursor, Entity, Page, SOCIAL_PAGE_LIMIT};

use crate::cache::{Collection, CollectionKey, EntityCache, Landing, Ticket};
use crate::error::{Result, SyncError, TransportError};
use crate::gateway::Api;

/// One logical paginated query, e.g. "check-ins near X within R".
///
/// Object-safe so a collection can remember the query it was refreshed
/// with and continue it later from its key alone.
pub trait PageQuery: fmt::Debug + Send + Sync + 'static {
    type Item: Entity + DeserializeOwned;

    /// Endpoint path.
    fn path(&self) -> &str;

    /// Request body for the page after `cursor` (the first page when `None`).
    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value;

    /// Page size requested by the caller, if any.
    fn limit_hint(&self) -> Option<usize> {
        None
    }

    /// Page size used when the caller gives none.
    fn default_limit(&self) -> usize {
        SOCIAL_PAGE_LIMIT
    }

    fn limit(&self) -> usize {
        self.limit_hint().unwrap_or_else(|| self.default_limit())
    }

    /// Fill in fields the server leaves implied by the query.
    fn complete(&self, _item: &mut Self::Item) {}
}

/// The pagination engine. Stateless; collection state lives in the cache.
#[derive(Clone)]
pub struct Paginator {
    api: Arc<dyn Api>,
}

impl Paginator {
    pub fn new(api: Arc<dyn Api>) -> Self {
        Self { api }
    }

    /// Fetch one page without touching any cache.
    pub async fn fetch_page<Q>(&self, query: &Q, cursor: Option<&Cursor>) -> Result<Page<Q::Item>>
    where
        Q: PageQuery + ?Sized,
    {
        let limit = query.limit();
        validate_limit(limit)?;

        let data = self
            .api
            .call_raw(query.path(), Some(query.body(cursor, limit)))
            .await?;
        let mut page = Page::from_value(data)
            .map_err(|e| SyncError::Transport(TransportError::MalformedEnvelope(e.to_string())))?;
        for item in &mut page.items {
            query.complete(item);
        }
        Ok(page)
    }

    /// Replace the collection with the first page of `query`.
    pub async fn refresh<T, Q>(
        &self,
        cache: &EntityCache<T>,
        key: &CollectionKey,
        query: Q,
    ) -> Result<Collection<T>>
    where
        T: Entity + DeserializeOwned,
        Q: PageQuery<Item = T>,
    {
        self.refresh_shared(cache, key, Arc::new(query)).await
    }

    /// [`Paginator::refresh`] with an already shared query.
    pub async fn refresh_shared<T>(
        &self,
        cache: &EntityCache<T>,
        key: &CollectionKey,
        query: Arc<dyn PageQuery<Item = T>>,
    ) -> Result<Collection<T>>
    where
        T: Entity + DeserializeOwned,
    {
        // validate before the epoch moves, so a bad hint cannot orphan
        // an in-flight request
        validate_limit(query.limit())?;

        let ticket = cache.begin_refresh(key, query.clone());
        let result = self.fetch_page(query.as_ref(), None).await;
        self.settle(cache, key, ticket, result)
    }

    /// Append the page after the collection's cursor.
    ///
    /// Fails with [`SyncError::Precondition`], without issuing a request,
    /// when the collection has no more data.
    pub async fn load_more<T>(&self, cache: &EntityCache<T>, key: &CollectionKey) -> Result<Collection<T>>
    where
        T: Entity + DeserializeOwned,
    {
        let Some((ticket, query)) = cache.begin_continue(key) else {
            return Err(SyncError::Precondition(format!(
                "collection {key} has no more pages"
            )));
        };

        let result = self.fetch_page(query.as_ref(), ticket.cursor.as_ref()).await;
        self.settle(cache, key, ticket, result)
    }

    /// Refresh when `refresh` is set, otherwise continue.
    pub async fn fetch<T>(
        &self,
        cache: &EntityCache<T>,
        key: &CollectionKey,
        query: Arc<dyn PageQuery<Item = T>>,
        refresh: bool,
    ) -> Result<Collection<T>>
    where
        T: Entity + DeserializeOwned,
    {
        if refresh {
            self.refresh_shared(cache, key, query).await
        } else {
            self.load_more(cache, key).await
        }
    }

    fn settle<T: Entity>(
        &self,
        cache: &EntityCache<T>,
        key: &CollectionKey,
        ticket: Ticket,
        result: Result<Page<T>>,
    ) -> Result<Collection<T>> {
        match result {
            Ok(page) => match cache.land(key, &ticket, page) {
                Landing::Applied(view) => Ok(view),
                Landing::Stale(view) => {
                    debug!(
                        collection = %key,
                        epoch = ticket.epoch,
                        continuation = ticket.cursor.is_some(),
                        "discarding stale page"
                    );
                    Ok(view)
                }
            },
            Err(e) => {
                cache.land_error(key, &ticket, e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RequestGateway;
    use crate::transport::memory::{fail, ok, MemoryTransport};
    use nearby_core::THREAD_PAGE_LIMIT;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Row {
        id: u32,
    }

    impl Entity for Row {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    #[derive(Debug, Clone)]
    struct Rows {
        limit: Option<usize>,
    }

    impl PageQuery for Rows {
        type Item = Row;

        fn path(&self) -> &str {
            "/rows"
        }

        fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
            json!({ "pagination": { "cursor": cursor, "limit": limit } })
        }

        fn limit_hint(&self) -> Option<usize> {
            self.limit
        }

        fn default_limit(&self) -> usize {
            THREAD_PAGE_LIMIT
        }
    }

    fn rows() -> Arc<Rows> {
        Arc::new(Rows { limit: None })
    }

    /// Serves `0..total` with integer cursors, nested pagination layout.
    fn serve(transport: &MemoryTransport, total: u32) {
        transport.route("/rows", move |call| {
            let start = call.body.as_ref().and_then(|b| b["pagination"]["cursor"].as_u64()).unwrap_or(0) as u32;
            let limit = call.body.as_ref().and_then(|b| b["pagination"]["limit"].as_u64()).unwrap_or(10) as u32;
            let end = (start + limit).min(total);
            let items: Vec<_> = (start..end).map(|id| json!({ "id": id })).collect();
            let has_more = end < total;
            Ok(ok(json!({
                "items": items,
                "pagination": { "has_more": has_more, "next_cursor": if has_more { json!(end) } else { Value::Null } }
            })))
        });
    }

    fn engine(transport: &Arc<MemoryTransport>) -> Paginator {
        Paginator::new(Arc::new(RequestGateway::anonymous(transport.clone())))
    }

    fn ids(view: &Collection<Row>) -> Vec<u32> {
        view.items.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_refresh_then_continue_appends() {
        let transport = MemoryTransport::new();
        serve(&transport, 3);
        let engine = engine(&transport);
        let cache: EntityCache<Row> = EntityCache::new();
        let key = CollectionKey::new("rows");
        let query = Arc::new(Rows { limit: Some(2) });

        let view = engine.refresh_shared(&cache, &key, query).await.unwrap();
        assert_eq!(ids(&view), vec![0, 1]);
        assert!(view.has_more);

        let view = engine.load_more(&cache, &key).await.unwrap();
        assert_eq!(ids(&view), vec![0, 1, 2]);
        assert!(!view.has_more);
        assert!(view.next_cursor.is_none());

        // the cursor went back verbatim
        let calls = transport.calls_to("/rows");
        assert_eq!(calls[1].body.as_ref().unwrap()["pagination"]["cursor"], json!(2));
    }

    #[tokio::test]
    async fn test_continue_without_more_issues_no_request() {
        let transport = MemoryTransport::new();
        serve(&transport, 2);
        let engine = engine(&transport);
        let cache: EntityCache<Row> = EntityCache::new();
        let key = CollectionKey::new("rows");

        engine.refresh_shared(&cache, &key, rows()).await.unwrap();
        transport.clear_calls();

        let err = engine.load_more(&cache, &key).await.unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(transport.call_count("/rows"), 0);
    }

    #[tokio::test]
    async fn test_default_limit_applied() {
        let transport = MemoryTransport::new();
        serve(&transport, 100);
        let engine = engine(&transport);
        let cache: EntityCache<Row> = EntityCache::new();

        let view = engine
            .refresh_shared(&cache, &CollectionKey::new("rows"), rows())
            .await
            .unwrap();
        assert_eq!(view.len(), THREAD_PAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_oversized_limit_rejected_before_request() {
        let transport = MemoryTransport::new();
        serve(&transport, 100);
        let engine = engine(&transport);
        let cache: EntityCache<Row> = EntityCache::new();

        let err = engine
            .refresh_shared(&cache, &CollectionKey::new("rows"), Arc::new(Rows { limit: Some(51) }))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Invalid(_)));
        assert_eq!(transport.call_count("/rows"), 0);
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_keeps_items() {
        let transport = MemoryTransport::new();
        serve(&transport, 5);
        let engine = engine(&transport);
        let cache: EntityCache<Row> = EntityCache::new();
        let key = CollectionKey::new("rows");
        engine
            .refresh_shared(&cache, &key, Arc::new(Rows { limit: Some(2) }))
            .await
            .unwrap();

        transport.route("/rows", |_| Ok(fail(5000, "服务器错误")));
        let err = engine.load_more(&cache, &key).await.unwrap_err();
        assert!(matches!(err, SyncError::Request { .. }));

        let view = cache.collection(&key);
        assert_eq!(ids(&view), vec![0, 1]);
        assert_eq!(view.last_error.as_deref(), Some("服务器错误"));
        assert!(!view.loading);
        assert!(view.has_more);
    }

    #[tokio::test]
    async fn test_stale_continuation_after_refresh_is_discarded() {
        let transport = MemoryTransport::new();
        serve(&transport, 4);
        let engine = engine(&transport);
        let cache: Arc<EntityCache<Row>> = Arc::new(EntityCache::new());
        let key = CollectionKey::new("rows");
        engine
            .refresh_shared(&*cache, &key, Arc::new(Rows { limit: Some(2) }))
            .await
            .unwrap();

        // hold the continuation's response until after a refresh lands
        let (release, held) = oneshot::channel::<()>();
        let held = Arc::new(Mutex::new(Some(held)));
        transport.route_async("/rows", move |call| {
            let held = held.lock().unwrap().take();
            async move {
                let is_continuation = call.body.as_ref().map(|b| !b["pagination"]["cursor"].is_null()).unwrap_or(false);
                if let (true, Some(held)) = (is_continuation, held) {
                    let _ = held.await;
                    return Ok(ok(json!({ "items": [{ "id": 2 }, { "id": 3 }], "has_more": false })));
                }
                Ok(ok(json!({ "items": [{ "id": 10 }], "has_more": false })))
            }
        });

        let pending = {
            let engine = engine.clone();
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { engine.load_more(&*cache, &key).await })
        };
        tokio::task::yield_now().await;

        let refreshed = engine
            .refresh_shared(&*cache, &key, Arc::new(Rows { limit: Some(2) }))
            .await
            .unwrap();
        assert_eq!(ids(&refreshed), vec![10]);

        release.send(()).unwrap();
        let late = pending.await.unwrap().unwrap();
        assert_eq!(ids(&late), vec![10]);
        assert_eq!(ids(&cache.collection(&key)), vec![10]);
        assert!(!cache.collection(&key).loading);
    }

    proptest! {
        #[test]
        fn refresh_then_continue_is_strictly_appending(total in 0u32..60, limit in 1usize..=12) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let transport = MemoryTransport::new();
                serve(&transport, total);
                let engine = engine(&transport);
                let cache: EntityCache<Row> = EntityCache::new();
                let key = CollectionKey::new("rows");

                let mut view = engine
                    .refresh_shared(&cache, &key, Arc::new(Rows { limit: Some(limit) }))
                    .await
                    .unwrap();
                let mut previous = ids(&view);
                while view.has_more {
                    view = engine.load_more(&cache, &key).await.unwrap();
                    let now = ids(&view);
                    prop_assert!(now.len() > previous.len());
                    prop_assert_eq!(&now[..previous.len()], &previous[..]);
                    previous = now;
                }
                prop_assert_eq!(previous, (0..total).collect::<Vec<_>>());
                Ok(())
            })?;
        }
    }
}
