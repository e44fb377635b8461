//! Check-in store: the nearby feed, a user's history and tag search.

use serde_json::{json, Value};
use tracing::info;

use nearby_core::validation::{validate_checkin, validate_coordinates, validate_radius};
use nearby_core::{
    CheckIn, Coordinates, CreateCheckinRequest, CreateCheckinResponse, Cursor, Like, UserId,
};
use nearby_sync::{ApiExt, Collection, CollectionKey, EntityCache, PageQuery};

use crate::error::Result;
use crate::stores::{Services, Status};

pub const NEARBY: &str = "nearby";
pub const HISTORY: &str = "history";
pub const BY_TAGS: &str = "by_tags";

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Check-ins within `radius` meters of `at`.
#[derive(Debug, Clone)]
pub struct NearbyCheckins {
    pub at: Coordinates,
    pub radius: f64,
    pub limit: Option<usize>,
}

impl PageQuery for NearbyCheckins {
    type Item = CheckIn;

    fn path(&self) -> &str {
        "/checkin/search_by_location"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "latitude": self.at.latitude,
            "longitude": self.at.longitude,
            "radius": self.radius,
            "cursor": cursor,
            "limit": limit,
        })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }
}

/// A user's own check-ins; the current user's when `user_id` is `None`.
#[derive(Debug, Clone, Default)]
pub struct CheckinHistory {
    pub user_id: Option<UserId>,
    pub limit: Option<usize>,
}

impl PageQuery for CheckinHistory {
    type Item = CheckIn;

    fn path(&self) -> &str {
        "/checkin/history"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "user_id": self.user_id,
            "cursor": cursor,
            "limit": limit,
        })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }
}

/// Check-ins carrying any of `tags`, nearest to `at` first.
#[derive(Debug, Clone)]
pub struct CheckinsByTags {
    pub tags: Vec<String>,
    pub at: Coordinates,
    pub limit: Option<usize>,
}

impl PageQuery for CheckinsByTags {
    type Item = CheckIn;

    fn path(&self) -> &str {
        "/checkin/search_by_tags"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "tags": self.tags,
            "latitude": self.at.latitude,
            "longitude": self.at.longitude,
            "cursor": cursor,
            "limit": limit,
        })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

pub struct CheckinStore {
    services: Services,
    cache: EntityCache<CheckIn>,
    status: Status,
}

impl CheckinStore {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            cache: EntityCache::new(),
            status: Status::default(),
        }
    }

    pub fn cache(&self) -> &EntityCache<CheckIn> {
        &self.cache
    }

    pub fn nearby(&self) -> Collection<CheckIn> {
        self.cache.collection(&NEARBY.into())
    }

    pub fn history(&self) -> Collection<CheckIn> {
        self.cache.collection(&HISTORY.into())
    }

    pub fn by_tags(&self) -> Collection<CheckIn> {
        self.cache.collection(&BY_TAGS.into())
    }

    /// The check-in last opened with [`CheckinStore::detail`].
    pub fn current(&self) -> Option<CheckIn> {
        self.cache.detail()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    /// Drop every cached check-in.
    pub fn clear(&self) {
        self.cache.reset_all();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a check-in and put it at the top of the nearby feed.
    pub async fn create(&self, request: CreateCheckinRequest) -> Result<CheckIn> {
        self.status.track(self.create_inner(request)).await
    }

    async fn create_inner(&self, request: CreateCheckinRequest) -> Result<CheckIn> {
        validate_checkin(&request)?;
        let created: CreateCheckinResponse =
            self.services.api.call("/checkin/create", &request).await?;
        let checkin = self.fetch_one(&created.checkin_id).await?;
        self.cache.prepend(&NEARBY.into(), checkin.clone());
        info!(checkin = %checkin.checkin_id, "check-in created");
        Ok(checkin)
    }

    /// Delete a check-in and drop it from every list and the detail view.
    pub async fn delete(&self, checkin_id: &str) -> Result<()> {
        let result = self.delete_inner(checkin_id).await;
        self.status.record(result)
    }

    async fn delete_inner(&self, checkin_id: &str) -> Result<()> {
        self.services
            .api
            .command("/checkin/delete", &json!({ "checkin_id": checkin_id }))
            .await?;
        self.cache.remove_everywhere(&checkin_id.to_string());
        Ok(())
    }

    /// Load one check-in into the detail view. Listed copies are replaced
    /// with the fresh one.
    pub async fn detail(&self, checkin_id: &str) -> Result<CheckIn> {
        self.status.track(self.detail_inner(checkin_id)).await
    }

    async fn detail_inner(&self, checkin_id: &str) -> Result<CheckIn> {
        let checkin = self.fetch_one(checkin_id).await?;
        self.cache.set_detail(checkin.clone());
        self.cache.replace_everywhere(&checkin);
        Ok(checkin)
    }

    async fn fetch_one(&self, checkin_id: &str) -> Result<CheckIn> {
        let checkin = self
            .services
            .api
            .call("/checkin/search_by_id", &json!({ "checkin_id": checkin_id }))
            .await?;
        Ok(checkin)
    }

    /// Refresh the nearby feed around `at`. With `refresh` unset the feed
    /// continues its current query and the arguments are ignored.
    pub async fn fetch_nearby(
        &self,
        at: Coordinates,
        radius: f64,
        refresh: bool,
    ) -> Result<Collection<CheckIn>> {
        let query = NearbyCheckins {
            at,
            radius,
            limit: None,
        };
        self.status.track(self.fetch_nearby_inner(query, refresh)).await
    }

    async fn fetch_nearby_inner(
        &self,
        query: NearbyCheckins,
        refresh: bool,
    ) -> Result<Collection<CheckIn>> {
        if refresh {
            validate_coordinates(query.at)?;
            validate_radius(query.radius)?;
        }
        self.fetch(NEARBY, query, refresh).await
    }

    /// Refresh or continue a user's history.
    pub async fn fetch_history(
        &self,
        user_id: Option<UserId>,
        refresh: bool,
    ) -> Result<Collection<CheckIn>> {
        let query = CheckinHistory {
            user_id,
            limit: None,
        };
        self.status.track(self.fetch(HISTORY, query, refresh)).await
    }

    /// Refresh or continue a tag search.
    pub async fn search_by_tags(
        &self,
        tags: Vec<String>,
        at: Coordinates,
        refresh: bool,
    ) -> Result<Collection<CheckIn>> {
        let query = CheckinsByTags {
            tags,
            at,
            limit: None,
        };
        self.status.track(self.search_by_tags_inner(query, refresh)).await
    }

    async fn search_by_tags_inner(
        &self,
        query: CheckinsByTags,
        refresh: bool,
    ) -> Result<Collection<CheckIn>> {
        if refresh {
            validate_coordinates(query.at)?;
        }
        self.fetch(BY_TAGS, query, refresh).await
    }

    async fn fetch<Q>(&self, key: &str, query: Q, refresh: bool) -> Result<Collection<CheckIn>>
    where
        Q: PageQuery<Item = CheckIn>,
    {
        let key = CollectionKey::new(key);
        let view = if refresh {
            self.services.pages.refresh(&self.cache, &key, query).await?
        } else {
            self.services.pages.load_more(&self.cache, &key).await?
        };
        Ok(view)
    }

    /// Like a check-in everywhere it is shown, then tell the server.
    pub async fn like(&self, checkin_id: &str) -> Result<()> {
        let result = self.toggle_like(checkin_id, Like::like(), "/checkin/like").await;
        self.status.record(result)
    }

    pub async fn unlike(&self, checkin_id: &str) -> Result<()> {
        let result = self
            .toggle_like(checkin_id, Like::unlike(), "/checkin/unlike")
            .await;
        self.status.record(result)
    }

    async fn toggle_like(&self, checkin_id: &str, like: Like, path: &str) -> Result<()> {
        let body = json!({ "checkin_id": checkin_id });
        let confirm = self.services.api.command(path, &body);
        self.services
            .mutations
            .apply_and_confirm(&self.cache, &checkin_id.to_string(), &like, confirm)
            .await?;
        Ok(())
    }
}
