//! User store: the current location, nearby users and name search.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use nearby_core::validation::{
    validate_coordinates, validate_location_name, validate_nickname, validate_radius,
    DEFAULT_USER_RADIUS_METERS,
};
use nearby_core::{Coordinates, Cursor, UpdateLocationRequest, User, UserId};
use nearby_sync::{ApiExt, Collection, CollectionKey, EntityCache, PageQuery, SyncError};

use crate::error::Result;
use crate::location::{acquire_location, LocationFix, LocationProvider};
use crate::stores::{Services, Status};

pub const NEARBY: &str = "nearby";
pub const BY_NAME: &str = "by_name";

/// Where the user says they are.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentLocation {
    pub at: Coordinates,
    pub name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NearbyUsers {
    pub at: Coordinates,
    pub radius: f64,
    pub limit: Option<usize>,
}

impl PageQuery for NearbyUsers {
    type Item = User;

    fn path(&self) -> &str {
        "/user/search_by_location"
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

#[derive(Debug, Clone)]
pub struct UsersByName {
    pub keyword: String,
    pub limit: Option<usize>,
}

impl PageQuery for UsersByName {
    type Item = User;

    fn path(&self) -> &str {
        "/user/search_by_name"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "keyword": self.keyword,
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

pub struct UserStore {
    services: Services,
    cache: EntityCache<User>,
    location: RwLock<Option<CurrentLocation>>,
    provider: Arc<dyn LocationProvider>,
    location_timeout: Duration,
    fallback: Coordinates,
    status: Status,
}

impl UserStore {
    pub fn new(
        services: Services,
        provider: Arc<dyn LocationProvider>,
        location_timeout: Duration,
        fallback: Coordinates,
    ) -> Self {
        Self {
            services,
            cache: EntityCache::new(),
            location: RwLock::new(None),
            provider,
            location_timeout,
            fallback,
            status: Status::default(),
        }
    }

    pub fn nearby(&self) -> Collection<User> {
        self.cache.collection(&NEARBY.into())
    }

    pub fn by_name(&self) -> Collection<User> {
        self.cache.collection(&BY_NAME.into())
    }

    /// The profile last opened with [`UserStore::get_user`].
    pub fn current(&self) -> Option<User> {
        self.cache.detail()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    pub fn clear(&self) {
        self.cache.reset_all();
        self.clear_current_location();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Location
    // ─────────────────────────────────────────────────────────────────────────

    pub fn current_location(&self) -> Option<CurrentLocation> {
        match self.location.read() {
            Ok(location) => location.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_current_location(&self, at: Coordinates, name: impl Into<String>) {
        self.put_location(Some(CurrentLocation {
            at,
            name: name.into(),
        }));
    }

    pub fn clear_current_location(&self) {
        self.put_location(None);
    }

    fn put_location(&self, location: Option<CurrentLocation>) {
        match self.location.write() {
            Ok(mut slot) => *slot = location,
            Err(poisoned) => *poisoned.into_inner() = location,
        }
    }

    fn require_location(&self) -> Result<CurrentLocation> {
        self.current_location()
            .ok_or_else(|| SyncError::Precondition("current location is not set".into()).into())
    }

    /// Ask the device where it is. Falls back to the configured default
    /// location when the device refuses, fails or takes too long.
    pub async fn locate_device(&self) -> LocationFix {
        acquire_location(self.provider.as_ref(), self.location_timeout, self.fallback).await
    }

    /// Publish the current location to the server.
    pub async fn update_location_to_server(&self) -> Result<()> {
        let result = self.update_location_inner().await;
        self.status.record(result)
    }

    async fn update_location_inner(&self) -> Result<()> {
        let location = self.require_location()?;
        validate_coordinates(location.at)?;
        validate_location_name(&location.name)?;

        let request = UpdateLocationRequest {
            latitude: location.at.latitude,
            longitude: location.at.longitude,
            location_name: location.name,
        };
        self.services
            .api
            .command("/user/update_location", &request)
            .await?;
        info!(location = %request.location_name, "location published");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fetches
    // ─────────────────────────────────────────────────────────────────────────

    /// Users around the current location, 1 km unless `radius` is given.
    ///
    /// Fails with a precondition error, without a request, when no
    /// current location is set.
    pub async fn fetch_nearby(&self, radius: Option<f64>, refresh: bool) -> Result<Collection<User>> {
        self.status.track(self.fetch_nearby_inner(radius, refresh)).await
    }

    async fn fetch_nearby_inner(&self, radius: Option<f64>, refresh: bool) -> Result<Collection<User>> {
        let key = CollectionKey::new(NEARBY);
        if !refresh {
            return Ok(self.services.pages.load_more(&self.cache, &key).await?);
        }

        let location = self.require_location()?;
        let query = NearbyUsers {
            at: location.at,
            radius: radius.unwrap_or(DEFAULT_USER_RADIUS_METERS),
            limit: None,
        };
        validate_coordinates(query.at)?;
        validate_radius(query.radius)?;
        Ok(self.services.pages.refresh(&self.cache, &key, query).await?)
    }

    pub async fn search_by_name(&self, keyword: &str, refresh: bool) -> Result<Collection<User>> {
        self.status.track(self.search_by_name_inner(keyword, refresh)).await
    }

    async fn search_by_name_inner(&self, keyword: &str, refresh: bool) -> Result<Collection<User>> {
        let key = CollectionKey::new(BY_NAME);
        if !refresh {
            return Ok(self.services.pages.load_more(&self.cache, &key).await?);
        }

        validate_nickname(keyword)?;
        let query = UsersByName {
            keyword: keyword.to_string(),
            limit: None,
        };
        Ok(self.services.pages.refresh(&self.cache, &key, query).await?)
    }

    /// Load one profile into the detail view, replacing listed copies.
    pub async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.status.track(self.get_user_inner(user_id)).await
    }

    async fn get_user_inner(&self, user_id: UserId) -> Result<User> {
        let user: User = self
            .services
            .api
            .call("/user/search_by_id", &json!({ "user_id": user_id }))
            .await?;
        self.cache.set_detail(user.clone());
        self.cache.replace_everywhere(&user);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{FallbackReason, FixedLocation, NoLocation};
    use nearby_core::{DEFAULT_LOCATION, DEFAULT_LOCATION_NAME};
    use nearby_sync::transport::memory::{ok, ok_empty, MemoryTransport};
    use nearby_sync::{ConfirmPolicy, RequestGateway};

    fn user(id: i64, name: &str) -> Value {
        json!({ "user_id": id, "nickname": name, "distance": 120.5 })
    }

    fn store_with(transport: Arc<MemoryTransport>, provider: Arc<dyn LocationProvider>) -> UserStore {
        let api = Arc::new(RequestGateway::anonymous(transport));
        UserStore::new(
            Services::new(api, ConfirmPolicy::default()),
            provider,
            Duration::from_millis(50),
            DEFAULT_LOCATION,
        )
    }

    fn store(transport: Arc<MemoryTransport>) -> UserStore {
        store_with(transport, Arc::new(NoLocation))
    }

    #[tokio::test]
    async fn test_nearby_requires_location() {
        let transport = MemoryTransport::new();
        let store = store(transport.clone());

        let err = store.fetch_nearby(None, true).await.unwrap_err();
        assert!(err.is_precondition());
        assert!(transport.calls().is_empty());
        assert!(store.last_error().is_some());
    }

    #[tokio::test]
    async fn test_nearby_uses_current_location() {
        let transport = MemoryTransport::new();
        transport.route("/user/search_by_location", |_| {
            Ok(ok(json!({ "items": [user(2, "bo")], "pagination": { "has_more": false } })))
        });
        let store = store(transport.clone());
        store.set_current_location(Coordinates::new(31.23, 121.47), "外滩");

        let view = store.fetch_nearby(None, true).await.unwrap();
        assert_eq!(view.items[0].nickname, "bo");

        let call = &transport.calls_to("/user/search_by_location")[0];
        assert_eq!(call.arg("latitude"), &json!(31.23));
        assert_eq!(call.arg("radius"), &json!(1_000.0));
        assert_eq!(call.arg("limit"), &json!(10));
        assert!(call.arg("pagination").is_null());
    }

    #[tokio::test]
    async fn test_update_location() {
        let transport = MemoryTransport::new();
        transport.route("/user/update_location", |_| Ok(ok_empty()));
        let store = store(transport.clone());

        assert!(store.update_location_to_server().await.unwrap_err().is_precondition());

        store.set_current_location(DEFAULT_LOCATION, DEFAULT_LOCATION_NAME);
        store.update_location_to_server().await.unwrap();
        let call = &transport.calls_to("/user/update_location")[0];
        assert_eq!(call.arg("location_name"), &json!("南天门"));

        store.clear_current_location();
        assert!(store.current_location().is_none());
    }

    #[tokio::test]
    async fn test_get_user_replaces_listed_copy() {
        let transport = MemoryTransport::new();
        transport.route("/user/search_by_name", |_| {
            Ok(ok(json!({ "items": [user(2, "bo")], "has_more": false })))
        });
        transport.route("/user/search_by_id", |_| Ok(ok(user(2, "bo renamed"))));
        let store = store(transport.clone());

        store.search_by_name("bo", true).await.unwrap();
        let fetched = store.get_user(UserId(2)).await.unwrap();

        assert_eq!(fetched.nickname, "bo renamed");
        assert_eq!(store.by_name().items[0].nickname, "bo renamed");
        assert_eq!(store.current().unwrap().user_id, UserId(2));
        assert_eq!(transport.calls_to("/user/search_by_id")[0].arg("user_id"), &json!(2));
    }

    #[tokio::test]
    async fn test_locate_device() {
        let here = Coordinates::new(39.9, 116.4);
        let located = store_with(MemoryTransport::new(), Arc::new(FixedLocation(here)));
        assert_eq!(located.locate_device().await.at, here);

        let fallback = store(MemoryTransport::new());
        let fix = fallback.locate_device().await;
        assert_eq!(fix.at, DEFAULT_LOCATION);
        assert_eq!(fix.fallback, Some(FallbackReason::Unavailable));
    }
}
