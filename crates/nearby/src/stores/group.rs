//! Group store: my groups, nearby groups, name search and member lists.

use std::sync::RwLock;

use serde_json::{json, Value};
use tracing::{info, warn};

use nearby_core::validation::{
    validate_coordinates, validate_group, validate_group_name_query, validate_radius,
};
use nearby_core::{
    Coordinates, CreateGroupRequest, CreateGroupResponse, Cursor, GroupInfo, GroupMember,
    JoinGroupResponse, Membership, UserId, THREAD_PAGE_LIMIT,
};
use nearby_sync::{ApiExt, Collection, CollectionKey, EntityCache, PageQuery};

use crate::error::Result;
use crate::stores::{Services, Status};

pub const MINE: &str = "mine";
pub const NEARBY: &str = "nearby";
pub const BY_NAME: &str = "by_name";

/// Default radius for nearby group searches, in meters.
pub const DEFAULT_GROUP_RADIUS_METERS: f64 = 5_000.0;

fn members_key(group_id: &str) -> CollectionKey {
    CollectionKey::scoped("members", group_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Groups a user belongs to; the current user's when `user_id` is `None`.
#[derive(Debug, Clone, Default)]
pub struct UserGroups {
    pub user_id: Option<UserId>,
    pub limit: Option<usize>,
}

impl PageQuery for UserGroups {
    type Item = GroupInfo;

    fn path(&self) -> &str {
        "/group/user_groups"
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

#[derive(Debug, Clone)]
pub struct NearbyGroups {
    pub at: Coordinates,
    pub radius: f64,
    pub limit: Option<usize>,
}

impl PageQuery for NearbyGroups {
    type Item = GroupInfo;

    fn path(&self) -> &str {
        "/group/nearby"
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
pub struct GroupsByName {
    pub name: String,
    pub limit: Option<usize>,
}

impl PageQuery for GroupsByName {
    type Item = GroupInfo;

    fn path(&self) -> &str {
        "/group/search_by_name"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "keyword": self.name,
            "cursor": cursor,
            "limit": limit,
        })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }
}

/// Members of one group, 20 per page unless overridden.
#[derive(Debug, Clone)]
pub struct GroupMembers {
    pub group_id: String,
    pub limit: Option<usize>,
}

impl PageQuery for GroupMembers {
    type Item = GroupMember;

    fn path(&self) -> &str {
        "/group/members"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "group_id": self.group_id,
            "cursor": cursor,
            "limit": limit,
        })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }

    fn default_limit(&self) -> usize {
        THREAD_PAGE_LIMIT
    }

    fn complete(&self, member: &mut GroupMember) {
        member.group_id.clone_from(&self.group_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

pub struct GroupStore {
    services: Services,
    groups: EntityCache<GroupInfo>,
    members: EntityCache<GroupMember>,
    recent: RwLock<Vec<GroupInfo>>,
    status: Status,
}

impl GroupStore {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            groups: EntityCache::new(),
            members: EntityCache::new(),
            recent: RwLock::new(Vec::new()),
            status: Status::default(),
        }
    }

    pub fn groups(&self) -> &EntityCache<GroupInfo> {
        &self.groups
    }

    pub fn mine(&self) -> Collection<GroupInfo> {
        self.groups.collection(&MINE.into())
    }

    pub fn nearby(&self) -> Collection<GroupInfo> {
        self.groups.collection(&NEARBY.into())
    }

    pub fn by_name(&self) -> Collection<GroupInfo> {
        self.groups.collection(&BY_NAME.into())
    }

    pub fn members(&self, group_id: &str) -> Collection<GroupMember> {
        self.members.collection(&members_key(group_id))
    }

    /// The group last opened with [`GroupStore::detail`].
    pub fn current(&self) -> Option<GroupInfo> {
        self.groups.detail()
    }

    pub fn recent(&self) -> Vec<GroupInfo> {
        match self.recent.read() {
            Ok(recent) => recent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    pub fn clear(&self) {
        self.groups.reset_all();
        self.members.reset_all();
        self.set_recent(Vec::new());
    }

    fn set_recent(&self, groups: Vec<GroupInfo>) {
        match self.recent.write() {
            Ok(mut recent) => *recent = groups,
            Err(poisoned) => *poisoned.into_inner() = groups,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a group. The creator owns it, so it goes to the top of `mine`.
    pub async fn create(&self, request: CreateGroupRequest) -> Result<GroupInfo> {
        self.status.track(self.create_inner(request)).await
    }

    async fn create_inner(&self, request: CreateGroupRequest) -> Result<GroupInfo> {
        validate_group(&request)?;
        let created: CreateGroupResponse = self.services.api.call("/group/create", &request).await?;
        let group = self.fetch_info(&created.group_id).await?;
        self.groups.prepend(&MINE.into(), group.clone());
        info!(group = %group.group_id, "group created");
        Ok(group)
    }

    pub async fn fetch_user_groups(&self, refresh: bool) -> Result<Collection<GroupInfo>> {
        self.status
            .track(self.fetch_groups(MINE, UserGroups::default(), refresh))
            .await
    }

    /// Refresh or continue the nearby groups. `radius` defaults to 5 km.
    pub async fn fetch_nearby(
        &self,
        at: Coordinates,
        radius: Option<f64>,
        refresh: bool,
    ) -> Result<Collection<GroupInfo>> {
        let query = NearbyGroups {
            at,
            radius: radius.unwrap_or(DEFAULT_GROUP_RADIUS_METERS),
            limit: None,
        };
        self.status.track(self.fetch_nearby_inner(query, refresh)).await
    }

    async fn fetch_nearby_inner(
        &self,
        query: NearbyGroups,
        refresh: bool,
    ) -> Result<Collection<GroupInfo>> {
        if refresh {
            validate_coordinates(query.at)?;
            validate_radius(query.radius)?;
        }
        self.fetch_groups(NEARBY, query, refresh).await
    }

    pub async fn search_by_name(&self, name: &str, refresh: bool) -> Result<Collection<GroupInfo>> {
        let query = GroupsByName {
            name: name.to_string(),
            limit: None,
        };
        self.status.track(self.search_by_name_inner(query, refresh)).await
    }

    async fn search_by_name_inner(
        &self,
        query: GroupsByName,
        refresh: bool,
    ) -> Result<Collection<GroupInfo>> {
        if refresh {
            validate_group_name_query(&query.name)?;
        }
        self.fetch_groups(BY_NAME, query, refresh).await
    }

    async fn fetch_groups<Q>(&self, key: &str, query: Q, refresh: bool) -> Result<Collection<GroupInfo>>
    where
        Q: PageQuery<Item = GroupInfo>,
    {
        let key = CollectionKey::new(key);
        let view = if refresh {
            self.services.pages.refresh(&self.groups, &key, query).await?
        } else {
            self.services.pages.load_more(&self.groups, &key).await?
        };
        Ok(view)
    }

    /// Load one group into the detail view, replacing listed copies.
    pub async fn detail(&self, group_id: &str) -> Result<GroupInfo> {
        self.status.track(self.detail_inner(group_id)).await
    }

    async fn detail_inner(&self, group_id: &str) -> Result<GroupInfo> {
        let group = self.fetch_info(group_id).await?;
        self.groups.set_detail(group.clone());
        self.groups.replace_everywhere(&group);
        Ok(group)
    }

    async fn fetch_info(&self, group_id: &str) -> Result<GroupInfo> {
        let group = self
            .services
            .api
            .call("/group/info", &json!({ "group_id": group_id }))
            .await?;
        Ok(group)
    }

    pub async fn fetch_members(&self, group_id: &str, refresh: bool) -> Result<Collection<GroupMember>> {
        self.status.track(self.fetch_members_inner(group_id, refresh)).await
    }

    async fn fetch_members_inner(
        &self,
        group_id: &str,
        refresh: bool,
    ) -> Result<Collection<GroupMember>> {
        let key = members_key(group_id);
        let view = if refresh {
            let query = GroupMembers {
                group_id: group_id.to_string(),
                limit: None,
            };
            self.services.pages.refresh(&self.members, &key, query).await?
        } else {
            self.services.pages.load_more(&self.members, &key).await?
        };
        Ok(view)
    }

    /// Join a group. Every cached copy becomes a membership in the role the
    /// server granted, and `mine` is refreshed.
    pub async fn join(&self, group_id: &str, password: Option<&str>) -> Result<JoinGroupResponse> {
        let result = self.join_inner(group_id, password).await;
        self.status.record(result)
    }

    async fn join_inner(&self, group_id: &str, password: Option<&str>) -> Result<JoinGroupResponse> {
        let body = json!({ "group_id": group_id, "password": password });
        let joined: JoinGroupResponse = self.services.api.call("/group/join", &body).await?;

        let copies = self
            .groups
            .mutate_everywhere(&group_id.to_string(), &Membership::joined(joined.role.clone()));
        info!(group = group_id, role = %joined.role, copies, "joined group");

        let mine = CollectionKey::new(MINE);
        if let Err(e) = self
            .services
            .pages
            .refresh(&self.groups, &mine, UserGroups::default())
            .await
        {
            warn!(error = %e, "could not refresh groups after joining");
        }
        Ok(joined)
    }

    /// Leave a group: it drops out of `mine`, other copies lose membership.
    pub async fn leave(&self, group_id: &str) -> Result<()> {
        let result = self.leave_inner(group_id).await;
        self.status.record(result)
    }

    async fn leave_inner(&self, group_id: &str) -> Result<()> {
        self.services
            .api
            .command("/group/leave", &json!({ "group_id": group_id }))
            .await?;

        let id = group_id.to_string();
        self.groups.remove(&MINE.into(), &id);
        self.groups.mutate_everywhere(&id, &Membership::left());
        self.members.reset(&members_key(group_id));
        info!(group = group_id, "left group");
        Ok(())
    }

    pub async fn recent_joined(&self) -> Result<Vec<GroupInfo>> {
        self.status.track(self.recent_joined_inner()).await
    }

    async fn recent_joined_inner(&self) -> Result<Vec<GroupInfo>> {
        let groups: Vec<GroupInfo> = self.services.api.call_empty("/group/recent_joined").await?;
        self.set_recent(groups.clone());
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::group::roles;
    use nearby_sync::transport::memory::{fail, ok, ok_empty, MemoryTransport};
    use nearby_sync::{ConfirmPolicy, RequestGateway};
    use std::sync::Arc;

    fn group(id: &str, is_member: bool) -> Value {
        json!({
            "group_id": id,
            "name": format!("group {id}"),
            "creator_id": "1",
            "created_at": "2024-05-01T08:00:00Z",
            "latitude": 35.16,
            "longitude": 112.68,
            "member_count": 3,
            "is_member": is_member,
            "user_role": if is_member { "member" } else { "" }
        })
    }

    fn store(transport: Arc<MemoryTransport>) -> GroupStore {
        let api = Arc::new(RequestGateway::anonymous(transport));
        GroupStore::new(Services::new(api, ConfirmPolicy::default()))
    }

    #[tokio::test]
    async fn test_nearby_defaults() {
        let transport = MemoryTransport::new();
        transport.route("/group/nearby", |_| {
            Ok(ok(json!({ "items": [group("g1", false)], "pagination": { "has_more": false } })))
        });
        let store = store(transport.clone());

        let view = store
            .fetch_nearby(Coordinates::new(35.16, 112.68), None, true)
            .await
            .unwrap();
        assert_eq!(view.items.len(), 1);

        let call = &transport.calls_to("/group/nearby")[0];
        assert_eq!(call.arg("radius"), &json!(5_000.0));
        assert_eq!(call.arg("limit"), &json!(10));
        assert!(call.arg("cursor").is_null());
    }

    #[tokio::test]
    async fn test_members_page_size() {
        let transport = MemoryTransport::new();
        transport.route("/group/members", |_| {
            Ok(ok(json!({
                "members": [{ "user_id": 4, "nickname": "dora", "role": "owner" }],
                "has_more": false
            })))
        });
        let store = store(transport.clone());

        let view = store.fetch_members("g1", true).await.unwrap();
        assert_eq!(view.items[0].user_id, UserId(4));
        assert_eq!(transport.calls_to("/group/members")[0].arg("limit"), &json!(20));
        assert_eq!(store.members("g1").len(), 1);
        assert!(store.members("g2").is_empty());
    }

    #[tokio::test]
    async fn test_shared_member_stays_per_group() {
        let transport = MemoryTransport::new();
        transport.route("/group/members", |call| {
            let role = if call.arg("group_id") == &json!("g1") { "owner" } else { "member" };
            Ok(ok(json!({
                "members": [{ "user_id": 4, "nickname": "dora", "role": role }],
                "has_more": false
            })))
        });
        transport.route("/group/leave", |_| Ok(ok_empty()));
        let store = store(transport);

        store.fetch_members("g1", true).await.unwrap();
        store.fetch_members("g2", true).await.unwrap();

        let first = &store.members("g1").items[0];
        let second = &store.members("g2").items[0];
        assert_eq!((first.group_id.as_str(), first.role.as_str()), ("g1", roles::OWNER));
        assert_eq!((second.group_id.as_str(), second.role.as_str()), ("g2", roles::MEMBER));
        assert_eq!(store.members.homes(&("g1".to_string(), UserId(4))).len(), 1);

        store.leave("g1").await.unwrap();
        assert!(store.members("g1").is_empty());
        assert_eq!(store.members("g2").len(), 1);
    }

    #[tokio::test]
    async fn test_join_marks_every_copy_and_refreshes_mine() {
        let transport = MemoryTransport::new();
        transport.route("/group/nearby", |_| {
            Ok(ok(json!({ "items": [group("g1", false)], "has_more": false })))
        });
        transport.route("/group/info", |_| Ok(ok(group("g1", false))));
        transport.route("/group/join", |_| Ok(ok(json!({ "success": true, "role": "member" }))));
        transport.route("/group/user_groups", |_| {
            Ok(ok(json!({ "items": [group("g1", true)], "has_more": false })))
        });
        let store = store(transport.clone());

        store
            .fetch_nearby(Coordinates::new(35.16, 112.68), None, true)
            .await
            .unwrap();
        store.detail("g1").await.unwrap();
        let joined = store.join("g1", Some("1234")).await.unwrap();

        assert_eq!(joined.role, roles::MEMBER);
        assert!(store.nearby().items[0].is_member);
        assert!(store.current().unwrap().is_member);
        assert_eq!(store.mine().items.len(), 1);
        assert_eq!(transport.calls_to("/group/join")[0].arg("password"), &json!("1234"));
    }

    #[tokio::test]
    async fn test_join_rejected() {
        let transport = MemoryTransport::new();
        transport.route("/group/join", |_| Ok(fail(1003, "群组密码错误")));
        let store = store(transport.clone());

        let err = store.join("g1", Some("bad!")).await.unwrap_err();
        assert_eq!(err.code(), Some(nearby_sync::ErrorCode::Forbidden));
        assert_eq!(store.last_error().as_deref(), Some("群组密码错误"));
        assert_eq!(transport.call_count("/group/user_groups"), 0);
    }

    #[tokio::test]
    async fn test_leave_drops_from_mine_only() {
        let transport = MemoryTransport::new();
        transport.route("/group/user_groups", |_| {
            Ok(ok(json!({ "items": [group("g1", true)], "has_more": false })))
        });
        transport.route("/group/search_by_name", |_| {
            Ok(ok(json!({ "items": [group("g1", true)], "has_more": false })))
        });
        transport.route("/group/leave", |_| Ok(ok_empty()));
        let store = store(transport);

        store.fetch_user_groups(true).await.unwrap();
        store.search_by_name("group", true).await.unwrap();
        store.leave("g1").await.unwrap();

        assert!(store.mine().is_empty());
        let listed = &store.by_name().items[0];
        assert!(!listed.is_member);
    }

    #[tokio::test]
    async fn test_recent_joined_is_plain_list() {
        let transport = MemoryTransport::new();
        transport.route("/group/recent_joined", |_| Ok(ok(json!([group("g1", true)]))));
        let store = store(transport.clone());

        let recent = store.recent_joined().await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(store.recent(), recent);
        assert!(transport.calls_to("/group/recent_joined")[0].body.is_none());
    }

    #[tokio::test]
    async fn test_short_name_rejected() {
        let store = store(MemoryTransport::new());
        let err = store.search_by_name("", true).await.unwrap_err();
        assert!(matches!(err, crate::ClientError::Invalid(_)));
    }
}
