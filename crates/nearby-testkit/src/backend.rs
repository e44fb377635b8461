//! An in-process server speaking the Nearby API over [`MemoryTransport`].
//!
//! The backend keeps just enough state to behave like the real server for
//! the client's purposes: accounts and rotating token pairs, check-ins with
//! per-user likes, groups with memberships, direct messages with read
//! receipts, and user locations. Every list endpoint pages with an opaque
//! cursor the client must echo back.
//!
//! Failures can be injected per path with [`FakeBackend::fail_path`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use nearby_core::group::roles;
use nearby_core::{
    CheckIn, Conversation, Coordinates, CreateCheckinRequest, CreateGroupRequest, DirectMessage,
    GroupInfo, GroupMember, MarkReadRequest, SendDirectMessageRequest, UpdateLocationRequest, User,
    UserId, SOCIAL_PAGE_LIMIT, THREAD_PAGE_LIMIT,
};
use nearby_sync::transport::memory::{fail, ok, ok_empty, MemoryTransport, RecordedCall};

use crate::fixtures::conversation_id;

/// Server error codes the backend answers with.
pub mod codes {
    pub const BAD_REQUEST: i64 = 1000;
    pub const UNAUTHORIZED: i64 = 1002;
    pub const FORBIDDEN: i64 = 1003;
    pub const NOT_FOUND: i64 = 1004;
    pub const CONFLICT: i64 = 1005;
    pub const INTERNAL: i64 = 5000;
}

const ROUTES: &[&str] = &[
    "/user/register",
    "/user/login",
    "/user/create_temp_user",
    "/user/refresh-token",
    "/user/update_location",
    "/user/search_by_location",
    "/user/search_by_name",
    "/user/search_by_id",
    "/checkin/create",
    "/checkin/delete",
    "/checkin/search_by_id",
    "/checkin/search_by_location",
    "/checkin/history",
    "/checkin/search_by_tags",
    "/checkin/like",
    "/checkin/unlike",
    "/group/create",
    "/group/info",
    "/group/user_groups",
    "/group/nearby",
    "/group/search_by_name",
    "/group/members",
    "/group/join",
    "/group/leave",
    "/group/recent_joined",
    "/message/conversations",
    "/message/direct_history",
    "/message/notifications",
    "/message/send_direct",
    "/message/mark_read",
    "/message/unread_count",
    "/message/delete",
];

/// Fake API server. Cheap to share: clone the `Arc`.
pub struct FakeBackend {
    transport: Arc<MemoryTransport>,
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let transport = MemoryTransport::new();
        let state = Arc::new(Mutex::new(State::new()));
        for path in ROUTES {
            let state = state.clone();
            transport.route(path, move |call| Ok(lock(&state).handle(call)));
        }
        Arc::new(Self { transport, state })
    }

    /// The transport to hand to a client.
    pub fn transport(&self) -> Arc<MemoryTransport> {
        self.transport.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Register an account directly, bypassing the API.
    pub fn add_account(&self, login_id: &str, password: &str, nickname: &str) -> UserId {
        UserId(self.state().add_account(login_id, password, nickname))
    }

    /// Lifetime of tokens issued from now on.
    pub fn set_token_ttl(&self, ttl: Duration) {
        self.state().token_ttl = ttl;
    }

    /// Answer refreshes with the rotated tokens only, no user fields.
    pub fn omit_identity_on_refresh(&self) {
        self.state().refresh_names_user = false;
    }

    /// Forget every issued token, as after a server-side logout.
    pub fn revoke_sessions(&self) {
        let mut state = self.state();
        state.access.clear();
        state.refresh.clear();
    }

    /// Answer every call to `path` with a failure envelope.
    pub fn fail_path(&self, path: &str, code: i64, message: &str) {
        self.state()
            .failures
            .insert(path.to_string(), (code, message.to_string()));
    }

    /// Undo [`FakeBackend::fail_path`].
    pub fn heal_path(&self, path: &str) {
        self.state().failures.remove(path);
    }

    /// Add check-ins by `author`, newest first, ids `"{prefix}-0"` onward.
    pub fn seed_checkins(&self, prefix: &str, author: UserId, count: usize) -> Vec<String> {
        let mut state = self.state();
        (0..count)
            .map(|i| {
                let id = format!("{prefix}-{i}");
                let mut checkin = crate::fixtures::sample_checkin(&id, author.0);
                checkin.created_at = state.now - Duration::minutes(i as i64);
                state.checkins.push(checkin);
                id
            })
            .collect()
    }

    pub fn add_checkin(&self, checkin: CheckIn) {
        self.state().checkins.push(checkin);
    }

    /// Add a group owned by its creator, optionally password-protected.
    pub fn add_group(&self, group: GroupInfo, password: Option<&str>) {
        let mut state = self.state();
        state
            .members
            .insert(group.group_id.clone(), vec![(group.creator_id.0, roles::OWNER.to_string())]);
        if let Some(password) = password {
            state
                .passwords
                .insert(group.group_id.clone(), password.to_string());
        }
        state.groups.push(group);
    }

    pub fn add_message(&self, message: DirectMessage) {
        self.state().messages.push(message);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn likes_count(&self, checkin_id: &str) -> Option<i64> {
        self.state()
            .checkins
            .iter()
            .find(|c| c.checkin_id == checkin_id)
            .map(|c| c.likes_count)
    }

    pub fn has_liked(&self, checkin_id: &str, user: UserId) -> bool {
        self.state()
            .likes
            .contains(&(checkin_id.to_string(), user.0))
    }

    pub fn is_member(&self, group_id: &str, user: UserId) -> bool {
        self.state().role_of(group_id, user.0).is_some()
    }

    pub fn is_read(&self, message_id: &str) -> bool {
        self.state()
            .messages
            .iter()
            .any(|m| m.message_id == message_id && m.read_at.is_some())
    }

    /// Last location a user published.
    pub fn location_of(&self, user: UserId) -> Option<(Coordinates, String)> {
        self.state()
            .accounts
            .iter()
            .find(|a| a.user_id == user.0)
            .and_then(|a| a.location.clone())
    }

    /// Number of refresh tokens currently honored.
    pub fn live_refresh_tokens(&self) -> usize {
        self.state().refresh.len()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Server state
// ─────────────────────────────────────────────────────────────────────────────

struct Account {
    user_id: i64,
    login_id: String,
    password: String,
    nickname: String,
    location: Option<(Coordinates, String)>,
}

struct State {
    now: DateTime<Utc>,
    next_id: u64,
    token_ttl: Duration,
    refresh_names_user: bool,
    accounts: Vec<Account>,
    access: HashMap<String, (i64, DateTime<Utc>)>,
    refresh: HashMap<String, i64>,
    checkins: Vec<CheckIn>,
    likes: HashSet<(String, i64)>,
    groups: Vec<GroupInfo>,
    members: HashMap<String, Vec<(i64, String)>>,
    passwords: HashMap<String, String>,
    messages: Vec<DirectMessage>,
    failures: HashMap<String, (i64, String)>,
}

type Reply = Value;

/// `{"alg":"HS256","typ":"JWT"}`
const JWT_HEADER: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";

impl State {
    fn new() -> Self {
        Self {
            now: Utc::now(),
            next_id: 1,
            token_ttl: Duration::hours(2),
            refresh_names_user: true,
            accounts: Vec::new(),
            access: HashMap::new(),
            refresh: HashMap::new(),
            checkins: Vec::new(),
            likes: HashSet::new(),
            groups: Vec::new(),
            members: HashMap::new(),
            passwords: HashMap::new(),
            messages: Vec::new(),
            failures: HashMap::new(),
        }
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn add_account(&mut self, login_id: &str, password: &str, nickname: &str) -> i64 {
        let user_id = self.next() as i64;
        self.accounts.push(Account {
            user_id,
            login_id: login_id.to_string(),
            password: password.to_string(),
            nickname: nickname.to_string(),
            location: None,
        });
        user_id
    }

    fn nickname(&self, user_id: i64) -> String {
        self.accounts
            .iter()
            .find(|a| a.user_id == user_id)
            .map(|a| a.nickname.clone())
            .unwrap_or_default()
    }

    fn handle(&mut self, call: &RecordedCall) -> Reply {
        if let Some((code, message)) = self.failures.get(&call.path) {
            return fail(*code, message);
        }
        let body = call.body.clone().unwrap_or(Value::Null);

        match call.path.as_str() {
            "/user/register" => self.register(&body),
            "/user/login" => self.login(&body),
            "/user/create_temp_user" => self.create_guest(&body),
            "/user/refresh-token" => self.refresh_token(&body),
            path => match self.caller(call.bearer.as_deref()) {
                Some(user) => self.dispatch(path, user, &body),
                None => fail(codes::UNAUTHORIZED, "未授权"),
            },
        }
    }

    fn dispatch(&mut self, path: &str, user: i64, body: &Value) -> Reply {
        match path {
            "/user/update_location" => self.update_location(user, body),
            "/user/search_by_location" => self.users_nearby(user, body),
            "/user/search_by_name" => self.users_by_name(body),
            "/user/search_by_id" => self.user_by_id(body),
            "/checkin/create" => self.create_checkin(user, body),
            "/checkin/delete" => self.delete_checkin(user, body),
            "/checkin/search_by_id" => self.checkin_by_id(user, body),
            "/checkin/search_by_location" => self.checkins_nearby(user, body),
            "/checkin/history" => self.checkin_history(user, body),
            "/checkin/search_by_tags" => self.checkins_by_tags(user, body),
            "/checkin/like" => self.set_like(user, body, true),
            "/checkin/unlike" => self.set_like(user, body, false),
            "/group/create" => self.create_group(user, body),
            "/group/info" => self.group_info(user, body),
            "/group/user_groups" => self.user_groups(user, body),
            "/group/nearby" => self.groups_nearby(user, body),
            "/group/search_by_name" => self.groups_by_name(user, body),
            "/group/members" => self.group_members(body),
            "/group/join" => self.join_group(user, body),
            "/group/leave" => self.leave_group(user, body),
            "/group/recent_joined" => self.recent_joined(user),
            "/message/conversations" => self.conversations(user, body),
            "/message/direct_history" => self.direct_history(user, body),
            "/message/notifications" => page(Vec::<DirectMessage>::new(), body, SOCIAL_PAGE_LIMIT, true),
            "/message/send_direct" => self.send_direct(user, body),
            "/message/mark_read" => self.mark_read(user, body),
            "/message/unread_count" => self.unread_count(user),
            "/message/delete" => self.delete_message(user, body),
            _ => fail(codes::NOT_FOUND, "no such endpoint"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auth
    // ─────────────────────────────────────────────────────────────────────────

    fn issue(&mut self, user_id: i64) -> Reply {
        self.issue_with(user_id, true)
    }

    /// Access tokens are JWT-shaped with a `sub` claim; the signature part
    /// is a plain serial.
    fn issue_with(&mut self, user_id: i64, names_user: bool) -> Reply {
        let n = self.next();
        let claims = json!({ "sub": user_id, "jti": n });
        let access = format!(
            "{JWT_HEADER}.{}.sig-{n}",
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let refresh = format!("refresh-{n}");
        let expires_at = Utc::now() + self.token_ttl;
        self.access.insert(access.clone(), (user_id, expires_at));
        self.refresh.insert(refresh.clone(), user_id);

        let mut data = json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_at": expires_at,
        });
        if names_user {
            data["user_id"] = json!(user_id);
            data["nickname"] = json!(self.nickname(user_id));
        }
        ok(data)
    }

    fn caller(&self, bearer: Option<&str>) -> Option<i64> {
        let (user, expires_at) = self.access.get(bearer?)?;
        (*expires_at > Utc::now()).then_some(*user)
    }

    fn register(&mut self, body: &Value) -> Reply {
        let login_id = str_field(body, "login_id");
        if self.accounts.iter().any(|a| a.login_id == login_id) {
            return fail(codes::CONFLICT, "用户名已存在");
        }
        let user_id = self.add_account(
            &login_id,
            &str_field(body, "password"),
            &str_field(body, "nickname"),
        );
        self.issue(user_id)
    }

    fn login(&mut self, body: &Value) -> Reply {
        let login_id = str_field(body, "login_id");
        let password = str_field(body, "password");
        let user_id = self
            .accounts
            .iter()
            .find(|a| a.login_id == login_id && a.password == password)
            .map(|a| a.user_id);
        match user_id {
            Some(user_id) => self.issue(user_id),
            None => fail(codes::UNAUTHORIZED, "用户名或密码错误"),
        }
    }

    fn create_guest(&mut self, body: &Value) -> Reply {
        let n = self.next_id;
        let nickname = body
            .get("nickname")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("游客{n}"));
        let user_id = self.add_account(&format!("guest-{n}"), "", &nickname);
        self.issue(user_id)
    }

    /// Refresh tokens are single use.
    fn refresh_token(&mut self, body: &Value) -> Reply {
        match self.refresh.remove(&str_field(body, "refresh_token")) {
            Some(user_id) => {
                let names_user = self.refresh_names_user;
                self.issue_with(user_id, names_user)
            }
            None => fail(codes::UNAUTHORIZED, "refresh token invalid"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    fn render_user(&self, account: &Account) -> User {
        User {
            user_id: UserId(account.user_id),
            nickname: account.nickname.clone(),
            last_active: Some(self.now),
            latitude: account.location.as_ref().map(|(at, _)| at.latitude),
            longitude: account.location.as_ref().map(|(at, _)| at.longitude),
            distance: None,
            location_name: account.location.as_ref().map(|(_, name)| name.clone()),
            online_status: Some("online".into()),
        }
    }

    fn update_location(&mut self, user: i64, body: &Value) -> Reply {
        let Ok(request) = serde_json::from_value::<UpdateLocationRequest>(body.clone()) else {
            return fail(codes::BAD_REQUEST, "invalid location");
        };
        if let Some(account) = self.accounts.iter_mut().find(|a| a.user_id == user) {
            account.location = Some((
                Coordinates::new(request.latitude, request.longitude),
                request.location_name,
            ));
        }
        ok_empty()
    }

    fn users_nearby(&self, user: i64, body: &Value) -> Reply {
        let users: Vec<User> = self
            .accounts
            .iter()
            .filter(|a| a.user_id != user && a.location.is_some())
            .map(|a| self.render_user(a))
            .collect();
        page(users, body, SOCIAL_PAGE_LIMIT, true)
    }

    fn users_by_name(&self, body: &Value) -> Reply {
        let keyword = str_field(body, "keyword");
        let users: Vec<User> = self
            .accounts
            .iter()
            .filter(|a| a.nickname.contains(&keyword))
            .map(|a| self.render_user(a))
            .collect();
        page(users, body, SOCIAL_PAGE_LIMIT, false)
    }

    fn user_by_id(&self, body: &Value) -> Reply {
        let id = body.get("user_id").and_then(Value::as_i64);
        match self.accounts.iter().find(|a| Some(a.user_id) == id) {
            Some(account) => ok(to_json(&self.render_user(account))),
            None => fail(codes::NOT_FOUND, "用户不存在"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Check-ins
    // ─────────────────────────────────────────────────────────────────────────

    fn render_checkin(&self, checkin: &CheckIn, viewer: i64) -> CheckIn {
        let mut rendered = checkin.clone();
        rendered.liked_by_me = self.likes.contains(&(checkin.checkin_id.clone(), viewer));
        rendered.nickname = self.nickname(checkin.user_id.0);
        rendered
    }

    fn rendered_checkins(&self, viewer: i64, keep: impl Fn(&CheckIn) -> bool) -> Vec<CheckIn> {
        let mut list: Vec<CheckIn> = self
            .checkins
            .iter()
            .filter(|c| keep(*c))
            .map(|c| self.render_checkin(c, viewer))
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    fn create_checkin(&mut self, user: i64, body: &Value) -> Reply {
        let Ok(request) = serde_json::from_value::<CreateCheckinRequest>(body.clone()) else {
            return fail(codes::BAD_REQUEST, "invalid check-in");
        };
        let checkin_id = format!("ck-{}", self.next());
        let mut checkin = crate::fixtures::sample_checkin(&checkin_id, user);
        checkin.description = request.description;
        checkin.latitude = request.latitude;
        checkin.longitude = request.longitude;
        checkin.location_name = request.location_name;
        checkin.tags = request.tags;
        checkin.created_at = Utc::now();
        self.checkins.push(checkin);
        ok(json!({ "checkin_id": checkin_id }))
    }

    fn delete_checkin(&mut self, user: i64, body: &Value) -> Reply {
        let id = str_field(body, "checkin_id");
        match self.checkins.iter().position(|c| c.checkin_id == id) {
            Some(index) if self.checkins[index].user_id.0 == user => {
                self.checkins.remove(index);
                self.likes.retain(|(checkin, _)| *checkin != id);
                ok_empty()
            }
            Some(_) => fail(codes::FORBIDDEN, "无权删除"),
            None => fail(codes::NOT_FOUND, "签到不存在"),
        }
    }

    fn checkin_by_id(&self, user: i64, body: &Value) -> Reply {
        let id = str_field(body, "checkin_id");
        match self.checkins.iter().find(|c| c.checkin_id == id) {
            Some(checkin) => ok(to_json(&self.render_checkin(checkin, user))),
            None => fail(codes::NOT_FOUND, "签到不存在"),
        }
    }

    fn checkins_nearby(&self, user: i64, body: &Value) -> Reply {
        page(self.rendered_checkins(user, |_| true), body, SOCIAL_PAGE_LIMIT, false)
    }

    fn checkin_history(&self, user: i64, body: &Value) -> Reply {
        let author = body.get("user_id").and_then(Value::as_i64).unwrap_or(user);
        let list = self.rendered_checkins(user, |c| c.user_id.0 == author);
        page(list, body, SOCIAL_PAGE_LIMIT, true)
    }

    fn checkins_by_tags(&self, user: i64, body: &Value) -> Reply {
        let tags: Vec<String> = body
            .get("tags")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();
        let list = self.rendered_checkins(user, |c| c.tags.iter().any(|t| tags.contains(t)));
        page(list, body, SOCIAL_PAGE_LIMIT, false)
    }

    fn set_like(&mut self, user: i64, body: &Value, like: bool) -> Reply {
        let id = str_field(body, "checkin_id");
        let Some(checkin) = self.checkins.iter_mut().find(|c| c.checkin_id == id) else {
            return fail(codes::NOT_FOUND, "签到不存在");
        };
        let key = (id, user);
        if like {
            if !self.likes.insert(key) {
                return fail(codes::CONFLICT, "已经点赞");
            }
            checkin.likes_count += 1;
        } else {
            if !self.likes.remove(&key) {
                return fail(codes::CONFLICT, "尚未点赞");
            }
            checkin.likes_count -= 1;
        }
        ok_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    fn role_of(&self, group_id: &str, user: i64) -> Option<&str> {
        self.members
            .get(group_id)?
            .iter()
            .find(|(member, _)| *member == user)
            .map(|(_, role)| role.as_str())
    }

    fn render_group(&self, group: &GroupInfo, viewer: i64) -> GroupInfo {
        let mut rendered = group.clone();
        let role = self.role_of(&group.group_id, viewer);
        rendered.is_member = role.is_some();
        rendered.user_role = role.unwrap_or_default().to_string();
        rendered.member_count = self.members.get(&group.group_id).map_or(0, |m| m.len() as i64);
        rendered.is_password_required = self.passwords.contains_key(&group.group_id);
        rendered
    }

    fn rendered_groups(&self, viewer: i64, keep: impl Fn(&GroupInfo) -> bool) -> Vec<GroupInfo> {
        self.groups
            .iter()
            .filter(|g| keep(*g))
            .map(|g| self.render_group(g, viewer))
            .collect()
    }

    fn create_group(&mut self, user: i64, body: &Value) -> Reply {
        let Ok(request) = serde_json::from_value::<CreateGroupRequest>(body.clone()) else {
            return fail(codes::BAD_REQUEST, "invalid group");
        };
        let group_id = format!("gr-{}", self.next());
        let mut group = crate::fixtures::sample_group(&group_id, user);
        group.name = request.name;
        group.description = request.description;
        group.latitude = request.latitude;
        group.longitude = request.longitude;
        group.location_name = request.location_name;
        group.creator_name = self.nickname(user);
        self.members
            .insert(group_id.clone(), vec![(user, roles::OWNER.to_string())]);
        if let Some(password) = request.password {
            self.passwords.insert(group_id.clone(), password);
        }
        self.groups.insert(0, group);
        ok(json!({ "group_id": group_id }))
    }

    fn group_info(&self, user: i64, body: &Value) -> Reply {
        let id = str_field(body, "group_id");
        match self.groups.iter().find(|g| g.group_id == id) {
            Some(group) => ok(to_json(&self.render_group(group, user))),
            None => fail(codes::NOT_FOUND, "群组不存在"),
        }
    }

    fn user_groups(&self, user: i64, body: &Value) -> Reply {
        let member = body.get("user_id").and_then(Value::as_i64).unwrap_or(user);
        let list = self.rendered_groups(user, |g| self.role_of(&g.group_id, member).is_some());
        page(list, body, SOCIAL_PAGE_LIMIT, true)
    }

    fn groups_nearby(&self, user: i64, body: &Value) -> Reply {
        page(self.rendered_groups(user, |_| true), body, SOCIAL_PAGE_LIMIT, true)
    }

    fn groups_by_name(&self, user: i64, body: &Value) -> Reply {
        let keyword = str_field(body, "keyword");
        let list = self.rendered_groups(user, |g| g.name.contains(&keyword));
        page(list, body, SOCIAL_PAGE_LIMIT, true)
    }

    fn group_members(&self, body: &Value) -> Reply {
        let id = str_field(body, "group_id");
        let Some(members) = self.members.get(&id) else {
            return fail(codes::NOT_FOUND, "群组不存在");
        };
        let list: Vec<GroupMember> = members
            .iter()
            .map(|(user, role)| GroupMember {
                group_id: String::new(),
                user_id: UserId(*user),
                nickname: self.nickname(*user),
                last_active: None,
                role: role.clone(),
                join_time: Some(self.now),
            })
            .collect();
        page(list, body, THREAD_PAGE_LIMIT, false)
    }

    fn join_group(&mut self, user: i64, body: &Value) -> Reply {
        let id = str_field(body, "group_id");
        if !self.groups.iter().any(|g| g.group_id == id) {
            return fail(codes::NOT_FOUND, "群组不存在");
        }
        if self.role_of(&id, user).is_some() {
            return fail(codes::CONFLICT, "已经是群成员");
        }
        if let Some(expected) = self.passwords.get(&id) {
            if body.get("password").and_then(Value::as_str) != Some(expected.as_str()) {
                return fail(codes::FORBIDDEN, "群组密码错误");
            }
        }
        self.members
            .entry(id)
            .or_default()
            .push((user, roles::MEMBER.to_string()));
        ok(json!({ "success": true, "role": roles::MEMBER }))
    }

    fn leave_group(&mut self, user: i64, body: &Value) -> Reply {
        let id = str_field(body, "group_id");
        let Some(members) = self.members.get_mut(&id) else {
            return fail(codes::NOT_FOUND, "群组不存在");
        };
        let before = members.len();
        members.retain(|(member, _)| *member != user);
        if members.len() == before {
            return fail(codes::NOT_FOUND, "不是群成员");
        }
        ok_empty()
    }

    fn recent_joined(&self, user: i64) -> Reply {
        let list = self.rendered_groups(user, |g| self.role_of(&g.group_id, user).is_some());
        ok(to_json(&list))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    fn involves(message: &DirectMessage, user: i64) -> bool {
        message.sender_id.0 == user || message.recipient_id.0 == user
    }

    fn conversations(&self, user: i64, body: &Value) -> Reply {
        let mut by_id: HashMap<String, Conversation> = HashMap::new();
        for message in self.messages.iter().filter(|m| Self::involves(m, user)) {
            let peer = if message.sender_id.0 == user {
                message.recipient_id
            } else {
                message.sender_id
            };
            let entry = by_id
                .entry(message.conversation_id.clone())
                .or_insert_with(|| Conversation {
                    conversation_id: message.conversation_id.clone(),
                    peer_id: peer,
                    peer_name: self.nickname(peer.0),
                    last_message: String::new(),
                    last_message_time: None,
                    unread_count: 0,
                });
            if entry.last_message_time.map_or(true, |t| t <= message.sent_at) {
                entry.last_message = message.content.clone();
                entry.last_message_time = Some(message.sent_at);
            }
            if message.recipient_id.0 == user && message.read_at.is_none() {
                entry.unread_count += 1;
            }
        }
        let mut list: Vec<Conversation> = by_id.into_values().collect();
        list.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        page(list, body, SOCIAL_PAGE_LIMIT, true)
    }

    fn direct_history(&self, user: i64, body: &Value) -> Reply {
        let mut conversation = str_field(body, "conversation_id");
        if conversation.is_empty() {
            if let Some(peer) = body.get("user_id").and_then(Value::as_i64) {
                conversation = conversation_id(user, peer);
            }
        }
        let mut list: Vec<DirectMessage> = self
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation && Self::involves(m, user))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        page(list, body, THREAD_PAGE_LIMIT, false)
    }

    fn send_direct(&mut self, user: i64, body: &Value) -> Reply {
        let Ok(request) = serde_json::from_value::<SendDirectMessageRequest>(body.clone()) else {
            return fail(codes::BAD_REQUEST, "invalid message");
        };
        let recipient = request.recipient_id.0;
        if recipient == user {
            return fail(codes::BAD_REQUEST, "不能给自己发消息");
        }
        if !self.accounts.iter().any(|a| a.user_id == recipient) {
            return fail(codes::NOT_FOUND, "用户不存在");
        }

        let message_id = format!("msg-{}", self.next());
        let message = DirectMessage {
            message_id: message_id.clone(),
            conversation_id: conversation_id(user, recipient),
            sender_id: UserId(user),
            sender_name: self.nickname(user),
            recipient_id: request.recipient_id,
            recipient_name: self.nickname(recipient),
            content: request.content,
            message_type: request.message_type,
            sent_at: Utc::now(),
            read_at: None,
            latitude: request.latitude,
            longitude: request.longitude,
        };
        let reply = json!({
            "message_id": message_id,
            "conversation_id": message.conversation_id,
            "recipient_id": message.recipient_id,
            "message_type": message.message_type,
            "sent_at": message.sent_at,
        });
        self.messages.push(message);
        ok(reply)
    }

    fn mark_read(&mut self, user: i64, body: &Value) -> Reply {
        let Ok(request) = serde_json::from_value::<MarkReadRequest>(body.clone()) else {
            return fail(codes::BAD_REQUEST, "invalid receipt");
        };
        let now = Utc::now();
        let mut matched = false;
        for message in self.messages.iter_mut().filter(|m| {
            m.conversation_id == request.conversation_id && m.recipient_id.0 == user
        }) {
            if let Some(id) = &request.message_id {
                if message.message_id != *id {
                    continue;
                }
            }
            matched = true;
            message.read_at.get_or_insert(now);
        }
        if request.message_id.is_some() && !matched {
            return fail(codes::NOT_FOUND, "消息不存在");
        }
        ok_empty()
    }

    fn unread_count(&self, user: i64) -> Reply {
        let direct = self
            .messages
            .iter()
            .filter(|m| m.recipient_id.0 == user && m.read_at.is_none())
            .count() as i64;
        ok(json!({ "total": direct, "direct": direct }))
    }

    fn delete_message(&mut self, user: i64, body: &Value) -> Reply {
        let id = str_field(body, "message_id");
        match self.messages.iter().position(|m| m.message_id == id) {
            Some(index) if Self::involves(&self.messages[index], user) => {
                self.messages.remove(index);
                ok_empty()
            }
            Some(_) => fail(codes::FORBIDDEN, "无权删除"),
            None => fail(codes::NOT_FOUND, "消息不存在"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ─────────────────────────────────────────────────────────────────────────────

fn str_field(body: &Value, field: &str) -> String {
    body.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

const CURSOR_PREFIX: &str = "after:";

/// One page of `items`. Paging fields are read from `pagination` when the
/// request nests them, from the body otherwise. `nested` picks the layout
/// of the reply.
fn page<T: Serialize>(items: Vec<T>, body: &Value, default_limit: usize, nested: bool) -> Reply {
    let offset = body
        .get("cursor")
        .and_then(Value::as_str)
        .and_then(|c| c.strip_prefix(CURSOR_PREFIX))
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);
    let limit = body
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(default_limit, |l| l as usize);

    let total = items.len();
    let end = offset.saturating_add(limit).min(total);
    let slice: Vec<Value> = items
        .iter()
        .skip(offset)
        .take(limit)
        .map(to_json)
        .collect();
    let has_more = end < total;
    let next_cursor = if has_more {
        json!(format!("{CURSOR_PREFIX}{end}"))
    } else {
        Value::Null
    };

    if nested {
        ok(json!({
            "items": slice,
            "pagination": { "has_more": has_more, "next_cursor": next_cursor },
        }))
    } else {
        ok(json!({ "items": slice, "has_more": has_more, "next_cursor": next_cursor }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_sync::Transport;

    async fn post(backend: &FakeBackend, path: &str, body: Value, bearer: Option<&str>) -> Value {
        backend
            .transport()
            .post(path, Some(body), bearer)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_issues_rotating_tokens() {
        let backend = FakeBackend::new();
        backend.add_account("ann", "secret1", "Ann");

        let reply = post(&backend, "/user/login", json!({ "login_id": "ann", "password": "secret1" }), None).await;
        assert_eq!(reply["code"], 0);
        let refresh = reply["data"]["refresh_token"].as_str().unwrap().to_string();

        let rotated = post(&backend, "/user/refresh-token", json!({ "refresh_token": refresh }), None).await;
        assert_eq!(rotated["code"], 0);
        let reused = post(&backend, "/user/refresh-token", json!({ "refresh_token": refresh }), None).await;
        assert_eq!(reused["code"], codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_can_omit_identity() {
        let backend = FakeBackend::new();
        let ann = backend.add_account("ann", "secret1", "Ann");
        backend.omit_identity_on_refresh();

        let reply = post(&backend, "/user/login", json!({ "login_id": "ann", "password": "secret1" }), None).await;
        assert_eq!(reply["data"]["user_id"], json!(ann.get()));
        let refresh = reply["data"]["refresh_token"].as_str().unwrap().to_string();

        let rotated = post(&backend, "/user/refresh-token", json!({ "refresh_token": refresh }), None).await;
        assert!(rotated["data"].get("user_id").is_none());
        let access = rotated["data"]["access_token"].as_str().unwrap();
        assert_eq!(nearby_core::token_subject(access), Some(ann));
    }

    #[tokio::test]
    async fn test_requests_need_a_live_token() {
        let backend = FakeBackend::new();
        let reply = post(&backend, "/checkin/search_by_location", json!({}), Some("forged")).await;
        assert_eq!(reply["code"], codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_pages_follow_the_cursor() {
        let backend = FakeBackend::new();
        let author = backend.add_account("ann", "secret1", "Ann");
        backend.seed_checkins("ck", author, 5);
        let login = post(&backend, "/user/login", json!({ "login_id": "ann", "password": "secret1" }), None).await;
        let token = login["data"]["access_token"].as_str().unwrap().to_string();

        let first = post(&backend, "/checkin/search_by_location", json!({ "limit": 3 }), Some(&token)).await;
        assert_eq!(first["data"]["items"].as_array().unwrap().len(), 3);
        assert_eq!(first["data"]["has_more"], true);

        let cursor = first["data"]["next_cursor"].clone();
        let second = post(
            &backend,
            "/checkin/search_by_location",
            json!({ "limit": 3, "cursor": cursor }),
            Some(&token),
        )
        .await;
        let items = second["data"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["checkin_id"], "ck-3");
        assert_eq!(second["data"]["next_cursor"], Value::Null);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let backend = FakeBackend::new();
        backend.fail_path("/user/login", codes::INTERNAL, "boom");
        let reply = post(&backend, "/user/login", json!({}), None).await;
        assert_eq!(reply["code"], codes::INTERNAL);

        backend.heal_path("/user/login");
        let reply = post(&backend, "/user/login", json!({}), None).await;
        assert_eq!(reply["code"], codes::UNAUTHORIZED);
    }
}
