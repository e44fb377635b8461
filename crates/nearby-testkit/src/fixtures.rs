//! Sample entities and client setup for integration tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use nearby::{ClientConfig, FixedLocation, LocationProvider, NearbyClient, NoLocation};
use nearby_core::group::roles;
use nearby_core::message::kinds;
use nearby_core::{
    CheckIn, Conversation, Coordinates, DirectMessage, GroupInfo, GroupMember, User, UserId,
    DEFAULT_LOCATION,
};
use nearby_store::{CredentialStore, MemoryCredentialStore};

use crate::backend::FakeBackend;

/// Fixed reference time so fixtures compare equal across runs.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A point `n` small steps north-east of the default location.
pub fn near(n: i64) -> Coordinates {
    let step = 0.001 * n as f64;
    Coordinates::new(DEFAULT_LOCATION.latitude + step, DEFAULT_LOCATION.longitude + step)
}

pub fn sample_checkin(id: &str, user_id: i64) -> CheckIn {
    let at = near(user_id);
    CheckIn {
        id: 0,
        checkin_id: id.to_string(),
        user_id: UserId(user_id),
        nickname: format!("user{user_id}"),
        description: format!("check-in {id}"),
        latitude: at.latitude,
        longitude: at.longitude,
        location_name: "南天门".into(),
        distance: 0.0,
        created_at: epoch(),
        tags: Vec::new(),
        likes_count: 0,
        comments_count: 0,
        liked_by_me: false,
    }
}

pub fn sample_group(id: &str, creator: i64) -> GroupInfo {
    let at = near(creator);
    GroupInfo {
        group_id: id.to_string(),
        name: format!("group {id}"),
        description: None,
        creator_id: UserId(creator),
        creator_name: format!("user{creator}"),
        created_at: epoch(),
        last_active_at: None,
        latitude: at.latitude,
        longitude: at.longitude,
        member_count: 1,
        distance: 0.0,
        location_name: "南天门".into(),
        is_password_required: false,
        is_member: false,
        user_role: String::new(),
    }
}

pub fn sample_member(group_id: &str, user_id: i64) -> GroupMember {
    GroupMember {
        group_id: group_id.to_string(),
        user_id: UserId(user_id),
        nickname: format!("user{user_id}"),
        last_active: None,
        role: roles::MEMBER.into(),
        join_time: Some(epoch()),
    }
}

/// Conversation id shared by two users, whichever side asks.
pub fn conversation_id(a: i64, b: i64) -> String {
    format!("dm-{}-{}", a.min(b), a.max(b))
}

pub fn sample_message(id: &str, from: i64, to: i64, minutes: i64) -> DirectMessage {
    DirectMessage {
        message_id: id.to_string(),
        conversation_id: conversation_id(from, to),
        sender_id: UserId(from),
        sender_name: format!("user{from}"),
        recipient_id: UserId(to),
        recipient_name: format!("user{to}"),
        content: format!("message {id}"),
        message_type: kinds::TEXT.into(),
        sent_at: epoch() + Duration::minutes(minutes),
        read_at: None,
        latitude: DEFAULT_LOCATION.latitude,
        longitude: DEFAULT_LOCATION.longitude,
    }
}

pub fn sample_conversation(me: i64, peer: i64, unread: i64) -> Conversation {
    Conversation {
        conversation_id: conversation_id(me, peer),
        peer_id: UserId(peer),
        peer_name: format!("user{peer}"),
        last_message: String::new(),
        last_message_time: None,
        unread_count: unread,
    }
}

pub fn sample_user(user_id: i64) -> User {
    let at = near(user_id);
    User {
        user_id: UserId(user_id),
        nickname: format!("user{user_id}"),
        last_active: Some(epoch()),
        latitude: Some(at.latitude),
        longitude: Some(at.longitude),
        distance: None,
        location_name: None,
        online_status: None,
    }
}

/// A client wired to a [`FakeBackend`].
pub struct TestClient {
    pub backend: Arc<FakeBackend>,
    pub credentials: Arc<dyn CredentialStore>,
    pub client: NearbyClient,
}

impl TestClient {
    /// Fresh backend, in-memory credentials, no device positioning.
    pub fn new() -> Self {
        Self::with_backend(FakeBackend::new())
    }

    pub fn with_backend(backend: Arc<FakeBackend>) -> Self {
        Self::with_parts(backend, Arc::new(MemoryCredentialStore::new()), Arc::new(NoLocation))
    }

    /// Another client of the same backend over `credentials`, as after a
    /// restart of the app.
    pub fn reopen(&self, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::with_parts(self.backend.clone(), credentials, Arc::new(NoLocation))
    }

    /// Client whose device always reports `at`.
    pub fn located_at(at: Coordinates) -> Self {
        Self::with_parts(
            FakeBackend::new(),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(FixedLocation(at)),
        )
    }

    pub fn with_parts(
        backend: Arc<FakeBackend>,
        credentials: Arc<dyn CredentialStore>,
        provider: Arc<dyn LocationProvider>,
    ) -> Self {
        let client = NearbyClient::with_parts(
            ClientConfig::default(),
            backend.transport(),
            credentials.clone(),
            provider,
        );
        Self {
            backend,
            credentials,
            client,
        }
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::Entity;

    #[test]
    fn test_conversation_id_is_symmetric() {
        assert_eq!(conversation_id(3, 9), conversation_id(9, 3));
        assert_eq!(sample_message("m1", 9, 3, 0).conversation_id, "dm-3-9");
    }

    #[test]
    fn test_samples_are_identified() {
        assert_eq!(sample_checkin("c1", 1).id(), "c1");
        assert_eq!(sample_group("g1", 1).id(), "g1");
        assert_eq!(sample_user(4).id(), UserId(4));
        assert_ne!(sample_member("g1", 4).id(), sample_member("g2", 4).id());
        assert_eq!(sample_checkin("c1", 1), sample_checkin("c1", 1));
    }
}
