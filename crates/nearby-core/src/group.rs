//! Location-scoped groups and their members.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::types::UserId;

/// Group roles understood by the server.
pub mod roles {
    pub const MEMBER: &str = "member";
    pub const ADMIN: &str = "admin";
    pub const OWNER: &str = "owner";
}

/// A group as seen by the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub creator_id: UserId,
    #[serde(default)]
    pub creator_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub location_name: String,
    #[serde(default)]
    pub is_password_required: bool,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub user_role: String,
}

impl Entity for GroupInfo {
    type Id = String;

    fn id(&self) -> String {
        self.group_id.clone()
    }
}

/// One member of a group.
///
/// The server omits `group_id` from member listings; the members query
/// fills it in, so one user in two groups stays two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(default)]
    pub group_id: String,
    pub user_id: UserId,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub join_time: Option<DateTime<Utc>>,
}

impl Entity for GroupMember {
    type Id = (String, UserId);

    fn id(&self) -> (String, UserId) {
        (self.group_id.clone(), self.user_id)
    }
}

/// Payload of `/group/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
}

/// Response of `/group/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroupResponse {
    pub group_id: String,
}

/// Response of `/group/join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGroupResponse {
    pub success: bool,
    #[serde(default)]
    pub role: String,
}
