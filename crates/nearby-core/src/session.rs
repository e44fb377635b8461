//! Session: the authenticated principal's credentials plus expiry and identity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::UserId;

/// Safety margin, in seconds, before `expires_at` at which a session counts
/// as expiring.
///
/// Covers clock drift between client and server and the latency of requests
/// that are already in flight when the token is attached.
pub const REFRESH_SKEW_SECS: i64 = 5 * 60;

/// [`REFRESH_SKEW_SECS`] as a duration.
pub fn refresh_skew() -> Duration {
    Duration::seconds(REFRESH_SKEW_SECS)
}

/// The authenticated identity behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: UserId,
    pub display_name: String,
}

/// A live session.
///
/// A session always carries both its access token and its subject, so holding
/// an `Option<Session>` makes the authenticated state atomic: there is no way
/// to have a token without an identity or the other way round.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub subject: Subject,
}

impl Session {
    /// Check whether the session expires within `skew` of `now`.
    pub fn is_expiring_soon_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at - now < skew
    }

    /// Check whether the session expires within the default skew of the current time.
    pub fn is_expiring_soon(&self) -> bool {
        self.is_expiring_soon_at(Utc::now(), refresh_skew())
    }
}

// Tokens stay out of debug output.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Response of every endpoint that creates or rotates a session.
///
/// Sign-in responses carry the user; refresh responses may carry only the
/// rotated tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub nickname: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthResponse {
    /// Build the session this response grants.
    ///
    /// Identity comes from the response, then from `known` (the session
    /// being refreshed), then from the access token's `sub` claim. `None`
    /// when none of them names a user.
    pub fn into_session(self, known: Option<&Subject>) -> Option<Session> {
        let id = match (self.user_id, known) {
            (Some(id), _) => id,
            (None, Some(known)) => known.id,
            (None, None) => token_subject(&self.access_token)?,
        };
        let display_name = match (self.nickname, known) {
            (Some(nickname), _) => nickname,
            (None, Some(known)) if known.id == id => known.display_name.clone(),
            (None, _) => String::new(),
        };
        let refresh_token = if self.refresh_token.is_empty() {
            None
        } else {
            Some(self.refresh_token)
        };

        Some(Session {
            access_token: self.access_token,
            refresh_token,
            expires_at: self.expires_at,
            subject: Subject { id, display_name },
        })
    }
}

/// The `sub` claim of a JWT access token. The signature is not checked;
/// the server does that on every request.
pub fn token_subject(access_token: &str) -> Option<UserId> {
    let payload = access_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    serde_json::from_value(claims.get("sub")?.clone()).ok()
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("user_id", &self.user_id)
            .field("nickname", &self.nickname)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Ways of obtaining a new session.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Credentials {
    /// Existing account.
    Login { login_id: String, password: String },

    /// New account.
    Register {
        login_id: String,
        password: String,
        nickname: String,
        email: String,
    },

    /// Temporary guest account, optionally with a chosen nickname.
    Guest {
        #[serde(skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },
}

impl Credentials {
    /// Short name of the flow, for logs.
    pub fn flow(&self) -> &'static str {
        match self {
            Credentials::Login { .. } => "login",
            Credentials::Register { .. } => "register",
            Credentials::Guest { .. } => "guest",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Login { login_id, .. } => f
                .debug_struct("Login")
                .field("login_id", login_id)
                .finish_non_exhaustive(),
            Credentials::Register {
                login_id, nickname, ..
            } => f
                .debug_struct("Register")
                .field("login_id", login_id)
                .field("nickname", nickname)
                .finish_non_exhaustive(),
            Credentials::Guest { nickname } => {
                f.debug_struct("Guest").field("nickname", nickname).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn session_expiring_at(expires_at: DateTime<Utc>) -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at,
            subject: Subject {
                id: UserId(7),
                display_name: "seven".into(),
            },
        }
    }

    #[test]
    fn test_auth_response_into_session() {
        let json = serde_json::json!({
            "user_id": "12",
            "nickname": "walker",
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_at": "2030-01-01T00:00:00Z"
        });
        let auth: AuthResponse = serde_json::from_value(json).unwrap();
        let session = auth.into_session(None).unwrap();

        assert_eq!(session.subject.id, UserId(12));
        assert_eq!(session.subject.display_name, "walker");
        assert_eq!(session.access_token, "a1");
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn test_empty_refresh_token_is_absent() {
        let auth = AuthResponse {
            user_id: Some(UserId(1)),
            nickname: Some("n".into()),
            access_token: "a".into(),
            refresh_token: String::new(),
            expires_at: Utc::now(),
        };
        assert!(auth.into_session(None).unwrap().refresh_token.is_none());
    }

    fn tokens_only(access_token: &str) -> AuthResponse {
        let json = serde_json::json!({
            "access_token": access_token,
            "refresh_token": "r2",
            "expires_at": "2030-01-01T00:00:00Z"
        });
        serde_json::from_value(json).unwrap()
    }

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn test_tokens_only_response_keeps_known_subject() {
        let known = Subject {
            id: UserId(7),
            display_name: "seven".into(),
        };
        let session = tokens_only("opaque").into_session(Some(&known)).unwrap();
        assert_eq!(session.subject, known);
        assert_eq!(session.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn test_tokens_only_response_reads_token_subject() {
        let token = jwt(serde_json::json!({ "sub": 42, "exp": 1_900_000_000, "temp": false }));
        assert_eq!(token_subject(&token), Some(UserId(42)));

        let session = tokens_only(&token).into_session(None).unwrap();
        assert_eq!(session.subject.id, UserId(42));
        assert!(session.subject.display_name.is_empty());

        assert!(tokens_only("opaque").into_session(None).is_none());
        assert_eq!(token_subject("a.%%%.c"), None);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let session = session_expiring_at(Utc::now());
        let debug = format!("{:?}", session);
        assert!(!debug.contains("access"));
        assert!(!debug.contains("\"refresh\""));
    }

    #[test]
    fn test_guest_credentials_wire_shape() {
        let creds = Credentials::Guest { nickname: None };
        assert_eq!(serde_json::to_value(&creds).unwrap(), serde_json::json!({}));
    }

    proptest! {
        #[test]
        fn expiring_soon_iff_within_skew(offset_secs in -3_600i64..3_600i64) {
            let now = Utc::now();
            let session = session_expiring_at(now + Duration::seconds(offset_secs));
            let expected = offset_secs < REFRESH_SKEW_SECS;
            prop_assert_eq!(session.is_expiring_soon_at(now, refresh_skew()), expected);
        }
    }
}
