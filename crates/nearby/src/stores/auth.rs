//! Auth store: login, registration, guest accounts and session restore.

use std::fmt;
use std::sync::Arc;

use nearby_core::validation::{validate_login, validate_nickname, validate_registration};
use nearby_core::{Credentials, Subject};
use nearby_sync::SessionManager;

use crate::error::{ClientError, Result};
use crate::stores::Status;

/// What the registration form collects.
#[derive(Clone, PartialEq, Eq)]
pub struct Registration {
    pub login_id: String,
    pub password: String,
    pub confirm_password: String,
    pub nickname: String,
    pub email: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("login_id", &self.login_id)
            .field("nickname", &self.nickname)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

pub struct AuthStore {
    sessions: Arc<SessionManager>,
    status: Status,
}

impl AuthStore {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            status: Status::default(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn is_authenticated(&self) -> bool {
        self.sessions.is_authenticated()
    }

    /// The signed-in user.
    pub fn user(&self) -> Option<Subject> {
        self.sessions.subject()
    }

    /// The current access token, without refreshing it.
    pub fn token(&self) -> Option<String> {
        self.sessions.access_token()
    }

    /// A token fit for use, refreshed first when it is about to expire.
    pub async fn valid_token(&self) -> Option<String> {
        self.sessions.ensure_valid().await
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    pub async fn login(&self, login_id: &str, password: &str) -> Result<Subject> {
        let attempt = async {
            validate_login(login_id, password)?;
            self.sign_in(Credentials::Login {
                login_id: login_id.to_string(),
                password: password.to_string(),
            })
            .await
        };
        self.status.track(attempt).await
    }

    pub async fn register(&self, form: &Registration) -> Result<Subject> {
        let attempt = async {
            validate_registration(
                &form.login_id,
                &form.password,
                &form.confirm_password,
                &form.nickname,
            )?;
            self.sign_in(Credentials::Register {
                login_id: form.login_id.clone(),
                password: form.password.clone(),
                nickname: form.nickname.clone(),
                email: form.email.clone(),
            })
            .await
        };
        self.status.track(attempt).await
    }

    /// Start a temporary guest session, optionally under a chosen nickname.
    pub async fn create_guest(&self, nickname: Option<&str>) -> Result<Subject> {
        let attempt = async {
            if let Some(nickname) = nickname {
                validate_nickname(nickname)?;
            }
            self.sign_in(Credentials::Guest {
                nickname: nickname.map(str::to_string),
            })
            .await
        };
        self.status.track(attempt).await
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<Subject> {
        let session = self.sessions.authenticate(&credentials).await?;
        Ok(session.subject)
    }

    /// Rotate the tokens now. Failure signs the user out.
    pub async fn refresh(&self) -> Result<Subject> {
        let attempt = async {
            let session = self.sessions.refresh().await?;
            Ok::<_, ClientError>(session.subject)
        };
        self.status.track(attempt).await
    }

    pub async fn logout(&self) {
        self.sessions.logout().await;
        self.status.record(Ok(())).ok();
    }

    /// Resume the session persisted by an earlier run, if any.
    pub async fn restore(&self) -> Result<Option<Subject>> {
        let attempt = async {
            let session = self.sessions.restore().await?;
            Ok::<_, ClientError>(session.map(|s| s.subject))
        };
        self.status.track(attempt).await
    }
}
