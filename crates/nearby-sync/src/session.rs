//! Session manager: owns the token state and keeps it valid.
//!
//! State machine:
//!
//! ```text
//! Unauthenticated --authenticate--> Authenticated
//! Authenticated   --refresh ok----> Authenticated (new tokens)
//! Authenticated   --logout--------> Unauthenticated
//! Authenticated   --refresh fail--> Unauthenticated
//! ```
//!
//! The in-memory session is the source of truth. The credential store is
//! written after every transition and read only by [`SessionManager::restore`].
//!
//! Refresh is single-flight: callers that see an expiring session queue on
//! a gate, and each re-checks the session once it gets through. Only the
//! first performs the refresh; the rest reuse its result or observe the
//! teardown.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use nearby_core::{refresh_skew, AuthResponse, Credentials, Session, Subject};
use nearby_store::{CredentialStore, CredentialStoreExt, StoredTokens};

use crate::envelope;
use crate::error::{Result, SyncError};
use crate::gateway::TokenProvider;
use crate::transport::Transport;

/// Short, non-reversible token fingerprint for logs.
pub fn fingerprint(token: &str) -> String {
    let hash = blake3::hash(token.as_bytes());
    hex::encode(&hash.as_bytes()[..8])
}

/// Configuration for session handling.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A session expiring within this window is refreshed before use.
    pub refresh_skew: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_skew: refresh_skew(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth transport capability
// ─────────────────────────────────────────────────────────────────────────────

/// The endpoints that create or rotate a session.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a session.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthResponse>;

    /// Exchange a refresh token for a new session. Rotates both tokens.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse>;
}

/// [`AuthApi`] over a raw transport.
///
/// Talks to the transport directly, never through the gateway, so no
/// credential is attached and refresh cannot recurse into itself.
pub struct TransportAuthApi {
    transport: Arc<dyn Transport>,
}

impl TransportAuthApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn path(credentials: &Credentials) -> &'static str {
        match credentials {
            Credentials::Login { .. } => "/user/login",
            Credentials::Register { .. } => "/user/register",
            Credentials::Guest { .. } => "/user/create_temp_user",
        }
    }
}

#[async_trait]
impl AuthApi for TransportAuthApi {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let body =
            serde_json::to_value(credentials).map_err(|e| SyncError::Encoding(e.to_string()))?;
        let raw = self
            .transport
            .post(Self::path(credentials), Some(body), None)
            .await?;
        envelope::decode(raw)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse> {
        let body = json!({ "refresh_token": refresh_token });
        let raw = self
            .transport
            .post("/user/refresh-token", Some(body), None)
            .await?;
        envelope::decode(raw)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session manager
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    session: Option<Session>,
    /// Bumped on every authenticate and teardown. A refresh started under
    /// an older generation must not install its result.
    generation: u64,
}

/// Owner of the process-wide session.
pub struct SessionManager {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
    state: RwLock<State>,
    refresh_gate: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            auth,
            store,
            config,
            state: RwLock::new(State::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    fn snapshot(&self) -> (Option<Session>, u64) {
        match self.state.read() {
            Ok(state) => (state.session.clone(), state.generation),
            Err(poisoned) => {
                let state = poisoned.into_inner();
                (state.session.clone(), state.generation)
            }
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Current session, if any.
    pub fn session(&self) -> Option<Session> {
        self.snapshot().0
    }

    pub fn subject(&self) -> Option<Subject> {
        self.session().map(|s| s.subject)
    }

    /// The access token as it is now, without refreshing.
    pub fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    /// True when there is no session or it expires within the skew.
    pub fn is_expiring_soon(&self) -> bool {
        match self.session() {
            Some(session) => session.is_expiring_soon_at(Utc::now(), self.config.refresh_skew),
            None => true,
        }
    }

    fn needs_refresh(&self, session: &Session) -> bool {
        session.is_expiring_soon_at(Utc::now(), self.config.refresh_skew)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Exchange credentials for a session.
    ///
    /// On failure any prior session is left untouched.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Session> {
        let flow = credentials.flow();
        let response = self.auth.authenticate(credentials).await.map_err(|e| {
            warn!(flow, error = %e, "authentication failed");
            SyncError::Auth(e.to_string())
        })?;

        let session = response
            .into_session(None)
            .ok_or_else(|| SyncError::Auth("sign-in response names no user".into()))?;
        self.with_state(|state| {
            state.generation += 1;
            state.session = Some(session.clone());
        });
        info!(
            flow,
            user = %session.subject.id,
            token = %fingerprint(&session.access_token),
            "authenticated"
        );

        self.persist(&session).await;
        Ok(session)
    }

    /// A usable access token, refreshing first when the session is close
    /// to expiry. `None` means unauthenticated, including after a failed
    /// refresh.
    pub async fn ensure_valid(&self) -> Option<String> {
        let session = self.session()?;
        if !self.needs_refresh(&session) {
            return Some(session.access_token);
        }

        let _gate = self.refresh_gate.lock().await;

        // Whoever held the gate before us may already have refreshed or
        // torn the session down.
        let (session, generation) = self.snapshot();
        let session = session?;
        if !self.needs_refresh(&session) {
            debug!("session refreshed by a concurrent caller");
            return Some(session.access_token);
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            info!(user = %session.subject.id, "session expiring without refresh token, clearing");
            self.teardown(generation).await;
            return None;
        };

        self.refresh_locked(&refresh_token, generation)
            .await
            .ok()
            .map(|s| s.access_token)
    }

    /// Refresh now, regardless of expiry. Failure tears the session down.
    pub async fn refresh(&self) -> Result<Session> {
        let _gate = self.refresh_gate.lock().await;

        let (session, generation) = self.snapshot();
        let Some(session) = session else {
            return Err(SyncError::Auth("not authenticated".into()));
        };
        let Some(refresh_token) = session.refresh_token.clone() else {
            self.teardown(generation).await;
            return Err(SyncError::Auth("no refresh token".into()));
        };

        self.refresh_locked(&refresh_token, generation).await
    }

    /// Caller holds the refresh gate.
    async fn refresh_locked(&self, refresh_token: &str, generation: u64) -> Result<Session> {
        debug!(refresh = %fingerprint(refresh_token), "refreshing session");

        let known = self.session().map(|s| s.subject);
        let refreshed = self
            .auth
            .refresh(refresh_token)
            .await
            .and_then(|response| {
                response
                    .into_session(known.as_ref())
                    .ok_or_else(|| SyncError::Auth("refresh response names no user".into()))
            });

        match refreshed {
            Ok(session) => {
                let installed = self.with_state(|state| {
                    if state.generation != generation {
                        return false;
                    }
                    state.session = Some(session.clone());
                    true
                });
                if !installed {
                    info!("session ended while refreshing, discarding new tokens");
                    return Err(SyncError::Auth("session ended during refresh".into()));
                }

                info!(
                    user = %session.subject.id,
                    token = %fingerprint(&session.access_token),
                    "session refreshed"
                );
                self.persist(&session).await;
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, clearing session");
                self.teardown(generation).await;
                Err(SyncError::Auth(e.to_string()))
            }
        }
    }

    /// Clear the session and persisted credentials. Idempotent.
    pub async fn logout(&self) {
        let had_session = self.with_state(|state| {
            state.generation += 1;
            state.session.take().is_some()
        });
        if had_session {
            info!("logged out");
        }
        self.forget().await;
    }

    /// Rebuild the session from persisted tokens after a cold start.
    ///
    /// Only the two tokens are persisted, so expiry and identity are
    /// re-derived by running the refresh protocol. A refresh the server
    /// rejects clears the persisted tokens; a transport failure keeps them
    /// for a later attempt. Either way the manager stays unauthenticated.
    pub async fn restore(&self) -> Result<Option<Session>> {
        let _gate = self.refresh_gate.lock().await;

        if let (Some(session), _) = self.snapshot() {
            return Ok(Some(session));
        }

        let Some(tokens) = self.store.load_tokens().await? else {
            return Ok(None);
        };
        let Some(refresh_token) = tokens.refresh_token else {
            debug!("persisted access token has no refresh token, discarding");
            self.forget().await;
            return Ok(None);
        };

        let generation = self.snapshot().1;
        let refreshed = self
            .auth
            .refresh(&refresh_token)
            .await
            .and_then(|response| {
                response
                    .into_session(None)
                    .ok_or_else(|| SyncError::Auth("refresh response names no user".into()))
            });

        match refreshed {
            Ok(session) => {
                let installed = self.with_state(|state| {
                    if state.generation != generation {
                        return false;
                    }
                    state.session = Some(session.clone());
                    true
                });
                if !installed {
                    return Ok(self.session());
                }
                info!(user = %session.subject.id, "session restored");
                self.persist(&session).await;
                Ok(Some(session))
            }
            Err(SyncError::Transport(e)) => {
                warn!(error = %e, "could not reach server to restore session");
                Err(SyncError::Transport(e))
            }
            Err(e) => {
                warn!(error = %e, "persisted session rejected, clearing");
                self.forget().await;
                Err(SyncError::Auth(e.to_string()))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    async fn teardown(&self, generation: u64) {
        let cleared = self.with_state(|state| {
            if state.generation != generation {
                return false;
            }
            state.generation += 1;
            state.session = None;
            true
        });
        if cleared {
            self.forget().await;
        }
    }

    async fn persist(&self, session: &Session) {
        let tokens = StoredTokens::new(
            session.access_token.clone(),
            session.refresh_token.clone(),
        );
        if let Err(e) = self.store.save_tokens(&tokens).await {
            warn!(error = %e, "failed to persist credentials");
        }
    }

    async fn forget(&self) {
        if let Err(e) = self.store.clear_tokens().await {
            warn!(error = %e, "failed to clear persisted credentials");
        }
    }
}

#[async_trait]
impl TokenProvider for SessionManager {
    async fn bearer(&self) -> Option<String> {
        self.ensure_valid().await
    }
}
