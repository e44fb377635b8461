//! The client: one session, one gateway, five entity stores.
//!
//! Everything that talks to the server goes through the same
//! [`RequestGateway`], which asks the shared [`SessionManager`] for a
//! credential before each request. The stores never see tokens.

use std::sync::Arc;

use tracing::info;

use nearby_store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
use nearby_sync::{
    ConfirmPolicy, HttpTransport, RequestGateway, SessionManager, Transport, TransportAuthApi,
};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::location::{LocationProvider, NoLocation};
use crate::stores::{AuthStore, CheckinStore, GroupStore, MessageStore, Services, UserStore};

/// Entry point of the library.
pub struct NearbyClient {
    config: ClientConfig,
    auth: AuthStore,
    checkins: CheckinStore,
    groups: GroupStore,
    messages: MessageStore,
    users: UserStore,
}

impl NearbyClient {
    /// HTTP client without device positioning.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_location(config, Arc::new(NoLocation))
    }

    /// HTTP client using `provider` for the device's position.
    ///
    /// Credentials go to `config.credentials_path` when set, otherwise
    /// they live only as long as the client.
    pub fn with_location(config: ClientConfig, provider: Arc<dyn LocationProvider>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.transport())?);
        let credentials: Arc<dyn CredentialStore> = match &config.credentials_path {
            Some(path) => Arc::new(SqliteCredentialStore::open(path)?),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        info!(
            base_url = %config.base_url,
            durable = config.credentials_path.is_some(),
            "client configured"
        );
        Ok(Self::with_parts(config, transport, credentials, provider))
    }

    /// Assemble a client over explicit collaborators.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        provider: Arc<dyn LocationProvider>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(TransportAuthApi::new(transport.clone())),
            credentials,
            config.session(),
        ));
        let gateway = Arc::new(RequestGateway::new(transport, sessions.clone()));
        let services = Services::new(gateway, ConfirmPolicy::default());

        Self {
            auth: AuthStore::new(sessions),
            checkins: CheckinStore::new(services.clone()),
            groups: GroupStore::new(services.clone()),
            messages: MessageStore::new(services.clone()),
            users: UserStore::new(
                services,
                provider,
                config.location_timeout,
                config.default_location,
            ),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    pub fn checkins(&self) -> &CheckinStore {
        &self.checkins
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Set the current location to the configured default.
    pub fn use_default_location(&self) {
        self.users.set_current_location(
            self.config.default_location,
            self.config.default_location_name.clone(),
        );
    }

    /// End the session and drop everything cached for it.
    pub async fn logout(&self) {
        self.auth.logout().await;
        self.checkins.clear();
        self.groups.clear();
        self.messages.clear();
        self.users.clear();
        info!("client state cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::DEFAULT_LOCATION;
    use nearby_store::CredentialStoreExt;
    use nearby_sync::transport::memory::{ok, MemoryTransport};
    use serde_json::json;

    fn client(transport: Arc<MemoryTransport>) -> (NearbyClient, Arc<MemoryCredentialStore>) {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let client = NearbyClient::with_parts(
            ClientConfig::default(),
            transport,
            credentials.clone(),
            Arc::new(NoLocation),
        );
        (client, credentials)
    }

    fn route_login(transport: &MemoryTransport) {
        transport.route("/user/login", |_| {
            Ok(ok(json!({
                "user_id": 1,
                "nickname": "ann",
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_at": "2999-01-01T00:00:00Z"
            })))
        });
    }

    #[tokio::test]
    async fn test_requests_carry_the_session_token() {
        let transport = MemoryTransport::new();
        route_login(&transport);
        transport.route("/checkin/search_by_location", |_| {
            Ok(ok(json!({ "items": [], "pagination": { "has_more": false } })))
        });
        let (client, _) = client(transport.clone());

        client.auth().login("ann", "secret1").await.unwrap();
        client
            .checkins()
            .fetch_nearby(DEFAULT_LOCATION, 1_000.0, true)
            .await
            .unwrap();

        let call = &transport.calls_to("/checkin/search_by_location")[0];
        assert_eq!(call.bearer.as_deref(), Some("access-1"));
        assert!(transport.calls_to("/user/login")[0].bearer.is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let transport = MemoryTransport::new();
        route_login(&transport);
        let (client, credentials) = client(transport);

        client.auth().login("ann", "secret1").await.unwrap();
        client.use_default_location();
        assert_eq!(
            client.users().current_location().unwrap().name,
            client.config().default_location_name
        );

        client.logout().await;
        assert!(!client.auth().is_authenticated());
        assert!(client.users().current_location().is_none());
        assert!(credentials.load_tokens().await.unwrap().is_none());
    }
}
