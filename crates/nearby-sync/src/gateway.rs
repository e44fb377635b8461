//! Request gateway: every outbound API call goes through here.
//!
//! The gateway asks a [`TokenProvider`] for a credential, sends the request
//! over the [`Transport`], and turns the envelope into either the payload or
//! a typed error. There is no implicit retry: one call, one outcome.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::envelope::{self, decode_data, Reply};
use crate::error::{Result, SyncError};
use crate::transport::Transport;

/// Source of the bearer credential attached to outbound calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid access token, or `None` when unauthenticated.
    async fn bearer(&self) -> Option<String>;
}

/// Provider for clients that never authenticate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl TokenProvider for Anonymous {
    async fn bearer(&self) -> Option<String> {
        None
    }
}

/// The object-safe call primitive.
#[async_trait]
pub trait Api: Send + Sync {
    /// Send `body` to `path` and return the success payload, `null` when absent.
    async fn call_raw(&self, path: &str, body: Option<Value>) -> Result<Value>;
}

/// Typed helpers over any [`Api`].
pub trait ApiExt: Api {
    /// Call `path` and decode the payload as `R`.
    fn call<B, R>(&self, path: &str, body: &B) -> impl Future<Output = Result<R>> + Send
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned;

    /// Call `path` without a body and decode the payload as `R`.
    fn call_empty<R>(&self, path: &str) -> impl Future<Output = Result<R>> + Send
    where
        R: DeserializeOwned;

    /// Call a command endpoint, ignoring any payload.
    fn command<B>(&self, path: &str, body: &B) -> impl Future<Output = Result<()>> + Send
    where
        B: Serialize + Sync + ?Sized;
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| SyncError::Encoding(e.to_string()))
}

impl<A: Api + ?Sized> ApiExt for A {
    async fn call<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let body = encode(body)?;
        let data = self.call_raw(path, Some(body)).await?;
        decode_data(data)
    }

    async fn call_empty<R>(&self, path: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let data = self.call_raw(path, None).await?;
        decode_data(data)
    }

    async fn command<B>(&self, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + Sync + ?Sized,
    {
        let body = encode(body)?;
        self.call_raw(path, Some(body)).await?;
        Ok(())
    }
}

/// The production [`Api`]: transport plus credential attachment.
#[derive(Clone)]
pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
}

impl RequestGateway {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { transport, tokens }
    }

    /// Gateway that never attaches a credential.
    pub fn anonymous(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, Arc::new(Anonymous))
    }
}

#[async_trait]
impl Api for RequestGateway {
    async fn call_raw(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let bearer = self.tokens.bearer().await;
        debug!(path, authenticated = bearer.is_some(), "dispatching request");

        let raw = self.transport.post(path, body, bearer.as_deref()).await?;

        match envelope::parse(raw)? {
            Reply::Success(data) => Ok(data.unwrap_or(Value::Null)),
            Reply::Failure { code, message } => {
                debug!(path, %code, %message, "request rejected");
                Err(SyncError::Request { code, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorCode;
    use crate::error::TransportError;
    use crate::transport::memory::{fail, ok, ok_empty, MemoryTransport};
    use serde_json::json;

    struct StaticToken(Option<String>);

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn bearer(&self) -> Option<String> {
            self.0.clone()
        }
    }

    fn gateway(transport: &Arc<MemoryTransport>, token: Option<&str>) -> RequestGateway {
        RequestGateway::new(
            transport.clone(),
            Arc::new(StaticToken(token.map(str::to_string))),
        )
    }

    #[tokio::test]
    async fn test_attaches_credential_when_present() {
        let transport = MemoryTransport::new();
        transport.route("/user/search_by_id", |_| Ok(ok(json!({ "user_id": 1 }))));

        let api = gateway(&transport, Some("tok-1"));
        let _: Value = api
            .call("/user/search_by_id", &json!({ "user_id": 1 }))
            .await
            .unwrap();

        let anon = gateway(&transport, None);
        let _: Value = anon
            .call("/user/search_by_id", &json!({ "user_id": 1 }))
            .await
            .unwrap();

        let calls = transport.calls_to("/user/search_by_id");
        assert_eq!(calls[0].bearer.as_deref(), Some("tok-1"));
        assert_eq!(calls[1].bearer, None);
    }

    #[tokio::test]
    async fn test_request_error_carries_server_message() {
        let transport = MemoryTransport::new();
        transport.route("/checkin/delete", |_| Ok(fail(1003, "无权删除")));

        let err = gateway(&transport, Some("t"))
            .command("/checkin/delete", &json!({ "checkin_id": "c1" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Forbidden));
        assert_eq!(err.to_string(), "无权删除");
    }

    #[tokio::test]
    async fn test_command_accepts_absent_data() {
        let transport = MemoryTransport::new();
        transport.route("/checkin/like", |_| Ok(ok_empty()));
        gateway(&transport, Some("t"))
            .command("/checkin/like", &json!({ "checkin_id": "c1" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_request_error() {
        let transport = MemoryTransport::new();
        transport.route("/slow", |_| Err(TransportError::Timeout));

        let err = gateway(&transport, None)
            .call_empty::<Value>("/slow")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn test_no_retry() {
        let transport = MemoryTransport::new();
        transport.route("/flaky", |_| Err(TransportError::Network("reset".into())));

        let _ = gateway(&transport, None).call_empty::<Value>("/flaky").await;
        assert_eq!(transport.call_count("/flaky"), 1);
    }
}
