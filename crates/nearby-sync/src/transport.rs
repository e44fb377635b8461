//! Transport abstraction: one POST-style call per request.
//!
//! The transport delivers a JSON body to a path and hands back the raw JSON
//! response body. It knows nothing about envelopes or sessions; the bearer
//! credential, when there is one, is supplied by the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport trait for issuing API calls.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `path` and return the decoded JSON response body.
    ///
    /// A non-2xx response whose body is still an envelope is returned as
    /// `Ok`, so the server's code and message reach the caller.
    async fn post(&self, path: &str, body: Option<Value>, bearer: Option<&str>) -> Result<Value>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Scheme, host and port, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Prefix prepended to every path.
    pub api_prefix: String,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            api_prefix: "/api/v1".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Full URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_prefix.trim_end_matches('/'),
            path
        )
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, path: &str, body: Option<Value>, bearer: Option<&str>) -> Result<Value> {
        let mut req = self.http.post(self.url(path));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = &body {
            req = req.json(body);
        }

        let res = req.send().await.map_err(map_reqwest)?;
        let status = res.status();
        let text = res.text().await.map_err(map_reqwest)?;

        match serde_json::from_str::<Value>(&text) {
            Ok(value) if status.is_success() || value.get("code").is_some() => Ok(value),
            Err(e) if status.is_success() => Err(TransportError::MalformedEnvelope(e.to_string())),
            _ => Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            }),
        }
    }
}

/// An in-process transport for testing.
///
/// Paths are routed to handlers registered up front; every call is
/// recorded so tests can assert on what was (or was not) sent.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex, RwLock};

    /// One recorded request.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedCall {
        pub path: String,
        pub body: Option<Value>,
        pub bearer: Option<String>,
    }

    impl RecordedCall {
        /// Field of the request body, or `Value::Null`.
        pub fn arg(&self, field: &str) -> &Value {
            self.body
                .as_ref()
                .and_then(|b| b.get(field))
                .unwrap_or(&Value::Null)
        }
    }

    pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

    type Handler = Arc<dyn Fn(RecordedCall) -> HandlerFuture + Send + Sync>;

    /// Success envelope around `data`.
    pub fn ok(data: Value) -> Value {
        serde_json::json!({ "code": 0, "msg": "success", "data": data })
    }

    /// Success envelope without data.
    pub fn ok_empty() -> Value {
        serde_json::json!({ "code": 0, "msg": "success" })
    }

    /// Failure envelope.
    pub fn fail(code: i64, msg: &str) -> Value {
        serde_json::json!({ "code": code, "msg": msg })
    }

    /// In-memory transport implementation.
    #[derive(Default)]
    pub struct MemoryTransport {
        routes: RwLock<HashMap<String, Handler>>,
        calls: Mutex<Vec<RecordedCall>>,
        latency: Mutex<Option<Duration>>,
    }

    impl MemoryTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Route `path` to a synchronous handler.
        pub fn route<F>(&self, path: &str, handler: F)
        where
            F: Fn(&RecordedCall) -> Result<Value> + Send + Sync + 'static,
        {
            self.route_async(path, move |call| {
                let reply = handler(&call);
                async move { reply }
            });
        }

        /// Route `path` to an asynchronous handler. Lets tests hold a
        /// response until they choose to release it.
        pub fn route_async<F, Fut>(&self, path: &str, handler: F)
        where
            F: Fn(RecordedCall) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<Value>> + Send + 'static,
        {
            let handler: Handler =
                Arc::new(move |call| -> HandlerFuture { Box::pin(handler(call)) });
            if let Ok(mut routes) = self.routes.write() {
                routes.insert(path.to_string(), handler);
            }
        }

        /// Delay every response by `latency`.
        pub fn set_latency(&self, latency: Option<Duration>) {
            if let Ok(mut slot) = self.latency.lock() {
                *slot = latency;
            }
        }

        /// Every call so far, oldest first.
        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
            self.calls()
                .into_iter()
                .filter(|c| c.path == path)
                .collect()
        }

        pub fn call_count(&self, path: &str) -> usize {
            self.calls_to(path).len()
        }

        pub fn clear_calls(&self) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.clear();
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn post(
            &self,
            path: &str,
            body: Option<Value>,
            bearer: Option<&str>,
        ) -> Result<Value> {
            let call = RecordedCall {
                path: path.to_string(),
                body,
                bearer: bearer.map(str::to_string),
            };
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call.clone());
            }

            let handler = self
                .routes
                .read()
                .ok()
                .and_then(|routes| routes.get(path).cloned());
            let latency = self.latency.lock().ok().and_then(|l| *l);

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            match handler {
                Some(handler) => handler(call).await,
                None => Err(TransportError::Status {
                    status: 404,
                    body: format!("no route for {path}"),
                }),
            }
        }
    }
}
