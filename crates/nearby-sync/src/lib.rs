//! # Nearby Sync
//!
//! The client-side synchronization core: everything between the raw HTTP
//! transport and the entity stores.
//!
//! ## Components
//!
//! - [`SessionManager`] - Owns the session, keeps it valid, refreshes it single-flight
//! - [`RequestGateway`] - Attaches the credential and decodes the `{code, msg, data}` envelope
//! - [`Paginator`] - Refresh (replace) and continuation (append) of cursor-paged collections
//! - [`EntityCache`] - Named collections and a detail slot per entity type, indexed by id
//! - [`MutationCoordinator`] - Local-first mutations applied to every cached copy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nearby_store::MemoryCredentialStore;
//! use nearby_sync::{
//!     HttpTransport, HttpTransportConfig, RequestGateway, SessionConfig, SessionManager,
//!     TransportAuthApi,
//! };
//!
//! fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default())?);
//!     let sessions = Arc::new(SessionManager::new(
//!         Arc::new(TransportAuthApi::new(transport.clone())),
//!         Arc::new(MemoryCredentialStore::new()),
//!         SessionConfig::default(),
//!     ));
//!     let _api = RequestGateway::new(transport, sessions);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! All shared state sits behind std locks that are never held across an
//! await. Concurrency is about interleaved in-flight requests: collections
//! guard against late responses with per-collection epochs, and token
//! refresh is coalesced behind a single gate.

pub mod cache;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod mutation;
pub mod pagination;
pub mod session;
pub mod transport;

pub use cache::{Collection, CollectionKey, EntityCache};
pub use envelope::{Envelope, ErrorCode, Reply};
pub use error::{Result, SyncError, TransportError};
pub use gateway::{Anonymous, Api, ApiExt, RequestGateway, TokenProvider};
pub use mutation::{ConfirmPolicy, MutationCoordinator};
pub use pagination::{PageQuery, Paginator};
pub use session::{fingerprint, AuthApi, SessionConfig, SessionManager, TransportAuthApi};
pub use transport::{
    memory::MemoryTransport, memory::RecordedCall, HttpTransport, HttpTransportConfig, Transport,
};
