//! # Nearby
//!
//! Client library for a location-based social service: check-ins at
//! places, location-scoped groups, and direct messages.
//!
//! ## Overview
//!
//! The client keeps a session valid across requests and keeps every
//! paginated, frequently-mutated list in sync:
//!
//! - **Session**: tokens are refreshed before they expire, single-flight,
//!   and persisted to a credential store for the next cold start
//! - **Collections**: named lists filled by cursor pagination, replaced on
//!   refresh and appended on continuation
//! - **Mutations**: likes, read receipts and membership changes are applied
//!   locally to every cached copy of an entity before the server confirms
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nearby::{ClientConfig, NearbyClient};
//!
//! async fn example() -> nearby::Result<()> {
//!     let client = NearbyClient::new(ClientConfig::from_env()?)?;
//!
//!     // Resume the previous session, or sign in
//!     if client.auth().restore().await?.is_none() {
//!         client.auth().login("alice", "secret1").await?;
//!     }
//!
//!     // Load the nearby feed, then its next page
//!     client.use_default_location();
//!     let here = client.config().default_location;
//!     client.checkins().fetch_nearby(here, 1_000.0, true).await?;
//!     let feed = client.checkins().fetch_nearby(here, 1_000.0, false).await?;
//!
//!     // Like the first check-in wherever it is listed
//!     if let Some(first) = feed.items.first() {
//!         client.checkins().like(&first.checkin_id).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `nearby::core` - Entity models, ids, pages, validation
//! - `nearby::store` - Credential storage, in memory and SQLite
//! - `nearby::sync` - Transport, session, cache, pagination, mutations

pub mod client;
pub mod config;
pub mod error;
pub mod location;
pub mod stores;

// Re-export component crates
pub use nearby_core as core;
pub use nearby_store as store;
pub use nearby_sync as sync;

// Re-export main types for convenience
pub use client::NearbyClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use location::{
    acquire_location, FallbackReason, FixedLocation, LocationError, LocationFix, LocationProvider,
    NoLocation,
};
pub use stores::{AuthStore, CheckinStore, GroupStore, MessageStore, Registration, UserStore};

// Re-export commonly used core types
pub use nearby_core::{
    CheckIn, Conversation, Coordinates, Cursor, DirectMessage, GroupInfo, GroupMember, Page,
    Session, Subject, User, UserId,
};
pub use nearby_sync::{Collection, SyncError};
