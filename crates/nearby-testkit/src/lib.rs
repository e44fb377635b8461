//! # Nearby Testkit
//!
//! Testing utilities for the Nearby client.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fake backend**: An in-process server behind the in-memory transport,
//!   with accounts, rotating tokens, cursor paging and injectable failures
//! - **Fixtures**: Sample entities and a ready-wired [`TestClient`]
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Fake Backend
//!
//! ```rust
//! use nearby_testkit::TestClient;
//!
//! async fn example() -> nearby::Result<()> {
//!     let env = TestClient::new();
//!     let ann = env.backend.add_account("ann", "secret1", "Ann");
//!     env.backend.seed_checkins("ck", ann, 25);
//!
//!     env.client.auth().login("ann", "secret1").await?;
//!     let at = env.client.config().default_location;
//!     let feed = env.client.checkins().fetch_nearby(at, 1_000.0, true).await?;
//!     assert_eq!(feed.items.len(), 10);
//!     Ok(())
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use nearby_testkit::generators::checkin_page;
//!
//! proptest! {
//!     #[test]
//!     fn continuation_needs_more(page in checkin_page()) {
//!         prop_assert_eq!(page.continuation().is_some(), page.has_more);
//!     }
//! }
//! ```

pub mod backend;
pub mod fixtures;
pub mod generators;

pub use backend::{codes, FakeBackend};
pub use fixtures::{
    conversation_id, sample_checkin, sample_conversation, sample_group, sample_member,
    sample_message, sample_user, TestClient,
};
pub use generators::{checkin, checkin_page, coordinates, cursor};
