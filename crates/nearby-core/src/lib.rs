//! # Nearby Core
//!
//! Pure data for the Nearby client: sessions, cursor pages, entity models
//! and the mutations that can be applied to them.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! plain data plus the rules that govern it.
//!
//! ## Key Types
//!
//! - [`Session`] - The authenticated principal's credentials, expiry and identity
//! - [`Page`] - One server page of a cursor-paginated collection
//! - [`Cursor`] - Opaque continuation token issued by the server
//! - [`Entity`] - Anything with a stable id that can live in several cached lists
//! - [`Mutation`] - A local-first change applied to every cached copy of an entity
//!
//! ## Wire Shapes
//!
//! Model types mirror the server's JSON payloads field for field, so they can
//! be decoded directly from response envelopes. See [`page`] for the two page
//! layouts the server emits.

pub mod checkin;
pub mod entity;
pub mod error;
pub mod group;
pub mod message;
pub mod page;
pub mod session;
pub mod types;
pub mod user;
pub mod validation;

pub use checkin::{CheckIn, CreateCheckinRequest, CreateCheckinResponse};
pub use entity::{from_fn, ClearUnread, Entity, FnMutation, Like, MarkRead, Membership, Mutation};
pub use error::{CoreError, ValidationError};
pub use group::{CreateGroupRequest, CreateGroupResponse, GroupInfo, GroupMember, JoinGroupResponse};
pub use message::{
    Conversation, DirectMessage, MarkReadRequest, SendDirectMessageRequest,
    SendDirectMessageResponse, UnreadCounts,
};
pub use page::{Page, MAX_PAGE_LIMIT, SOCIAL_PAGE_LIMIT, THREAD_PAGE_LIMIT};
pub use session::{
    refresh_skew, token_subject, AuthResponse, Credentials, Session, Subject, REFRESH_SKEW_SECS,
};
pub use types::{Coordinates, Cursor, UserId, DEFAULT_LOCATION, DEFAULT_LOCATION_NAME};
pub use user::{UpdateLocationRequest, User};
