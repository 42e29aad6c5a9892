//! perks-core - Session and storage engine for the Perks loyalty app
//!
//! This crate owns everything scoped to "the current user": secure token
//! storage, the session registry, per-account data stores with flush-before-
//! swap switching, single-flight token refresh, attachment handling, and the
//! root [`Scope`] coordinator that ties them together.

pub mod auth;
pub mod db;
pub mod error;
pub mod jobs;
pub mod media;
pub mod models;
pub mod scope;
pub mod session;
pub mod transport;
pub mod usecases;
pub mod util;

pub use error::{AuthError, Error, Result};
pub use models::{Account, Attachment, AttachmentState, Entity, EntityId, SessionId, SessionInfo, SessionTokens};
pub use scope::{ImageSource, Scope, SessionSnapshot};
