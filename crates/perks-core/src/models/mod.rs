//! Data models for perks-core

mod account;
mod attachment;
mod entity;
mod session;

pub use account::Account;
pub use attachment::{Attachment, AttachmentId, AttachmentState};
pub use entity::{Entity, EntityId, EntitySync};
pub use session::{SessionId, SessionInfo, SessionTokens};
