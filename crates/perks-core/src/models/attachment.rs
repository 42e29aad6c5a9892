//! Binary attachment model with raw/native representations.
//!
//! Keeping raw (as-imported) and native (optimized) bytes separate lets the
//! optimization pass run deferred and batched; the recorded source hash is
//! the proof that a native copy was derived from the raw bytes it would
//! replace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::{content_hash, normalize_text_option};

/// A unique identifier for an attachment, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a new unique attachment ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Derived attachment state.
///
/// The `Not*` states name the pending work, checked in pipeline order:
/// fetch, then optimize, then publish. An attachment with nothing pending is
/// [`AttachmentState::Ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    /// No URL and no bytes.
    Empty,
    /// URL present but bytes not fetched yet.
    NotLoaded,
    /// Raw bytes present; no native copy derived from them yet.
    NotOptimized,
    /// Bytes present but never uploaded (no URL).
    NotPublished,
    /// Raw and native both present and the native copy is verified against
    /// the raw bytes; raw can be purged.
    ReadyToClean,
    /// Published and optimized; nothing pending.
    Ready,
}

/// A single binary resource in up to three forms: remote reference, raw
/// imported bytes, and optimized native bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub source_url: Option<String>,
    pub raw: Option<Vec<u8>>,
    pub native: Option<Vec<u8>>,
    /// Hash of the raw bytes recorded when they were imported.
    pub source_hash: Option<String>,
    deleted: bool,
}

impl Attachment {
    /// An attachment with no content at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: AttachmentId::new(),
            source_url: None,
            raw: None,
            native: None,
            source_hash: None,
            deleted: false,
        }
    }

    /// Rehydrate a live attachment from persisted columns.
    pub(crate) fn from_parts(
        id: AttachmentId,
        source_url: Option<String>,
        raw: Option<Vec<u8>>,
        native: Option<Vec<u8>>,
        source_hash: Option<String>,
    ) -> Self {
        Self {
            id,
            source_url,
            raw,
            native,
            source_hash,
            deleted: false,
        }
    }

    /// Attachment referencing remote content that has not been fetched.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = normalize_text_option(Some(url.into()))
            .ok_or_else(|| Error::Validation("Attachment URL cannot be empty".to_string()))?;
        let mut attachment = Self::empty();
        attachment.source_url = Some(url);
        Ok(attachment)
    }

    /// Attachment created from locally imported bytes.
    pub fn from_raw(bytes: Vec<u8>) -> Result<Self> {
        let mut attachment = Self::empty();
        attachment.set_raw_data(bytes)?;
        Ok(attachment)
    }

    /// Attachment created directly from an already-optimized copy.
    pub fn from_native(bytes: Vec<u8>) -> Result<Self> {
        let mut attachment = Self::empty();
        attachment.set_native_data(bytes)?;
        Ok(attachment)
    }

    /// Attachment created from both representations at once.
    pub fn from_pack(raw: Vec<u8>, native: Vec<u8>) -> Result<Self> {
        let mut attachment = Self::empty();
        attachment.set_raw_data(raw)?;
        attachment.set_native_data(native)?;
        Ok(attachment)
    }

    /// Derive the current state.
    ///
    /// The hash comparison for [`AttachmentState::ReadyToClean`] is
    /// recomputed from the raw bytes on every call; `source_hash` is only a
    /// recorded fingerprint, never trusted as a cache.
    #[must_use]
    pub fn state(&self) -> AttachmentState {
        match (&self.source_url, &self.raw, &self.native) {
            (None, None, None) => AttachmentState::Empty,
            (Some(_), None, None) => AttachmentState::NotLoaded,
            (_, Some(raw), Some(_)) if self.matches_source(raw) => AttachmentState::ReadyToClean,
            // Native absent, or present but stale relative to the raw bytes.
            (_, Some(_), _) => AttachmentState::NotOptimized,
            (None, None, Some(_)) => AttachmentState::NotPublished,
            (Some(_), None, Some(_)) => AttachmentState::Ready,
        }
    }

    fn matches_source(&self, raw: &[u8]) -> bool {
        self.source_hash.as_deref() == Some(content_hash(raw).as_str())
    }

    /// Store imported bytes and record their hash.
    pub fn set_raw_data(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.check_live()?;
        if bytes.is_empty() {
            return Err(Error::Validation(
                "Attachment raw bytes cannot be empty".to_string(),
            ));
        }
        self.source_hash = Some(content_hash(&bytes));
        self.raw = Some(bytes);
        Ok(())
    }

    /// Store the optimized copy. Does not touch `source_hash`.
    pub fn set_native_data(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.check_live()?;
        if bytes.is_empty() {
            return Err(Error::Validation(
                "Attachment native bytes cannot be empty".to_string(),
            ));
        }
        self.native = Some(bytes);
        Ok(())
    }

    /// Purge the raw bytes if and only if the native copy is verified
    /// against them. A no-op in every other state; returns whether anything
    /// was cleaned.
    pub fn clean_raw_data(&mut self) -> bool {
        if self.state() == AttachmentState::ReadyToClean {
            self.raw = None;
            true
        } else {
            false
        }
    }

    /// Remove the attachment entirely.
    ///
    /// Callers must detach it from the owning entity within the same storage
    /// transaction. A deleted attachment rejects all further mutation.
    pub fn delete(&mut self) {
        self.deleted = true;
        self.source_url = None;
        self.raw = None;
        self.native = None;
        self.source_hash = None;
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn check_live(&self) -> Result<()> {
        if self.deleted {
            return Err(Error::Validation(
                "Attachment was deleted and cannot be modified".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_id_unique_and_parseable() {
        let id = AttachmentId::new();
        assert_ne!(id, AttachmentId::new());
        let parsed: AttachmentId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn empty_attachment_state() {
        assert_eq!(Attachment::empty().state(), AttachmentState::Empty);
    }

    #[test]
    fn from_url_is_not_loaded() {
        let attachment = Attachment::from_url("https://cdn.nsp.com/avatar.png").unwrap();
        assert_eq!(attachment.state(), AttachmentState::NotLoaded);
        assert!(Attachment::from_url("   ").is_err());
    }

    #[test]
    fn fetch_then_optimize_progression() {
        let raw = b"raw image bytes".to_vec();
        let mut attachment = Attachment::from_url("https://cdn.nsp.com/avatar.png").unwrap();

        attachment.set_raw_data(raw.clone()).unwrap();
        assert_eq!(attachment.state(), AttachmentState::NotOptimized);

        attachment.set_native_data(b"optimized".to_vec()).unwrap();
        assert_eq!(attachment.state(), AttachmentState::ReadyToClean);
        assert_eq!(attachment.source_hash.as_deref(), Some(content_hash(&raw).as_str()));
    }

    #[test]
    fn locally_originated_bytes_are_not_published() {
        let attachment = Attachment::from_native(b"optimized".to_vec()).unwrap();
        assert_eq!(attachment.state(), AttachmentState::NotPublished);
    }

    #[test]
    fn clean_raw_requires_matching_hash() {
        let mut attachment = Attachment::from_pack(b"raw".to_vec(), b"native".to_vec()).unwrap();
        assert_eq!(attachment.state(), AttachmentState::ReadyToClean);

        // Replacing raw invalidates the old native copy; cleaning must refuse.
        attachment.set_raw_data(b"newer raw".to_vec()).unwrap();
        attachment.source_hash = Some("stale".to_string());
        assert_eq!(attachment.state(), AttachmentState::NotOptimized);
        assert!(!attachment.clean_raw_data());
        assert!(attachment.raw.is_some());
    }

    #[test]
    fn clean_raw_purges_verified_raw() {
        let mut attachment = Attachment::from_pack(b"raw".to_vec(), b"native".to_vec()).unwrap();
        assert!(attachment.clean_raw_data());
        assert!(attachment.raw.is_none());
        assert!(attachment.native.is_some());
        // Second call is a no-op.
        assert!(!attachment.clean_raw_data());
    }

    #[test]
    fn clean_raw_is_noop_without_native() {
        let mut attachment = Attachment::from_raw(b"raw".to_vec()).unwrap();
        assert!(!attachment.clean_raw_data());
        assert!(attachment.raw.is_some());
    }

    #[test]
    fn cleaned_published_attachment_is_ready() {
        let mut attachment = Attachment::from_url("https://cdn.nsp.com/a.png").unwrap();
        attachment.set_raw_data(b"raw".to_vec()).unwrap();
        attachment.set_native_data(b"native".to_vec()).unwrap();
        assert!(attachment.clean_raw_data());
        assert_eq!(attachment.state(), AttachmentState::Ready);
    }

    #[test]
    fn deleted_attachment_rejects_mutation() {
        let mut attachment = Attachment::from_raw(b"raw".to_vec()).unwrap();
        attachment.delete();
        assert!(attachment.is_deleted());
        assert!(attachment.set_raw_data(b"again".to_vec()).is_err());
        assert!(attachment.set_native_data(b"again".to_vec()).is_err());
        assert!(attachment.raw.is_none());
        assert!(attachment.source_hash.is_none());
    }

    #[test]
    fn empty_bytes_are_rejected() {
        assert!(Attachment::from_raw(Vec::new()).is_err());
        assert!(Attachment::from_native(Vec::new()).is_err());
    }
}
