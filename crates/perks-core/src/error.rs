//! Error types for perks-core

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using perks-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in perks-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown session/account/entity id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication/refresh failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Network/API failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Storage failure (save failure, switch with pending writes)
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    Database(#[from] libsql::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication-layer failures.
///
/// Only a final refresh failure surfaces out of the refresh coordinator;
/// `Scope` translates it into a guest-session fallback instead of letting a
/// raw transport error reach arbitrary call sites.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The server rejected the credentials outright.
    #[error("Request was not authorized")]
    Unauthorized,

    /// The refresh token was rejected; the session is no longer valid.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// An authenticated operation was requested on a guest session.
    #[error("No authenticated session")]
    NotAuthenticated,

    /// The session changed while the request was in flight.
    #[error("Session was superseded while the request was in flight")]
    Cancelled,

    /// Secure token store failure.
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}
