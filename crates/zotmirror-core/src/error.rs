//! Error types for zotmirror-core

use thiserror::Error;

/// Result type alias using zotmirror-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in zotmirror-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No cached schema exists and the remote schema fetch failed
    #[error("Zotero schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// Library id or kind rejected before any network or storage call
    #[error("Invalid library reference: {0}")]
    InvalidLibrary(String),

    /// The remote rejected our credentials for this library
    #[error("Remote access denied: {0}")]
    AccessDenied(String),

    /// DDL failure while preparing per-library storage
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// Sync ledger bookkeeping failure
    #[error("Sync ledger error: {0}")]
    Ledger(String),

    /// Unexpected remote status or payload
    #[error("Remote API error: {0}")]
    Remote(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
