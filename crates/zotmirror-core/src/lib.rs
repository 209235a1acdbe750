//! zotmirror-core - Core library for zotmirror
//!
//! This crate contains the schema cache, storage materializer, sync ledger,
//! and delta sync engine used to mirror remote Zotero libraries into a local
//! SQL database.

pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod schema_cache;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Library, LibraryKind, SchemaDefinition};
pub use sync::{SyncEngine, SyncOutcome};
