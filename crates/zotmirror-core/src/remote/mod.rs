//! Remote library client interface and wire types

mod zotero;

pub use zotero::{fetch_key_info, KeyAccess, KeyInfo, ZoteroClient, DEFAULT_API_BASE};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// One changed item as reported by the remote.
///
/// `data` carries the editable fields (including `itemType`, `version` and,
/// for trashed items, `deleted`); `meta` carries server-derived fields such
/// as `numChildren` and `creatorSummary`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteItem {
    pub key: String,
    pub version: i64,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl RemoteItem {
    /// Item type reported in the data payload, if any
    pub fn item_type(&self) -> Option<&str> {
        self.data.get("itemType").and_then(Value::as_str)
    }
}

/// One page of changed items plus the remote's pagination metadata
#[derive(Debug, Clone)]
pub struct ItemPage {
    pub items: Vec<RemoteItem>,
    /// Total results matching the query, from the `Total-Results` header
    pub total: u64,
}

/// Remote library state from a minimal probe request
#[derive(Debug, Clone, Copy)]
pub struct RemoteStatus {
    pub item_count: u64,
    pub version: i64,
}

/// Library display name, learned from the access-checking probe
#[derive(Debug, Clone)]
pub struct LibraryProbe {
    pub name: String,
}

/// Remote side of one library sync.
///
/// The engine drives this interface strictly sequentially: page N+1 is never
/// requested before page N's effects on local state have been applied.
#[allow(async_fn_in_trait)]
pub trait RemoteLibrary {
    /// Access check; returns the library display name
    async fn probe(&self) -> Result<LibraryProbe>;

    /// Current remote item count and library version
    async fn status(&self) -> Result<RemoteStatus>;

    /// Up to `limit` items changed since version `since`, starting at
    /// offset `start`, trashed items included
    async fn items_since(&self, since: i64, start: u64, limit: u64) -> Result<ItemPage>;

    /// Keys of items deleted since version `since`
    async fn deleted_since(&self, since: i64) -> Result<Vec<String>>;
}
