//! File-backed cache of the remote type schema.
//!
//! The remote schema endpoint supports conditional fetches; the cache stores
//! the validators it saw last (`ETag`, `Last-Modified`) next to the parsed
//! definition and revalidates cheaply on every run. The cache file is only
//! rewritten when the remote actually served a modified schema.

use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{CacheValidators, ItemTypeDef, SchemaDefinition};

/// Default remote schema endpoint
pub const DEFAULT_SCHEMA_URL: &str = "https://api.zotero.org/schema";

/// Body shape of the remote schema document (only the parts we consume)
#[derive(Debug, Deserialize)]
struct RemoteSchemaPayload {
    #[serde(rename = "itemTypes")]
    item_types: Vec<ItemTypeDef>,
}

/// Explicit cache object with an injected storage path; callers hold and
/// pass the instance, there is no process-wide global.
pub struct SchemaCache {
    path: PathBuf,
    endpoint: String,
}

impl SchemaCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            endpoint: DEFAULT_SCHEMA_URL.to_string(),
        }
    }

    /// Point the cache at a non-default schema endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the current schema definition, revalidating against the remote.
    ///
    /// `force_refresh` drops the stored validators so the fetch is
    /// unconditional. Fails with [`Error::SchemaUnavailable`] only when no
    /// cached copy exists and the remote cannot be reached; an unreachable
    /// remote with a cache on disk returns the stale copy.
    pub async fn get(
        &self,
        client: &reqwest::Client,
        force_refresh: bool,
    ) -> Result<SchemaDefinition> {
        let cached = self.load_cached();

        let mut request = client.get(&self.endpoint).header("Accept-Encoding", "gzip");
        if !force_refresh {
            if let Some(cached) = &cached {
                if let Some(etag) = &cached.headers.etag {
                    request = request.header("If-None-Match", etag);
                }
                if let Some(last_modified) = &cached.headers.last_modified {
                    request = request.header("If-Modified-Since", last_modified);
                }
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                return cached.map_or_else(
                    || {
                        Err(Error::SchemaUnavailable(format!(
                            "no cached schema and remote fetch failed: {error}"
                        )))
                    },
                    |cached| {
                        tracing::warn!("schema endpoint unreachable, using cached schema: {error}");
                        Ok(cached)
                    },
                );
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            return cached.map_or_else(
                || {
                    Err(Error::SchemaUnavailable(
                        "remote reported not-modified but no cache exists".to_string(),
                    ))
                },
                |cached| {
                    tracing::debug!("remote schema not modified, using cached copy");
                    Ok(cached)
                },
            );
        }
        if !response.status().is_success() {
            let status = response.status();
            return cached.map_or_else(
                || {
                    Err(Error::SchemaUnavailable(format!(
                        "schema endpoint returned {status}"
                    )))
                },
                |cached| {
                    tracing::warn!("schema endpoint returned {status}, using cached schema");
                    Ok(cached)
                },
            );
        }

        let validators = CacheValidators {
            etag: header_string(&response, "ETag"),
            last_modified: header_string(&response, "Last-Modified"),
        };
        let payload = response.json::<RemoteSchemaPayload>().await?;
        let schema = SchemaDefinition::from_item_types(payload.item_types, validators);
        self.persist(&schema)?;
        tracing::info!(
            "remote schema refreshed: {} item types, {} fields",
            schema.item_types.len(),
            schema.fields.len()
        );
        Ok(schema)
    }

    /// Load the cached definition, treating absence or corruption as a miss
    fn load_cached(&self) -> Option<SchemaDefinition> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(schema) => Some(schema),
            Err(error) => {
                tracing::warn!(
                    "ignoring unreadable schema cache {}: {error}",
                    self.path.display()
                );
                None
            }
        }
    }

    fn persist(&self, schema: &SchemaDefinition) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string(schema)?)?;
        Ok(())
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
