//! Zotero web API client

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ItemPage, LibraryProbe, RemoteItem, RemoteLibrary, RemoteStatus};
use crate::error::{Error, Result};
use crate::models::Library;

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "https://api.zotero.org";

/// HTTP client bound to one remote library
#[derive(Clone)]
pub struct ZoteroClient {
    base: String,
    library: Library,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ZoteroClient {
    pub fn new(library: Library, api_key: Option<String>) -> Result<Self> {
        Self::with_base(DEFAULT_API_BASE, library, api_key)
    }

    pub fn with_base(
        base: impl Into<String>,
        library: Library,
        api_key: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            library,
            api_key,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn library_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{path}",
            self.base,
            self.library.kind().api_segment(),
            self.library.id()
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("Zotero-API-Key", key);
        }
        request
    }

    async fn send_checked(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(Error::AccessDenied(format!(
                "{status} for {}",
                self.library
            )));
        }
        if !status.is_success() {
            return Err(Error::Remote(format!(
                "unexpected status {status} from {}",
                response.url()
            )));
        }
        Ok(response)
    }
}

impl RemoteLibrary for ZoteroClient {
    async fn probe(&self) -> Result<LibraryProbe> {
        #[derive(Deserialize)]
        struct Envelope {
            library: LibraryField,
        }
        #[derive(Deserialize)]
        struct LibraryField {
            name: String,
        }

        // A single-item listing doubles as the credential check; every item
        // envelope carries the library display name.
        let request = self.request(&self.library_url("items")).query(&[
            ("limit", "1"),
            ("format", "json"),
            ("includeTrashed", "1"),
        ]);
        let response = self.send_checked(request).await?;
        let items = response.json::<Vec<Envelope>>().await?;
        let name = items
            .into_iter()
            .next()
            .map_or_else(|| self.library.storage_namespace(), |e| e.library.name);
        Ok(LibraryProbe { name })
    }

    async fn status(&self) -> Result<RemoteStatus> {
        let request = self
            .request(&self.library_url("items/top"))
            .query(&[("limit", "1"), ("format", "keys")]);
        let response = self.send_checked(request).await?;
        Ok(RemoteStatus {
            item_count: header_u64(&response, "Total-Results"),
            version: header_i64(&response, "Last-Modified-Version"),
        })
    }

    async fn items_since(&self, since: i64, start: u64, limit: u64) -> Result<ItemPage> {
        let request = self.request(&self.library_url("items/top")).query(&[
            ("format", "json".to_string()),
            ("includeTrashed", "1".to_string()),
            ("since", since.to_string()),
            ("start", start.to_string()),
            ("limit", limit.to_string()),
        ]);
        let response = self.send_checked(request).await?;
        let total = header_u64(&response, "Total-Results");
        let items = response.json::<Vec<RemoteItem>>().await?;
        Ok(ItemPage { items, total })
    }

    async fn deleted_since(&self, since: i64) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Deletions {
            #[serde(default)]
            items: Vec<String>,
        }

        let request = self
            .request(&self.library_url("deleted"))
            .query(&[("since", since.to_string())]);
        let response = self.send_checked(request).await?;
        Ok(response.json::<Deletions>().await?.items)
    }
}

/// Privileges attached to an API key, from `GET /keys/{key}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "userID")]
    pub user_id: i64,
    #[serde(default)]
    pub access: KeyAccess,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyAccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub groups: serde_json::Map<String, Value>,
}

impl KeyAccess {
    /// True when the key grants access to its owner's personal library
    pub fn user_library(&self) -> bool {
        self.user
            .as_ref()
            .and_then(|user| user.get("library"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Numeric group ids the key can read
    pub fn group_ids(&self) -> Vec<i64> {
        self.groups.keys().filter_map(|key| key.parse().ok()).collect()
    }

    /// True when the key carries the catch-all `all` group grant, which
    /// needs a separate endpoint to enumerate
    pub fn grants_all_groups(&self) -> bool {
        self.groups.contains_key("all")
    }
}

/// Fetch the privileges of an API key
pub async fn fetch_key_info(
    client: &reqwest::Client,
    base: &str,
    api_key: &str,
) -> Result<KeyInfo> {
    let url = format!("{}/keys/{api_key}", base.trim_end_matches('/'));
    let response = client.get(&url).send().await?;
    let status = response.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
        let prefix: String = api_key.chars().take(4).collect();
        return Err(Error::AccessDenied(format!(
            "API key starting with {prefix} was rejected ({status})"
        )));
    }
    if !status.is_success() {
        return Err(Error::Remote(format!("unexpected status {status} from {url}")));
    }
    Ok(response.json::<KeyInfo>().await?)
}

fn header_i64(response: &reqwest::Response, name: &str) -> i64 {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn header_u64(response: &reqwest::Response, name: &str) -> u64 {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LibraryKind;

    #[test]
    fn key_access_reads_grants() {
        let info: KeyInfo = serde_json::from_str(
            r#"{
                "key": "abcd",
                "userID": 12345,
                "access": {
                    "user": {"library": true, "files": true},
                    "groups": {"98765": {"library": true}, "all": {"library": true}}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(info.user_id, 12345);
        assert!(info.access.user_library());
        assert_eq!(info.access.group_ids(), vec![98765]);
        assert!(info.access.grants_all_groups());
    }

    #[test]
    fn key_access_defaults_to_nothing() {
        let info: KeyInfo = serde_json::from_str(r#"{"userID": 7}"#).unwrap();
        assert!(!info.access.user_library());
        assert!(info.access.group_ids().is_empty());
    }

    #[test]
    fn library_urls_use_kind_segment() {
        let library = Library::new(LibraryKind::Group, 42).unwrap();
        let client = ZoteroClient::new(library, None).unwrap();
        assert_eq!(
            client.library_url("items/top"),
            "https://api.zotero.org/groups/42/items/top"
        );
    }

    #[test]
    fn remote_item_parses_envelope() {
        let item: RemoteItem = serde_json::from_str(
            r#"{
                "key": "ABCD2345",
                "version": 17,
                "library": {"type": "user", "id": 1, "name": "My Library"},
                "meta": {"numChildren": 2, "creatorSummary": "Doe"},
                "data": {"key": "ABCD2345", "version": 17, "itemType": "book", "title": "T"}
            }"#,
        )
        .unwrap();

        assert_eq!(item.key, "ABCD2345");
        assert_eq!(item.version, 17);
        assert_eq!(item.item_type(), Some("book"));
        assert_eq!(item.meta.get("numChildren").and_then(Value::as_i64), Some(2));
    }
}
