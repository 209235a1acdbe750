//! Delta sync engine: version-cursored fetch-and-apply for one library.
//!
//! One invocation materializes storage, opens a ledger entry, pages through
//! items changed since the last completed version, applies idempotent
//! upserts, applies deletions (never on an initial sync), and closes the
//! ledger entry. Pages are fetched strictly sequentially; remote cursors are
//! stateful on "since version", so page N must be applied before page N+1 is
//! requested.

mod coerce;

use std::collections::{BTreeMap, HashMap, HashSet};

use libsql::{Connection, Value as DbValue};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::db::{ledger, materializer, Database};
use crate::error::{Error, Result};
use crate::models::{Library, SchemaDefinition};
use crate::remote::{RemoteItem, RemoteLibrary};

/// Items requested per page; the remote caps page size at this value anyway
const PAGE_SIZE: u64 = 100;

/// Aggregate counts of one sync invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Deletion keys reported by the remote but absent locally (stale
    /// deletion reports, counted separately from true deletions)
    pub skipped_deletions: u64,
    /// Remote version recorded in the ledger for this attempt
    pub final_version: i64,
}

/// The sync engine, bound to one database and one resolved schema
pub struct SyncEngine<'a> {
    db: &'a Database,
    schema: &'a SchemaDefinition,
}

impl<'a> SyncEngine<'a> {
    pub const fn new(db: &'a Database, schema: &'a SchemaDefinition) -> Self {
        Self { db, schema }
    }

    /// Run one full sync of `library` against `remote`.
    ///
    /// Failures before the ledger entry exists simply propagate; failures
    /// after it record a failure-fingerprint row (null duration) and then
    /// propagate. Applied item writes are never rolled back: they are
    /// individually idempotent and a retry converges.
    pub async fn sync<R: RemoteLibrary>(
        &self,
        library: &Library,
        remote: &R,
    ) -> Result<SyncOutcome> {
        let namespace = library.storage_namespace();
        let conn = self.db.connection();

        materializer::ensure(conn, &namespace, self.schema).await?;

        // the probe doubles as the credential check
        let probe = remote.probe().await?;
        info!("{namespace} {}", probe.name);

        let handle = ledger::begin(conn, &namespace, &probe.name).await?;
        debug!(
            "sync #{} started at {}",
            handle.id,
            chrono::DateTime::from_timestamp(handle.started_at, 0).unwrap_or_default()
        );

        match self.run_delta(conn, &namespace, remote).await {
            Ok(outcome) => {
                let duration = handle.elapsed_secs();
                ledger::complete(conn, &handle, outcome.final_version, duration).await?;
                info!(
                    "sync #{} of {namespace} finished in {duration}s: \
                     {} inserted, {} updated, {} deleted",
                    handle.id, outcome.inserted, outcome.updated, outcome.deleted
                );
                Ok(outcome)
            }
            Err(error) => {
                let fingerprint = failure_fingerprint(&error, library);
                warn!("sync #{} of {namespace} failed: {error}", handle.id);
                ledger::record_failure(conn, &fingerprint, &error.to_string()).await?;
                Err(error)
            }
        }
    }

    /// Steps 3-7: cursor, probe, short-circuit, delta pages, deletions
    async fn run_delta<R: RemoteLibrary>(
        &self,
        conn: &Connection,
        namespace: &str,
        remote: &R,
    ) -> Result<SyncOutcome> {
        let last_version = ledger::last_completed_version(conn, namespace).await?;
        match last_version {
            Some(version) => {
                let count = ledger::current_item_count(conn, namespace).await?;
                info!("local mirror is at version {version} and contains {count} items");
            }
            None => info!("starting initial sync of library {namespace}"),
        }

        let status = remote.status().await?;
        info!(
            "remote is at version {} and contains {} items",
            status.version, status.item_count
        );

        let mut outcome = SyncOutcome {
            final_version: status.version,
            ..SyncOutcome::default()
        };

        let since = last_version.unwrap_or(0);
        if last_version.is_some() && since >= status.version {
            info!("nothing to sync, everything is up to date");
            return Ok(outcome);
        }

        let known_columns = self.known_columns();

        // Snapshot of local keys and versions, kept current as inserts land
        // so a re-delivered page classifies its items as updates.
        let mut local_versions = local_versions(conn, namespace).await?;

        let mut start: u64 = 0;
        loop {
            let page = remote.items_since(since, start, PAGE_SIZE).await?;
            let fetched = page.items.len() as u64;
            if fetched == 0 {
                debug!("zero updates to process");
                break;
            }
            for item in &page.items {
                if apply_item(conn, namespace, item, &known_columns, &mut local_versions).await? {
                    outcome.inserted += 1;
                } else {
                    outcome.updated += 1;
                }
            }
            start += fetched;
            debug!("{start} of {} updates processed", page.total);
            // stop on a short page, or when the remote-reported total has
            // been reached (prevents one extra empty request)
            if fetched < PAGE_SIZE || start >= page.total {
                break;
            }
        }

        // An initial sync has nothing to delete; the deletion pass reuses
        // the pre-delta cursor on purpose (updates apply first).
        if last_version.is_some() {
            let keys = remote.deleted_since(since).await?;
            debug!("processing {} deletions since version {since}", keys.len());
            for key in &keys {
                if local_versions.remove(key).is_some() {
                    delete_item(conn, namespace, key).await?;
                    outcome.deleted += 1;
                } else {
                    warn!("remote deleted {key}, but it is not in the local mirror");
                    outcome.skipped_deletions += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Columns the items table is guaranteed to have after `ensure`
    fn known_columns(&self) -> HashSet<&str> {
        let mut columns: HashSet<&str> = materializer::SYSTEM_COLUMNS
            .iter()
            .map(|(name, _)| *name)
            .collect();
        columns.extend(self.schema.fields.keys().map(String::as_str));
        columns
    }
}

/// Load the key -> version map for the whole library
async fn local_versions(conn: &Connection, namespace: &str) -> Result<HashMap<String, i64>> {
    let table = materializer::quoted(&materializer::items_table(namespace));
    let mut rows = conn
        .query(&format!("SELECT \"key\", \"version\" FROM {table}"), ())
        .await?;

    let mut versions = HashMap::new();
    while let Some(row) = rows.next().await? {
        let key = row.get::<String>(0)?;
        let version = match row.get_value(1)? {
            DbValue::Integer(version) => version,
            _ => 0,
        };
        versions.insert(key, version);
    }
    Ok(versions)
}

/// Upsert one remote item. Returns `true` for a fresh insert, `false` for an
/// update of a key already mirrored.
async fn apply_item(
    conn: &Connection,
    namespace: &str,
    item: &RemoteItem,
    known_columns: &HashSet<&str>,
    local_versions: &mut HashMap<String, i64>,
) -> Result<bool> {
    let table = materializer::quoted(&materializer::items_table(namespace));

    // meta fields override data fields of the same name, as reported
    let mut merged: BTreeMap<&str, &JsonValue> = BTreeMap::new();
    for (field, value) in item.data.iter().chain(item.meta.iter()) {
        merged.insert(field.as_str(), value);
    }

    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<DbValue> = Vec::new();
    for (field, value) in merged {
        if field == "key" {
            continue;
        }
        if !known_columns.contains(field) {
            warn!("skipping unknown field {field:?} on item {}", item.key);
            continue;
        }
        columns.push(field);
        values.push(coerce::coerce(field, value));
    }

    let is_update = local_versions.contains_key(&item.key);
    if is_update {
        if !columns.is_empty() {
            let assignments = columns
                .iter()
                .map(|column| format!("{} = ?", materializer::quoted(column)))
                .collect::<Vec<_>>()
                .join(", ");
            values.push(DbValue::Text(item.key.clone()));
            conn.execute(
                &format!("UPDATE {table} SET {assignments} WHERE \"key\" = ?"),
                values,
            )
            .await?;
        }
    } else {
        let mut insert_columns = vec!["\"key\"".to_string()];
        insert_columns.extend(columns.iter().map(|column| materializer::quoted(column)));
        let placeholders = vec!["?"; insert_columns.len()].join(", ");
        values.insert(0, DbValue::Text(item.key.clone()));
        conn.execute(
            &format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                insert_columns.join(", ")
            ),
            values,
        )
        .await?;
    }

    local_versions.insert(item.key.clone(), item.version);
    Ok(!is_update)
}

async fn delete_item(conn: &Connection, namespace: &str, key: &str) -> Result<()> {
    let table = materializer::quoted(&materializer::items_table(namespace));
    conn.execute(
        &format!("DELETE FROM {table} WHERE \"key\" = ?"),
        libsql::params![key],
    )
    .await?;
    Ok(())
}

/// Short auditable tag written to the ledger's library column when a sync
/// aborts mid-flight: leading characters of the error text plus the library
/// tail, capped to the ledger column's 15-character width.
fn failure_fingerprint(error: &Error, library: &Library) -> String {
    let head: String = error
        .to_string()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(3)
        .collect::<String>()
        .to_lowercase();
    let head = if head.is_empty() { "err".to_string() } else { head };
    let mut fingerprint = format!("{head}_{}_{}", library.kind().prefix(), library.id());
    fingerprint.truncate(15);
    fingerprint
}
