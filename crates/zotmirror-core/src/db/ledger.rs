//! Append-only ledger of sync attempts.
//!
//! One row per attempt: inserted at sync start, updated exactly once at
//! completion, never deleted. A row with non-null `duration` is a completed
//! attempt and the authoritative source for a library's last known version;
//! null-duration rows are in-flight or aborted attempts and never become a
//! cursor.

use std::time::Instant;

use libsql::Connection;

use super::materializer;
use crate::error::{Error, Result};

pub(crate) async fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now')),
            version INTEGER,
            library TEXT NOT NULL,
            name TEXT NOT NULL,
            duration INTEGER
        )",
        (),
    )
    .await?;
    Ok(())
}

/// Handle for one in-flight ledger row
#[derive(Debug)]
pub struct SyncHandle {
    pub id: i64,
    /// Attempt start as assigned by the store, unix seconds
    pub started_at: i64,
    started: Instant,
}

impl SyncHandle {
    /// Whole seconds elapsed since `begin`, rounded up
    #[allow(clippy::cast_possible_truncation)]
    pub fn elapsed_secs(&self) -> i64 {
        self.started.elapsed().as_secs_f64().ceil() as i64
    }
}

/// Open a ledger entry for a sync attempt
pub async fn begin(conn: &Connection, library: &str, name: &str) -> Result<SyncHandle> {
    let mut rows = conn
        .query(
            "INSERT INTO sync_log (library, name) VALUES (?, ?) RETURNING id, timestamp",
            libsql::params![library, name],
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| Error::Ledger("insert returned no row".to_string()))?;
    Ok(SyncHandle {
        id: row.get::<i64>(0)?,
        started_at: row.get::<i64>(1)?,
        started: Instant::now(),
    })
}

/// Close a ledger entry with the remote version reached and the attempt
/// duration in seconds
pub async fn complete(
    conn: &Connection,
    handle: &SyncHandle,
    version: i64,
    duration_secs: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE sync_log SET version = ?, duration = ? WHERE id = ?",
        libsql::params![version, duration_secs, handle.id],
    )
    .await?;
    Ok(())
}

/// Record an attempt that aborted mid-sync. `library` carries a short error
/// fingerprint; version and duration stay null so the row is never picked up
/// as a cursor.
pub async fn record_failure(conn: &Connection, library: &str, message: &str) -> Result<i64> {
    let mut rows = conn
        .query(
            "INSERT INTO sync_log (library, name) VALUES (?, ?) RETURNING id",
            libsql::params![library, message],
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| Error::Ledger("insert returned no row".to_string()))?;
    Ok(row.get::<i64>(0)?)
}

/// Version reached by the most recent completed sync of `library`, or `None`
/// when this library has never completed a sync (the initial-sync marker)
pub async fn last_completed_version(conn: &Connection, library: &str) -> Result<Option<i64>> {
    let mut rows = conn
        .query(
            "SELECT version FROM sync_log
             WHERE library = ? AND duration IS NOT NULL
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            libsql::params![library],
        )
        .await?;
    match rows.next().await? {
        Some(row) => match row.get_value(0)? {
            libsql::Value::Integer(version) => Ok(Some(version)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

/// Count of live (non-deleted) items currently mirrored for `namespace`
pub async fn current_item_count(conn: &Connection, namespace: &str) -> Result<i64> {
    let namespace = materializer::checked_identifier(namespace)?;
    let table = materializer::quoted(&materializer::items_table(namespace));
    let mut rows = conn
        .query(&format!("SELECT COUNT(*) FROM {table} WHERE NOT \"deleted\""), ())
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| Error::Ledger("count returned no row".to_string()))?;
    Ok(row.get::<i64>(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn begin_and_complete_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();

        let handle = begin(conn, "zot_u_1", "My Library").await.unwrap();
        assert!(handle.id > 0);
        assert!(handle.started_at > 0);

        // in-flight rows are not a cursor
        assert_eq!(last_completed_version(conn, "zot_u_1").await.unwrap(), None);

        complete(conn, &handle, 42, 3).await.unwrap();
        assert_eq!(
            last_completed_version(conn, "zot_u_1").await.unwrap(),
            Some(42)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn latest_completed_row_wins() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();

        let first = begin(conn, "zot_u_1", "lib").await.unwrap();
        complete(conn, &first, 10, 1).await.unwrap();
        let second = begin(conn, "zot_u_1", "lib").await.unwrap();
        complete(conn, &second, 15, 1).await.unwrap();

        // both rows can share the same store-assigned second; id breaks the tie
        assert_eq!(
            last_completed_version(conn, "zot_u_1").await.unwrap(),
            Some(15)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_rows_never_become_cursors() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();

        record_failure(conn, "rem_u_1", "Remote API error: boom")
            .await
            .unwrap();
        assert_eq!(last_completed_version(conn, "rem_u_1").await.unwrap(), None);
        assert_eq!(last_completed_version(conn, "zot_u_1").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cursors_are_scoped_per_library() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();

        let handle = begin(conn, "zot_u_1", "lib").await.unwrap();
        complete(conn, &handle, 7, 1).await.unwrap();

        assert_eq!(
            last_completed_version(conn, "zot_u_1").await.unwrap(),
            Some(7)
        );
        assert_eq!(last_completed_version(conn, "zot_g_2").await.unwrap(), None);
    }
}
