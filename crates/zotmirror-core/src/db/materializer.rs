//! Storage materializer: turns a schema definition into concrete per-library
//! storage structures.
//!
//! Evolution is additive only: columns are added when the schema gains
//! fields, never dropped or retyped. Per-item-type views are cheap and are
//! replaced wholesale on every call.

use std::collections::HashSet;

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::{ColumnType, ItemTypeDef, SchemaDefinition};

/// Fixed columns present on every items table regardless of the remote
/// schema revision (key identity, version cursor, soft-delete flag, and the
/// server-derived meta fields).
pub(crate) const SYSTEM_COLUMNS: &[(&str, ColumnType)] = &[
    ("key", ColumnType::Text),
    ("version", ColumnType::Integer),
    ("deleted", ColumnType::Boolean),
    ("itemType", ColumnType::Text),
    ("numChildren", ColumnType::Integer),
    ("dateAdded", ColumnType::Timestamp),
    ("dateModified", ColumnType::Timestamp),
    ("createdByUser", ColumnType::Json),
    ("lastModifiedByUser", ColumnType::Json),
    ("parsedDate", ColumnType::Text),
    ("creatorSummary", ColumnType::Text),
    ("creators", ColumnType::Json),
    ("tags", ColumnType::Json),
    ("collections", ColumnType::Json),
    ("relations", ColumnType::Json),
];

/// Items table name for a library namespace
pub(crate) fn items_table(namespace: &str) -> String {
    format!("{namespace}_items")
}

/// Strict allow-list check for every name that reaches DDL: ASCII letters,
/// digits and underscores, leading letter, at most 64 characters. Unsafe
/// names are rejected, never escaped.
pub(crate) fn checked_identifier(name: &str) -> Result<&str> {
    let safe = !name.is_empty()
        && name.len() <= 64
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if safe {
        Ok(name)
    } else {
        Err(Error::Materialization(format!("unsafe identifier {name:?}")))
    }
}

/// Double-quote a vetted identifier
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{name}\"")
}

fn ddl_error(error: libsql::Error) -> Error {
    Error::Materialization(error.to_string())
}

/// Ensure the library's storage exists and covers `schema`: the items table,
/// one column per system field and per canonical schema field, and one view
/// per item type. Idempotent; safe to call on every sync. Any DDL failure
/// aborts and propagates.
pub async fn ensure(conn: &Connection, namespace: &str, schema: &SchemaDefinition) -> Result<()> {
    let namespace = checked_identifier(namespace)?;
    let items = items_table(namespace);

    // SQLite cannot create an empty table; seed it with the key column
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (\"key\" TEXT PRIMARY KEY)",
            quoted(&items)
        ),
        (),
    )
    .await
    .map_err(ddl_error)?;

    let existing = existing_columns(conn, &items).await?;
    let mut wanted: Vec<(&str, ColumnType)> = SYSTEM_COLUMNS.to_vec();
    for (field, column_type) in &schema.fields {
        wanted.push((field.as_str(), *column_type));
    }

    for (name, column_type) in wanted {
        let name = checked_identifier(name)?;
        if existing.contains(name) {
            continue;
        }
        conn.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quoted(&items),
                quoted(name),
                column_type.sql()
            ),
            (),
        )
        .await
        .map_err(ddl_error)?;
        tracing::debug!("added column {name} to {items}");
    }

    for item_type in &schema.item_types {
        ensure_view(conn, namespace, &items, item_type).await?;
    }

    Ok(())
}

/// Column names currently on `table`
async fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut rows = conn
        .query(&format!("PRAGMA table_info({})", quoted(table)), ())
        .await
        .map_err(ddl_error)?;

    let mut columns = HashSet::new();
    while let Some(row) = rows.next().await.map_err(ddl_error)? {
        columns.insert(row.get::<String>(1).map_err(ddl_error)?);
    }
    Ok(columns)
}

/// (Re)create the read view for one item type: system columns plus exactly
/// that type's applicable fields, aliasing fields whose canonical column
/// differs from their display name.
async fn ensure_view(
    conn: &Connection,
    namespace: &str,
    items: &str,
    item_type: &ItemTypeDef,
) -> Result<()> {
    let type_name = checked_identifier(&item_type.name)?;
    let view = format!("{namespace}_{type_name}");

    let mut select: Vec<String> = SYSTEM_COLUMNS
        .iter()
        .map(|(name, _)| quoted(name))
        .collect();
    for field in &item_type.fields {
        let display = checked_identifier(&field.field)?;
        let column = checked_identifier(field.column())?;
        if column == display {
            select.push(quoted(display));
        } else {
            select.push(format!("{} AS {}", quoted(column), quoted(display)));
        }
    }

    conn.execute(&format!("DROP VIEW IF EXISTS {}", quoted(&view)), ())
        .await
        .map_err(ddl_error)?;

    // type_name passed the identifier check, safe to inline as a literal
    conn.execute(
        &format!(
            "CREATE VIEW {} AS SELECT {} FROM {} WHERE \"itemType\" = '{type_name}'",
            quoted(&view),
            select.join(", "),
            quoted(items)
        ),
        (),
    )
    .await
    .map_err(ddl_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{CacheValidators, FieldDef};

    fn field(name: &str) -> FieldDef {
        FieldDef {
            field: name.to_string(),
            base_field: None,
        }
    }

    fn book_schema(extra_field: Option<&str>) -> SchemaDefinition {
        let mut fields = vec![field("title"), field("publisher"), field("accessDate")];
        if let Some(extra) = extra_field {
            fields.push(field(extra));
        }
        SchemaDefinition::from_item_types(
            vec![
                ItemTypeDef {
                    name: "book".to_string(),
                    fields,
                },
                ItemTypeDef {
                    name: "webpage".to_string(),
                    fields: vec![
                        field("title"),
                        FieldDef {
                            field: "websiteTitle".to_string(),
                            base_field: Some("publicationTitle".to_string()),
                        },
                    ],
                },
            ],
            CacheValidators::default(),
        )
    }

    async fn column_names(db: &Database, relation: &str) -> Vec<String> {
        let mut rows = db
            .connection()
            .query(&format!("PRAGMA table_info({})", quoted(relation)), ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(1).unwrap());
        }
        names
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ensure_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = book_schema(None);

        ensure(db.connection(), "zot_u_1", &schema).await.unwrap();
        let first = column_names(&db, "zot_u_1_items").await;

        ensure(db.connection(), "zot_u_1", &schema).await.unwrap();
        let second = column_names(&db, "zot_u_1_items").await;

        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schema_growth_adds_exactly_one_column() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();

        ensure(conn, "zot_u_1", &book_schema(None)).await.unwrap();
        conn.execute(
            "INSERT INTO \"zot_u_1_items\" (\"key\", \"version\", \"itemType\", \"title\") \
             VALUES ('ABCD2345', 3, 'book', 'Kept')",
            (),
        )
        .await
        .unwrap();
        let before = column_names(&db, "zot_u_1_items").await;

        ensure(conn, "zot_u_1", &book_schema(Some("edition"))).await.unwrap();
        let after = column_names(&db, "zot_u_1_items").await;

        assert_eq!(after.len(), before.len() + 1);
        assert!(after.contains(&"edition".to_string()));

        // existing row survives untouched
        let mut rows = conn
            .query(
                "SELECT \"title\" FROM \"zot_u_1_items\" WHERE \"key\" = 'ABCD2345'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "Kept");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn views_project_applicable_fields_with_aliases() {
        let db = Database::open_in_memory().await.unwrap();
        ensure(db.connection(), "zot_g_9", &book_schema(None))
            .await
            .unwrap();

        let webpage = column_names(&db, "zot_g_9_webpage").await;
        assert!(webpage.contains(&"websiteTitle".to_string()));
        assert!(!webpage.contains(&"publicationTitle".to_string()));
        assert!(webpage.contains(&"key".to_string()));

        let book = column_names(&db, "zot_g_9_book").await;
        assert!(book.contains(&"publisher".to_string()));
        assert!(!book.contains(&"websiteTitle".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn view_filters_on_item_type() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        ensure(conn, "zot_u_2", &book_schema(None)).await.unwrap();

        conn.execute(
            "INSERT INTO \"zot_u_2_items\" (\"key\", \"version\", \"itemType\", \"title\") VALUES \
             ('AAAA1111', 1, 'book', 'A Book'), ('BBBB2222', 2, 'webpage', 'A Page')",
            (),
        )
        .await
        .unwrap();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM \"zot_u_2_book\"", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_unsafe_identifiers() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = book_schema(None);

        let error = ensure(db.connection(), "zot_u_1; DROP TABLE x", &schema)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Materialization(_)));

        assert!(checked_identifier("zot_u_1").is_ok());
        assert!(checked_identifier("").is_err());
        assert!(checked_identifier("1abc").is_err());
        assert!(checked_identifier("a\"b").is_err());
    }
}
