//! Remote type schema: item types, their fields, and storage classification

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Storage column type for one canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnType {
    Text,
    LongText,
    Integer,
    Boolean,
    Timestamp,
    Json,
}

impl ColumnType {
    /// SQL column definition used in DDL
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Text | Self::LongText | Self::Json => "TEXT",
            Self::Integer => "INTEGER",
            Self::Boolean => "INTEGER DEFAULT 0",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

/// One field of an item type, optionally backed by a differently named
/// canonical column (`baseField` in the remote schema)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub field: String,
    #[serde(
        default,
        rename = "baseField",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_field: Option<String>,
}

impl FieldDef {
    /// Canonical column backing this field
    pub fn column(&self) -> &str {
        self.base_field.as_deref().unwrap_or(&self.field)
    }
}

/// One item type and the fields applicable to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTypeDef {
    #[serde(rename = "itemType")]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Conditional-fetch validators stored alongside the cached schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidators {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// The remote type schema, classified for storage.
///
/// `fields` maps every canonical field referenced by any item type to its
/// storage column type; the `BTreeMap` keeps column ordering stable across
/// refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub headers: CacheValidators,
    pub item_types: Vec<ItemTypeDef>,
    pub fields: BTreeMap<String, ColumnType>,
}

impl SchemaDefinition {
    /// Build a definition from the remote item-type list, classifying every
    /// referenced field into a storage column type.
    pub fn from_item_types(item_types: Vec<ItemTypeDef>, headers: CacheValidators) -> Self {
        let mut fields = BTreeMap::new();
        for item_type in &item_types {
            for field in &item_type.fields {
                let column = field.column();
                fields.insert(column.to_string(), classify_field(column));
            }
        }
        Self {
            headers,
            item_types,
            fields,
        }
    }
}

/// Storage classification for one canonical field name.
///
/// Date-valued fields get a dedicated column type; everything else is stored
/// as unbounded text.
fn classify_field(name: &str) -> ColumnType {
    match name {
        "accessDate" => ColumnType::Timestamp,
        _ => ColumnType::LongText,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn field(name: &str) -> FieldDef {
        FieldDef {
            field: name.to_string(),
            base_field: None,
        }
    }

    fn aliased(name: &str, base: &str) -> FieldDef {
        FieldDef {
            field: name.to_string(),
            base_field: Some(base.to_string()),
        }
    }

    #[test]
    fn classification_covers_every_referenced_field() {
        let schema = SchemaDefinition::from_item_types(
            vec![
                ItemTypeDef {
                    name: "book".to_string(),
                    fields: vec![field("title"), field("publisher"), field("accessDate")],
                },
                ItemTypeDef {
                    name: "webpage".to_string(),
                    fields: vec![field("title"), aliased("websiteTitle", "publicationTitle")],
                },
            ],
            CacheValidators::default(),
        );

        for item_type in &schema.item_types {
            for field in &item_type.fields {
                assert!(
                    schema.fields.contains_key(field.column()),
                    "field {} has no column type",
                    field.column()
                );
            }
        }
        // aliased fields are classified under their canonical column
        assert!(schema.fields.contains_key("publicationTitle"));
        assert!(!schema.fields.contains_key("websiteTitle"));
    }

    #[test]
    fn access_date_gets_a_timestamp_column() {
        assert_eq!(classify_field("accessDate"), ColumnType::Timestamp);
        assert_eq!(classify_field("title"), ColumnType::LongText);
    }

    #[test]
    fn parses_remote_field_shape() {
        let parsed: FieldDef =
            serde_json::from_str(r#"{"field": "websiteTitle", "baseField": "publicationTitle"}"#)
                .unwrap();
        assert_eq!(parsed.column(), "publicationTitle");

        let parsed: FieldDef = serde_json::from_str(r#"{"field": "title"}"#).unwrap();
        assert_eq!(parsed.column(), "title");
    }
}
