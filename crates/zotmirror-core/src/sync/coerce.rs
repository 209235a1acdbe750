//! Coercion of remote field values into storage values

use libsql::Value as DbValue;
use serde_json::Value as JsonValue;

/// Fields whose values are structured documents, stored as serialized JSON
const STRUCTURED_FIELDS: &[&str] = &[
    "collections",
    "relations",
    "tags",
    "creators",
    "createdByUser",
    "lastModifiedByUser",
];

/// Map one remote field value onto its storage representation.
///
/// Empty non-numeric values become NULL; structured fields are serialized to
/// JSON text; booleans and integers become integers; everything else passes
/// through as text.
pub(crate) fn coerce(field: &str, value: &JsonValue) -> DbValue {
    if STRUCTURED_FIELDS.contains(&field) {
        return match value {
            JsonValue::Null => DbValue::Null,
            JsonValue::String(text) if text.is_empty() => DbValue::Null,
            JsonValue::Array(items) if items.is_empty() => DbValue::Null,
            JsonValue::Object(map) if map.is_empty() => DbValue::Null,
            other => DbValue::Text(other.to_string()),
        };
    }
    match value {
        JsonValue::Null => DbValue::Null,
        JsonValue::Bool(flag) => DbValue::Integer(i64::from(*flag)),
        JsonValue::Number(number) => number
            .as_i64()
            .map_or_else(|| DbValue::Real(number.as_f64().unwrap_or(0.0)), DbValue::Integer),
        JsonValue::String(text) if text.is_empty() => DbValue::Null,
        JsonValue::String(text) => DbValue::Text(text.clone()),
        other => DbValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_values_become_null() {
        assert_eq!(coerce("title", &json!("")), DbValue::Null);
        assert_eq!(coerce("tags", &json!([])), DbValue::Null);
        assert_eq!(coerce("relations", &json!({})), DbValue::Null);
        assert_eq!(coerce("title", &JsonValue::Null), DbValue::Null);
    }

    #[test]
    fn structured_fields_serialize_to_json_text() {
        let tags = json!([{"tag": "rust"}, {"tag": "sync"}]);
        match coerce("tags", &tags) {
            DbValue::Text(text) => {
                let parsed: JsonValue = serde_json::from_str(&text).unwrap();
                assert_eq!(parsed, tags);
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(coerce("version", &json!(17)), DbValue::Integer(17));
        assert_eq!(coerce("deleted", &json!(true)), DbValue::Integer(1));
        assert_eq!(coerce("deleted", &json!(1)), DbValue::Integer(1));
        assert_eq!(
            coerce("title", &json!("A Title")),
            DbValue::Text("A Title".to_string())
        );
    }
}
