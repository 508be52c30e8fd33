//! JSON schema for per-call structured capture.

use serde_json::{Map, Value, json};

use crate::campaign::model::CaptureField;

/// Build the capture schema for `fields`.
///
/// Each non-blank key becomes a property typed via [`CaptureType::json_type`]
/// with its label as description (omitted when blank). Every key is required.
///
/// [`CaptureType::json_type`]: crate::campaign::model::CaptureType::json_type
pub fn build_schema(fields: &[CaptureField]) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    for field in fields {
        let key = field.key.trim();
        if key.is_empty() || properties.contains_key(key) {
            continue;
        }
        let mut prop = Map::new();
        prop.insert("type".into(), json!(field.field_type.json_type()));
        let label = field.label.trim();
        if !label.is_empty() {
            prop.insert("description".into(), json!(label));
        }
        properties.insert(key.to_string(), Value::Object(prop));
        required.push(json!(key));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::CaptureType;

    #[test]
    fn schema_is_image_of_capture_fields() {
        let fields = vec![
            CaptureField::new("interested", "", CaptureType::Text),
            CaptureField::new("count", "", CaptureType::Number),
        ];
        let schema = build_schema(&fields);
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "interested": {"type": "string"},
                    "count": {"type": "number"},
                },
                "required": ["interested", "count"],
            })
        );
    }

    #[test]
    fn label_becomes_description() {
        let fields = vec![CaptureField::new("budget", "Monthly budget", CaptureType::Number)];
        let schema = build_schema(&fields);
        assert_eq!(schema["properties"]["budget"]["description"], "Monthly budget");
    }

    #[test]
    fn blank_and_duplicate_keys_are_skipped() {
        let fields = vec![
            CaptureField::new(" ", "blank", CaptureType::Text),
            CaptureField::new("a", "first", CaptureType::Text),
            CaptureField::new("a", "second", CaptureType::Number),
        ];
        let schema = build_schema(&fields);
        assert_eq!(schema["required"], json!(["a"]));
        assert_eq!(schema["properties"]["a"]["type"], "string");
    }

    #[test]
    fn empty_fields_give_empty_schema() {
        let schema = build_schema(&[]);
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }
}
