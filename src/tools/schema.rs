//! Structural validation of tool arguments against their JSON Schema.
//!
//! Covers the subset tool configs actually use: object shape, required
//! properties, primitive types, enum values, and nested objects/arrays.
//! Anything the schema does not constrain passes.

use serde_json::Value;

/// Validate `args` against `schema`. Returns the path and reason of the
/// first violation.
pub fn validate(args: &Value, schema: &Value) -> Result<(), String> {
    validate_at(args, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            return Err(format!(
                "{}: expected {}, got {}",
                path,
                expected,
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{}: value not in enum", path));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(format!("{}.{}: required property missing", path, name));
                }
            }
        }
        if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
            for (name, prop_schema) in props {
                if let Some(prop_value) = obj.get(name) {
                    validate_at(prop_value, prop_schema, &format!("{}.{}", path, name))?;
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(item_schema) = schema_obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_at(item, item_schema, &format!("{}[{}]", path, i))?;
            }
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "days": {"type": "integer"},
                "unit": {"type": "string", "enum": ["c", "f"]}
            },
            "required": ["city"]
        })
    }

    #[test]
    fn test_valid_arguments_pass() {
        let args = json!({"city": "Tokyo", "days": 3, "unit": "c"});
        assert!(validate(&args, &weather_schema()).is_ok());
    }

    #[test]
    fn test_missing_required_property() {
        let err = validate(&json!({"days": 3}), &weather_schema()).unwrap_err();
        assert!(err.contains("city"));
        assert!(err.contains("required"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate(&json!({"city": 42}), &weather_schema()).unwrap_err();
        assert!(err.contains("$.city"));
        assert!(err.contains("expected string"));
    }

    #[test]
    fn test_enum_violation() {
        let err = validate(&json!({"city": "x", "unit": "k"}), &weather_schema()).unwrap_err();
        assert!(err.contains("enum"));
    }

    #[test]
    fn test_nested_arrays() {
        let schema = json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
        });
        assert!(validate(&json!({"tags": ["a", "b"]}), &schema).is_ok());
        assert!(validate(&json!({"tags": ["a", 1]}), &schema).is_err());
    }

    #[test]
    fn test_unconstrained_schema_accepts_anything() {
        assert!(validate(&json!({"whatever": true}), &json!({})).is_ok());
    }
}
