//! Minimal JSON-schema validation for tool arguments.
//!
//! Only the subset that tool schemas use in practice is checked: `type`,
//! `required`, `properties`, `items`, `enum`, numeric and length bounds.
//! Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Validate `value` against `schema`, returning every violation found.
pub fn validate_params(value: &Value, schema: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at(value, schema, "", &mut errors);
    errors
}

fn validate_at(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };
    let label = if path.is_empty() { "parameters" } else { path };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(value, expected) {
            errors.push(format!("{} should be {}", label, expected));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            errors.push(format!("{} must be one of [{}]", label, options.join(", ")));
        }
    }

    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                    if v < min {
                        errors.push(format!("{} must be >= {}", label, min));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                    if v > max {
                        errors.push(format!("{} must be <= {}", label, max));
                    }
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    errors.push(format!("{} must be at least {} chars", label, min));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    errors.push(format!("{} must be at most {} chars", label, max));
                }
            }
        }
        Value::Object(fields) => validate_object(fields, schema, path, errors),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item, item_schema, &format!("{}[{}]", label, i), errors);
                }
            }
        }
        _ => {}
    }
}

fn validate_object(
    fields: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    let child = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path, key)
        }
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(key) {
                errors.push(format!("missing required {}", child(key)));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in fields {
            if let Some(prop_schema) = properties.get(key) {
                validate_at(value, prop_schema, &child(key), errors);
            }
        }
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}
