//! Client-side argument validation against tool input schemas.
//!
//! Implements the subset of JSON Schema that MCP tool schemas actually use:
//! `type`, `required`, `properties`, `enum`, and `items`. Unknown keywords
//! are ignored rather than rejected, so a server using a richer schema still
//! gets its calls through; the server remains the final authority. All
//! violations are collected in one pass, not just the first.

use serde_json::Value;

/// Validate arguments against an optional input schema.
///
/// A missing schema means the tool accepts anything. On failure, every
/// violation found is returned with its JSON path.
pub fn validate_arguments(schema: Option<&Value>, arguments: &Value) -> Result<(), Vec<String>> {
    let Some(schema) = schema else {
        return Ok(());
    };

    let mut violations = Vec::new();
    check(schema, arguments, "", &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check(schema: &Value, value: &Value, path: &str, violations: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        // Boolean schemas: `true` accepts everything, `false` nothing
        if schema == &Value::Bool(false) {
            violations.push(violation(path, "schema forbids any value".to_string()));
        }
        return;
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, value) {
            violations.push(violation(
                path,
                format!(
                    "expected {}, got {}",
                    type_label(expected),
                    type_name(value)
                ),
            ));
            // A wrong-typed value cannot satisfy the remaining keywords
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            violations.push(violation(
                path,
                format!("value {value} is not one of the allowed values"),
            ));
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    violations.push(violation(path, format!("missing required property '{name}'")));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property_schema) in properties {
                if let Some(property_value) = object.get(name) {
                    check(
                        property_schema,
                        property_value,
                        &join(path, name),
                        violations,
                    );
                }
            }
        }
    }

    if let Some(array) = value.as_array() {
        if let Some(items) = schema.get("items") {
            for (index, item) in array.iter().enumerate() {
                check(items, item, &format!("{path}[{index}]"), violations);
            }
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, value),
        // Union types: `"type": ["string", "null"]`
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_label(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "any".to_string(),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn violation(path: &str, message: String) -> String {
    if path.is_empty() {
        message
    } else {
        format!("'{path}': {message}")
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}
