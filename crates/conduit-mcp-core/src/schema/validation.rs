//! Argument validation against a JSON-schema subset.
//!
//! The supported keywords are `type`, `properties`, `required`, `enum`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, `minItems`/`maxItems`,
//! `items`, `default`, and `additionalProperties`. Validation is a pure
//! function of (arguments, schema); failures come back as a list of issues
//! keyed by JSON pointer, suitable for embedding in the `data` field of an
//! `-32602` response.

use serde::Serialize;
use serde_json::{Map, Value};

/// One validation failure, anchored by JSON pointer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationIssue {
    /// JSON pointer to the offending location, e.g. `/b` or `/items/2`.
    pub pointer: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(pointer: &str, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.to_string(),
            message: message.into(),
        }
    }
}

/// Validate `arguments` against `schema`, filling declared defaults.
///
/// On success returns the arguments with defaults for absent optional
/// properties filled in. On failure returns every issue found, not just the
/// first.
pub fn validate_arguments(
    arguments: &Value,
    schema: &Value,
) -> Result<Value, Vec<ValidationIssue>> {
    let mut value = arguments.clone();
    let mut issues = Vec::new();
    fill_defaults(&mut value, schema);
    check(&value, schema, "", &mut issues);
    if issues.is_empty() {
        Ok(value)
    } else {
        Err(issues)
    }
}

/// Insert `default` values for absent optional object properties, recursively.
fn fill_defaults(value: &mut Value, schema: &Value) {
    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        if let Some(obj) = value.as_object_mut() {
            for (name, prop_schema) in props {
                match obj.get_mut(name) {
                    Some(existing) => fill_defaults(existing, prop_schema),
                    None => {
                        if let Some(default) = prop_schema.get("default") {
                            obj.insert(name.clone(), default.clone());
                        }
                    }
                }
            }
            return;
        }
    }
    if let Some(item_schema) = schema.get("items") {
        if let Some(items) = value.as_array_mut() {
            for item in items {
                fill_defaults(item, item_schema);
            }
        }
    }
}

fn check(value: &Value, schema: &Value, pointer: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            issues.push(ValidationIssue::new(
                pointer,
                format!("expected {expected}, got {}", type_name(value)),
            ));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            issues.push(ValidationIssue::new(
                pointer,
                format!("value must be one of {}", Value::Array(allowed.clone())),
            ));
        }
    }

    match value {
        Value::Number(n) => check_number_bounds(n, schema, pointer, issues),
        Value::String(s) => check_string_bounds(s, schema, pointer, issues),
        Value::Array(items) => check_array(items, schema, pointer, issues),
        Value::Object(obj) => check_object(obj, schema, pointer, issues),
        _ => {}
    }
}

fn check_number_bounds(
    n: &serde_json::Number,
    schema: &Value,
    pointer: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(value) = n.as_f64() else { return };
    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
        if value < minimum {
            issues.push(ValidationIssue::new(
                pointer,
                format!("{value} is below minimum {minimum}"),
            ));
        }
    }
    if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
        if value > maximum {
            issues.push(ValidationIssue::new(
                pointer,
                format!("{value} is above maximum {maximum}"),
            ));
        }
    }
}

fn check_string_bounds(
    s: &str,
    schema: &Value,
    pointer: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let chars = s.chars().count();
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if (chars as u64) < min {
            issues.push(ValidationIssue::new(
                pointer,
                format!("string shorter than minLength {min}"),
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if (chars as u64) > max {
            issues.push(ValidationIssue::new(
                pointer,
                format!("string longer than maxLength {max}"),
            ));
        }
    }
}

fn check_array(items: &[Value], schema: &Value, pointer: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            issues.push(ValidationIssue::new(
                pointer,
                format!("array has fewer than minItems {min}"),
            ));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            issues.push(ValidationIssue::new(
                pointer,
                format!("array has more than maxItems {max}"),
            ));
        }
    }
    if let Some(item_schema) = schema.get("items") {
        for (index, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{pointer}/{index}"), issues);
        }
    }
}

fn check_object(
    obj: &Map<String, Value>,
    schema: &Value,
    pointer: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                issues.push(ValidationIssue::new(
                    &format!("{pointer}/{name}"),
                    "missing required property",
                ));
            }
        }
    }

    if let Some(properties) = properties {
        for (name, value) in obj {
            match properties.get(name) {
                Some(prop_schema) => {
                    check(value, prop_schema, &format!("{pointer}/{name}"), issues)
                }
                None => {
                    if !additional_properties_allowed(schema) {
                        issues.push(ValidationIssue::new(
                            &format!("{pointer}/{name}"),
                            "property not declared in schema",
                        ));
                    }
                }
            }
        }
    }
}

/// Undeclared properties are rejected unless `additionalProperties` permits
/// them. With no `properties` map at all there is nothing to be undeclared
/// relative to, so objects pass through.
fn additional_properties_allowed(schema: &Value) -> bool {
    match schema.get("additionalProperties") {
        Some(Value::Bool(allowed)) => *allowed,
        Some(Value::Object(_)) => true,
        _ => false,
    }
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

    fn add_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"}
            },
            "required": ["a", "b"]
        })
    }

    #[test]
    fn valid_arguments_pass_unchanged() {
        let args = json!({"a": 2, "b": 3});
        assert_eq!(validate_arguments(&args, &add_schema()).unwrap(), args);
    }

    #[test]
    fn missing_required_reports_pointer() {
        let issues = validate_arguments(&json!({"a": 1}), &add_schema()).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].pointer, "/b");
    }

    #[test]
    fn wrong_type_reports_pointer() {
        let issues = validate_arguments(&json!({"a": "two", "b": 3}), &add_schema()).unwrap_err();
        assert_eq!(issues[0].pointer, "/a");
        assert!(issues[0].message.contains("expected number"));
    }

    #[test]
    fn undeclared_property_rejected_by_default() {
        let issues =
            validate_arguments(&json!({"a": 1, "b": 2, "c": 3}), &add_schema()).unwrap_err();
        assert_eq!(issues[0].pointer, "/c");
    }

    #[test]
    fn additional_properties_true_admits_extras() {
        let mut schema = add_schema();
        schema["additionalProperties"] = json!(true);
        assert!(validate_arguments(&json!({"a": 1, "b": 2, "c": 3}), &schema).is_ok());
    }

    #[test]
    fn defaults_fill_absent_optionals() {
        let schema = json!({
            "type": "object",
            "properties": {
                "greeting": {"type": "string", "default": "hello"},
                "name": {"type": "string"}
            },
            "required": ["name"]
        });
        let result = validate_arguments(&json!({"name": "world"}), &schema).unwrap();
        assert_eq!(result["greeting"], json!("hello"));
    }

    #[test]
    fn enum_violation_rejected() {
        let schema = json!({"type": "string", "enum": ["red", "green", "blue"]});
        let issues = validate_arguments(&json!("yellow"), &schema).unwrap_err();
        assert_eq!(issues[0].pointer, "");
        assert!(issues[0].message.contains("one of"));
    }

    #[test]
    fn numeric_bounds_enforced() {
        let schema = json!({"type": "integer", "minimum": 0, "maximum": 10});
        assert!(validate_arguments(&json!(5), &schema).is_ok());
        assert!(validate_arguments(&json!(-1), &schema).is_err());
        assert!(validate_arguments(&json!(11), &schema).is_err());
    }

    #[test]
    fn string_and_array_bounds_enforced() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tag": {"type": "string", "minLength": 2, "maxLength": 4},
                "ids": {"type": "array", "items": {"type": "integer"}, "minItems": 1, "maxItems": 3}
            }
        });
        assert!(validate_arguments(&json!({"tag": "ok", "ids": [1]}), &schema).is_ok());
        assert!(validate_arguments(&json!({"tag": "x"}), &schema).is_err());
        assert!(validate_arguments(&json!({"ids": []}), &schema).is_err());
        let issues = validate_arguments(&json!({"ids": [1, "two"]}), &schema).unwrap_err();
        assert_eq!(issues[0].pointer, "/ids/1");
    }

    #[test]
    fn validation_is_pure() {
        let args = json!({"a": 1});
        let schema = add_schema();
        let first = validate_arguments(&args, &schema);
        let second = validate_arguments(&args, &schema);
        assert_eq!(first, second);
    }
}
