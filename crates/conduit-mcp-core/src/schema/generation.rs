//! Schema derivation for in-process tool argument types.

use schemars::JsonSchema;
use serde_json::Value;

/// Derive a JSON schema for `T` as a plain `serde_json::Value`, the shape the
/// registry stores for a tool's `inputSchema`.
pub fn schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: f64,
        b: f64,
    }

    #[test]
    fn derived_schema_declares_properties() {
        let schema = schema_for::<AddArgs>();
        assert!(schema["properties"]["a"].is_object());
        assert!(schema["properties"]["b"].is_object());
    }
}
