//! Local schema coercion and lenient JSON extraction for model output.

use serde_json::{Map, Value};

/// Coerce a candidate object to a JSON-schema-like description.
///
/// Only object schemas with `properties` are touched: undeclared keys are
/// dropped, and every `required` key that is missing is set to null. No type
/// coercion is attempted. Any other schema returns the candidate unmodified.
pub fn coerce_to_schema(candidate: Value, schema: &Value) -> Value {
    let is_object_schema = schema.get("type").and_then(Value::as_str) == Some("object");
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return candidate;
    };
    if !is_object_schema {
        return candidate;
    }

    let mut object = match candidate {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    object.retain(|key, _| properties.contains_key(key));

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            object.entry(key.to_string()).or_insert(Value::Null);
        }
    }

    Value::Object(object)
}

/// Parse model text as JSON, tolerating markdown fences and surrounding prose.
pub fn parse_json_object(text: &str) -> Result<Value, serde_json::Error> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let body = if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if end > start => &trimmed[start..=end],
            _ => trimmed,
        }
    };
    serde_json::from_str(body)
}
