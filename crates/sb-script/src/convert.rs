//! Structural conversion between script values and JSON
//!
//! Scripts see rhai's native value model (unit, bool, int, float, string,
//! array, object map); the bus and the state store speak JSON. Conversion is
//! structural in both directions. A script value with no JSON representation
//! (e.g. a function pointer) falls back to its string representation rather
//! than erroring, so a stray value never aborts a handler.

use rhai::Dynamic;
use serde_json::Value;

/// Convert a script value to JSON.
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    match rhai::serde::from_dynamic::<Value>(value) {
        Ok(json) => json,
        // Fall back to the display form for values JSON cannot express.
        Err(_) => Value::String(value.to_string()),
    }
}

/// Convert JSON to a script value.
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}
