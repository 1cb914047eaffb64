//! Validation of tool parameters against their declared JSON schema.

use jsonschema::ValidationError;
use serde_json::Value;

/// Check `value` against `schema`, returning a path-qualified message on the
/// first violation.
///
/// # Errors
///
/// Returns a human-readable description of the first mismatch, or of the
/// schema itself when it does not compile.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("invalid parameter schema: {e}"))?;
    validator.validate(value).map_err(|e| describe(&e))
}

fn describe(error: &ValidationError<'_>) -> String {
    format!("{}: {error}", dotted_path(&error.instance_path().to_string()))
}

/// Render a JSON pointer (`/paths/1`) as `params.paths[1]`.
fn dotted_path(pointer: &str) -> String {
    let mut out = String::from("params");
    for token in pointer.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            out.push('[');
            out.push_str(&token);
            out.push(']');
        } else {
            out.push('.');
            out.push_str(&token);
        }
    }
    out
}
