//! Cleaning server-provided input schemas for function calling.
//!
//! Function-calling APIs accept a narrow JSON Schema subset. Local `$ref`s
//! are inlined (a ref already being expanded on the current path collapses
//! to a plain object, so self-referential schemas terminate) and keywords
//! the APIs reject are dropped.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value, json};

const STRING_FORMATS_KEPT: &[&str] = &["enum", "date-time"];

/// Keywords whose values are data, not subschemas.
const LITERAL_KEYWORDS: &[&str] = &["enum", "const", "examples", "required"];

const DROPPED_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "additionalProperties",
    "$defs",
    "definitions",
];

/// Return a sanitized copy of `schema`.
#[must_use]
pub fn sanitize_schema(schema: &Value) -> Value {
    let defs = collect_definitions(schema);
    let mut expanding = HashSet::new();
    expanding.insert("#".to_owned());
    let mut out = sanitize_node(schema, &defs, &mut expanding);

    match &mut out {
        Value::Object(map) => {
            if !map.contains_key("type") && !map.contains_key("anyOf") {
                map.insert("type".into(), json!("object"));
            }
        }
        _ => out = json!({"type": "object"}),
    }
    out
}

fn collect_definitions(root: &Value) -> HashMap<String, &Value> {
    let mut defs = HashMap::new();
    defs.insert("#".to_owned(), root);
    for section in ["$defs", "definitions"] {
        if let Some(Value::Object(entries)) = root.get(section) {
            for (name, def) in entries {
                let escaped = name.replace('~', "~0").replace('/', "~1");
                defs.insert(format!("#/{section}/{escaped}"), def);
            }
        }
    }
    defs
}

fn sanitize_node(
    node: &Value,
    defs: &HashMap<String, &Value>,
    expanding: &mut HashSet<String>,
) -> Value {
    match node {
        Value::Object(map) => sanitize_object(map, defs, expanding),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| sanitize_node(v, defs, expanding))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sanitize_object(
    map: &Map<String, Value>,
    defs: &HashMap<String, &Value>,
    expanding: &mut HashSet<String>,
) -> Value {
    if let Some(Value::String(reference)) = map.get("$ref") {
        let mut resolved = match defs.get(reference) {
            Some(target) if !expanding.contains(reference) => {
                expanding.insert(reference.clone());
                let inlined = sanitize_node(target, defs, expanding);
                expanding.remove(reference);
                inlined
            }
            Some(_) => {
                tracing::debug!(reference = %reference, "cyclic schema reference collapsed");
                json!({"type": "object"})
            }
            None => {
                tracing::debug!(reference = %reference, "unresolvable schema reference");
                json!({"type": "object"})
            }
        };
        if let (Value::Object(out), Some(desc)) = (&mut resolved, map.get("description")) {
            out.insert("description".into(), desc.clone());
        }
        return resolved;
    }

    let has_any_of = map.contains_key("anyOf");
    let is_string = map.get("type").and_then(Value::as_str) == Some("string");
    let mut out = Map::with_capacity(map.len());

    for (key, value) in map {
        let key_str = key.as_str();
        if DROPPED_KEYWORDS.contains(&key_str) || (key_str == "default" && has_any_of) {
            continue;
        }
        if key_str == "format"
            && is_string
            && !value
                .as_str()
                .is_some_and(|f| STRING_FORMATS_KEPT.contains(&f))
        {
            continue;
        }

        let cleaned = if LITERAL_KEYWORDS.contains(&key_str) {
            value.clone()
        } else if key_str == "properties" {
            match value {
                Value::Object(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, sub)| (name.clone(), sanitize_node(sub, defs, expanding)))
                        .collect(),
                ),
                other => other.clone(),
            }
        } else {
            sanitize_node(value, defs, expanding)
        };
        out.insert(key.clone(), cleaned);
    }

    Value::Object(out)
}
