//! Metadata keyfile normalization and query matching
//!
//! A keyfile maps canonical entity text (plus optional aliases) to metadata
//! ids used as retrieval filters. Keyfiles come from external tooling in a
//! few shapes; normalization is deliberately tolerant.

use serde_json::Value;

/// One normalized keyfile entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub id: String,
    pub text: String,
    pub aliases: Vec<String>,
    pub category: Option<String>,
}

/// A keyfile entry whose canonical text or alias appeared in a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    pub id: String,
    pub text: String,
}

const TEXT_FIELDS: &[&str] = &["text", "text_fields", "text_field", "content", "value"];
const RESERVED_FIELDS: &[&str] = &["uuid", "id", "aliases", "category"];

/// Normalize raw keyfile JSON into entries.
///
/// Accepts either a bare array of objects or a `{"Content": [...]}` wrapper.
/// Entries without an id or canonical text are skipped.
pub fn normalize_keyfile(raw: &Value) -> Vec<KeyEntry> {
    let items = match raw {
        Value::Object(map) => match map.get("Content") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        Value::Array(items) => items.as_slice(),
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let id = obj
                .get("uuid")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)?
                .to_string();
            let text = entry_text(obj)?.to_string();
            let aliases = obj
                .get("aliases")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let category = obj
                .get("category")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(KeyEntry {
                id,
                text,
                aliases,
                category,
            })
        })
        .collect()
}

fn entry_text(obj: &serde_json::Map<String, Value>) -> Option<&str> {
    for field in TEXT_FIELDS {
        if let Some(text) = obj.get(*field).and_then(Value::as_str) {
            return Some(text);
        }
    }
    // Last resort: any string field that is not structural.
    obj.iter()
        .find(|(key, value)| !RESERVED_FIELDS.contains(&key.as_str()) && value.is_string())
        .and_then(|(_, value)| value.as_str())
}

/// Find entries whose canonical text or any alias appears in the query,
/// case-insensitively.
pub fn extract_key_matches(keys: &[KeyEntry], query: &str) -> Vec<KeyMatch> {
    if query.is_empty() {
        return Vec::new();
    }
    let query_lower = query.to_lowercase();
    keys.iter()
        .filter(|entry| {
            query_lower.contains(&entry.text.to_lowercase())
                || entry
                    .aliases
                    .iter()
                    .any(|alias| query_lower.contains(&alias.to_lowercase()))
        })
        .map(|entry| KeyMatch {
            id: entry.id.clone(),
            text: entry.text.clone(),
        })
        .collect()
}
