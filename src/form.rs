//! Schema-driven form model.
//!
//! The options endpoint returns an arbitrary JSON object; nothing about its
//! shape is under this crate's control. This module turns that object into a
//! declarative field list a caller can render: each key is classified into
//! one of three field kinds, and list entries are normalized into uniform
//! value/label pairs. Classification is total: unrecognized shapes degrade
//! to an opaque-but-editable representation, they are never rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options schema as returned by the service: field name to arbitrary value.
///
/// `serde_json` is built with `preserve_order`, so iteration follows the
/// server's key order and descriptors come out in the same order.
pub type OptionsSchema = serde_json::Map<String, Value>;

/// A normalized selectable choice. `value` is the canonical identifier sent
/// back to the server; `label` is display-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceItem {
    pub value: String,
    pub label: String,
}

impl ChoiceItem {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Classification of one schema key into a renderable field kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldKind {
    /// Array value: zero or more of the normalized choices may be selected.
    MultiChoice { choices: Vec<ChoiceItem> },
    /// Primitive (or null) value: free-text edit, sent back verbatim.
    Text { initial: String },
    /// Any other object: exposed as editable compact JSON. The crate cannot
    /// know the object's schema, so it never re-parses or validates edits.
    OpaqueJson { initial: String },
}

/// One renderable field derived from one schema key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub key: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn is_multi_choice(&self) -> bool {
        matches!(self.kind, FieldKind::MultiChoice { .. })
    }
}

/// Text rendering of a JSON value used inside choice items: strings are kept
/// verbatim (not JSON-quoted), everything else is compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize one raw choice entry into a `ChoiceItem`.
///
/// Accepts anything: `"SC"`, `2025`, `{value, label}`, `{id, name}`, or any
/// other shape. Total: every JSON value yields some item.
pub fn normalize(raw: &Value) -> ChoiceItem {
    match raw {
        Value::Null => ChoiceItem::new("", ""),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            let text = stringify(raw);
            ChoiceItem::new(text.clone(), text)
        }
        Value::Object(map) => {
            if let (Some(value), Some(label)) = (map.get("value"), map.get("label")) {
                return ChoiceItem::new(stringify(value), stringify(label));
            }
            if let (Some(id), Some(name)) = (map.get("id"), map.get("name")) {
                return ChoiceItem::new(stringify(id), stringify(name));
            }
            let as_text = raw.to_string();
            ChoiceItem::new(as_text.clone(), as_text)
        }
        // Nested arrays have no obvious identifier either; same fallback.
        Value::Array(_) => {
            let as_text = raw.to_string();
            ChoiceItem::new(as_text.clone(), as_text)
        }
    }
}

/// Classify every schema key into a field descriptor, in schema key order.
///
/// An empty schema yields an empty list; callers distinguish that from
/// "nothing fetched yet" through the session view, not here.
pub fn synthesize(schema: &OptionsSchema) -> Vec<FieldDescriptor> {
    schema
        .iter()
        .map(|(key, value)| FieldDescriptor {
            key: key.clone(),
            kind: classify(value),
        })
        .collect()
}

fn classify(value: &Value) -> FieldKind {
    match value {
        Value::Array(entries) => FieldKind::MultiChoice {
            choices: entries.iter().map(normalize).collect(),
        },
        Value::Null => FieldKind::Text {
            initial: String::new(),
        },
        Value::String(_) | Value::Number(_) | Value::Bool(_) => FieldKind::Text {
            initial: stringify(value),
        },
        Value::Object(_) => FieldKind::OpaqueJson {
            initial: value.to_string(),
        },
    }
}
