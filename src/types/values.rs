// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Column value helpers.
//!
//! Conversions applied when Icinga's JSON is projected onto relational
//! columns: `'y'`/`'n'` booleans, notification type/state bitmasks,
//! truncation to column limits and flattening of custom-variable trees.

use serde_json::Value;

/// Encode a boolean the way the schema's `enum('y','n')` columns expect.
#[must_use]
pub fn bool_to_yn(value: bool) -> &'static str {
    if value {
        "y"
    } else {
        "n"
    }
}

/// Notification type names and their bit in the `types` column.
pub const NOTIFICATION_TYPES: &[(&str, i64)] = &[
    ("DowntimeStart", 1),
    ("DowntimeEnd", 2),
    ("DowntimeRemoved", 4),
    ("Custom", 8),
    ("Acknowledgement", 16),
    ("Problem", 32),
    ("Recovery", 64),
    ("FlappingStart", 128),
    ("FlappingEnd", 256),
];

/// State filter names and their bit in the `states` column.
pub const NOTIFICATION_STATES: &[(&str, i64)] = &[
    ("OK", 1),
    ("Warning", 2),
    ("Critical", 4),
    ("Unknown", 8),
    ("Up", 16),
    ("Down", 32),
];

fn bitmask(value: &Value, table: &[(&str, i64)]) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Array(names) => {
            let mut mask = 0;
            for name in names {
                let name = name.as_str()?;
                let bit = table
                    .iter()
                    .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
                    .map(|(_, bit)| *bit)?;
                mask |= bit;
            }
            Some(mask)
        }
        _ => None,
    }
}

/// Fold a list of notification type names (or an already computed mask)
/// into the bitmask stored in `types` columns. Unknown names yield `None`.
#[must_use]
pub fn notification_types_bitmask(value: &Value) -> Option<i64> {
    bitmask(value, NOTIFICATION_TYPES)
}

/// Same as [`notification_types_bitmask`] for `states` columns.
#[must_use]
pub fn notification_states_bitmask(value: &Value) -> Option<i64> {
    bitmask(value, NOTIFICATION_STATES)
}

/// Bit of a single notification type name, used by notification history.
#[must_use]
pub fn notification_type_bit(name: &str) -> Option<i64> {
    NOTIFICATION_TYPES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, bit)| *bit)
}

/// Cut `text` to at most `max_chars` characters, never splitting a code point.
#[must_use]
pub fn truncate_text(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// One leaf of a flattened custom variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatVar {
    /// Dotted/indexed path, e.g. `disks.root.warn` or `ports[1]`.
    pub flatname: String,
    /// Leaf value rendered as text; `None` for JSON null and empty containers.
    pub flatvalue: Option<String>,
}

/// Flatten a custom variable into its leaves.
///
/// Objects descend with `.key`, arrays with `[index]`. Empty objects and
/// arrays become a single leaf with no value so they remain searchable.
#[must_use]
pub fn flatten_customvar(name: &str, value: &Value) -> Vec<FlatVar> {
    let mut out = Vec::new();
    flatten_into(name.to_string(), value, &mut out);
    out
}

fn flatten_into(path: String, value: &Value, out: &mut Vec<FlatVar>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(format!("{}.{}", path, key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(format!("{}[{}]", path, idx), child, out);
            }
        }
        Value::Object(_) | Value::Array(_) | Value::Null => out.push(FlatVar {
            flatname: path,
            flatvalue: None,
        }),
        Value::String(s) => out.push(FlatVar {
            flatname: path,
            flatvalue: Some(s.clone()),
        }),
        Value::Bool(_) | Value::Number(_) => out.push(FlatVar {
            flatname: path,
            flatvalue: Some(value.to_string()),
        }),
    }
}

/// Split a runtime-update payload `<family>:<id>` on its last colon.
#[must_use]
pub fn split_runtime_payload(payload: &str) -> Option<(&str, &str)> {
    let idx = payload.rfind(':')?;
    let (family, id) = (&payload[..idx], &payload[idx + 1..]);
    if family.is_empty() || id.is_empty() {
        None
    } else {
        Some((family, id))
    }
}
