// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! JSON → row projection.
//!
//! A Redis object arrives as two JSON documents: the config payload from
//! `icinga:config:<family>` and `{"checksum": "<hex>"}` from
//! `icinga:checksum:<family>`. [`decode_object`] turns them into the
//! table's final rows, in [`ObjectDescriptor::columns`] order.

use serde_json::{Map, Value};

use super::descriptor::{Expansion, FieldKind, ObjectDescriptor};
use crate::error::SyncError;
use crate::types::values::{
    bool_to_yn, flatten_customvar, notification_states_bitmask, notification_types_bitmask,
};
use crate::types::{Binary, SqlValue};

/// Extract the properties checksum from a checksum document.
pub fn properties_checksum(raw: &str) -> Result<Binary, String> {
    let doc: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let hex = doc
        .get("checksum")
        .and_then(Value::as_str)
        .ok_or_else(|| "checksum document has no 'checksum' string".to_string())?;
    Binary::from_hex(hex).map_err(|e| e.to_string())
}

/// Project one JSON attribute onto its column type.
pub fn column_value(kind: FieldKind, value: Option<&Value>) -> Result<SqlValue, String> {
    let value = match value {
        None | Some(Value::Null) => {
            return Ok(match kind {
                FieldKind::Bool => SqlValue::Text("n".into()),
                FieldKind::Types | FieldKind::States => SqlValue::Int(0),
                _ => SqlValue::Null,
            })
        }
        Some(v) => v,
    };

    match kind {
        FieldKind::Id => value
            .as_str()
            .ok_or_else(|| format!("expected hex string, got {}", value))
            .and_then(|s| Binary::from_hex(s).map_err(|e| e.to_string()))
            .map(SqlValue::from),
        FieldKind::Text | FieldKind::Json => Ok(match value {
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }),
        FieldKind::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(SqlValue::Int)
                .ok_or_else(|| format!("number {} out of range", n)),
            Value::Bool(b) => Ok(SqlValue::Int(i64::from(*b))),
            Value::String(s) => s
                .parse::<i64>()
                .map(SqlValue::Int)
                .map_err(|_| format!("expected integer, got '{}'", s)),
            other => Err(format!("expected integer, got {}", other)),
        },
        FieldKind::Float => value
            .as_f64()
            .map(SqlValue::Float)
            .ok_or_else(|| format!("expected number, got {}", value)),
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(SqlValue::Text(bool_to_yn(*b).into())),
            Value::Number(n) => Ok(SqlValue::Text(bool_to_yn(n.as_f64() != Some(0.0)).into())),
            Value::String(s) if s == "y" || s == "n" => Ok(SqlValue::Text(s.clone())),
            other => Err(format!("expected boolean, got {}", other)),
        },
        FieldKind::Types => notification_types_bitmask(value)
            .map(SqlValue::Int)
            .ok_or_else(|| format!("unknown notification types {}", value)),
        FieldKind::States => notification_states_bitmask(value)
            .map(SqlValue::Int)
            .ok_or_else(|| format!("unknown notification states {}", value)),
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected JSON object, got {}", other)),
    }
}

/// Decode one object into the final rows of `descriptor.table`.
///
/// `checksum` is required for descriptors that track properties checksums.
pub fn decode_object(
    descriptor: &ObjectDescriptor,
    environment_id: Binary,
    id: Binary,
    config: &str,
    checksum: Option<&str>,
) -> Result<Vec<Vec<SqlValue>>, SyncError> {
    let fail = |message: String| SyncError::decode(descriptor.table, &id.to_hex(), message);
    let attrs = parse_object(config).map_err(fail)?;

    if descriptor.expansion == Expansion::FlatCustomvar {
        return Ok(flat_rows(environment_id, id, &attrs));
    }

    let mut row = Vec::with_capacity(descriptor.fields.len() + 3);
    row.push(id.into());
    row.push(environment_id.into());
    if descriptor.checksum {
        let raw = checksum.ok_or_else(|| fail("checksum missing".into()))?;
        row.push(properties_checksum(raw).map_err(fail)?.into());
    }
    for field in descriptor.fields {
        let value = column_value(field.kind, attrs.get(field.column))
            .map_err(|e| fail(format!("{}: {}", field.column, e)))?;
        row.push(value);
    }
    Ok(vec![row])
}

/// The custom variable's value as a JSON tree. Icinga publishes it
/// JSON-encoded inside a string; anything that does not parse is kept as
/// a plain string.
fn customvar_value(attrs: &Map<String, Value>) -> Value {
    match attrs.get("value") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

fn flat_rows(environment_id: Binary, customvar_id: Binary, attrs: &Map<String, Value>) -> Vec<Vec<SqlValue>> {
    let name = attrs.get("name").and_then(Value::as_str).unwrap_or_default();
    flatten_customvar(name, &customvar_value(attrs))
        .into_iter()
        .map(|leaf| {
            let id = Binary::sha1([
                environment_id.as_bytes().as_slice(),
                customvar_id.as_bytes().as_slice(),
                leaf.flatname.as_bytes(),
            ]);
            vec![
                id.into(),
                environment_id.into(),
                customvar_id.into(),
                Binary::sha1([leaf.flatname.as_bytes()]).into(),
                SqlValue::Text(leaf.flatname),
                leaf.flatvalue.into(),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::catalog::find;
    use serde_json::json;

    fn hex(n: u8) -> String {
        Binary::from([n; 20]).to_hex()
    }

    #[test]
    fn test_checksum_document() {
        let raw = json!({ "checksum": hex(7) }).to_string();
        assert_eq!(properties_checksum(&raw).unwrap(), Binary::from([7; 20]));
        assert!(properties_checksum("{}").is_err());
        assert!(properties_checksum("not json").is_err());
    }

    #[test]
    fn test_decode_host() {
        let host = find("host").unwrap();
        let config = json!({
            "name": "web01",
            "address": "10.0.0.1",
            "max_check_attempts": 3,
            "check_interval": 60.0,
            "active_checks_enabled": true,
            "flapping_threshold_low": 25.5,
            "zone_id": hex(3),
        })
        .to_string();
        let checksum = json!({ "checksum": hex(9) }).to_string();
        let env = Binary::from([1; 20]);
        let id = Binary::from([2; 20]);

        let rows = decode_object(host, env, id, &config, Some(&checksum)).unwrap();
        assert_eq!(rows.len(), 1);
        let columns = host.columns();
        let get = |c: &str| rows[0][columns.iter().position(|x| *x == c).unwrap()].clone();

        assert_eq!(get("id"), SqlValue::from(id));
        assert_eq!(get("environment_id"), SqlValue::from(env));
        assert_eq!(get("properties_checksum"), SqlValue::from(Binary::from([9; 20])));
        assert_eq!(get("name"), SqlValue::Text("web01".into()));
        assert_eq!(get("max_check_attempts"), SqlValue::Int(3));
        assert_eq!(get("check_interval"), SqlValue::Int(60));
        assert_eq!(get("active_checks_enabled"), SqlValue::Text("y".into()));
        assert_eq!(get("passive_checks_enabled"), SqlValue::Text("n".into()));
        assert_eq!(get("flapping_threshold_low"), SqlValue::Float(25.5));
        assert_eq!(get("zone_id"), SqlValue::from(Binary::from([3; 20])));
        assert_eq!(get("checkcommand_id"), SqlValue::Null);
    }

    #[test]
    fn test_missing_checksum_is_a_decode_error() {
        let host = find("host").unwrap();
        let err = decode_object(host, Binary::zero(), Binary::zero(), "{}", None).unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
    }

    #[test]
    fn test_bad_id_field_is_a_decode_error() {
        let link = find("host_customvar").unwrap();
        let config = json!({ "host_id": "xyz" }).to_string();
        assert!(decode_object(link, Binary::zero(), Binary::zero(), &config, None).is_err());
    }

    #[test]
    fn test_notification_masks() {
        let notification = find("notification").unwrap();
        let config = json!({ "types": ["Problem", "Recovery"], "states": ["Down"] }).to_string();
        let checksum = json!({ "checksum": hex(1) }).to_string();
        let rows = decode_object(notification, Binary::zero(), Binary::zero(), &config, Some(&checksum)).unwrap();
        let columns = notification.columns();
        let types = columns.iter().position(|c| *c == "types").unwrap();
        let states = columns.iter().position(|c| *c == "states").unwrap();
        assert_eq!(rows[0][types], SqlValue::Int(96));
        assert_eq!(rows[0][states], SqlValue::Int(32));
    }

    #[test]
    fn test_customvar_expands_to_flat_rows() {
        let flat = find("customvar_flat").unwrap();
        let config = json!({
            "name": "disks",
            "value": json!({ "root": { "warn": "10%" }, "ports": [22, 80] }).to_string(),
        })
        .to_string();
        let cv = Binary::from([5; 20]);
        let rows = decode_object(flat, Binary::from([1; 20]), cv, &config, None).unwrap();
        assert_eq!(rows.len(), 3);

        let mut names: Vec<_> = rows
            .iter()
            .map(|r| r[4].as_text().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["disks.ports[0]", "disks.ports[1]", "disks.root.warn"]);
        assert!(rows.iter().all(|r| r[2] == SqlValue::from(cv)));

        let mut ids: Vec<_> = rows.iter().map(|r| r[0].as_bytes().unwrap().to_vec()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_customvar_plain_string_value() {
        let flat = find("customvar_flat").unwrap();
        let config = json!({ "name": "os", "value": "Linux" }).to_string();
        let rows = decode_object(flat, Binary::zero(), Binary::from([5; 20]), &config, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][5], SqlValue::Text("Linux".into()));
    }
}
