// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Expansion of one stream entry into the rows it is written as.
//!
//! Every event yields its category row and an index row in
//! `<object_type>_history`. Hard state changes add a `sla_history_state`
//! row, downtimes with a known start add a `sla_history_downtime` row.

use std::collections::HashMap;
use uuid::Uuid;

use super::category::{
    Category, IdKind, Kind, ObjectKind, COMMON, INDEX_COLUMNS, SLA_DOWNTIME_COLUMNS, SLA_DOWNTIME_TABLE,
    SLA_STATE_COLUMNS, SLA_STATE_TABLE,
};
use crate::storage::traits::EventRows;
use crate::types::values::{bool_to_yn, notification_type_bit, truncate_text};
use crate::types::{Binary, SqlValue, TableRows};

/// Field accessor over a stream entry. Empty strings count as absent.
struct Fields<'a>(&'a HashMap<String, String>);

impl<'a> Fields<'a> {
    fn get(&self, field: &str) -> Option<&'a str> {
        self.0.get(field).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn int(&self, field: &str) -> Result<Option<i64>, String> {
        self.get(field).map(|raw| parse_int(field, raw)).transpose()
    }

    fn flag(&self, field: &str) -> Result<bool, String> {
        match self.get(field) {
            None => Ok(false),
            Some(raw) => parse_bool(field, raw),
        }
    }

    fn value(&self, field: &str, kind: Kind) -> Result<SqlValue, String> {
        let Some(raw) = self.get(field) else {
            return Ok(SqlValue::Null);
        };
        Ok(match kind {
            Kind::Uuid => SqlValue::Bytes(parse_uuid(field, raw)?.to_vec()),
            Kind::Id => Binary::from_hex(raw).map_err(|e| format!("{}: {}", field, e))?.into(),
            Kind::Text => raw.into(),
            Kind::LongText(limit) => truncate_text(raw, limit).into(),
            Kind::Int => parse_int(field, raw)?.into(),
            Kind::Bool => bool_to_yn(parse_bool(field, raw)?).into(),
            Kind::TypeBit => match raw.parse::<i64>() {
                Ok(bit) => bit.into(),
                Err(_) => notification_type_bit(raw)
                    .ok_or_else(|| format!("{}: unknown notification type '{}'", field, raw))?
                    .into(),
            },
        })
    }
}

fn parse_int(field: &str, raw: &str) -> Result<i64, String> {
    raw.parse::<i64>()
        .or_else(|_| raw.parse::<f64>().map(|f| f as i64))
        .map_err(|_| format!("{}: not a number '{}'", field, raw))
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, String> {
    match raw {
        "1" | "true" | "y" => Ok(true),
        "0" | "false" | "n" => Ok(false),
        _ => Err(format!("{}: not a boolean '{}'", field, raw)),
    }
}

fn parse_uuid(field: &str, raw: &str) -> Result<[u8; 16], String> {
    Uuid::parse_str(raw)
        .map(|u| *u.as_bytes())
        .map_err(|e| format!("{}: {}", field, e))
}

/// State type of a state event; Icinga writes `1` for hard.
fn is_hard(raw: Option<&str>) -> bool {
    matches!(raw, Some("1" | "hard"))
}

/// Rows for one history event.
pub fn event_rows(
    object: ObjectKind,
    category: Category,
    environment_id: Binary,
    raw: &HashMap<String, String>,
) -> Result<EventRows, String> {
    let fields = Fields(raw);
    let id_column = category.id_column();
    let id_raw = fields
        .get(id_column)
        .ok_or_else(|| format!("missing {}", id_column))?;
    let id = match category.id_kind() {
        IdKind::Uuid => parse_uuid(id_column, id_raw)?.to_vec(),
        IdKind::Binary => Binary::from_hex(id_raw)
            .map_err(|e| format!("{}: {}", id_column, e))?
            .to_vec(),
    };
    if fields.get("host_id").is_none() {
        return Err("missing host_id".into());
    }

    let common: Vec<SqlValue> = COMMON
        .iter()
        .map(|f| match (f.column, fields.get(f.field)) {
            ("object_type", None) => Ok(object.as_str().into()),
            _ => fields.value(f.field, f.kind),
        })
        .collect::<Result<_, _>>()?;

    let mut category_row = vec![SqlValue::Bytes(id.clone()), environment_id.into()];
    category_row.extend(common.iter().cloned());
    for f in category.fields() {
        category_row.push(fields.value(f.field, f.kind)?);
    }
    let mut category_rows = TableRows::new(category.table(object), category.columns(), vec![id_column]);
    category_rows.rows.push(category_row);

    let event_type = fields.get("event_type").unwrap_or(category.as_str());
    let index_id = match fields.get("event_id") {
        Some(raw) => parse_uuid("event_id", raw)?.to_vec(),
        None if category.id_kind() == IdKind::Uuid => id.clone(),
        None => Binary::sha1([id.as_slice(), event_type.as_bytes()]).as_bytes()[..16].to_vec(),
    };
    let event_time = match fields.int("event_time")? {
        Some(time) => time,
        None => fields.int(category.time_field())?.unwrap_or(0),
    };

    let mut index_row = vec![SqlValue::Bytes(index_id), environment_id.into()];
    index_row.extend(common.iter().cloned());
    for linked in [
        Category::Notification,
        Category::State,
        Category::Downtime,
        Category::Comment,
        Category::Flapping,
        Category::Acknowledgement,
    ] {
        let value = if linked == category { id.clone() } else { linked.zero_id() };
        index_row.push(SqlValue::Bytes(value));
    }
    index_row.push(event_type.into());
    index_row.push(event_time.into());
    let mut index_rows = TableRows::new(object.index_table(), INDEX_COLUMNS.to_vec(), vec!["id"]);
    index_rows.rows.push(index_row);

    let mut rows = vec![category_rows, index_rows];

    match category {
        Category::State => {
            let hard = fields.int("hard_state")?;
            let previous = fields.int("previous_hard_state")?;
            if is_hard(fields.get("state_type")) && hard != previous {
                let mut sla_row = vec![SqlValue::Bytes(id), environment_id.into()];
                sla_row.extend(common);
                sla_row.extend([SqlValue::from(event_time), SqlValue::from(hard), SqlValue::from(previous)]);
                let mut sla = TableRows::new(SLA_STATE_TABLE, SLA_STATE_COLUMNS.to_vec(), vec!["id"]);
                sla.rows.push(sla_row);
                rows.push(sla);
            }
        }
        Category::Downtime => {
            if let Some((start, end)) = downtime_window(&fields)? {
                let mut sla_row = vec![SqlValue::Bytes(id), environment_id.into()];
                sla_row.extend(common);
                sla_row.extend([SqlValue::from(start), SqlValue::from(end)]);
                let mut sla = TableRows::new(SLA_DOWNTIME_TABLE, SLA_DOWNTIME_COLUMNS.to_vec(), vec!["downtime_id"]);
                sla.rows.push(sla_row);
                rows.push(sla);
            }
        }
        _ => {}
    }

    Ok(rows)
}

/// `(downtime_start, downtime_end)` relevant for SLA reporting.
///
/// Fixed downtimes count from their scheduled start, flexible ones from
/// the moment they triggered. A cancellation cuts the window short.
fn downtime_window(fields: &Fields<'_>) -> Result<Option<(i64, i64)>, String> {
    let flexible = fields.flag("is_flexible")?;
    let start = if flexible {
        match fields.int("trigger_time")? {
            Some(trigger) if trigger > 0 => trigger,
            _ => return Ok(None),
        }
    } else {
        match fields.int("scheduled_start_time")? {
            Some(start) => start,
            None => return Ok(None),
        }
    };

    let end = match (fields.flag("has_been_cancelled")?, fields.int("cancel_time")?) {
        (true, Some(cancel)) if cancel > 0 => cancel,
        _ if flexible => start + fields.int("flexible_duration")?.unwrap_or(0),
        _ => fields.int("scheduled_end_time")?.unwrap_or(start),
    };
    Ok(Some((start, end)))
}
