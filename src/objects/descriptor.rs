// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Declarative object type descriptors.
//!
//! One [`ObjectDescriptor`] per configuration table drives every pipeline
//! stage: the Redis keys to read, the table and columns to write, whether
//! checksums are compared, and how one Redis object expands into rows.

use crate::types::{Binary, SqlValue, TableRows};

/// How a JSON attribute is projected onto its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 40-hex identifier or checksum → `binary(20)`; absent → NULL.
    Id,
    Text,
    Int,
    Float,
    /// `enum('y','n')`; absent → `'n'`.
    Bool,
    /// Notification type names → bitmask.
    Types,
    /// Notification state names → bitmask.
    States,
    /// Arbitrary JSON stored as text; strings are kept verbatim.
    Json,
}

impl FieldKind {
    /// Value used in a table's null row.
    #[must_use]
    pub fn null_value(self) -> SqlValue {
        match self {
            Self::Id => Binary::zero().into(),
            Self::Text | Self::Json => SqlValue::Text(String::new()),
            Self::Int | Self::Types | Self::States => SqlValue::Int(0),
            Self::Float => SqlValue::Float(0.0),
            Self::Bool => SqlValue::Text("n".into()),
        }
    }
}

/// A payload column; the JSON attribute carries the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub column: &'static str,
    pub kind: FieldKind,
}

/// How one Redis object becomes relational rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// Exactly one row with the descriptor's columns.
    Single,
    /// One row per flattened leaf of the custom variable's value.
    FlatCustomvar,
}

/// Columns written for [`Expansion::FlatCustomvar`].
pub const FLAT_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "customvar_id",
    "flatname_checksum",
    "flatname",
    "flatvalue",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Redis key family: `icinga:config:<family>`.
    pub family: &'static str,
    pub table: &'static str,
    /// Column holding the Redis id when listing a table's ids.
    pub delta_column: &'static str,
    /// Whether `icinga:checksum:<family>` carries a properties checksum.
    pub checksum: bool,
    pub fields: &'static [Field],
    pub expansion: Expansion,
    /// Whether the table receives an all-zero sentinel row.
    pub null_row: bool,
}

impl ObjectDescriptor {
    #[must_use]
    pub fn config_key(&self) -> String {
        format!("icinga:config:{}", self.family)
    }

    #[must_use]
    pub fn checksum_key(&self) -> String {
        format!("icinga:checksum:{}", self.family)
    }

    /// Columns in statement order.
    #[must_use]
    pub fn columns(&self) -> Vec<&'static str> {
        if self.expansion == Expansion::FlatCustomvar {
            return FLAT_COLUMNS.to_vec();
        }
        let mut columns = vec!["id", "environment_id"];
        if self.checksum {
            columns.push("properties_checksum");
        }
        columns.extend(self.fields.iter().map(|f| f.column));
        columns
    }

    /// An empty row set for this table.
    #[must_use]
    pub fn rows(&self) -> TableRows {
        TableRows::new(self.table, self.columns(), vec!["id"])
    }

    /// The sentinel row for this table, if it has one.
    #[must_use]
    pub fn null_row(&self, environment_id: Binary) -> Option<TableRows> {
        if !self.null_row {
            return None;
        }
        let mut row = vec![Binary::zero().into(), environment_id.into()];
        if self.checksum {
            row.push(Binary::zero().into());
        }
        row.extend(self.fields.iter().map(|f| f.kind.null_value()));

        let mut rows = self.rows();
        rows.rows.push(row);
        Some(rows)
    }
}
