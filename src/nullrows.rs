// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Null rows: all-zero sentinels that "no reference" foreign keys point at.

use tracing::{debug, info};

use crate::error::SyncError;
use crate::history::category::{Category, Kind, ObjectKind, COMMON};
use crate::objects::CATALOG;
use crate::storage::traits::Database;
use crate::types::{Binary, SqlValue, TableRows};

fn null_value(kind: Kind) -> SqlValue {
    match kind {
        Kind::Uuid => SqlValue::Bytes(vec![0; 16]),
        Kind::Id => Binary::zero().into(),
        Kind::Text | Kind::LongText(_) => SqlValue::Text(String::new()),
        // Timestamps stay NULL so retention never matches the sentinel.
        Kind::Int | Kind::TypeBit => SqlValue::Null,
        Kind::Bool => SqlValue::Text("n".into()),
    }
}

/// Sentinel of a category history table, referenced by index rows of
/// other categories.
#[must_use]
pub fn history_null_row(object: ObjectKind, category: Category, environment_id: Binary) -> TableRows {
    let mut row = vec![SqlValue::Bytes(category.zero_id()), environment_id.into()];
    for field in COMMON.iter().chain(category.fields()) {
        row.push(match field.column {
            "object_type" => object.as_str().into(),
            _ => null_value(field.kind),
        });
    }
    let mut rows = TableRows::new(category.table(object), category.columns(), vec![category.id_column()]);
    rows.rows.push(row);
    rows
}

/// Insert every sentinel the schema relies on. Existing rows are kept, so
/// running this on every start is harmless.
pub async fn insert_null_rows(db: &dyn Database, environment_id: Binary) -> Result<u64, SyncError> {
    let mut inserted = 0;
    for rows in CATALOG.iter().filter_map(|d| d.null_row(environment_id)) {
        inserted += db.insert_ignore(&rows).await?;
        debug!(table = rows.table, "Null row ensured");
    }
    for object in ObjectKind::ALL {
        for category in Category::ALL {
            inserted += db
                .insert_ignore(&history_null_row(object, category, environment_id))
                .await?;
        }
    }
    info!(inserted, "Null rows in place");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryDatabase;

    #[test]
    fn test_history_null_row_shape() {
        let rows = history_null_row(ObjectKind::Service, Category::Downtime, Binary::from([3; 20]));
        assert_eq!(rows.table, "service_downtime_history");
        assert_eq!(rows.rows[0].len(), rows.columns.len());
        assert_eq!(rows.rows[0][0], SqlValue::Bytes(vec![0; 20]));
        let object_type = rows.position("object_type").unwrap();
        assert_eq!(rows.rows[0][object_type], SqlValue::Text("service".into()));
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let db = MemoryDatabase::new();
        let env = Binary::from([3; 20]);
        let first = insert_null_rows(&db, env).await.unwrap();
        assert!(first > 0);
        assert_eq!(insert_null_rows(&db, env).await.unwrap(), 0);

        assert!(db.find("endpoint", "id", &Binary::zero()).is_some());
        assert_eq!(db.count("host_state_history"), 1);
        assert_eq!(db.count("host"), 0);
    }
}
