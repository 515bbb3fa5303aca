// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk statement builders.
//!
//! Three deterministic templates cover all configuration writes:
//!
//! ```text
//! REPLACE INTO "t" ("c1","c2") VALUES (?,?),(?,?)     insert + update
//! DELETE FROM "t" WHERE "pk" IN (?,?,?)               delete
//! ```
//!
//! Identifiers are always double-quoted; MySQL sessions run with
//! `ANSI_QUOTES` and SQLite accepts them natively.

use crate::storage::traits::RetentionDelete;

/// Keys per `IN (...)` list.
pub const KEY_CHUNK: usize = 1000;

/// SQL flavour the wrapper is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Self::Sqlite
        } else {
            Self::MySql
        }
    }
}

#[must_use]
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(",")
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

fn values_clause(columns: usize, rows: usize) -> String {
    let tuple = format!("({})", placeholders(columns));
    vec![tuple; rows].join(",")
}

/// Rows per statement so that `rows * columns` stays within the placeholder budget.
#[must_use]
pub fn rows_per_statement(columns: usize, max_placeholders: usize, max_rows: usize) -> usize {
    if columns == 0 {
        return max_rows.max(1);
    }
    (max_placeholders / columns).clamp(1, max_rows.max(1))
}

/// `REPLACE INTO "t" ("c",...) VALUES (?,...),...`
#[must_use]
pub fn bulk_insert_stmt(table: &str, columns: &[&str], rows: usize) -> String {
    format!(
        "REPLACE INTO {} ({}) VALUES {}",
        quote(table),
        column_list(columns),
        values_clause(columns.len(), rows)
    )
}

/// Same shape as the insert statement; the primary key collision replaces
/// the whole row.
#[must_use]
pub fn bulk_update_stmt(table: &str, columns: &[&str], rows: usize) -> String {
    bulk_insert_stmt(table, columns, rows)
}

/// `DELETE FROM "t" WHERE "pk" IN (?,...)`
#[must_use]
pub fn bulk_delete_stmt(table: &str, column: &str, keys: usize) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        quote(table),
        quote(column),
        placeholders(keys)
    )
}

/// Insert that leaves existing rows untouched.
#[must_use]
pub fn insert_ignore_stmt(dialect: Dialect, table: &str, columns: &[&str], rows: usize) -> String {
    let verb = match dialect {
        Dialect::MySql => "INSERT IGNORE INTO",
        Dialect::Sqlite => "INSERT OR IGNORE INTO",
    };
    format!(
        "{} {} ({}) VALUES {}",
        verb,
        quote(table),
        column_list(columns),
        values_clause(columns.len(), rows)
    )
}

/// Distinct ids of an environment.
#[must_use]
pub fn select_ids_stmt(table: &str, column: &str) -> String {
    format!(
        "SELECT DISTINCT {col} FROM {} WHERE \"environment_id\" = ?",
        quote(table),
        col = quote(column)
    )
}

#[must_use]
pub fn select_checksums_stmt(table: &str, keys: usize) -> String {
    format!(
        "SELECT \"id\", \"properties_checksum\" FROM {} WHERE \"id\" IN ({})",
        quote(table),
        placeholders(keys)
    )
}

/// Bounded retention DELETE. Binds: environment id, threshold, and the
/// threshold again when an end column is present.
#[must_use]
pub fn retention_delete_stmt(dialect: Dialect, rule: &RetentionDelete) -> String {
    let mut condition = format!(
        "\"environment_id\" = ? AND {} < ?",
        quote(rule.time_column)
    );
    if let Some(end) = rule.end_column {
        condition.push_str(&format!(" AND {end} IS NOT NULL AND {end} < ?", end = quote(end)));
    }
    match dialect {
        Dialect::MySql => format!(
            "DELETE FROM {} WHERE {} LIMIT {}",
            quote(&rule.table),
            condition,
            rule.limit
        ),
        Dialect::Sqlite => format!(
            "DELETE FROM {t} WHERE rowid IN (SELECT rowid FROM {t} WHERE {} LIMIT {})",
            condition,
            rule.limit,
            t = quote(&rule.table)
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// icingadb_instance
// ═══════════════════════════════════════════════════════════════════════════

#[must_use]
pub fn select_responsible_stmt(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => {
            "SELECT \"id\", \"heartbeat\" FROM \"icingadb_instance\" \
             WHERE \"environment_id\" = ? AND \"responsible\" = 'y' FOR UPDATE"
        }
        Dialect::Sqlite => {
            "SELECT \"id\", \"heartbeat\" FROM \"icingadb_instance\" \
             WHERE \"environment_id\" = ? AND \"responsible\" = 'y'"
        }
    }
}

pub const TAKEOVER_STMT: &str = "UPDATE \"icingadb_instance\" SET \"id\" = ?, \"heartbeat\" = ? \
     WHERE \"environment_id\" = ? AND \"responsible\" = 'y'";

pub const INSERT_INSTANCE_STMT: &str = "REPLACE INTO \"icingadb_instance\" \
     (\"id\",\"environment_id\",\"heartbeat\",\"responsible\") VALUES (?,?,?,?)";

pub const DELETE_OWN_INSTANCE_STMT: &str = "DELETE FROM \"icingadb_instance\" WHERE \"id\" = ?";

pub const REFRESH_INSTANCE_STMT: &str =
    "UPDATE \"icingadb_instance\" SET \"heartbeat\" = ? WHERE \"id\" = ?";

/// Whether our row still holds responsibility. A takeover rewrites the
/// responsible row to the new holder's id, so ours is gone afterwards.
pub const OWN_RESPONSIBLE_STMT: &str =
    "SELECT 1 FROM \"icingadb_instance\" WHERE \"id\" = ? AND \"responsible\" = 'y'";

pub const DELETE_STALE_INSTANCES_STMT: &str =
    "DELETE FROM \"icingadb_instance\" WHERE \"heartbeat\" < ?";

/// MySQL session setup run on every new connection.
pub const MYSQL_SQL_MODE: &str = "SET SESSION sql_mode = 'STRICT_ALL_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,\
NO_ENGINE_SUBSTITUTION,PIPES_AS_CONCAT,ANSI_QUOTES,ERROR_FOR_DIVISION_BY_ZERO'";
pub const MYSQL_INNODB_STRICT: &str = "SET SESSION innodb_strict_mode = 1";
pub const MYSQL_WSREP_SYNC_WAIT: &str = "SET SESSION wsrep_sync_wait = 4";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Binary;

    #[test]
    fn test_insert_stmt() {
        assert_eq!(
            bulk_insert_stmt("host", &["id", "name"], 2),
            r#"REPLACE INTO "host" ("id","name") VALUES (?,?),(?,?)"#
        );
    }

    #[test]
    fn test_update_matches_insert() {
        assert_eq!(
            bulk_update_stmt("host", &["id"], 1),
            bulk_insert_stmt("host", &["id"], 1)
        );
    }

    #[test]
    fn test_delete_stmt() {
        assert_eq!(
            bulk_delete_stmt("customvar_flat", "customvar_id", 3),
            r#"DELETE FROM "customvar_flat" WHERE "customvar_id" IN (?,?,?)"#
        );
    }

    #[test]
    fn test_insert_ignore_per_dialect() {
        assert!(insert_ignore_stmt(Dialect::MySql, "host", &["id"], 1).starts_with("INSERT IGNORE INTO"));
        assert!(insert_ignore_stmt(Dialect::Sqlite, "host", &["id"], 1).starts_with("INSERT OR IGNORE INTO"));
    }

    #[test]
    fn test_rows_per_statement_respects_placeholders() {
        assert_eq!(rows_per_statement(10, 8192, 8192), 819);
        assert_eq!(rows_per_statement(10_000, 8192, 8192), 1);
        assert_eq!(rows_per_statement(2, 8192, 100), 100);
    }

    #[test]
    fn test_retention_templates() {
        let mut rule = RetentionDelete {
            table: "host_state_history".into(),
            environment_id: Binary::zero(),
            time_column: "event_time",
            end_column: None,
            threshold: 0,
            limit: 5000,
        };
        assert_eq!(
            retention_delete_stmt(Dialect::MySql, &rule),
            r#"DELETE FROM "host_state_history" WHERE "environment_id" = ? AND "event_time" < ? LIMIT 5000"#
        );

        rule.table = "host_downtime_history".into();
        rule.time_column = "start_time";
        rule.end_column = Some("end_time");
        assert_eq!(
            retention_delete_stmt(Dialect::MySql, &rule),
            r#"DELETE FROM "host_downtime_history" WHERE "environment_id" = ? AND "start_time" < ? AND "end_time" IS NOT NULL AND "end_time" < ? LIMIT 5000"#
        );
        assert!(retention_delete_stmt(Dialect::Sqlite, &rule).contains("rowid IN (SELECT rowid"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
