// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Initial delta between Redis and the database.

use std::collections::HashSet;

use crate::error::SyncError;
use crate::objects::ObjectDescriptor;
use crate::supervisor::Supervisor;
use crate::types::Binary;

/// Ids to insert, compare for update, and delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub insert: Vec<Binary>,
    pub update: Vec<Binary>,
    pub delete: Vec<Binary>,
}

impl Delta {
    #[must_use]
    pub fn total(&self) -> usize {
        self.insert.len() + self.update.len() + self.delete.len()
    }
}

/// `(A\B, A∩B, B\A)` for Redis ids A and database ids B.
///
/// With `compare` unset the intersection is dropped: the type has no
/// checksum to compare.
#[must_use]
pub fn compute_delta(redis: &[Binary], database: &[Binary], compare: bool) -> Delta {
    let in_redis: HashSet<&Binary> = redis.iter().collect();
    let in_db: HashSet<&Binary> = database.iter().collect();

    let mut delta = Delta::default();
    for id in &in_redis {
        if in_db.contains(id) {
            if compare {
                delta.update.push(**id);
            }
        } else {
            delta.insert.push(**id);
        }
    }
    delta.delete = in_db.difference(&in_redis).map(|id| **id).collect();
    delta
}

/// Query both sides concurrently and compute the delta.
pub async fn get_delta(
    supervisor: &Supervisor,
    descriptor: &ObjectDescriptor,
    environment_id: Binary,
) -> Result<Delta, SyncError> {
    let config_key = descriptor.config_key();
    let (keys, db_ids) = tokio::try_join!(
        supervisor.redis.hkeys(&config_key),
        supervisor
            .db
            .fetch_ids(descriptor.table, descriptor.delta_column, environment_id),
    )?;

    let redis_ids = keys
        .iter()
        .map(|k| Binary::from_hex(k))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(compute_delta(&redis_ids, &db_ids, descriptor.checksum))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Binary {
        Binary::from([n; 20])
    }

    fn sorted(mut v: Vec<Binary>) -> Vec<Binary> {
        v.sort();
        v
    }

    #[test]
    fn test_three_way_split() {
        let delta = compute_delta(&[id(1), id(2), id(3)], &[id(2), id(3), id(4)], true);
        assert_eq!(delta.insert, vec![id(1)]);
        assert_eq!(sorted(delta.update), vec![id(2), id(3)]);
        assert_eq!(delta.delete, vec![id(4)]);
    }

    #[test]
    fn test_empty_redis_deletes_everything() {
        let delta = compute_delta(&[], &[id(1), id(2)], true);
        assert!(delta.insert.is_empty() && delta.update.is_empty());
        assert_eq!(sorted(delta.delete), vec![id(1), id(2)]);
    }

    #[test]
    fn test_empty_database_inserts_everything() {
        let delta = compute_delta(&[id(1), id(2)], &[], true);
        assert_eq!(delta.total(), 2);
        assert_eq!(sorted(delta.insert), vec![id(1), id(2)]);
    }

    #[test]
    fn test_without_checksum_skips_comparison() {
        let delta = compute_delta(&[id(1)], &[id(1)], false);
        assert_eq!(delta.total(), 0);
    }
}
