// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The arbitration rule, free of I/O.
//!
//! Both database backends read the responsible row inside their
//! transaction and ask [`decide`] what to write.

use std::time::Duration;

use crate::storage::traits::{InstanceClaim, InstanceRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No responsible row, or its owner stopped heartbeating: claim it.
    TakeOver,
    /// We already hold responsibility.
    Refresh,
    /// Another live instance is responsible.
    Passive { holder: InstanceRow },
}

impl Decision {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Passive { .. })
    }
}

/// Decide given the currently responsible row for the claim's environment.
#[must_use]
pub fn decide(current: Option<&InstanceRow>, claim: &InstanceClaim, stale_after: Duration) -> Decision {
    match current {
        None => Decision::TakeOver,
        Some(row) if row.id == claim.instance_id => Decision::Refresh,
        Some(row) if claim.heartbeat - row.heartbeat > stale_after.as_secs() as i64 => Decision::TakeOver,
        Some(row) => Decision::Passive { holder: row.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Binary;
    use uuid::Uuid;

    const STALE: Duration = Duration::from_secs(15);

    fn claim(now: i64) -> InstanceClaim {
        InstanceClaim {
            instance_id: Uuid::from_u128(1),
            environment_id: Binary::sha1(["default"]),
            heartbeat: now,
        }
    }

    fn row(id: u128, heartbeat: i64) -> InstanceRow {
        InstanceRow {
            id: Uuid::from_u128(id),
            environment_id: Binary::sha1(["default"]),
            heartbeat,
            responsible: true,
        }
    }

    #[test]
    fn test_empty_table_takes_over() {
        assert_eq!(decide(None, &claim(100), STALE), Decision::TakeOver);
    }

    #[test]
    fn test_own_row_refreshes() {
        assert_eq!(decide(Some(&row(1, 10)), &claim(100), STALE), Decision::Refresh);
    }

    #[test]
    fn test_live_other_instance_keeps_us_passive() {
        let other = row(2, 90);
        let decision = decide(Some(&other), &claim(100), STALE);
        assert_eq!(decision, Decision::Passive { holder: other });
        assert!(!decision.is_active());
    }

    #[test]
    fn test_stale_other_instance_is_taken_over() {
        assert_eq!(decide(Some(&row(2, 84)), &claim(100), STALE), Decision::TakeOver);
    }

    #[test]
    fn test_exactly_stale_boundary_stays_passive() {
        assert!(matches!(
            decide(Some(&row(2, 85)), &claim(100), STALE),
            Decision::Passive { .. }
        ));
    }
}
