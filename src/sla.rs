// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SLA availability over the `sla_history_*` projection.
//!
//! [`ok_percent`] computes what the database function
//! `get_sla_ok_percent` reports, from the same rows the history workers
//! write: hard state changes and downtime windows of one checkable.

use thiserror::Error;

/// Hard state value Icinga uses for "not yet checked".
pub const UNKNOWN_STATE: i64 = 99;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlaError {
    #[error("SLA window end {end} is not after its start {start}")]
    EmptyWindow { start: i64, end: i64 },
}

/// A row of `sla_history_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub event_time: i64,
    pub hard_state: i64,
    pub previous_hard_state: i64,
}

/// A row of `sla_history_downtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DowntimeWindow {
    pub start: i64,
    pub end: i64,
}

fn is_problem(state: i64) -> bool {
    state > 0 && state != UNKNOWN_STATE
}

/// State in effect when the window opens: the last change before it, else
/// the previous state of the first change inside it, else `current_state`.
fn initial_state(changes: &[StateChange], start: i64, current_state: i64) -> i64 {
    changes
        .iter()
        .filter(|c| c.event_time < start)
        .max_by_key(|c| c.event_time)
        .map(|c| c.hard_state)
        .or_else(|| {
            changes
                .iter()
                .filter(|c| c.event_time >= start)
                .min_by_key(|c| c.event_time)
                .map(|c| c.previous_hard_state)
        })
        .unwrap_or(current_state)
}

/// Percentage of `[start, end)` the checkable was OK.
///
/// Problem time spent inside a downtime does not count against the SLA.
/// Time in [`UNKNOWN_STATE`] is taken out of the denominator. A window
/// without state changes, or one that is unknown throughout, is 100.
pub fn ok_percent(
    changes: &[StateChange],
    downtimes: &[DowntimeWindow],
    current_state: i64,
    start: i64,
    end: i64,
) -> Result<f64, SlaError> {
    if end <= start {
        return Err(SlaError::EmptyWindow { start, end });
    }

    let mut inside: Vec<StateChange> = changes
        .iter()
        .copied()
        .filter(|c| c.event_time >= start && c.event_time < end)
        .collect();
    if inside.is_empty() {
        return Ok(100.0);
    }
    inside.sort_by_key(|c| c.event_time);

    let mut cuts = vec![start, end];
    cuts.extend(inside.iter().map(|c| c.event_time));
    for d in downtimes {
        cuts.extend([d.start, d.end].into_iter().filter(|t| *t > start && *t < end));
    }
    cuts.sort_unstable();
    cuts.dedup();

    let mut state = initial_state(changes, start, current_state);
    let mut next = inside.iter().peekable();
    let mut total = end - start;
    let mut problem = 0;

    for segment in cuts.windows(2) {
        let (from, to) = (segment[0], segment[1]);
        while let Some(change) = next.next_if(|c| c.event_time <= from) {
            state = change.hard_state;
        }
        let length = to - from;
        if state == UNKNOWN_STATE {
            total -= length;
        } else if is_problem(state) && !downtimes.iter().any(|d| d.start <= from && from < d.end) {
            problem += length;
        }
    }

    if total <= 0 {
        return Ok(100.0);
    }
    Ok(100.0 * (total - problem) as f64 / total as f64)
}
