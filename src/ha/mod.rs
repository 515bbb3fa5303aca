// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Responsibility election between daemons of one environment.

pub mod arbiter;
pub mod decision;
pub mod heartbeat;

pub use arbiter::{Arbiter, HaTimings, SyncSignal};
pub use decision::{decide, Decision};
pub use heartbeat::Heartbeat;
