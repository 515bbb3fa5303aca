// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! History ingestion.
//!
//! Icinga appends history events to one Redis stream per object type and
//! category. A [`HistoryWorker`] per stream turns each entry into its
//! category row, the generic index row and any SLA rows, commits a batch
//! atomically and only then deletes the entries from the stream.

pub mod category;
pub mod event;
pub mod worker;

pub use category::{Category, ObjectKind};
pub use event::event_rows;
pub use worker::HistoryWorker;
