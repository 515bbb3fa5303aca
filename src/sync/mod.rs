// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration synchronization.

pub mod delta;
pub mod operator;
pub mod pipeline;
pub mod runtime;
pub mod tally;

pub use delta::{compute_delta, get_delta, Delta};
pub use operator::Operator;
pub use pipeline::Pipeline;
pub use runtime::{RuntimeKind, RuntimeUpdate};
pub use tally::Tally;
