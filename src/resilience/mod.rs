// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection supervision, error classification and retry helpers.

pub mod classify;
pub mod connection;
pub mod retry;
