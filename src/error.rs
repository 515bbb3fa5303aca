// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-level error type.
//!
//! Everything that reaches the supervisor's error channel is a
//! [`SyncError`]. Backend failures arrive wrapped from
//! [`StorageError`](crate::storage::traits::StorageError); the remaining
//! variants are the daemon's own fatal conditions.

use std::time::Duration;
use thiserror::Error;

use crate::storage::traits::StorageError;
use crate::types::{Binary, BinaryError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot decode {object_type} '{id}': {message}")]
    Decode {
        object_type: String,
        id: String,
        message: String,
    },

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] BinaryError),

    #[error("environment changed from {latched} to {received}, restart required")]
    EnvironmentChanged { latched: Binary, received: Binary },

    #[error("heartbeat carries an empty environment name")]
    EmptyEnvironment,

    #[error("{backend} unreachable for {elapsed:?}, giving up")]
    BackendUnavailable { backend: String, elapsed: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("pipeline channel '{0}' closed unexpectedly")]
    ChannelClosed(&'static str),
}

impl SyncError {
    pub fn decode(object_type: &str, id: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            object_type: object_type.to_string(),
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
