// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod memory;
pub mod redis;
pub mod sql;
pub mod statements;
pub mod traits;

pub use memory::{MemoryDatabase, MemoryRedis};
pub use redis::RedisClient;
pub use sql::SqlDatabase;
pub use traits::{Database, RedisSource, StorageError};
