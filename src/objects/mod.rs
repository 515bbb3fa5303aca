// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration object types.

pub mod catalog;
pub mod decode;
pub mod descriptor;

pub use catalog::{by_family, find, CATALOG};
pub use decode::{decode_object, properties_checksum};
pub use descriptor::{Expansion, Field, FieldKind, ObjectDescriptor};
