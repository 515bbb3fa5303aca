// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! 20-byte identifiers and checksums.
//!
//! Icinga publishes object ids and checksums as 40-character hex strings.
//! The relational schema stores them as `binary(20)`. [`Binary`] carries
//! both views and accepts either at ingress.
//!
//! # Example
//!
//! ```
//! use icingadb::Binary;
//!
//! let id = Binary::from_hex("aa00000000000000000000000000000000000001").unwrap();
//! assert_eq!(id.as_bytes()[0], 0xaa);
//! assert_eq!(Binary::parse(id.as_bytes()).unwrap(), id);
//! assert!(Binary::zero().is_zero());
//! ```

use sha1::{Digest, Sha1};
use std::fmt;
use thiserror::Error;

/// Length of a binary identifier in bytes.
pub const BINARY_LEN: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinaryError {
    #[error("expected {expected} hex characters, got {actual}")]
    HexLength { expected: usize, actual: usize },
    #[error("invalid hex identifier '{0}'")]
    Hex(String),
    #[error("expected 20 bytes, got {0}")]
    ByteLength(usize),
}

/// A 20-byte object identifier or checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Binary([u8; BINARY_LEN]);

impl Binary {
    /// The all-zero sentinel referenced by "no such object" foreign keys.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; BINARY_LEN])
    }

    /// Decode a 40-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, BinaryError> {
        if hex_str.len() != BINARY_LEN * 2 {
            return Err(BinaryError::HexLength {
                expected: BINARY_LEN * 2,
                actual: hex_str.len(),
            });
        }
        let mut out = [0u8; BINARY_LEN];
        hex::decode_to_slice(hex_str, &mut out).map_err(|_| BinaryError::Hex(hex_str.to_string()))?;
        Ok(Self(out))
    }

    /// Wrap exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BinaryError> {
        let arr: [u8; BINARY_LEN] = bytes.try_into().map_err(|_| BinaryError::ByteLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Accept either representation: 20 raw bytes or 40 hex characters.
    pub fn parse(input: &[u8]) -> Result<Self, BinaryError> {
        match input.len() {
            BINARY_LEN => Self::from_bytes(input),
            n if n == BINARY_LEN * 2 => {
                let s = std::str::from_utf8(input).map_err(|_| BinaryError::Hex(String::from_utf8_lossy(input).into_owned()))?;
                Self::from_hex(s)
            }
            n => Err(BinaryError::ByteLength(n)),
        }
    }

    /// SHA-1 over the concatenation of all parts.
    #[must_use]
    pub fn sha1<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part.as_ref());
        }
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BINARY_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binary({})", self.to_hex())
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for Binary {
    type Err = BinaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; BINARY_LEN]> for Binary {
    fn from(bytes: [u8; BINARY_LEN]) -> Self {
        Self(bytes)
    }
}

/// The all-zero UUID used as "no such event" in history index rows.
pub const ZERO_UUID: [u8; 16] = [0u8; 16];

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_hex_roundtrip() {
        let id = Binary::from_hex(HEX).unwrap();
        assert_eq!(id.to_hex(), HEX);
        assert_eq!(id.to_string(), HEX);
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let id = Binary::from_hex(&HEX.to_uppercase()).unwrap();
        assert_eq!(id.to_hex(), HEX);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            Binary::from_hex("abcd"),
            Err(BinaryError::HexLength { expected: 40, actual: 4 })
        );
        assert_eq!(Binary::from_bytes(&[1, 2, 3]), Err(BinaryError::ByteLength(3)));
    }

    #[test]
    fn test_non_hex_rejected() {
        let bad = "zz23456789abcdef0123456789abcdef01234567";
        assert!(matches!(Binary::from_hex(bad), Err(BinaryError::Hex(_))));
    }

    #[test]
    fn test_parse_accepts_both_views() {
        let id = Binary::from_hex(HEX).unwrap();
        assert_eq!(Binary::parse(HEX.as_bytes()).unwrap(), id);
        assert_eq!(Binary::parse(id.as_bytes()).unwrap(), id);
        assert!(Binary::parse(b"short").is_err());
    }

    #[test]
    fn test_sha1_of_environment_name() {
        // sha1("default")
        let id = Binary::sha1(["default"]);
        assert_eq!(id.to_hex(), "7505d64a54e061b7acd54ccd58b49dc43500b635");
    }

    #[test]
    fn test_sha1_concatenates_parts() {
        assert_eq!(Binary::sha1(["de", "fault"]), Binary::sha1(["default"]));
    }

    #[test]
    fn test_zero_sentinel() {
        assert!(Binary::zero().is_zero());
        assert!(!Binary::from_hex(HEX).unwrap().is_zero());
        assert_eq!(Binary::default(), Binary::zero());
    }
}
