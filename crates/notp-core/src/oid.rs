//! Object identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ObjectError;

/// A 32-byte object identifier, computed as SHA-256(payload).
///
/// The header is not part of the hash, so the OID of a payload is the same
/// whatever type it is stored under. On the wire and in text encodings the
/// OID is always the 64-character lowercase hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid(pub [u8; 32]);

impl Oid {
    /// The zero OID: "no object" / start of history.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Length of the hex form.
    pub const HEX_LEN: usize = 64;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a payload.
    pub fn digest(payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for Oid {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).map_err(|_| ObjectError::InvalidOid(s.to_string()))
    }
}

impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Oid {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Oid {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_hex_roundtrip() {
        let oid = Oid::from_bytes([0x42; 32]);
        let recovered: Oid = oid.to_hex().parse().unwrap();
        assert_eq!(oid, recovered);
    }

    #[test]
    fn test_digest_matches_known_sha256() {
        let oid = Oid::digest(b"hello");
        assert_eq!(
            oid.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_zero_oid() {
        assert!(Oid::ZERO.is_zero());
        assert_eq!(Oid::ZERO.to_string(), "0".repeat(64));
        assert_eq!(Oid::default(), Oid::ZERO);
        assert!(!Oid::digest(b"x").is_zero());
    }

    #[test]
    fn test_parse_rejects_short_hex() {
        assert!(matches!(
            "abcd".parse::<Oid>(),
            Err(ObjectError::InvalidOid(_))
        ));
        assert!("zz".repeat(32).parse::<Oid>().is_err());
    }

    #[test]
    fn test_debug_is_short() {
        let debug = format!("{:?}", Oid::from_bytes([0xcd; 32]));
        assert_eq!(debug, "Oid(cdcdcdcdcdcd)");
    }
}
