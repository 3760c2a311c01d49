use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 32-byte SHA-256 digest, used for both block and transaction identity.
///
/// Serialized as a 64-character lowercase hex string.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

#[derive(Debug, Error)]
pub enum HashParseError {
    #[error("invalid hex digest: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("digest must be 32 bytes, got {0}")]
    Length(usize),
}

impl Hash {
    /// Hash of the empty chain. The first block's parent.
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| HashParseError::Length(bytes.len()))?;
        Ok(Hash(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", &self.to_hex()[..8])
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Digest of the canonical JSON encoding of `value`.
///
/// Struct fields are encoded in declaration order, so two values with equal
/// fields always produce the same hash.
pub fn hash_json<T: Serialize>(value: &T) -> Result<Hash, serde_json::Error> {
    let encoded = serde_json::to_vec(value)?;
    Ok(sha256(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_is_deterministic() {
        assert_eq!(sha256(b"fiat lux"), sha256(b"fiat lux"));
        assert_ne!(sha256(b"fiat lux"), sha256(b"fiat nox"));
    }

    #[test]
    fn test_hex_text_codec() {
        let hash = sha256(b"block");
        let parsed: Hash = hash.to_hex().parse().unwrap();
        assert_eq!(parsed, hash);
        assert_eq!(hash.to_string().len(), 64);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = "abcd".parse::<Hash>().unwrap_err();
        assert!(matches!(err, HashParseError::Length(2)));
        assert!("zz".repeat(32).parse::<Hash>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&Hash::ZERO).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert!(back.is_zero());
        assert!(serde_json::from_str::<Hash>("\"00ff\"").is_err());
    }
}
