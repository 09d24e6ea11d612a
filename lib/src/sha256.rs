use std::fmt;

use ::sha256::digest;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::U256;

/// A SHA-256 digest. Rendered as lowercase hex in JSON and in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Hash raw bytes.
    pub fn digest(data: &[u8]) -> Self {
        let hex_digest = digest(data);
        let bytes = hex::decode(hex_digest).expect("BUG: sha256 produced invalid hex");
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .expect("BUG: sha256 digest is not 32 bytes");
        Hash(array)
    }

    /// Hash anything that can be serialized, using the canonical JSON encoding.
    pub fn hash<T: Serialize>(data: &T) -> Self {
        Hash::digest(&canonical_bytes(data))
    }

    /// check if a hash is below the target
    pub fn matches_target(&self, target: U256) -> bool {
        self.as_u256() < target
    }

    /// The hash read as a big-endian 256-bit integer.
    pub fn as_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn zero() -> Self {
        Hash([0; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("hash must be exactly 32 bytes"))?;
        Ok(Hash(array))
    }
}

/// The canonical byte encoding used for hashing, the wire and snapshots.
pub(crate) fn canonical_bytes<T: Serialize>(data: &T) -> Vec<u8> {
    match serde_json::to_vec(data) {
        Ok(bytes) => bytes,
        Err(e) => panic!("Failed to serialize data: {e:?}. This should not happen"),
    }
}
