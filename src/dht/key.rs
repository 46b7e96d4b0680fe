//! DHT key module
//!
//! Identifiers of the key space and the XOR distance metric.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// Key length in bytes (160 bits)
pub const KEY_LENGTH: usize = 20;

/// Key length in bits
pub const KEY_BITS: usize = KEY_LENGTH * 8;

/// Identifier shared by nodes and stored items
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Key {
    /// All bits cleared
    pub const ZERO: Key = Key([0u8; KEY_LENGTH]);

    /// All bits set
    pub const MAX: Key = Key([0xFFu8; KEY_LENGTH]);

    /// Create a new Key from bytes
    pub fn new(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a random Key from the thread-local generator
    pub fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    /// Generate a random Key from the given source
    pub fn random_with<R: Rng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    /// SHA-1 content identifier of arbitrary data
    pub fn hash_of(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data.as_ref());
        Self(hasher.finalize().into())
    }

    /// Get the Key as bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// XOR distance to another key
    pub fn distance(&self, other: &Key) -> Key {
        let mut out = [0u8; KEY_LENGTH];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Key(out)
    }

    /// Number of leading bits both keys agree on, in `[0, KEY_BITS]`
    pub fn shared_prefix_len(&self, other: &Key) -> usize {
        self.distance(other).leading_zeros()
    }

    /// Number of leading zero bits
    pub fn leading_zeros(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        KEY_BITS
    }

    /// Bit at `index`, counted from the most significant bit
    pub fn bit(&self, index: usize) -> bool {
        (self.0[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Copy of this key with the bit at `index` flipped
    pub fn with_flipped_bit(&self, index: usize) -> Self {
        let mut bytes = self.0;
        bytes[index / 8] ^= 1 << (7 - index % 8);
        Self(bytes)
    }

    /// Get the Key as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a Key from a hex string
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        hex::decode(hex_str).ok().and_then(|bytes| {
            if bytes.len() == KEY_LENGTH {
                let mut key = [0u8; KEY_LENGTH];
                key.copy_from_slice(&bytes);
                Some(Self(key))
            } else {
                None
            }
        })
    }

    /// Short form for logs, like ab12cd34…ef90a1b2
    pub fn short_hex(&self) -> String {
        let b = &self.0;
        format!(
            "{:02x}{:02x}{:02x}{:02x}…{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[16], b[17], b[18], b[19]
        )
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_hex())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Key::from_hex(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid key: {}", s)))
    }
}
