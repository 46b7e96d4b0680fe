//! DHT contact module
//!
//! A remote (or the local) node's identity plus its reachable address.

use crate::dht::key::Key;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Node identity: a key plus the address it listens on.
///
/// Equality and hashing only look at the key; the address is metadata
/// that may change while the key stays the same.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Contact {
    /// Node key
    pub key: Key,
    /// Listen address
    pub addr: SocketAddr,
}

impl Contact {
    /// Create a new contact
    pub fn new(key: Key, addr: SocketAddr) -> Self {
        Self { key, addr }
    }

    /// Create a contact with a random key
    pub fn with_random_key(addr: SocketAddr) -> Self {
        Self::new(Key::random(), addr)
    }

    /// XOR distance to a key
    pub fn distance_to(&self, other: &Key) -> Key {
        self.key.distance(other)
    }

    /// Shared prefix length with another key
    pub fn shared_prefix_len(&self, other: &Key) -> usize {
        self.key.shared_prefix_len(other)
    }

    /// One-line diagnostic form
    pub fn describe(&self) -> String {
        format!("{}@{}", self.key.to_hex(), self.addr)
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Contact {}

impl std::hash::Hash for Contact {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.addr)
    }
}
