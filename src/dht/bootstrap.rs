//! DHT bootstrap module
//!
//! Joins a network through a set of known seed contacts.

use crate::dht::contact::Contact;
use crate::dht::key::{Key, KEY_BITS};
use crate::dht::node::Node;
use crate::error::{DhtError, Result};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Bootstrap configuration
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Known seed contacts
    pub seeds: Vec<Contact>,
}

impl BootstrapConfig {
    /// Create a new bootstrap config
    pub fn new(seeds: Vec<Contact>) -> Self {
        Self { seeds }
    }

    /// Parse seeds written as `<hex key>@<ip:port>`
    pub fn from_strings<S: AsRef<str>>(seeds: &[S]) -> Result<Self> {
        let seeds = seeds
            .iter()
            .map(|s| parse_seed(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { seeds })
    }
}

/// Parse a single `<hex key>@<ip:port>` seed
pub fn parse_seed(seed: &str) -> Result<Contact> {
    let (key_str, addr_str) = seed
        .split_once('@')
        .ok_or_else(|| DhtError::config_error_with_field(format!("Seed '{}' is not <key>@<addr>", seed), "bootstrap"))?;
    let key = Key::from_hex(key_str)
        .ok_or_else(|| DhtError::config_error_with_field(format!("Invalid seed key '{}'", key_str), "bootstrap"))?;
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|_| DhtError::config_error_with_field(format!("Invalid seed address '{}'", addr_str), "bootstrap"))?;
    Ok(Contact::new(key, addr))
}

/// Ping every seed, then look up a key next to our own so that the
/// responders fill the buckets closest to us.
///
/// Unreachable seeds are skipped. Fails only when seeds were given and none
/// of them answered. Returns the number of contacts known afterwards.
pub async fn bootstrap(node: &Node, config: &BootstrapConfig) -> Result<usize> {
    info!("Bootstrapping from {} seed(s)...", config.seeds.len());

    let mut reachable = 0usize;
    for seed in &config.seeds {
        if seed.key == node.key() {
            continue;
        }
        match node.ping(seed).await {
            Ok(_) => {
                reachable += 1;
                debug!("Seed {} answered", seed);
            }
            Err(e) => warn!("Seed {} unreachable: {}", seed, e),
        }
    }

    if !config.seeds.is_empty() && reachable == 0 {
        return Err(DhtError::NetworkError {
            message: "No bootstrap seed reachable".to_string(),
            address: None,
            source: None,
        });
    }

    // Our nearest neighbour key; finding it is not expected, the walk is
    // what populates the table
    let neighbour = node.key().with_flipped_bit(KEY_BITS - 1);
    match node.find_node(neighbour).await {
        Ok(found) => debug!("Self lookup reached {}", found),
        Err(e) => debug!("Self lookup finished: {}", e),
    }

    let known = node.routing_table().read().await.len();
    info!("DHT bootstrapping complete, {} contact(s) known", known);
    Ok(known)
}
