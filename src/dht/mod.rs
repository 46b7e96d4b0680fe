//! DHT (Distributed Hash Table) module
//!
//! Implements a Kademlia peer: keys and XOR distance, the k-bucket routing
//! table, the TCP RPC engine and the node lookup.

pub mod key;
pub mod contact;
pub mod routing;
pub mod message;
pub mod codec;
pub mod storage;
pub mod lookup;
pub mod node;
pub mod bootstrap;

// Re-exports for convenience
pub use key::{Key, KEY_BITS, KEY_LENGTH};
pub use contact::Contact;
pub use routing::{bucket_index, InsertOutcome, KBucket, RoutingTable, BUCKET_COUNT, DEFAULT_K};
pub use message::{FindValueResponse, Message, MessageType, Value};
pub use codec::{JsonCodec, MessageCodec, MAX_MESSAGE_SIZE};
pub use storage::{MemoryStore, ValueStore};
pub use lookup::{LookupStep, NodeLookup, DEFAULT_MAX_HOPS};
pub use node::{Node, NodeConfig, DEFAULT_RPC_TIMEOUT};
pub use bootstrap::{bootstrap, parse_seed, BootstrapConfig};
