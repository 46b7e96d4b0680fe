//! kademlia-node
//!
//! A Kademlia DHT peer with k-bucket routing and node lookup over TCP.

pub mod dht;
pub mod cli;
pub mod error;

pub use error::{DhtError, Result};

pub use dht::{
    Key, Contact, KBucket, RoutingTable, InsertOutcome, Message, MessageType,
    FindValueResponse, Value, MessageCodec, JsonCodec, ValueStore, MemoryStore,
    NodeLookup, LookupStep, Node, NodeConfig, BootstrapConfig, bootstrap,
};
pub use cli::{CliArgs, Config};
