//! DHT message module
//!
//! Defines the RPC envelope exchanged between nodes.

use crate::dht::contact::Contact;
use crate::dht::key::Key;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Opaque payload carried by FIND_VALUE and STORE
pub type Value = Vec<u8>;

/// RPC message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Ping,
    Pong,
    FindNode,
    FindValue,
    Store,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Ping => write!(f, "PING"),
            MessageType::Pong => write!(f, "PONG"),
            MessageType::FindNode => write!(f, "FIND_NODE"),
            MessageType::FindValue => write!(f, "FIND_VALUE"),
            MessageType::Store => write!(f, "STORE"),
        }
    }
}

/// RPC envelope, one per direction per connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: Key,
    pub to: Key,
    /// Listen address of the sender. Receivers trust only its port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<SocketAddr>,
    /// Key being searched for by FIND_NODE and FIND_VALUE.
    ///
    /// STORE reuses this field for the key the value is stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_id: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Contact>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_value")]
    pub value: Option<Value>,
}

impl Message {
    fn new(message_type: MessageType, from: &Contact, to: Key) -> Self {
        Self {
            message_type,
            from: from.key,
            to,
            addr: Some(from.addr),
            find_id: None,
            nodes: None,
            value: None,
        }
    }

    /// Create a ping request
    pub fn ping(from: &Contact, to: Key) -> Self {
        Self::new(MessageType::Ping, from, to)
    }

    /// Create a find_node request
    pub fn find_node(from: &Contact, to: Key, target: Key) -> Self {
        let mut msg = Self::new(MessageType::FindNode, from, to);
        msg.find_id = Some(target);
        msg
    }

    /// Create a find_value request
    pub fn find_value(from: &Contact, to: Key, key: Key) -> Self {
        let mut msg = Self::new(MessageType::FindValue, from, to);
        msg.find_id = Some(key);
        msg
    }

    /// Create a store request
    pub fn store(from: &Contact, to: Key, key: Key, value: Value) -> Self {
        let mut msg = Self::new(MessageType::Store, from, to);
        msg.find_id = Some(key);
        msg.value = Some(value);
        msg
    }

    /// Turn a request into the skeleton of its response.
    ///
    /// `from` and `to` are swapped and the sender address becomes ours.
    pub fn into_reply(mut self, our_addr: SocketAddr) -> Self {
        std::mem::swap(&mut self.from, &mut self.to);
        self.addr = Some(our_addr);
        if self.message_type == MessageType::Ping {
            self.message_type = MessageType::Pong;
        }
        self
    }

    /// Contact of the sender, when it announced an address.
    ///
    /// The IP is the one the connection was observed from; only the port
    /// is taken from the message, so a peer listening on an unspecified
    /// address is still recorded at a reachable one.
    pub fn sender(&self, observed: IpAddr) -> Option<Contact> {
        self.addr
            .map(|addr| Contact::new(self.from, SocketAddr::new(observed, addr.port())))
    }

    /// Position of `key` in the returned contact list
    pub fn has(&self, key: &Key) -> Option<usize> {
        self.nodes
            .as_ref()
            .and_then(|nodes| nodes.iter().position(|c| c.key == *key))
    }

    /// Returned contacts, empty when none were sent
    pub fn nodes(&self) -> &[Contact] {
        self.nodes.as_deref().unwrap_or(&[])
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.message_type, self.from, self.to)?;
        if let Some(find_id) = &self.find_id {
            write!(f, " find={}", find_id)?;
        }
        if let Some(nodes) = &self.nodes {
            write!(f, " nodes={}", nodes.len())?;
        }
        if let Some(value) = &self.value {
            write!(f, " value={}B", value.len())?;
        }
        Ok(())
    }
}

/// Result of a FIND_VALUE exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindValueResponse {
    /// The peer holds the value
    ValueFound(Value),
    /// The peer does not hold it; these contacts are closer
    Contacts(Vec<Contact>),
}

mod hex_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
