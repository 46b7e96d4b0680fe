//! DHT node module
//!
//! The RPC engine: owns the listening socket, answers PING / FIND_NODE /
//! FIND_VALUE / STORE, and issues outbound requests including the node
//! lookup.
//!
//! Every connection carries exactly one request and one response. The
//! routing table sits behind a single `RwLock`; the lock is never held
//! across network I/O.

use crate::dht::codec::{read_message, write_message, JsonCodec, MessageCodec};
use crate::dht::contact::Contact;
use crate::dht::key::Key;
use crate::dht::lookup::{LookupStep, NodeLookup, DEFAULT_MAX_HOPS};
use crate::dht::message::{FindValueResponse, Message, MessageType, Value};
use crate::dht::routing::{InsertOutcome, RoutingTable, DEFAULT_K};
use crate::dht::storage::{MemoryStore, ValueStore};
use crate::error::{DhtError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Default deadline for one request/response exchange
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    /// Bucket capacity
    pub k: usize,
    /// Deadline for dialing, sending and receiving one RPC
    pub rpc_timeout: Duration,
    /// Maximum number of stacked levels in a lookup
    pub max_hops: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

struct Inner {
    key: Key,
    routing_table: Arc<RwLock<RoutingTable>>,
    store: Arc<dyn ValueStore>,
    codec: Arc<dyn MessageCodec>,
    config: NodeConfig,
    shutdown: watch::Sender<bool>,
}

/// A DHT peer. Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

impl Node {
    /// Create a node with a freshly generated random key on 127.0.0.1
    pub fn with_random_key() -> Self {
        Self::with_key(Key::random())
    }

    /// Create a node with the given key on 127.0.0.1 and an ephemeral port
    pub fn with_key(key: Key) -> Self {
        Self::with_key_and_addr(key, SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    /// Create a node with the given key bound to `listen_addr`
    pub fn with_key_and_addr(key: Key, listen_addr: SocketAddr) -> Self {
        Self::new(key, listen_addr, NodeConfig::default(), Arc::new(MemoryStore::new()))
    }

    /// Create a node with explicit configuration and value store
    pub fn new(key: Key, listen_addr: SocketAddr, config: NodeConfig, store: Arc<dyn ValueStore>) -> Self {
        Self::with_codec(key, listen_addr, config, store, Arc::new(JsonCodec))
    }

    /// Create a node with every collaborator supplied
    pub fn with_codec(
        key: Key,
        listen_addr: SocketAddr,
        config: NodeConfig,
        store: Arc<dyn ValueStore>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        let routing_table = RoutingTable::new(Contact::new(key, listen_addr), config.k);
        let (shutdown, _) = watch::channel(false);
        debug!("Created node {} for {}", key.to_hex(), listen_addr);
        Self {
            inner: Arc::new(Inner {
                key,
                routing_table: Arc::new(RwLock::new(routing_table)),
                store,
                codec,
                config,
                shutdown,
            }),
        }
    }

    /// Our key
    pub fn key(&self) -> Key {
        self.inner.key
    }

    /// Node configuration
    pub fn config(&self) -> NodeConfig {
        self.inner.config
    }

    /// Our contact (key and current listen address)
    pub async fn contact(&self) -> Contact {
        self.inner.routing_table.read().await.our_contact()
    }

    /// Shared routing table
    pub fn routing_table(&self) -> Arc<RwLock<RoutingTable>> {
        Arc::clone(&self.inner.routing_table)
    }

    /// Diagnostic dump of the routing table
    pub async fn describe(&self) -> String {
        self.inner.routing_table.read().await.describe()
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// Returns the address announced to peers. When port 0 was requested it
    /// carries the port the OS picked; an unspecified IP is announced as
    /// loopback, and replies carry the address each peer reached us at.
    pub async fn start(&self) -> Result<SocketAddr> {
        let bind_addr = self.contact().await.addr;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            error!("Failed to bind TCP listener to {}: {}", bind_addr, e);
            DhtError::network_error_full("Failed to bind TCP listener", bind_addr.to_string(), e.to_string())
        })?;
        let local_addr = listener.local_addr()?;
        let announced = announced_addr(local_addr);
        self.inner.routing_table.write().await.set_our_addr(announced);

        info!("Node {} listening on {} (announced as {})", self.key(), local_addr, announced);

        let node = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            trace!("Accepted connection from {}", peer);
                            let handler = node.clone();
                            tokio::spawn(async move {
                                handler.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    },
                    _ = shutdown_rx.changed() => {
                        info!("Node {} stopped listening on {}", node.key(), local_addr);
                        break;
                    }
                }
            }
        });

        Ok(announced)
    }

    /// Stop accepting connections. In-flight exchanges run to completion.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let codec = &*self.inner.codec;
        let request = match timeout(self.inner.config.rpc_timeout, read_message(codec, &mut stream)).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                warn!("Dropping undecodable message from {}: {}", peer, e);
                return;
            }
            Err(_) => {
                warn!("Timed out waiting for a message from {}", peer);
                return;
            }
        };

        if request.to != self.key() {
            debug!("Ignored message from {} not targeted at us: {}", peer, request);
            return;
        }
        debug!("{} <<< {}", self.key(), request);

        let sender = request.sender(peer.ip());
        let reached_at = stream.local_addr().ok();
        let response = match self.dispatch(request, reached_at).await {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to handle request from {}: {}", peer, e);
                return;
            }
        };

        debug!("{} >>> {}", self.key(), response);
        let sent = timeout(self.inner.config.rpc_timeout, write_message(codec, &mut stream, &response)).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to send response to {}: {}", peer, e);
                return;
            }
            Err(_) => {
                warn!("Timed out sending response to {}", peer);
                return;
            }
        }

        if let Some(sender) = sender {
            self.add_contact(sender).await;
        }
    }

    /// Build the response to an admitted request.
    ///
    /// `reached_at` is the local end of the connection; it replaces our
    /// announced address in the reply.
    async fn dispatch(&self, request: Message, reached_at: Option<SocketAddr>) -> Result<Option<Message>> {
        let our_addr = match reached_at {
            Some(addr) => addr,
            None => self.contact().await.addr,
        };
        match request.message_type {
            MessageType::Ping => Ok(Some(request.into_reply(our_addr))),
            MessageType::FindNode => {
                let target = request
                    .find_id
                    .ok_or_else(|| DhtError::protocol_error("FIND_NODE without find_id"))?;
                let nodes = self.closest_bucket_contacts(&target, our_addr).await;
                let mut reply = request.into_reply(our_addr);
                reply.nodes = Some(nodes);
                Ok(Some(reply))
            }
            MessageType::FindValue => {
                let key = request
                    .find_id
                    .ok_or_else(|| DhtError::protocol_error("FIND_VALUE without find_id"))?;
                let found = self.inner.store.lookup_value(&key).await?;
                let mut reply = request.into_reply(our_addr);
                match found {
                    Some(value) => reply.value = Some(value),
                    None => reply.nodes = Some(self.closest_bucket_contacts(&key, our_addr).await),
                }
                Ok(Some(reply))
            }
            MessageType::Store => {
                let key = request
                    .find_id
                    .ok_or_else(|| DhtError::protocol_error("STORE without find_id"))?;
                let mut reply = request.into_reply(our_addr);
                let value = reply
                    .value
                    .take()
                    .ok_or_else(|| DhtError::protocol_error("STORE without value"))?;
                self.inner.store.store_value(key, value).await?;
                Ok(Some(reply))
            }
            MessageType::Pong => {
                debug!("Ignoring unsolicited PONG from {}", request.from);
                Ok(None)
            }
        }
    }

    /// Closest bucket contents, our own entry rewritten to `our_addr`
    async fn closest_bucket_contacts(&self, key: &Key, our_addr: SocketAddr) -> Vec<Contact> {
        let our_key = self.key();
        self.inner
            .routing_table
            .read()
            .await
            .find_closest_bucket_by_id(key)
            .into_contacts()
            .into_iter()
            .map(|c| if c.key == our_key { Contact::new(our_key, our_addr) } else { c })
            .collect()
    }

    /// One request/response exchange with no routing table side effects
    async fn exchange(&self, peer: &Contact, request: Message) -> Result<Message> {
        let codec = &*self.inner.codec;
        let addr = peer.addr;
        debug!("{} >>> {}", self.key(), request);

        let call = async {
            let mut stream = TcpStream::connect(addr).await.map_err(|e| {
                DhtError::network_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;
            write_message(codec, &mut stream, &request)
                .await
                .map_err(|e| e.with_context(format!("sending to {}", addr)))?;
            read_message(codec, &mut stream)
                .await
                .map_err(|e| e.with_context(format!("reading from {}", addr)))
        };

        let response = timeout(self.inner.config.rpc_timeout, call)
            .await
            .map_err(|_| DhtError::timeout_error("No response within deadline", addr.to_string()))??;

        if response.from != peer.key || response.to != self.key() {
            return Err(DhtError::protocol_error_with_source(
                "Response from unexpected node",
                format!("expected {}, got {} -> {}", peer.key, response.from, response.to),
            ));
        }
        debug!("{} <<< {}", self.key(), response);
        Ok(response)
    }

    /// Ping a peer and record it on success
    pub async fn ping(&self, peer: &Contact) -> Result<Message> {
        let our = self.contact().await;
        let response = self.exchange(peer, Message::ping(&our, peer.key)).await?;
        if response.message_type != MessageType::Pong {
            return Err(DhtError::protocol_error(format!(
                "Expected PONG, got {}",
                response.message_type
            )));
        }
        self.add_contact(*peer).await;
        Ok(response)
    }

    /// Insert or refresh a contact.
    ///
    /// When its bucket is full the least-recently-seen contact is pinged;
    /// it is evicted in favour of `contact` only if it does not answer.
    /// Returns whether `contact` is in the table afterwards.
    pub async fn add_contact(&self, contact: Contact) -> bool {
        if contact.key == self.key() {
            return false;
        }
        let (_, outcome) = self.inner.routing_table.write().await.add(contact);
        match outcome {
            InsertOutcome::Inserted | InsertOutcome::Refreshed => true,
            InsertOutcome::Full { least_recent } => {
                let our = self.contact().await;
                match self.exchange(&least_recent, Message::ping(&our, least_recent.key)).await {
                    Ok(_) => {
                        self.inner.routing_table.write().await.touch(&least_recent.key);
                        debug!("Bucket full, {} still alive; dropping {}", least_recent, contact);
                        false
                    }
                    Err(e) => {
                        let replaced = self
                            .inner
                            .routing_table
                            .write()
                            .await
                            .replace(&least_recent.key, contact);
                        info!("Evicted unreachable {} for {} ({})", least_recent, contact, e);
                        replaced
                    }
                }
            }
        }
    }

    /// Resolve `target` to a contact.
    ///
    /// Answers locally when the closest bucket already holds the target,
    /// otherwise queries contacts depth first until one returns it.
    pub async fn find_node(&self, target: Key) -> Result<Contact> {
        if target == self.key() {
            return Err(DhtError::routing_error("Can't search for self", target.to_hex()));
        }

        let seed = {
            let table = self.inner.routing_table.read().await;
            let bucket = table.find_closest_bucket_by_id(&target);
            if let Some(index) = bucket.has(&target) {
                let found = *bucket.get(index);
                trace!("Local hit for {}", target);
                return Ok(found);
            }
            let mut seed: Vec<Contact> = bucket
                .into_contacts()
                .into_iter()
                .filter(|c| c.key != self.key())
                .collect();
            if seed.is_empty() {
                seed = table
                    .closest_contacts(&target, table.k())
                    .into_iter()
                    .filter(|c| c.key != self.key())
                    .collect();
            }
            seed
        };

        let found = self.find_node_remote(target, seed).await?;
        self.add_contact(found).await;
        Ok(found)
    }

    async fn find_node_remote(&self, target: Key, seed: Vec<Contact>) -> Result<Contact> {
        let our = self.contact().await;
        let config = self.inner.config;
        let mut lookup = NodeLookup::new(our.key, target, seed, config.max_hops, config.k);

        while let Some(candidate) = lookup.next_candidate() {
            let request = Message::find_node(&our, candidate.key, target);
            let response = match self.exchange(&candidate, request).await {
                Ok(response) => response,
                Err(e) if e.is_unreachable() => {
                    warn!("Skipping {} during lookup for {}: {}", candidate, target, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.add_contact(candidate).await;

            match lookup.on_response(response.nodes()) {
                LookupStep::Found(contact) => {
                    info!(
                        "Found {} after querying {} contacts (depth {})",
                        contact,
                        lookup.queried(),
                        lookup.depth()
                    );
                    return Ok(contact);
                }
                LookupStep::Descended(count) => {
                    trace!("{} returned {} new contacts for {}", candidate, count, target);
                }
                LookupStep::NoProgress => {
                    trace!("{} had nothing new for {}", candidate, target);
                }
            }
        }

        if lookup.is_exhausted() {
            debug!("Lookup for {} used its budget of {} queries", target, lookup.budget());
        }
        Err(DhtError::not_found("Node not found or not in the network", target.to_hex()))
    }

    /// Ask a single peer for the value stored under `key`
    pub async fn find_value(&self, peer: &Contact, key: Key) -> Result<FindValueResponse> {
        let our = self.contact().await;
        let response = self.exchange(peer, Message::find_value(&our, peer.key, key)).await?;
        self.add_contact(*peer).await;
        match response.value {
            Some(value) => Ok(FindValueResponse::ValueFound(value)),
            None => Ok(FindValueResponse::Contacts(response.nodes.unwrap_or_default())),
        }
    }

    /// Ask a single peer to store `value` under `key`
    pub async fn store(&self, peer: &Contact, key: Key, value: Value) -> Result<()> {
        let our = self.contact().await;
        let response = self.exchange(peer, Message::store(&our, peer.key, key, value)).await?;
        if response.message_type != MessageType::Store {
            return Err(DhtError::protocol_error(format!(
                "Expected STORE acknowledgement, got {}",
                response.message_type
            )));
        }
        self.add_contact(*peer).await;
        Ok(())
    }
}

/// Address to announce for a listener bound to `bound`
fn announced_addr(bound: SocketAddr) -> SocketAddr {
    match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), bound.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), bound.port()),
        _ => bound,
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.inner.key.to_hex())
            .field("config", &self.inner.config)
            .finish()
    }
}
