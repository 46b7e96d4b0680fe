//! Error types for the DHT node
//!
//! This module defines the error taxonomy shared by the routing table,
//! the RPC engine and the lookup protocol.

use std::fmt;

/// Result alias used throughout the DHT
pub type Result<T> = std::result::Result<T, DhtError>;

/// Error type for DHT operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtError {
    /// Malformed or undecodable message
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Request that can never be routed, e.g. a lookup for our own key
    RoutingError {
        message: String,
        key: Option<String>,
    },

    /// Exhaustive search without locating the target
    NotFound {
        message: String,
        key: Option<String>,
    },

    /// Dial, read or write failure against a peer
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// A peer did not answer within the RPC deadline
    TimeoutError {
        message: String,
        address: Option<String>,
    },

    /// Failure reported by the value store collaborator
    StorageError {
        message: String,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },
}

impl DhtError {
    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        DhtError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        DhtError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new RoutingError for a key
    pub fn routing_error(message: impl Into<String>, key: impl Into<String>) -> Self {
        DhtError::RoutingError {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a new NotFound for a key
    pub fn not_found(message: impl Into<String>, key: impl Into<String>) -> Self {
        DhtError::NotFound {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a new NetworkError with address
    pub fn network_error_with_address(message: impl Into<String>, address: impl Into<String>) -> Self {
        DhtError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: None,
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        DhtError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new TimeoutError
    pub fn timeout_error(message: impl Into<String>, address: impl Into<String>) -> Self {
        DhtError::TimeoutError {
            message: message.into(),
            address: Some(address.into()),
        }
    }

    /// Create a new StorageError
    pub fn storage_error(message: impl Into<String>) -> Self {
        DhtError::StorageError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        DhtError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether the peer involved should be treated as unreachable.
    ///
    /// The lookup skips such contacts and the eviction probe replaces them.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            DhtError::NetworkError { .. } | DhtError::TimeoutError { .. } | DhtError::ProtocolError { .. }
        )
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            DhtError::ProtocolError { source, .. }
            | DhtError::NetworkError { source, .. }
            | DhtError::StorageError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for DhtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhtError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            DhtError::RoutingError { message, key } => {
                if let Some(k) = key {
                    write!(f, "Routing error: {} (key: {})", message, k)
                } else {
                    write!(f, "Routing error: {}", message)
                }
            }
            DhtError::NotFound { message, key } => {
                if let Some(k) = key {
                    write!(f, "Not found: {} (key: {})", message, k)
                } else {
                    write!(f, "Not found: {}", message)
                }
            }
            DhtError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            DhtError::TimeoutError { message, address } => {
                if let Some(a) = address {
                    write!(f, "Timeout: {} (address: {})", message, a)
                } else {
                    write!(f, "Timeout: {}", message)
                }
            }
            DhtError::StorageError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Storage error: {} (source: {})", message, src)
                } else {
                    write!(f, "Storage error: {}", message)
                }
            }
            DhtError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for DhtError {}

impl From<std::io::Error> for DhtError {
    fn from(err: std::io::Error) -> Self {
        DhtError::NetworkError {
            message: err.to_string(),
            address: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<serde_json::Error> for DhtError {
    fn from(err: serde_json::Error) -> Self {
        DhtError::protocol_error_with_source("Failed to decode message", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        let err = DhtError::routing_error("Can't search for self", "abcd");
        assert_eq!(err.to_string(), "Routing error: Can't search for self (key: abcd)");

        let err = DhtError::network_error_full("Failed to connect", "127.0.0.1:1", "refused");
        assert_eq!(
            err.to_string(),
            "Network error: Failed to connect (address: 127.0.0.1:1, source: refused)"
        );

        let err = DhtError::timeout_error("No response", "127.0.0.1:2");
        assert_eq!(err.to_string(), "Timeout: No response (address: 127.0.0.1:2)");
    }

    #[test]
    fn test_is_unreachable() {
        assert!(DhtError::timeout_error("x", "a").is_unreachable());
        assert!(DhtError::network_error_with_address("x", "a").is_unreachable());
        assert!(DhtError::protocol_error("x").is_unreachable());
        assert!(!DhtError::not_found("x", "k").is_unreachable());
        assert!(!DhtError::routing_error("x", "k").is_unreachable());
    }

    #[test]
    fn test_with_context() {
        let err = DhtError::protocol_error("bad frame").with_context("while reading");
        assert_eq!(err.to_string(), "Protocol error: bad frame (source: while reading)");

        let err = DhtError::protocol_error_with_source("bad frame", "eof").with_context("ping");
        assert_eq!(err.to_string(), "Protocol error: bad frame (source: eof: ping)");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DhtError = io.into();
        assert!(matches!(err, DhtError::NetworkError { .. }));
    }
}
