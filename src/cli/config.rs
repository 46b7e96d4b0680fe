//! CLI configuration module
//!
//! Turns CLI arguments into validated node settings.

use crate::cli::args::CliArgs;
use crate::dht::{BootstrapConfig, Key, NodeConfig};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the DHT node
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub listen_addr: SocketAddr,
    /// Node key, random when None
    pub key: Option<Key>,
    /// Engine tunables
    pub node: NodeConfig,
    /// Seeds to join through
    pub bootstrap: BootstrapConfig,
    /// Key to look up after joining
    pub find: Option<Key>,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;

        let key = args
            .key
            .as_deref()
            .map(|s| Key::from_hex(s).ok_or_else(|| anyhow::anyhow!("--key must be 40 hex characters")))
            .transpose()?;

        let find = args
            .find
            .as_deref()
            .map(|s| Key::from_hex(s).ok_or_else(|| anyhow::anyhow!("--find must be 40 hex characters")))
            .transpose()?;

        let bootstrap = BootstrapConfig::from_strings(args.bootstrap.as_slice())
            .context("Invalid --bootstrap seed")?;

        Ok(Self {
            listen_addr,
            key,
            node: NodeConfig {
                k: args.k,
                rpc_timeout: Duration::from_secs(args.rpc_timeout),
                max_hops: args.max_hops,
            },
            bootstrap,
            find,
            verbose: args.verbose,
            quiet: args.quiet,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.k == 0 {
            return Err(anyhow::anyhow!("k must be at least 1"));
        }

        if self.node.rpc_timeout == Duration::ZERO {
            return Err(anyhow::anyhow!("rpc_timeout must be at least 1 second"));
        }

        if self.node.max_hops == 0 {
            return Err(anyhow::anyhow!("max_hops must be at least 1"));
        }

        if let (Some(key), Some(find)) = (self.key, self.find) {
            if key == find {
                return Err(anyhow::anyhow!("--find cannot be our own key"));
            }
        }

        Ok(())
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["kademlia-node"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_from_args() {
        let key = "01".repeat(20);
        let seed = format!("{}@127.0.0.1:4001", "02".repeat(20));
        let config = Config::from_args(&args(&[
            "--port", "4100", "--key", key.as_str(), "-k", "8", "--rpc-timeout", "2", "-b", seed.as_str(),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:4100".parse::<SocketAddr>().unwrap());
        assert_eq!(config.key, Some(Key::new([1u8; 20])));
        assert_eq!(config.node.k, 8);
        assert_eq!(config.node.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.bootstrap.seeds.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_key() {
        assert!(Config::from_args(&args(&["--key", "xyz"])).is_err());
        assert!(Config::from_args(&args(&["--find", "00"])).is_err());
        assert!(Config::from_args(&args(&["--host", "not an ip"])).is_err());
        assert!(Config::from_args(&args(&["-b", "garbage"])).is_err());
    }

    #[test]
    fn test_config_validate_invalid_values() {
        let config = Config::from_args(&args(&["-k", "0"])).unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_args(&args(&["--rpc-timeout", "0"])).unwrap();
        assert!(config.validate().is_err());

        let key = "03".repeat(20);
        let config = Config::from_args(&args(&["--key", key.as_str(), "--find", key.as_str()])).unwrap();
        assert!(config.validate().is_err());
    }
}
