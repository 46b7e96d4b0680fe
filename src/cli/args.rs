//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;

/// CLI arguments for the DHT node
#[derive(Debug, Parser)]
#[command(name = "kademlia-node")]
#[command(about = "A Kademlia DHT peer node", long_about = None)]
pub struct CliArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Listening port (0 picks a free port)
    #[arg(short, long, default_value_t = 4000)]
    pub port: u16,

    /// Node key as 40 hex characters (random if omitted)
    #[arg(long, value_name = "HEX")]
    pub key: Option<String>,

    /// Bucket capacity
    #[arg(short, long, default_value_t = 20)]
    pub k: usize,

    /// RPC deadline in seconds
    #[arg(long, default_value_t = 5)]
    pub rpc_timeout: u64,

    /// Maximum lookup depth
    #[arg(long, default_value_t = 8)]
    pub max_hops: usize,

    /// Seed contact as <hex key>@<ip:port> (repeatable)
    #[arg(short, long, value_name = "SEED")]
    pub bootstrap: Vec<String>,

    /// Look up this key after bootstrapping
    #[arg(long, value_name = "HEX")]
    pub find: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["kademlia-node"]).unwrap();
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 4000);
        assert_eq!(args.k, 20);
        assert_eq!(args.rpc_timeout, 5);
        assert_eq!(args.max_hops, 8);
        assert!(args.key.is_none());
        assert!(args.bootstrap.is_empty());
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_repeated_bootstrap_and_verbose() {
        let args = CliArgs::try_parse_from([
            "kademlia-node",
            "--bootstrap",
            "a@127.0.0.1:1",
            "-b",
            "b@127.0.0.1:2",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(args.bootstrap, vec!["a@127.0.0.1:1", "b@127.0.0.1:2"]);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }
}
