//! kademlia-node - Main entry point
//!
//! Starts a DHT peer, joins through the given seeds and serves until Ctrl-C.

use anyhow::{Context, Result};
use kademlia_node::dht::storage::MemoryStore;
use kademlia_node::{bootstrap, CliArgs, Config, DhtError, Key, Node};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args).context("Invalid arguments")?;
    config.validate().context("Invalid configuration")?;

    let key = config.key.unwrap_or_else(Key::random);
    let node = Node::new(key, config.listen_addr, config.node, Arc::new(MemoryStore::new()));
    let local_addr = node.start().await.context("Failed to start node")?;

    println!("Node {} listening on {}", key.to_hex(), local_addr);
    println!("Seed string: {}@{}", key.to_hex(), local_addr);

    if !config.bootstrap.seeds.is_empty() {
        match bootstrap(&node, &config.bootstrap).await {
            Ok(known) => info!("Joined network, {} contact(s) known", known),
            Err(e) => warn!("Bootstrap failed: {}", e),
        }
    }

    if let Some(target) = config.find {
        run_lookup(&node, target).await;
    }

    debug!("{}", node.describe().await);
    info!("Serving; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    node.shutdown();
    info!("kademlia-node finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

/// Resolve a key and report the outcome
async fn run_lookup(node: &Node, target: Key) {
    info!("Looking up {}", target.to_hex());
    match node.find_node(target).await {
        Ok(contact) => println!("Found {}", contact.describe()),
        Err(DhtError::NotFound { .. }) => println!("{} not found in the network", target.to_hex()),
        Err(e) => {
            error!("Lookup for {} failed: {}", target, e);
            println!("Lookup failed: {}", e);
        }
    }
}
