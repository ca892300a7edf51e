//! Graph Sync demo
//!
//! Runs two peers on an in-process simulated network. The second peer
//! observes an anchor while the first writes linked content under it, and
//! every state change the observer sees is logged.
//!
//! ```text
//!   alice ──create/update/delete──▶ SimNetwork ◀──poll── bob
//!     │                                 │                 ▲
//!     └──── local signal ── forward ────┴─ remote signal ─┘
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use graph_sync::{
    DeleteThingInput, EngineConfig, LinkInput, NodeId, NodeState, SimNetwork, SyncEngine,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Graph Sync - node graph cache and signal reconciliation demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML)
    #[arg(long, env = "GRAPH_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the batched poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval_secs: Option<u64>,

    /// Anchor the observer watches and the writer links content under
    #[arg(long, env = "DEMO_ANCHOR", default_value = "posts")]
    anchor: String,

    /// Number of items to create
    #[arg(long, default_value = "3")]
    items: usize,

    /// How long to keep running after the writes, in seconds
    #[arg(long, env = "DEMO_DURATION", default_value = "15")]
    duration_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    config.validate().context("invalid configuration")?;

    info!("Starting Graph Sync demo");
    info!("  Version: {}", graph_sync::VERSION);
    info!("  Anchor: {}", args.anchor);
    info!("  Peer anchor: {}", config.peer_anchor);
    info!("  Poll interval: {}s", config.poll_interval_secs);

    let network = SimNetwork::with_capacity(&config.peer_anchor, config.signal_channel_capacity);

    let alice_replica = Arc::new(network.join(b"alice".to_vec()));
    let bob_replica = Arc::new(network.join(b"bob".to_vec()));

    let alice = SyncEngine::start(
        config.clone(),
        alice_replica.clone(),
        alice_replica.subscribe_signals(),
    )
    .context("starting writer engine")?;
    let bob = SyncEngine::start(config, bob_replica.clone(), bob_replica.subscribe_signals())
        .context("starting observer engine")?;

    let anchor = NodeId::anchor(args.anchor.clone());
    let observed = anchor.clone();
    let _watch = bob.subscribe_to_node(&anchor, move |state| match state {
        NodeState::Complete(snapshot) => info!(
            observer = "bob",
            node = %observed,
            links = snapshot.linked.len(),
            "Node complete"
        ),
        other => info!(observer = "bob", node = %observed, state = other.name(), "Node state"),
    });

    // Give both rosters a chance to load
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(peers = alice.peers().len(), "Writer roster loaded");

    run_writes(&alice, &anchor, args.items)
        .await
        .context("writing demo content")?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    info!(stats = ?alice.stats(), "Writer statistics");
    info!(stats = ?bob.stats(), "Observer statistics");

    alice.shutdown().await;
    bob.shutdown().await;

    info!("Demo complete");
    Ok(())
}

/// Create, update and delete content linked under `anchor`
async fn run_writes(engine: &SyncEngine, anchor: &NodeId, items: usize) -> graph_sync::Result<()> {
    let client = engine.client();
    let mut created = Vec::with_capacity(items);

    for i in 0..items {
        let thing = client
            .create_thing(
                &format!("item {}", i),
                Some(vec![LinkInput::from(anchor.clone())]),
            )
            .await?;
        info!(writer = "alice", thing = %thing.id, "Created item");
        created.push(thing);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    if let Some(first) = created.first() {
        let revision = client.update_thing(&first.id, "item 0 (edited)").await?;
        info!(writer = "alice", thing = %revision.id, "Updated item");
    }

    if let Some(last) = created.last() {
        client
            .delete_thing(DeleteThingInput {
                thing_id: last.id.clone(),
                delete_backlinks: true,
                delete_links_from_creator: true,
                delete_links: Some(vec![LinkInput::from(anchor.clone())]),
            })
            .await?;
        info!(writer = "alice", thing = %last.id, "Deleted item");
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
