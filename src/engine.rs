//! Sync Engine
//!
//! Explicitly constructed owner of the cache registry, the poll scheduler
//! and the signal dispatcher for one connection to a replica. Start at most
//! one engine per connection.

use crate::cache::{
    CacheRegistry, EngineMetrics, EngineStatsSnapshot, NodeCacheEntry, NodeState, PollScheduler,
    Subscription,
};
use crate::config::EngineConfig;
use crate::domain::{NodeId, PublicKey, RemoteCallRef};
use crate::error::Result;
use crate::signal::{Signal, SignalDispatcher};
use crate::transport::GraphClient;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Client-side cache and synchronization engine
pub struct SyncEngine {
    config: EngineConfig,
    client: GraphClient,
    registry: Arc<CacheRegistry>,
    poller: Arc<PollScheduler>,
    dispatcher: Arc<SignalDispatcher>,
    metrics: Arc<EngineMetrics>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("peer_anchor", &self.config.peer_anchor)
            .field("cached_nodes", &self.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl SyncEngine {
    /// Build the engine and start its poll timer and signal loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        remote: RemoteCallRef,
        signals: broadcast::Receiver<Signal>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let client = GraphClient::new(remote);
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();

        let registry = Arc::new(CacheRegistry::new(
            client.clone(),
            config.node_refresh_interval(),
            metrics.clone(),
            shutdown.child_token(),
        ));
        let poller = Arc::new(PollScheduler::new(
            registry.clone(),
            config.poll_interval(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(SignalDispatcher::new(
            registry.clone(),
            poller.clone(),
            client.clone(),
            &config.peer_anchor,
            config.confirmation_delay(),
            metrics.clone(),
            shutdown.child_token(),
        ));

        let tasks = vec![
            poller.clone().spawn(shutdown.child_token()),
            dispatcher.clone().spawn(signals),
        ];

        info!(
            poll_interval_secs = config.poll_interval_secs,
            peer_anchor = %config.peer_anchor,
            "Sync engine started"
        );

        Ok(Arc::new(Self {
            config,
            client,
            registry,
            poller,
            dispatcher,
            metrics,
            shutdown,
            tasks: Mutex::new(tasks),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Typed access to the store, for reads and writes
    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    // =========================================================================
    // Cache Access
    // =========================================================================

    /// Observe a node. The callback receives the current state immediately
    /// and every change after that.
    pub fn subscribe_to_node<F>(&self, node: &NodeId, callback: F) -> Subscription
    where
        F: Fn(&NodeState) + Send + Sync + 'static,
    {
        self.registry.resolve(node).subscribe(callback)
    }

    /// Cache entry for `node`, created on first access
    pub fn entry(&self, node: &NodeId) -> Arc<NodeCacheEntry> {
        self.registry.resolve(node)
    }

    /// Cached state of `node`, `Pending` if it was never referenced
    pub fn node_state(&self, node: &NodeId) -> NodeState {
        self.registry
            .get(node)
            .map(|entry| entry.state())
            .unwrap_or(NodeState::Pending)
    }

    /// Sweep every subscribed node now
    pub async fn poll_now(&self, allow_delete: bool) -> Result<usize> {
        self.poller.poll_now(allow_delete).await
    }

    /// Apply a signal as if it had arrived on the signal channel
    pub async fn handle_signal(&self, signal: Signal) {
        self.dispatcher.handle(signal).await
    }

    /// Current peer roster
    pub fn peers(&self) -> Vec<PublicKey> {
        self.dispatcher.peers()
    }

    pub fn cached_nodes(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.metrics.snapshot()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop the poll timer, the signal loop and every per-node refresh loop,
    /// including those behind subscriptions the caller still holds, and wait
    /// for the engine tasks to finish
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down sync engine");
        self.shutdown.cancel();
        self.dispatcher.release_roster();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
        info!("Sync engine stopped");
    }
}
