//! Signal Dispatcher
//!
//! Merges inbound signals into the cache one at a time and forwards
//! locally-originated signals to the peer roster.
//!
//! | Signal          | Cache effect                         | Follow-up                    |
//! |-----------------|--------------------------------------|------------------------------|
//! | ContentCreated  | seed or replace the content entry    | deferred confirmation fetch  |
//! | ContentUpdated  | seed or replace the content entry    | deferred confirmation fetch  |
//! | ContentDeleted  | none                                 |                              |
//! | LinksAdded      | add target to each source entry      | deferred confirmation fetch  |
//! | LinksRemoved    | remove target from each source entry | allow-delete sweep           |

use crate::cache::{CacheRegistry, EngineMetrics, PollScheduler, Subscription};
use crate::domain::{ActionRef, NodeContent, NodeId, PublicKey};
use crate::signal::events::{Signal, SignalKind};
use crate::transport::GraphClient;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Applies signals to the cache and forwards local ones to peers
pub struct SignalDispatcher {
    registry: Arc<CacheRegistry>,
    poller: Arc<PollScheduler>,
    client: GraphClient,
    peer_anchor: NodeId,
    confirmation_delay: Duration,
    metrics: Arc<EngineMetrics>,
    /// Keeps the roster anchor observed
    roster: Mutex<Option<Subscription>>,
    shutdown: CancellationToken,
}

impl SignalDispatcher {
    /// Create a dispatcher and start observing the peer roster anchor
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        registry: Arc<CacheRegistry>,
        poller: Arc<PollScheduler>,
        client: GraphClient,
        peer_anchor: &str,
        confirmation_delay: Duration,
        metrics: Arc<EngineMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let peer_anchor = NodeId::anchor(peer_anchor);
        let roster = registry.resolve(&peer_anchor).subscribe(|state| {
            if let Some(snapshot) = state.snapshot() {
                debug!(peers = snapshot.linked.len(), "Peer roster updated");
            }
        });

        Self {
            registry,
            poller,
            client,
            peer_anchor,
            confirmation_delay,
            metrics,
            roster: Mutex::new(Some(roster)),
            shutdown,
        }
    }

    /// Identities linked from the roster anchor, as last seen
    pub fn peers(&self) -> Vec<PublicKey> {
        let Some(entry) = self.registry.get(&self.peer_anchor) else {
            return Vec::new();
        };
        entry
            .state()
            .snapshot()
            .map(|snapshot| {
                snapshot
                    .linked
                    .iter()
                    .filter_map(|target| target.node_id.as_identity().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stop observing the roster anchor
    pub fn release_roster(&self) {
        self.roster.lock().take();
    }

    // =========================================================================
    // Handling
    // =========================================================================

    /// Apply one signal, then forward it if it is local
    pub async fn handle(&self, signal: Signal) {
        debug!(kind = signal.kind.name(), origin = %signal.origin, "Handling signal");

        match &signal.kind {
            SignalKind::ContentCreated { thing } | SignalKind::ContentUpdated { thing, .. } => {
                self.registry
                    .resolve(&thing.node_id())
                    .apply_content_updated(NodeContent::Content(thing.clone()));
                self.schedule_confirmation(signal.kind.confirmation_refs());
            }
            SignalKind::ContentDeleted { id } => {
                // Reconciled by polling
                debug!(content = %id, "Content deleted upstream");
            }
            SignalKind::LinksAdded { links } => {
                for link in links {
                    if let Some(entry) = self.registry.get(&link.src) {
                        entry.apply_link_added(link.target());
                    }
                }
                self.schedule_confirmation(signal.kind.confirmation_refs());
            }
            SignalKind::LinksRemoved { links } => {
                for link in links {
                    if let Some(entry) = self.registry.get(&link.src) {
                        entry.apply_link_removed(&link.target());
                    }
                }
                if let Err(e) = self.poller.poll_now(true).await {
                    warn!(error = %e, "Allow-delete sweep after link removal failed");
                }
            }
        }
        self.metrics.signals.record_applied();

        if signal.is_local() {
            self.rebroadcast(&signal).await;
        }
    }

    async fn rebroadcast(&self, signal: &Signal) {
        let peers = self.peers();
        if peers.is_empty() {
            debug!(kind = signal.kind.name(), "No known peers, not forwarding");
            return;
        }

        match self.client.remote_signal(signal.to_remote(), peers).await {
            Ok(()) => self.metrics.signals.record_rebroadcast(),
            Err(e) => {
                self.metrics.signals.record_rebroadcast_failure();
                warn!(kind = signal.kind.name(), error = %e, "Failed to forward signal");
            }
        }
    }

    /// Fetch the given writes after the confirmation delay. Failures are
    /// only logged.
    fn schedule_confirmation(&self, refs: Vec<ActionRef>) {
        if refs.is_empty() {
            return;
        }

        let client = self.client.clone();
        let metrics = self.metrics.clone();
        let delay = self.confirmation_delay;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    match client.get_records(&refs).await {
                        Ok(visible) => {
                            let missing = visible.iter().filter(|v| !**v).count();
                            if missing > 0 {
                                debug!(missing, "Writes not yet visible after confirmation delay");
                            }
                        }
                        Err(e) => {
                            metrics.signals.record_confirmation_failure();
                            warn!(error = %e, "Confirmation fetch failed");
                        }
                    }
                }
            }
        });
    }

    // =========================================================================
    // Receive Loop
    // =========================================================================

    /// Consume `signals` until the channel closes or `shutdown` is cancelled
    pub fn spawn(self: Arc<Self>, mut signals: broadcast::Receiver<Signal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Signal dispatcher started");
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    received = signals.recv() => match received {
                        Ok(signal) => self.handle(signal).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Signal receiver lagged, sweeping with deletes");
                            self.metrics.signals.record_lagged(skipped);
                            if let Err(e) = self.poller.poll_now(true).await {
                                warn!(error = %e, "Recovery sweep failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Signal channel closed");
                            break;
                        }
                    },
                }
            }
            info!("Signal dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NodeState;
    use crate::domain::{
        ops, ContentId, LinkInput, NodeAndLinkedIds, NodeIdAndTag, NodeLink, NodeLookup, Thing,
    };
    use crate::replica::{InjectedFailure, MemoryReplica, SimNetwork};
    use crate::signal::events::SignalOrigin;
    use assert_matches::assert_matches;
    use chrono::Utc;

    struct Harness {
        alice: Arc<MemoryReplica>,
        bob: MemoryReplica,
        registry: Arc<CacheRegistry>,
        dispatcher: Arc<SignalDispatcher>,
        metrics: Arc<EngineMetrics>,
    }

    async fn harness() -> Harness {
        harness_with_anchor("PEERS").await
    }

    async fn harness_with_anchor(roster_anchor: &str) -> Harness {
        let network = SimNetwork::new("PEERS");
        let alice = Arc::new(network.join(b"alice".to_vec()));
        let bob = network.join(b"bob".to_vec());
        let client = GraphClient::new(alice.clone());
        let metrics = Arc::new(EngineMetrics::new());
        let registry = Arc::new(CacheRegistry::new(
            client.clone(),
            Duration::from_secs(3600),
            metrics.clone(),
            CancellationToken::new(),
        ));
        let poller = Arc::new(PollScheduler::new(
            registry.clone(),
            Duration::from_secs(10),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(SignalDispatcher::new(
            registry.clone(),
            poller,
            client,
            roster_anchor,
            Duration::from_millis(100),
            metrics.clone(),
            CancellationToken::new(),
        ));

        // Let the roster load
        tokio::time::sleep(Duration::from_millis(1)).await;

        Harness {
            alice,
            bob,
            registry,
            dispatcher,
            metrics,
        }
    }

    fn thing(id: u8) -> Thing {
        Thing {
            id: ContentId::new(vec![id]),
            content: format!("thing {}", id),
            creator: PublicKey::new(b"alice".to_vec()),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn link(src: &str, dst: &str, tag: Option<&[u8]>) -> NodeLink {
        NodeLink {
            src: NodeId::anchor(src),
            dst: NodeId::anchor(dst),
            tag: tag.map(|t| t.to_vec()),
            create_ref: ActionRef::new(vec![0x42]),
        }
    }

    /// Seed a complete entry for anchor `name` the way a fetch would
    fn seed_anchor(h: &Harness, name: &str) {
        h.registry.resolve(&NodeId::anchor(name)).apply_lookup(
            NodeLookup::Found(NodeAndLinkedIds {
                content: NodeContent::Anchor(name.into()),
                linked_node_ids: Vec::new(),
            }),
            false,
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_comes_from_anchor() {
        let h = harness().await;
        assert_eq!(
            h.dispatcher.peers(),
            vec![PublicKey::new(b"alice".to_vec()), PublicKey::new(b"bob".to_vec())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_content_created_seeds_and_forwards() {
        let h = harness().await;
        let mut bob_signals = h.bob.subscribe_signals();
        let created = thing(1);

        h.dispatcher
            .handle(Signal::local(SignalKind::ContentCreated {
                thing: created.clone(),
            }))
            .await;

        let state = h.registry.resolve(&created.node_id()).state();
        assert_matches!(state, NodeState::Complete(s) if s.content == NodeContent::Content(created.clone()) && s.linked.is_empty());

        let forwarded = bob_signals.try_recv().unwrap();
        assert_eq!(forwarded.origin, SignalOrigin::Remote);
        assert_matches!(forwarded.kind, SignalKind::ContentCreated { thing } if thing == created);
        assert_eq!(h.metrics.snapshot().signals_rebroadcast, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_signals_are_not_forwarded() {
        let h = harness().await;
        h.dispatcher
            .handle(Signal::remote(SignalKind::ContentCreated { thing: thing(1) }))
            .await;
        assert_eq!(h.alice.call_count(ops::REMOTE_SIGNAL), 0);
        assert_eq!(h.metrics.snapshot().signals_applied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_is_deferred() {
        let h = harness().await;
        h.dispatcher
            .handle(Signal::remote(SignalKind::ContentUpdated {
                thing: thing(1),
                update_ref: ActionRef::new(vec![1]),
                update_link_ref: ActionRef::new(vec![2]),
            }))
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.alice.call_count(ops::GET_RECORDS), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.alice.call_count(ops::GET_RECORDS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_failure_is_only_counted() {
        let h = harness().await;
        h.alice.fail_next(ops::GET_RECORDS, InjectedFailure::Transport);
        h.dispatcher
            .handle(Signal::remote(SignalKind::ContentCreated { thing: thing(1) }))
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.metrics.snapshot().confirmation_failures, 1);
        assert!(h.registry.resolve(&thing(1).node_id()).state().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_deleted_leaves_cache_alone() {
        let h = harness().await;
        let existing = thing(1);
        h.dispatcher
            .handle(Signal::remote(SignalKind::ContentCreated {
                thing: existing.clone(),
            }))
            .await;
        h.dispatcher
            .handle(Signal::remote(SignalKind::ContentDeleted {
                id: existing.id.clone(),
            }))
            .await;
        assert!(h.registry.resolve(&existing.node_id()).state().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_added_merges_into_complete_entries() {
        let h = harness().await;
        seed_anchor(&h, "A");

        h.dispatcher
            .handle(Signal::remote(SignalKind::LinksAdded {
                links: vec![link("A", "B", Some(b"T")), link("unknown", "B", None)],
            }))
            .await;

        let linked = h
            .registry
            .resolve(&NodeId::anchor("A"))
            .state()
            .snapshot()
            .map(|s| s.linked.clone());
        assert_eq!(
            linked,
            Some(vec![NodeIdAndTag::new(NodeId::anchor("B"), Some(b"T".to_vec()))])
        );
        // No entry is created for unknown sources
        assert!(h.registry.get(&NodeId::anchor("unknown")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_removed_triggers_allow_delete_sweep() {
        let h = harness().await;
        let client = GraphClient::new(h.alice.clone());
        client
            .create_links(&NodeId::anchor("A"), vec![LinkInput::to(NodeId::anchor("C"))])
            .await
            .unwrap();

        let entry = h.registry.resolve(&NodeId::anchor("A"));
        let _sub = entry.subscribe(|_| {});
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Stale link only known locally
        entry.apply_link_added(NodeIdAndTag::untagged(NodeId::anchor("B")));
        entry.apply_link_added(NodeIdAndTag::untagged(NodeId::anchor("stale")));

        h.dispatcher
            .handle(Signal::remote(SignalKind::LinksRemoved {
                links: vec![link("A", "B", None)],
            }))
            .await;

        assert_eq!(h.alice.call_count(ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS), 1);
        assert_eq!(
            entry.state().snapshot().map(|s| s.linked.clone()),
            Some(vec![NodeIdAndTag::untagged(NodeId::anchor("C"))])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_without_peers_is_noop() {
        let h = harness_with_anchor("NOBODY").await;
        assert!(h.dispatcher.peers().is_empty());

        h.dispatcher
            .handle(Signal::local(SignalKind::ContentDeleted {
                id: ContentId::new(vec![1]),
            }))
            .await;
        assert_eq!(h.alice.call_count(ops::REMOTE_SIGNAL), 0);
        assert_eq!(h.metrics.snapshot().signals_rebroadcast, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_loop_recovers_from_lag() {
        let h = harness().await;
        let (tx, rx) = broadcast::channel(2);
        let handle = h.dispatcher.clone().spawn(rx);

        for i in 0..5 {
            tx.send(Signal::remote(SignalKind::ContentDeleted {
                id: ContentId::new(vec![i]),
            }))
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let stats = h.metrics.snapshot();
        assert_eq!(stats.signals_lagged, 3);
        assert_eq!(stats.signals_applied, 2);
        // The roster anchor is subscribed, so the recovery sweep made a call
        assert_eq!(h.alice.call_count(ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS), 1);
    }
}
