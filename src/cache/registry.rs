//! Cache Registry
//!
//! Keyed collections of node cache entries, one concurrent map per node
//! kind. Entries are created on first reference and never evicted.

use crate::cache::entry::NodeCacheEntry;
use crate::cache::metrics::EngineMetrics;
use crate::domain::{NodeId, NodeKind};
use crate::error::Result;
use crate::transport::GraphClient;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Get-or-create registry of node cache entries
pub struct CacheRegistry {
    anchors: DashMap<String, Arc<NodeCacheEntry>>,
    identities: DashMap<Vec<u8>, Arc<NodeCacheEntry>>,
    contents: DashMap<Vec<u8>, Arc<NodeCacheEntry>>,
    client: GraphClient,
    refresh_interval: Duration,
    metrics: Arc<EngineMetrics>,
    /// Parent of every entry's refresh loop
    shutdown: CancellationToken,
}

impl CacheRegistry {
    pub fn new(
        client: GraphClient,
        refresh_interval: Duration,
        metrics: Arc<EngineMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            anchors: DashMap::new(),
            identities: DashMap::new(),
            contents: DashMap::new(),
            client,
            refresh_interval,
            metrics,
            shutdown,
        }
    }

    fn new_entry(&self, node: &NodeId) -> Arc<NodeCacheEntry> {
        debug!(node = %node, "Creating cache entry");
        Arc::new(NodeCacheEntry::new(
            node.clone(),
            self.client.clone(),
            self.refresh_interval,
            self.metrics.clone(),
            self.shutdown.child_token(),
        ))
    }

    /// Entry for `node`, created `Pending` on first access
    pub fn resolve(&self, node: &NodeId) -> Arc<NodeCacheEntry> {
        if let Some(existing) = self.get(node) {
            return existing;
        }

        let create = || self.new_entry(node);
        match node {
            NodeId::Anchor(name) => self.anchors.entry(name.clone()).or_insert_with(create).clone(),
            NodeId::Identity(key) => self
                .identities
                .entry(key.as_bytes().to_vec())
                .or_insert_with(create)
                .clone(),
            NodeId::Content(id) => self
                .contents
                .entry(id.as_bytes().to_vec())
                .or_insert_with(create)
                .clone(),
        }
    }

    /// Entry for `node` if one exists
    pub fn get(&self, node: &NodeId) -> Option<Arc<NodeCacheEntry>> {
        match node {
            NodeId::Anchor(name) => self.anchors.get(name).map(|e| e.value().clone()),
            NodeId::Identity(key) => self.identities.get(key.as_bytes()).map(|e| e.value().clone()),
            NodeId::Content(id) => self.contents.get(id.as_bytes()).map(|e| e.value().clone()),
        }
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.get(node).is_some()
    }

    /// Every node with at least one subscriber, across all three maps
    pub fn subscribed_node_ids(&self) -> Vec<NodeId> {
        let anchors = self.anchors.iter().map(|e| e.value().clone());
        let identities = self.identities.iter().map(|e| e.value().clone());
        let contents = self.contents.iter().map(|e| e.value().clone());

        anchors
            .chain(identities)
            .chain(contents)
            .filter(|entry| entry.is_subscribed())
            .map(|entry| entry.node_id().clone())
            .collect()
    }

    /// Refresh `nodes` with one batched call, routing each positional result
    /// to its entry. A failure of the whole call leaves every entry alone.
    pub async fn refresh_batch(&self, nodes: &[NodeId], allow_delete: bool) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        self.metrics.refresh.record_batch_poll(nodes.len());
        let lookups = match self.client.batch_get_node_and_linked_node_ids(nodes).await {
            Ok(lookups) => lookups,
            Err(e) => {
                self.metrics.refresh.record_refresh_failure();
                warn!(nodes = nodes.len(), error = %e, "Batched poll failed");
                return Err(e);
            }
        };

        for (node, lookup) in nodes.iter().zip(lookups) {
            self.resolve(node).apply_lookup(lookup, allow_delete);
        }

        debug!(nodes = nodes.len(), allow_delete, "Batched poll applied");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.anchors.len() + self.identities.len() + self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry count per node kind
    pub fn counts(&self) -> [(NodeKind, usize); 3] {
        [
            (NodeKind::Anchor, self.anchors.len()),
            (NodeKind::Identity, self.identities.len()),
            (NodeKind::Content, self.contents.len()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::NodeState;
    use crate::domain::{ops, LinkInput, NodeContent, NodeIdAndTag};
    use crate::replica::{InjectedFailure, MemoryReplica, SimNetwork};
    use assert_matches::assert_matches;

    fn setup() -> (Arc<MemoryReplica>, CacheRegistry) {
        let network = SimNetwork::new("PEERS");
        let replica = Arc::new(network.join(b"alice".to_vec()));
        let registry = CacheRegistry::new(
            GraphClient::new(replica.clone()),
            Duration::from_secs(10),
            Arc::new(EngineMetrics::new()),
            CancellationToken::new(),
        );
        (replica, registry)
    }

    #[test]
    fn test_resolve_is_get_or_create() {
        let (_, registry) = setup();
        let node = NodeId::anchor("A");
        assert!(registry.get(&node).is_none());

        let first = registry.resolve(&node);
        let second = registry.resolve(&node);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), NodeState::Pending);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let (_, registry) = setup();
        let anchor = registry.resolve(&NodeId::anchor("X"));
        let content = registry.resolve(&NodeId::content(b"X".to_vec()));
        let identity = registry.resolve(&NodeId::identity(b"X".to_vec()));

        assert!(!Arc::ptr_eq(&anchor, &content));
        assert!(!Arc::ptr_eq(&content, &identity));
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.counts(),
            [
                (NodeKind::Anchor, 1),
                (NodeKind::Identity, 1),
                (NodeKind::Content, 1),
            ]
        );

        // Each kind is found only in its own map
        assert!(Arc::ptr_eq(&registry.get(&NodeId::anchor("X")).unwrap(), &anchor));
        assert!(Arc::ptr_eq(
            &registry.get(&NodeId::content(b"X".to_vec())).unwrap(),
            &content
        ));
        assert!(registry.get(&NodeId::identity(b"Y".to_vec())).is_none());
    }

    #[tokio::test]
    async fn test_refresh_batch_routes_results() {
        let (replica, registry) = setup();
        let client = GraphClient::new(replica.clone());
        let thing = client
            .create_thing("hello", Some(vec![LinkInput::from(NodeId::anchor("A"))]))
            .await
            .unwrap();

        let missing = NodeId::content(vec![0xaa]);
        let nodes = vec![NodeId::anchor("A"), missing.clone(), thing.node_id()];
        registry.refresh_batch(&nodes, false).await.unwrap();

        assert_eq!(replica.call_count(ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS), 1);
        assert_eq!(
            registry.resolve(&NodeId::anchor("A")).state().snapshot().unwrap().linked,
            vec![NodeIdAndTag::untagged(thing.node_id())]
        );
        assert_matches!(registry.resolve(&missing).state(), NodeState::Error(_));
        assert_matches!(
            registry.resolve(&thing.node_id()).state(),
            NodeState::Complete(s) if s.content == NodeContent::Content(thing.clone())
        );
    }

    #[tokio::test]
    async fn test_refresh_batch_failure_keeps_entries() {
        let (replica, registry) = setup();
        let node = NodeId::anchor("A");
        registry.resolve(&node);

        replica.fail_next(ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS, InjectedFailure::Transport);
        let result = registry.refresh_batch(&[node.clone()], true).await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(registry.resolve(&node).state(), NodeState::Pending);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let (replica, registry) = setup();
        registry.refresh_batch(&[], false).await.unwrap();
        assert_eq!(replica.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribed_node_ids() {
        let (_, registry) = setup();
        registry.resolve(&NodeId::anchor("idle"));
        let watched = registry.resolve(&NodeId::content(vec![1]));

        assert!(registry.subscribed_node_ids().is_empty());
        let _sub = watched.subscribe(|_| {});
        assert_eq!(registry.subscribed_node_ids(), vec![NodeId::content(vec![1])]);
    }
}
