//! Node Cache Entry
//!
//! One entry per node: its state, the observers watching it, and the
//! periodic refresh that runs while at least one observer is registered.
//!
//! State machine:
//!
//! ```text
//! Pending  -> Complete | Error
//! Complete -> Complete
//! Error    -> Complete | Error
//! ```
//!
//! An entry never returns to `Pending` and a `Complete` entry is never
//! replaced by an error; failed refreshes of a complete entry are only
//! logged.
//!
//! Every change bumps the entry's version. Each observer receives states in
//! version order and never receives a state older than one it has already
//! seen, even when merges race on different threads.

use crate::cache::metrics::EngineMetrics;
use crate::domain::{NodeAndLinkedIds, NodeContent, NodeId, NodeIdAndTag, NodeLookup};
use crate::error::{Error, Result};
use crate::transport::GraphClient;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Node State
// =============================================================================

/// Resolved content of a node plus its outgoing link targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub content: NodeContent,
    /// Ordered, duplicate free
    pub linked: Vec<NodeIdAndTag>,
}

impl NodeSnapshot {
    pub fn new(content: NodeContent, linked: Vec<NodeIdAndTag>) -> Self {
        let mut snapshot = Self {
            content,
            linked: Vec::with_capacity(linked.len()),
        };
        snapshot.union(linked);
        snapshot
    }

    pub fn contains(&self, target: &NodeIdAndTag) -> bool {
        self.linked.contains(target)
    }

    /// Insert unless an equal target is present
    pub fn insert(&mut self, target: NodeIdAndTag) -> bool {
        if self.contains(&target) {
            false
        } else {
            self.linked.push(target);
            true
        }
    }

    /// Remove every equal target
    pub fn remove(&mut self, target: &NodeIdAndTag) -> bool {
        let before = self.linked.len();
        self.linked.retain(|t| t != target);
        self.linked.len() != before
    }

    fn union(&mut self, targets: Vec<NodeIdAndTag>) {
        for target in targets {
            self.insert(target);
        }
    }
}

/// Cache state of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Complete(NodeSnapshot),
    Error(String),
}

impl NodeState {
    pub fn is_complete(&self) -> bool {
        matches!(self, NodeState::Complete(_))
    }

    pub fn snapshot(&self) -> Option<&NodeSnapshot> {
        match self {
            NodeState::Complete(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Complete(_) => "complete",
            NodeState::Error(_) => "error",
        }
    }
}

/// Observer callback, invoked with every new state
pub type StateCallback = Arc<dyn Fn(&NodeState) + Send + Sync>;

// =============================================================================
// Cache Entry
// =============================================================================

/// A registered callback plus the version it last received
///
/// The delivery lock is held while the callback runs so deliveries to one
/// observer never overlap. It is reentrant so a callback may mutate the
/// entry it observes.
struct Observer {
    callback: StateCallback,
    delivered: ReentrantMutex<Cell<Option<u64>>>,
}

impl Observer {
    fn new(callback: StateCallback) -> Self {
        Self {
            callback,
            delivered: ReentrantMutex::new(Cell::new(None)),
        }
    }

    /// Run the callback unless this or a newer version was already delivered
    fn deliver(&self, version: u64, state: &NodeState) {
        let delivered = self.delivered.lock();
        if delivered.get().is_some_and(|last| last >= version) {
            return;
        }
        delivered.set(Some(version));
        (self.callback)(state);
    }
}

struct EntryInner {
    state: NodeState,
    /// Bumped on every change
    version: u64,
    subscribers: BTreeMap<u64, Arc<Observer>>,
    next_subscriber: u64,
    /// Present while the periodic refresh runs
    refresh_token: Option<CancellationToken>,
}

/// Cache entry for a single node
pub struct NodeCacheEntry {
    node_id: NodeId,
    client: GraphClient,
    refresh_interval: Duration,
    metrics: Arc<EngineMetrics>,
    /// Parent of the refresh loop token
    shutdown: CancellationToken,
    inner: Mutex<EntryInner>,
}

impl std::fmt::Debug for NodeCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NodeCacheEntry")
            .field("node_id", &self.node_id)
            .field("state", &inner.state)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl NodeCacheEntry {
    pub fn new(
        node_id: NodeId,
        client: GraphClient,
        refresh_interval: Duration,
        metrics: Arc<EngineMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            node_id,
            client,
            refresh_interval,
            metrics,
            shutdown,
            inner: Mutex::new(EntryInner {
                state: NodeState::Pending,
                version: 0,
                subscribers: BTreeMap::new(),
                next_subscriber: 0,
                refresh_token: None,
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current state
    pub fn state(&self) -> NodeState {
        self.inner.lock().state.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriber_count() > 0
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register an observer
    ///
    /// The callback receives the current state right away. The first
    /// observer starts the periodic refresh, whose first tick refreshes
    /// immediately. The loop also stops when the entry's shutdown token is
    /// cancelled. Must be called from within a tokio runtime.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&NodeState) + Send + Sync + 'static,
    {
        let observer = Arc::new(Observer::new(Arc::new(callback)));

        let (id, version, current, start) = {
            let mut inner = self.inner.lock();
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner.subscribers.insert(id, observer.clone());

            let start = if inner.refresh_token.is_none() {
                let token = self.shutdown.child_token();
                inner.refresh_token = Some(token.clone());
                Some(token)
            } else {
                None
            };
            (id, inner.version, inner.state.clone(), start)
        };

        // Skipped if a racing change already delivered something newer
        observer.deliver(version, &current);

        if let Some(token) = start {
            debug!(node = %self.node_id, "Starting periodic refresh");
            self.spawn_refresh_loop(token);
        }

        Subscription {
            entry: self.clone(),
            id: Some(id),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let token = {
            let mut inner = self.inner.lock();
            inner.subscribers.remove(&id);
            if inner.subscribers.is_empty() {
                inner.refresh_token.take()
            } else {
                None
            }
        };

        if let Some(token) = token {
            debug!(node = %self.node_id, "Stopping periodic refresh");
            token.cancel();
        }
    }

    fn spawn_refresh_loop(self: &Arc<Self>, token: CancellationToken) {
        let entry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(entry.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => entry.refresh().await,
                }
            }
        });
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Fetch the node and merge the result without deleting links
    pub async fn refresh(&self) {
        self.metrics.refresh.record_refresh();
        match self.fetch().await {
            Ok(lookup) => self.apply_lookup(lookup, false),
            Err(e) => self.apply_failure(&e),
        }
    }

    async fn fetch(&self) -> Result<NodeLookup> {
        let found = |content, linked_node_ids| {
            NodeLookup::Found(NodeAndLinkedIds {
                content,
                linked_node_ids,
            })
        };

        match &self.node_id {
            NodeId::Content(id) => {
                let (thing, linked) = futures::try_join!(
                    self.client.get_latest_thing(id),
                    self.client.get_all_linked_node_ids(&self.node_id),
                )?;
                Ok(match thing {
                    Some(thing) => found(NodeContent::Content(thing), linked),
                    None => NodeLookup::NotFound,
                })
            }
            NodeId::Anchor(name) => {
                let linked = self.client.get_all_linked_node_ids(&self.node_id).await?;
                Ok(found(NodeContent::Anchor(name.clone()), linked))
            }
            NodeId::Identity(key) => {
                let linked = self.client.get_all_linked_node_ids(&self.node_id).await?;
                Ok(found(NodeContent::Identity(key.clone()), linked))
            }
        }
    }

    // =========================================================================
    // Merges
    // =========================================================================

    /// Apply `f` under the lock and notify observers if the state changed
    fn transition<F>(&self, f: F)
    where
        F: FnOnce(&mut NodeState),
    {
        let notify = {
            let mut inner = self.inner.lock();
            let before = inner.state.clone();
            f(&mut inner.state);
            if inner.state == before {
                None
            } else {
                inner.version += 1;
                let observers: Vec<Arc<Observer>> = inner.subscribers.values().cloned().collect();
                Some((inner.version, inner.state.clone(), observers))
            }
        };

        if let Some((version, state, observers)) = notify {
            for observer in observers {
                observer.deliver(version, &state);
            }
        }
    }

    /// Merge a fetched node. `allow_delete` replaces the link set, otherwise
    /// the fetched links are added to the cached ones.
    pub fn apply_lookup(&self, lookup: NodeLookup, allow_delete: bool) {
        match lookup {
            NodeLookup::Found(found) => self.transition(|state| match state {
                NodeState::Complete(snapshot) => {
                    snapshot.content = found.content;
                    if allow_delete {
                        snapshot.linked.clear();
                    }
                    snapshot.union(found.linked_node_ids);
                }
                _ => {
                    *state = NodeState::Complete(NodeSnapshot::new(
                        found.content,
                        found.linked_node_ids,
                    ));
                }
            }),
            NodeLookup::NotFound => self.fail("node not found".to_string()),
            NodeLookup::Rejected { reason } => self.fail(reason),
        }
    }

    /// Record a failed refresh
    pub fn apply_failure(&self, error: &Error) {
        self.fail(error.to_string());
    }

    fn fail(&self, reason: String) {
        self.metrics.refresh.record_refresh_failure();
        let node = &self.node_id;
        self.transition(|state| match state {
            NodeState::Complete(_) => {
                warn!(node = %node, reason = %reason, "Refresh failed, keeping cached state");
            }
            _ => *state = NodeState::Error(reason),
        });
    }

    /// Add a link target to a complete entry
    pub fn apply_link_added(&self, target: NodeIdAndTag) {
        self.transition(|state| {
            if let NodeState::Complete(snapshot) = state {
                snapshot.insert(target);
            }
        });
    }

    /// Remove a link target from a complete entry
    pub fn apply_link_removed(&self, target: &NodeIdAndTag) {
        self.transition(|state| {
            if let NodeState::Complete(snapshot) = state {
                snapshot.remove(target);
            }
        });
    }

    /// Replace the content, seeding a complete entry if needed
    pub fn apply_content_updated(&self, content: NodeContent) {
        self.transition(|state| match state {
            NodeState::Complete(snapshot) => snapshot.content = content,
            _ => *state = NodeState::Complete(NodeSnapshot::new(content, Vec::new())),
        });
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Keeps an observer registered until dropped or unsubscribed
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    entry: Arc<NodeCacheEntry>,
    id: Option<u64>,
}

impl Subscription {
    pub fn node_id(&self) -> &NodeId {
        self.entry.node_id()
    }

    /// Latest state of the watched node
    pub fn state(&self) -> NodeState {
        self.entry.state()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.entry.unsubscribe(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("node_id", self.entry.node_id())
            .field("id", &self.id)
            .finish()
    }
}
