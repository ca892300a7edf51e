//! Simulated Peer Network
//!
//! Every joined identity gets a [`MemoryReplica`] that serves the store call
//! surface from one shared [`GraphStore`] and a broadcast channel that
//! carries the signals addressed to it.

use crate::domain::{
    ops, ActionRef, ContentId, CreateOrDeleteLinksInput, CreateThingInput, DeleteThingInput,
    NodeId, PublicKey, RemoteCall, UpdateThingInput,
};
use crate::error::{Error, Result};
use crate::replica::store::GraphStore;
use crate::signal::{RemoteSignalInput, Signal, SignalKind, SignalOrigin};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

// =============================================================================
// Network
// =============================================================================

struct NetworkInner {
    store: Mutex<GraphStore>,
    peers: Mutex<HashMap<PublicKey, broadcast::Sender<Signal>>>,
    peer_anchor: String,
    channel_capacity: usize,
}

impl NetworkInner {
    fn sender(&self, agent: &PublicKey) -> broadcast::Sender<Signal> {
        self.peers
            .lock()
            .entry(agent.clone())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }

    fn deliver(&self, agent: &PublicKey, signal: Signal) {
        let sender = self.peers.lock().get(agent).cloned();
        match sender {
            Some(tx) => {
                // No receivers is fine, nobody is listening yet
                let _ = tx.send(signal);
            }
            None => trace!("Dropping signal for unknown agent {}", agent),
        }
    }
}

/// In-process peer network sharing one graph store
#[derive(Clone)]
pub struct SimNetwork {
    inner: Arc<NetworkInner>,
}

impl SimNetwork {
    /// Create a network whose peers register under `peer_anchor`
    pub fn new(peer_anchor: impl Into<String>) -> Self {
        Self::with_capacity(peer_anchor, 1024)
    }

    pub fn with_capacity(peer_anchor: impl Into<String>, channel_capacity: usize) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                store: Mutex::new(GraphStore::new()),
                peers: Mutex::new(HashMap::new()),
                peer_anchor: peer_anchor.into(),
                channel_capacity,
            }),
        }
    }

    /// Join as `agent`, linking the peer anchor to its identity node
    pub fn join(&self, agent: impl Into<PublicKey>) -> MemoryReplica {
        let agent = agent.into();
        self.inner.sender(&agent);
        self.inner.store.lock().ensure_link(
            NodeId::anchor(self.inner.peer_anchor.clone()),
            NodeId::Identity(agent.clone()),
        );
        debug!("Peer {} joined {}", agent, self.inner.peer_anchor);

        MemoryReplica {
            network: self.inner.clone(),
            agent,
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn peer_anchor(&self) -> &str {
        &self.inner.peer_anchor
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }
}

// =============================================================================
// Failure Injection
// =============================================================================

/// A failure to return from the next call of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The call never reaches the replica
    Transport,
    /// The replica rejects the call
    Reject(String),
}

// =============================================================================
// Replica
// =============================================================================

/// One peer's connection to the simulated network
pub struct MemoryReplica {
    network: Arc<NetworkInner>,
    agent: PublicKey,
    calls: Mutex<HashMap<String, u64>>,
    failures: Mutex<HashMap<String, InjectedFailure>>,
}

impl MemoryReplica {
    pub fn agent(&self) -> &PublicKey {
        &self.agent
    }

    /// Receiver for signals addressed to this peer
    pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
        self.network.sender(&self.agent).subscribe()
    }

    /// Number of calls made to `operation` so far
    pub fn call_count(&self, operation: &str) -> u64 {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.lock().values().sum()
    }

    /// Make the next call to `operation` fail
    pub fn fail_next(&self, operation: &str, failure: InjectedFailure) {
        self.failures.lock().insert(operation.to_string(), failure);
    }

    fn emit(&self, signals: Vec<SignalKind>) {
        for kind in signals {
            self.network.deliver(&self.agent, Signal::local(kind));
        }
    }

    fn remote_signal(&self, input: RemoteSignalInput) {
        if input.signal.origin != SignalOrigin::Remote {
            debug!("Ignoring non-remote signal in remote_signal");
            return;
        }
        for agent in input.agents.iter().filter(|a| **a != self.agent) {
            self.network.deliver(agent, input.signal.clone());
        }
    }

    fn dispatch(&self, name: &str, payload: Value) -> Result<Value> {
        let mut store = self.network.store.lock();
        let (result, signals) = match name {
            ops::GET_LATEST_THING => {
                let id: ContentId = decode(payload)?;
                (encode(store.get_latest_thing(&id))?, Vec::new())
            }
            ops::GET_LATEST_THINGS => {
                let ids: Vec<ContentId> = decode(payload)?;
                let things: Vec<_> = ids.iter().map(|id| store.get_latest_thing(id)).collect();
                (encode(things)?, Vec::new())
            }
            ops::GET_ALL_REVISIONS_FOR_THING => {
                let id: ContentId = decode(payload)?;
                (encode(store.get_all_revisions_for_thing(&id)?)?, Vec::new())
            }
            ops::GET_ALL_LINKED_NODE_IDS => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_all_linked_node_ids(&node))?, Vec::new())
            }
            ops::GET_ALL_LINKED_NODES => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_all_linked_nodes(&node))?, Vec::new())
            }
            ops::GET_LINKED_THING_IDS => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_linked_thing_ids(&node))?, Vec::new())
            }
            ops::GET_LINKED_THINGS => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_linked_things(&node))?, Vec::new())
            }
            ops::GET_LINKED_ANCHORS => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_linked_anchors(&node))?, Vec::new())
            }
            ops::GET_LINKED_AGENTS => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_linked_agents(&node))?, Vec::new())
            }
            ops::GET_NODE_AND_LINKED_NODE_IDS => {
                let node: NodeId = decode(payload)?;
                (encode(store.get_node_and_linked_node_ids(&node))?, Vec::new())
            }
            ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS => {
                let nodes: Vec<NodeId> = decode(payload)?;
                (encode(store.batch_get_node_and_linked_node_ids(&nodes))?, Vec::new())
            }
            ops::GET_RECORDS => {
                let refs: Vec<ActionRef> = decode(payload)?;
                (encode(store.get_records(&refs))?, Vec::new())
            }
            ops::CREATE_THING => {
                let input: CreateThingInput = decode(payload)?;
                let (thing, signals) = store.create_thing(&self.agent, input)?;
                (encode(thing)?, signals)
            }
            ops::UPDATE_THING => {
                let input: UpdateThingInput = decode(payload)?;
                let (thing, signals) = store.update_thing(input)?;
                (encode(thing)?, signals)
            }
            ops::DELETE_THING => {
                let input: DeleteThingInput = decode(payload)?;
                let ((), signals) = store.delete_thing(input)?;
                (Value::Null, signals)
            }
            ops::CREATE_LINKS_FROM_NODE => {
                let input: CreateOrDeleteLinksInput = decode(payload)?;
                let ((), signals) = store.create_links(input)?;
                (Value::Null, signals)
            }
            ops::DELETE_LINKS_FROM_NODE => {
                let input: CreateOrDeleteLinksInput = decode(payload)?;
                let ((), signals) = store.delete_links(input);
                (Value::Null, signals)
            }
            ops::REMOTE_SIGNAL => {
                let input: RemoteSignalInput = decode(payload)?;
                drop(store);
                self.remote_signal(input);
                return Ok(Value::Null);
            }
            other => return Err(Error::UnknownOperation(other.to_string())),
        };
        drop(store);

        self.emit(signals);
        Ok(result)
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}

fn encode<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl RemoteCall for MemoryReplica {
    async fn call(&self, name: &str, payload: Value) -> Result<Value> {
        *self.calls.lock().entry(name.to_string()).or_insert(0) += 1;

        let injected = self.failures.lock().remove(name);
        match injected {
            Some(InjectedFailure::Transport) => {
                return Err(Error::transport(name, "injected transport failure"))
            }
            Some(InjectedFailure::Reject(reason)) => return Err(Error::remote(name, reason)),
            None => {}
        }

        trace!(agent = %self.agent, operation = name, "Serving call");
        self.dispatch(name, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LinkInput;
    use crate::transport::GraphClient;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_join_registers_peer() {
        let network = SimNetwork::new("PEERS");
        let alice = GraphClient::new(Arc::new(network.join(b"alice".to_vec())));
        let _bob = network.join(b"bob".to_vec());

        let agents = alice.get_linked_agents(&NodeId::anchor("PEERS")).await.unwrap();
        let keys: Vec<_> = agents.into_iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![PublicKey::new(b"alice".to_vec()), PublicKey::new(b"bob".to_vec())]
        );
        assert_eq!(network.peer_count(), 2);
    }

    #[tokio::test]
    async fn test_writes_emit_local_signals_to_caller() {
        let network = SimNetwork::new("PEERS");
        let replica = Arc::new(network.join(b"alice".to_vec()));
        let mut signals = replica.subscribe_signals();
        let client = GraphClient::new(replica.clone());

        let thing = client
            .create_thing("hello", Some(vec![LinkInput::from(NodeId::anchor("X"))]))
            .await
            .unwrap();

        let first = signals.recv().await.unwrap();
        assert_eq!(first.origin, SignalOrigin::Local);
        assert_matches!(first.kind, SignalKind::ContentCreated { thing: t } if t == thing);
        let second = signals.recv().await.unwrap();
        assert_matches!(second.kind, SignalKind::LinksAdded { .. });
    }

    #[tokio::test]
    async fn test_remote_signal_only_forwards_remote_origin() {
        let network = SimNetwork::new("PEERS");
        let alice = Arc::new(network.join(b"alice".to_vec()));
        let bob = network.join(b"bob".to_vec());
        let mut bob_signals = bob.subscribe_signals();
        let client = GraphClient::new(alice.clone());

        let kind = SignalKind::ContentDeleted {
            id: ContentId::new(vec![1]),
        };
        client
            .remote_signal(Signal::local(kind.clone()), vec![bob.agent().clone()])
            .await
            .unwrap();
        assert!(bob_signals.try_recv().is_err());

        client
            .remote_signal(Signal::remote(kind.clone()), vec![bob.agent().clone()])
            .await
            .unwrap();
        assert_eq!(bob_signals.try_recv().unwrap(), Signal::remote(kind));
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let network = SimNetwork::new("PEERS");
        let replica = Arc::new(network.join(b"alice".to_vec()));
        let client = GraphClient::new(replica.clone());
        let anchor = NodeId::anchor("X");

        replica.fail_next(ops::GET_ALL_LINKED_NODE_IDS, InjectedFailure::Transport);
        assert!(client.get_all_linked_node_ids(&anchor).await.unwrap_err().is_transient());
        assert!(client.get_all_linked_node_ids(&anchor).await.is_ok());

        replica.fail_next(ops::GET_ALL_LINKED_NODE_IDS, InjectedFailure::Reject("nope".into()));
        assert!(client.get_all_linked_node_ids(&anchor).await.unwrap_err().is_rejection());

        assert_eq!(replica.call_count(ops::GET_ALL_LINKED_NODE_IDS), 3);
        assert_eq!(replica.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let network = SimNetwork::new("PEERS");
        let replica = network.join(b"alice".to_vec());
        let result = replica.call("launch_rockets", Value::Null).await;
        assert_matches!(result, Err(Error::UnknownOperation(op)) if op == "launch_rockets");
    }
}
