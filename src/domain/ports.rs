//! Domain Ports - the boundary to the replicated store
//!
//! The engine never talks to a replica directly. It goes through
//! [`RemoteCall`], an opaque "perform one named call" primitive. Adapters
//! (a websocket client, the in-process reference replica) implement it.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Operation Names
// =============================================================================

/// Named operations of the store's call surface
pub mod ops {
    pub const GET_LATEST_THING: &str = "get_latest_thing";
    pub const GET_LATEST_THINGS: &str = "get_latest_things";
    pub const GET_ALL_REVISIONS_FOR_THING: &str = "get_all_revisions_for_thing";
    pub const GET_ALL_LINKED_NODE_IDS: &str = "get_all_linked_node_ids";
    pub const GET_ALL_LINKED_NODES: &str = "get_all_linked_nodes";
    pub const GET_LINKED_THING_IDS: &str = "get_linked_thing_ids";
    pub const GET_LINKED_THINGS: &str = "get_linked_things";
    pub const GET_LINKED_ANCHORS: &str = "get_linked_anchors";
    pub const GET_LINKED_AGENTS: &str = "get_linked_agents";
    pub const GET_NODE_AND_LINKED_NODE_IDS: &str = "get_node_and_linked_node_ids";
    pub const BATCH_GET_NODE_AND_LINKED_NODE_IDS: &str = "batch_get_node_and_linked_node_ids";
    pub const GET_RECORDS: &str = "get_records";
    pub const CREATE_THING: &str = "create_thing";
    pub const UPDATE_THING: &str = "update_thing";
    pub const DELETE_THING: &str = "delete_thing";
    pub const CREATE_LINKS_FROM_NODE: &str = "create_links_from_node";
    pub const DELETE_LINKS_FROM_NODE: &str = "delete_links_from_node";
    pub const REMOTE_SIGNAL: &str = "remote_signal";
}

// =============================================================================
// RemoteCall Trait (Port)
// =============================================================================

/// A single named call against the replicated store
///
/// Implementations return the decoded result, [`Error::Transport`] when the
/// call could not be delivered, or [`Error::Remote`] when it executed and was
/// rejected. They must not retry.
///
/// [`Error::Transport`]: crate::error::Error::Transport
/// [`Error::Remote`]: crate::error::Error::Remote
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(&self, name: &str, payload: Value) -> Result<Value>;
}

/// Type alias for Arc'd RemoteCall
pub type RemoteCallRef = Arc<dyn RemoteCall>;
