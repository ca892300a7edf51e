//! Graph Client
//!
//! Typed facade over [`RemoteCall`]. Each method encodes its input with
//! serde_json, performs exactly one named call and decodes the result. The
//! facade never retries.

use crate::domain::{
    ops, ActionRef, ContentId, CreateOrDeleteLinksInput, CreateThingInput, DeleteThingInput,
    LinkInput, LinkTagContent, NodeAndLinkedIds, NodeContent, NodeId, NodeIdAndTag, NodeLookup,
    PublicKey, RemoteCall, RemoteCallRef, Tag, Thing, UpdateThingInput,
};
use crate::error::{Error, Result};
use crate::signal::{RemoteSignalInput, Signal};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Typed client for the replicated store's call surface
#[derive(Clone)]
pub struct GraphClient {
    remote: RemoteCallRef,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient").finish_non_exhaustive()
    }
}

impl GraphClient {
    pub fn new(remote: RemoteCallRef) -> Self {
        Self { remote }
    }

    pub fn from_remote<R: RemoteCall + 'static>(remote: R) -> Self {
        Self::new(Arc::new(remote))
    }

    async fn invoke<I, O>(&self, operation: &'static str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_value(input)?;
        debug!(operation, "Remote call");

        let value = self.remote.call(operation, payload).await.map_err(|e| {
            warn!(operation, error = %e, "Remote call failed");
            e
        })?;

        serde_json::from_value(value).map_err(|e| Error::MalformedResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    // =========================================================================
    // Content Reads
    // =========================================================================

    pub async fn get_latest_thing(&self, id: &ContentId) -> Result<Option<Thing>> {
        self.invoke(ops::GET_LATEST_THING, id).await
    }

    pub async fn get_latest_things(&self, ids: &[ContentId]) -> Result<Vec<Option<Thing>>> {
        self.invoke(ops::GET_LATEST_THINGS, ids).await
    }

    /// Every revision of a thing, original first
    pub async fn get_all_revisions_for_thing(&self, id: &ContentId) -> Result<Vec<Thing>> {
        self.invoke(ops::GET_ALL_REVISIONS_FOR_THING, id).await
    }

    // =========================================================================
    // Link Reads
    // =========================================================================

    pub async fn get_all_linked_node_ids(&self, node: &NodeId) -> Result<Vec<NodeIdAndTag>> {
        self.invoke(ops::GET_ALL_LINKED_NODE_IDS, node).await
    }

    pub async fn get_all_linked_nodes(&self, node: &NodeId) -> Result<Vec<NodeContent>> {
        self.invoke(ops::GET_ALL_LINKED_NODES, node).await
    }

    pub async fn get_linked_thing_ids(
        &self,
        node: &NodeId,
    ) -> Result<Vec<(ContentId, LinkTagContent)>> {
        self.invoke(ops::GET_LINKED_THING_IDS, node).await
    }

    pub async fn get_linked_things(&self, node: &NodeId) -> Result<Vec<(Thing, Option<Tag>)>> {
        self.invoke(ops::GET_LINKED_THINGS, node).await
    }

    pub async fn get_linked_anchors(&self, node: &NodeId) -> Result<Vec<(String, Option<Tag>)>> {
        self.invoke(ops::GET_LINKED_ANCHORS, node).await
    }

    pub async fn get_linked_agents(&self, node: &NodeId) -> Result<Vec<(PublicKey, Option<Tag>)>> {
        self.invoke(ops::GET_LINKED_AGENTS, node).await
    }

    // =========================================================================
    // Node Reads
    // =========================================================================

    pub async fn get_node_and_linked_node_ids(
        &self,
        node: &NodeId,
    ) -> Result<Option<NodeAndLinkedIds>> {
        self.invoke(ops::GET_NODE_AND_LINKED_NODE_IDS, node).await
    }

    /// One call for many nodes. The response is checked to be aligned with
    /// the request.
    pub async fn batch_get_node_and_linked_node_ids(
        &self,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeLookup>> {
        let lookups: Vec<NodeLookup> = self
            .invoke(ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS, nodes)
            .await?;

        if lookups.len() != nodes.len() {
            return Err(Error::MalformedResponse {
                operation: ops::BATCH_GET_NODE_AND_LINKED_NODE_IDS.to_string(),
                reason: format!("expected {} results, got {}", nodes.len(), lookups.len()),
            });
        }

        Ok(lookups)
    }

    /// Whether each write is visible on the replica yet
    pub async fn get_records(&self, refs: &[ActionRef]) -> Result<Vec<bool>> {
        self.invoke(ops::GET_RECORDS, refs).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn create_thing(&self, content: &str, links: Option<Vec<LinkInput>>) -> Result<Thing> {
        let input = CreateThingInput {
            content: content.to_string(),
            links,
        };
        self.invoke(ops::CREATE_THING, &input).await
    }

    pub async fn update_thing(&self, thing_id: &ContentId, updated_content: &str) -> Result<Thing> {
        let input = UpdateThingInput {
            thing_id: thing_id.clone(),
            updated_content: updated_content.to_string(),
        };
        self.invoke(ops::UPDATE_THING, &input).await
    }

    pub async fn delete_thing(&self, input: DeleteThingInput) -> Result<()> {
        self.invoke(ops::DELETE_THING, &input).await
    }

    pub async fn create_links(&self, src: &NodeId, links: Vec<LinkInput>) -> Result<()> {
        let input = CreateOrDeleteLinksInput {
            src: src.clone(),
            links,
        };
        self.invoke(ops::CREATE_LINKS_FROM_NODE, &input).await
    }

    pub async fn delete_links(&self, src: &NodeId, links: Vec<LinkInput>) -> Result<()> {
        let input = CreateOrDeleteLinksInput {
            src: src.clone(),
            links,
        };
        self.invoke(ops::DELETE_LINKS_FROM_NODE, &input).await
    }

    /// Forward a signal to the given peers
    pub async fn remote_signal(&self, signal: Signal, agents: Vec<PublicKey>) -> Result<()> {
        let input = RemoteSignalInput { signal, agents };
        self.invoke(ops::REMOTE_SIGNAL, &input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Replies with a canned value and records each call
    struct Canned {
        reply: Value,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl Canned {
        fn new(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RemoteCall for Canned {
        async fn call(&self, name: &str, payload: Value) -> Result<Value> {
            self.calls.lock().push((name.to_string(), payload));
            Ok(self.reply.clone())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl RemoteCall for Unreachable {
        async fn call(&self, name: &str, _payload: Value) -> Result<Value> {
            Err(Error::transport(name, "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_uses_wire_operation_names() {
        let remote = Canned::new(Value::Null);
        let client = GraphClient::new(remote.clone());

        client
            .create_links(&NodeId::anchor("a"), vec![LinkInput::to(NodeId::anchor("b"))])
            .await
            .unwrap();
        client.delete_links(&NodeId::anchor("a"), vec![]).await.unwrap();

        let calls = remote.calls.lock();
        assert_eq!(calls[0].0, "create_links_from_node");
        assert_eq!(calls[0].1["src"], json!({ "type": "Anchor", "id": "a" }));
        assert_eq!(calls[1].0, "delete_links_from_node");
    }

    #[tokio::test]
    async fn test_not_found_is_a_value() {
        let client = GraphClient::new(Canned::new(Value::Null));
        let thing = client.get_latest_thing(&ContentId::new(vec![1])).await.unwrap();
        assert!(thing.is_none());
    }

    #[tokio::test]
    async fn test_batch_length_mismatch_is_malformed() {
        let client = GraphClient::new(Canned::new(json!([{ "status": "not_found" }])));
        let result = client
            .batch_get_node_and_linked_node_ids(&[NodeId::anchor("a"), NodeId::anchor("b")])
            .await;
        assert_matches!(result, Err(Error::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_reply_is_malformed() {
        let client = GraphClient::new(Canned::new(json!("not a list")));
        let result = client.get_records(&[ActionRef::new(vec![1])]).await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert_matches!(err, Error::MalformedResponse { operation, .. } if operation == "get_records");
    }

    #[test]
    fn test_record_visibility_decodes() {
        let remote = Canned::new(json!([true, false]));
        let client = GraphClient::new(remote.clone());

        let refs = [ActionRef::new(vec![1]), ActionRef::new(vec![2])];
        let visible = tokio_test::assert_ok!(tokio_test::block_on(client.get_records(&refs)));

        assert_eq!(visible, vec![true, false]);
        assert_eq!(remote.calls.lock()[0].1, json!([[1], [2]]));
    }

    #[tokio::test]
    async fn test_transport_error_passes_through() {
        let client = GraphClient::from_remote(Unreachable);
        let err = client
            .get_all_linked_node_ids(&NodeId::anchor("a"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
