//! Graph Data Model
//!
//! Content items, link descriptors and the request/response payloads of the
//! replicated store's call surface.

use crate::domain::node::{ActionRef, ContentId, NodeId, NodeIdAndTag, PublicKey, Tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Content Item
// =============================================================================

/// A versioned content item ("Thing")
///
/// `id` and `created_at` are fixed at creation. Every revision after the
/// first carries `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thing {
    pub id: ContentId,
    pub content: String,
    pub creator: PublicKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Thing {
    pub fn node_id(&self) -> NodeId {
        NodeId::Content(self.id.clone())
    }
}

// =============================================================================
// Node Content
// =============================================================================

/// Resolved payload of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum NodeContent {
    Anchor(String),
    Content(Thing),
    Identity(PublicKey),
}

impl NodeContent {
    /// The node this content belongs to
    pub fn node_id(&self) -> NodeId {
        match self {
            NodeContent::Anchor(name) => NodeId::Anchor(name.clone()),
            NodeContent::Content(thing) => thing.node_id(),
            NodeContent::Identity(key) => NodeId::Identity(key.clone()),
        }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            NodeContent::Content(thing) => Some(thing),
            _ => None,
        }
    }
}

/// Content of a node plus the targets of its outgoing links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAndLinkedIds {
    pub content: NodeContent,
    pub linked_node_ids: Vec<NodeIdAndTag>,
}

/// Per-node result of a batched fetch, aligned with the request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeLookup {
    Found(NodeAndLinkedIds),
    NotFound,
    Rejected { reason: String },
}

impl From<Option<NodeAndLinkedIds>> for NodeLookup {
    fn from(value: Option<NodeAndLinkedIds>) -> Self {
        match value {
            Some(found) => NodeLookup::Found(found),
            None => NodeLookup::NotFound,
        }
    }
}

// =============================================================================
// Links
// =============================================================================

/// Direction of a link relative to the subject node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LinkDirection {
    /// other -> subject
    From,
    /// subject -> other
    To,
    /// both, each referencing the other
    Bidirectional,
}

/// Creation/deletion request for links between a subject and one other node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInput {
    pub direction: LinkDirection,
    pub node_id: NodeId,
    pub tag: Option<Tag>,
}

impl LinkInput {
    pub fn from(other: NodeId) -> Self {
        Self {
            direction: LinkDirection::From,
            node_id: other,
            tag: None,
        }
    }

    pub fn to(other: NodeId) -> Self {
        Self {
            direction: LinkDirection::To,
            node_id: other,
            tag: None,
        }
    }

    pub fn bidirectional(other: NodeId, tag: Option<Tag>) -> Self {
        Self {
            direction: LinkDirection::Bidirectional,
            node_id: other,
            tag,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Metadata the store keeps in every link's tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTagContent {
    /// Caller supplied tag
    pub tag: Option<Tag>,
    /// Creation ref of the reciprocal link of a bidirectional pair
    pub backlink: Option<ActionRef>,
    /// Node the link points at
    pub target_node_id: NodeId,
    /// Set iff the target is a content node
    pub thing_created_at: Option<DateTime<Utc>>,
    /// Set iff the target is a content node
    pub thing_created_by: Option<PublicKey>,
}

/// A link as reported in notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink {
    pub src: NodeId,
    pub dst: NodeId,
    pub tag: Option<Tag>,
    pub create_ref: ActionRef,
}

impl NodeLink {
    pub fn target(&self) -> NodeIdAndTag {
        NodeIdAndTag::new(self.dst.clone(), self.tag.clone())
    }
}

// =============================================================================
// Write Inputs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateThingInput {
    pub content: String,
    pub links: Option<Vec<LinkInput>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateThingInput {
    pub thing_id: ContentId,
    pub updated_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteThingInput {
    pub thing_id: ContentId,
    /// Delete the reciprocal of every bidirectional link created from the thing
    pub delete_backlinks: bool,
    /// Delete links from the creator's identity node to the thing
    pub delete_links_from_creator: bool,
    pub delete_links: Option<Vec<LinkInput>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrDeleteLinksInput {
    pub src: NodeId,
    pub links: Vec<LinkInput>,
}
