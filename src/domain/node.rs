//! Node Identity
//!
//! Value types for the three kinds of addressable graph nodes, link targets
//! and tags. Equality is structural: same variant and same name/bytes. Tags
//! compare byte-wise and an absent tag never equals a present one, including
//! a present zero-length tag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tag bytes attached to a link
pub type Tag = Vec<u8>;

// =============================================================================
// Binary Identifiers
// =============================================================================

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Vec<u8>);

        impl $name {
            pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0))
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl From<&[u8]> for $name {
            fn from(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }
        }
    };
}

byte_id!(
    /// Immutable identifier of a content item, assigned at creation
    ContentId
);

byte_id!(
    /// Public key of an identity (a peer/agent)
    PublicKey
);

byte_id!(
    /// Identifier of a single write (creation, revision or link) in the store
    ActionRef
);

// =============================================================================
// Node ID
// =============================================================================

/// Kind of a node, used to pick the registry collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Anchor,
    Content,
    Identity,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Anchor => write!(f, "anchor"),
            NodeKind::Content => write!(f, "content"),
            NodeKind::Identity => write!(f, "identity"),
        }
    }
}

/// Identity of a node in the graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum NodeId {
    /// A well-known, caller-chosen label
    Anchor(String),
    /// A content item, identified by its creation id
    Content(ContentId),
    /// An identity key
    Identity(PublicKey),
}

impl NodeId {
    pub fn anchor(name: impl Into<String>) -> Self {
        NodeId::Anchor(name.into())
    }

    pub fn content(id: impl Into<ContentId>) -> Self {
        NodeId::Content(id.into())
    }

    pub fn identity(key: impl Into<PublicKey>) -> Self {
        NodeId::Identity(key.into())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeId::Anchor(_) => NodeKind::Anchor,
            NodeId::Content(_) => NodeKind::Content,
            NodeId::Identity(_) => NodeKind::Identity,
        }
    }

    pub fn as_content(&self) -> Option<&ContentId> {
        match self {
            NodeId::Content(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_identity(&self) -> Option<&PublicKey> {
        match self {
            NodeId::Identity(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_anchor(&self) -> Option<&str> {
        match self {
            NodeId::Anchor(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Anchor(name) => write!(f, "anchor:{}", name),
            NodeId::Content(id) => write!(f, "content:{}", id),
            NodeId::Identity(key) => write!(f, "identity:{}", key),
        }
    }
}

// =============================================================================
// Link Target
// =============================================================================

/// Destination of a link together with its tag
///
/// This is the unit stored in a cache entry's linked set. Two targets are
/// equal iff the nodes are equal and the tags are byte-equal (absent only
/// equals absent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdAndTag {
    pub node_id: NodeId,
    pub tag: Option<Tag>,
}

impl NodeIdAndTag {
    pub fn new(node_id: NodeId, tag: Option<Tag>) -> Self {
        Self { node_id, tag }
    }

    pub fn untagged(node_id: NodeId) -> Self {
        Self { node_id, tag: None }
    }
}

impl fmt::Display for NodeIdAndTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}#{}", self.node_id, hex::encode(tag)),
            None => write!(f, "{}", self.node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_equality_is_per_variant() {
        let anchor = NodeId::anchor("X");
        let content = NodeId::content(b"X".to_vec());
        let identity = NodeId::identity(b"X".to_vec());

        // Reflexive
        assert_eq!(anchor, anchor.clone());
        assert_eq!(content, content.clone());

        // Same bytes, different variant
        assert_ne!(anchor, content);
        assert_ne!(content, anchor);
        assert_ne!(content, identity);
        assert_eq!(anchor.kind(), NodeKind::Anchor);
    }

    #[test]
    fn test_node_id_equality_is_symmetric() {
        let a = NodeId::content(vec![1, 2, 3]);
        let b = NodeId::content(vec![1, 2, 3]);
        let c = NodeId::content(vec![1, 2, 4]);
        assert_eq!(a == b, b == a);
        assert_eq!(a == c, c == a);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tag_absent_differs_from_empty() {
        let node = NodeId::anchor("posts");
        let absent = NodeIdAndTag::untagged(node.clone());
        let empty = NodeIdAndTag::new(node.clone(), Some(Vec::new()));
        let tagged = NodeIdAndTag::new(node.clone(), Some(vec![0]));

        assert_ne!(absent, empty);
        assert_ne!(empty, tagged);
        assert_eq!(empty, NodeIdAndTag::new(node, Some(Vec::new())));
    }

    #[test]
    fn test_node_id_serde_shape() {
        let json = serde_json::to_value(NodeId::anchor("ALL")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "Anchor", "id": "ALL" }));

        let back: NodeId = serde_json::from_value(json).unwrap();
        assert_eq!(back, NodeId::anchor("ALL"));
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId::anchor("a").to_string(), "anchor:a");
        assert_eq!(NodeId::content(vec![0xab, 0x01]).to_string(), "content:ab01");
        assert_eq!(NodeId::identity(vec![0xff]).kind(), NodeKind::Identity);
        assert_eq!(ActionRef::new(vec![0x00, 0x0a, 0xff]).to_string(), "000aff");

        let tagged = NodeIdAndTag::new(NodeId::anchor("a"), Some(vec![0xde, 0xad]));
        assert_eq!(tagged.to_string(), "anchor:a#dead");
        let empty = NodeIdAndTag::new(NodeId::anchor("a"), Some(Vec::new()));
        assert_eq!(empty.to_string(), "anchor:a#");
    }
}
