//! Signal Events
//!
//! Push notifications a replica emits right after it performs a write.

use crate::domain::{ActionRef, ContentId, NodeLink, PublicKey, Thing};
use serde::{Deserialize, Serialize};

/// Where a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalOrigin {
    /// Emitted by the replica this engine is connected to
    Local,
    /// Forwarded from another peer
    Remote,
}

impl std::fmt::Display for SignalOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalOrigin::Local => write!(f, "local"),
            SignalOrigin::Remote => write!(f, "remote"),
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalKind {
    ContentCreated {
        thing: Thing,
    },

    ContentUpdated {
        thing: Thing,
        /// Ref of the new revision
        update_ref: ActionRef,
        /// Ref of the link from the original to the revision
        update_link_ref: ActionRef,
    },

    ContentDeleted {
        id: ContentId,
    },

    LinksAdded {
        links: Vec<NodeLink>,
    },

    LinksRemoved {
        links: Vec<NodeLink>,
    },
}

impl SignalKind {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::ContentCreated { .. } => "content_created",
            SignalKind::ContentUpdated { .. } => "content_updated",
            SignalKind::ContentDeleted { .. } => "content_deleted",
            SignalKind::LinksAdded { .. } => "links_added",
            SignalKind::LinksRemoved { .. } => "links_removed",
        }
    }

    /// Writes whose visibility should be confirmed after applying this signal
    pub fn confirmation_refs(&self) -> Vec<ActionRef> {
        match self {
            SignalKind::ContentCreated { thing } => vec![ActionRef::new(thing.id.as_bytes())],
            SignalKind::ContentUpdated {
                update_ref,
                update_link_ref,
                ..
            } => vec![update_ref.clone(), update_link_ref.clone()],
            SignalKind::LinksAdded { links } => {
                links.iter().map(|l| l.create_ref.clone()).collect()
            }
            SignalKind::ContentDeleted { .. } | SignalKind::LinksRemoved { .. } => Vec::new(),
        }
    }
}

/// A notification together with its origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub origin: SignalOrigin,
    pub kind: SignalKind,
}

impl Signal {
    pub fn local(kind: SignalKind) -> Self {
        Self {
            origin: SignalOrigin::Local,
            kind,
        }
    }

    pub fn remote(kind: SignalKind) -> Self {
        Self {
            origin: SignalOrigin::Remote,
            kind,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == SignalOrigin::Local
    }

    /// Copy of this signal as peers should receive it
    pub fn to_remote(&self) -> Self {
        Self::remote(self.kind.clone())
    }
}

/// Payload of the `remote_signal` operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignalInput {
    pub signal: Signal,
    pub agents: Vec<PublicKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeId;
    use chrono::Utc;

    fn thing() -> Thing {
        Thing {
            id: ContentId::new(vec![1, 2]),
            content: "hello".into(),
            creator: PublicKey::new(vec![9]),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_confirmation_refs() {
        let created = SignalKind::ContentCreated { thing: thing() };
        assert_eq!(created.confirmation_refs(), vec![ActionRef::new(vec![1, 2])]);

        let added = SignalKind::LinksAdded {
            links: vec![NodeLink {
                src: NodeId::anchor("a"),
                dst: NodeId::anchor("b"),
                tag: None,
                create_ref: ActionRef::new(vec![5]),
            }],
        };
        assert_eq!(added.confirmation_refs(), vec![ActionRef::new(vec![5])]);

        let deleted = SignalKind::ContentDeleted {
            id: ContentId::new(vec![1]),
        };
        assert!(deleted.confirmation_refs().is_empty());
    }

    #[test]
    fn test_to_remote_keeps_kind() {
        let signal = Signal::local(SignalKind::ContentCreated { thing: thing() });
        assert!(signal.is_local());

        let forwarded = signal.to_remote();
        assert_eq!(forwarded.origin, SignalOrigin::Remote);
        assert_eq!(forwarded.kind, signal.kind);
        assert_eq!(forwarded.kind.name(), "content_created");
    }

    #[test]
    fn test_wire_shape() {
        let signal = Signal::remote(SignalKind::ContentDeleted {
            id: ContentId::new(vec![3]),
        });
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["origin"], "Remote");
        assert_eq!(json["kind"]["type"], "ContentDeleted");
    }
}
