//! In-Memory Graph Store
//!
//! The write/read logic behind the reference replica. Plain synchronous data
//! structure, the caller serializes access. Write operations return the
//! signals they produce alongside their result.

use crate::domain::{
    ActionRef, ContentId, CreateOrDeleteLinksInput, CreateThingInput, DeleteThingInput,
    LinkDirection, LinkInput, LinkTagContent, NodeAndLinkedIds, NodeContent, NodeId,
    NodeIdAndTag, NodeLink, NodeLookup, PublicKey, Tag, Thing, UpdateThingInput,
};
use crate::domain::ops;
use crate::error::{Error, Result};
use crate::signal::SignalKind;
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Result of a write plus the signals it emits
pub type WriteOutcome<T> = (T, Vec<SignalKind>);

// =============================================================================
// Stored Link
// =============================================================================

#[derive(Debug, Clone)]
struct StoredLink {
    src: NodeId,
    create_ref: ActionRef,
    meta: LinkTagContent,
}

impl StoredLink {
    fn to_node_link(&self) -> NodeLink {
        NodeLink {
            src: self.src.clone(),
            dst: self.meta.target_node_id.clone(),
            tag: self.meta.tag.clone(),
            create_ref: self.create_ref.clone(),
        }
    }

    fn matches(&self, src: &NodeId, dst: &NodeId, tag: &Option<Tag>) -> bool {
        &self.src == src && &self.meta.target_node_id == dst && &self.meta.tag == tag
    }
}

/// A link about to be written, before refs are assigned
struct PendingLink {
    src: NodeId,
    dst: NodeId,
    tag: Option<Tag>,
    /// Index of the reciprocal link within the same batch
    reciprocal: Option<usize>,
}

// =============================================================================
// Graph Store
// =============================================================================

/// Things, their revisions, and the links between nodes
#[derive(Debug, Default)]
pub struct GraphStore {
    /// Revisions per thing, original first
    things: HashMap<ContentId, Vec<Thing>>,
    /// Links in creation order
    links: Vec<StoredLink>,
    /// Every write the store has seen
    records: HashSet<ActionRef>,
    next_seq: u64,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ref(&mut self) -> ActionRef {
        self.next_seq += 1;
        let action = ActionRef::new(self.next_seq.to_be_bytes().to_vec());
        self.records.insert(action.clone());
        action
    }

    fn latest(&self, id: &ContentId) -> Option<&Thing> {
        self.things.get(id).and_then(|revisions| revisions.last())
    }

    fn original(&self, id: &ContentId) -> Option<&Thing> {
        self.things.get(id).and_then(|revisions| revisions.first())
    }

    fn node_exists(&self, node: &NodeId) -> bool {
        match node {
            NodeId::Content(id) => self.things.contains_key(id),
            NodeId::Anchor(_) | NodeId::Identity(_) => true,
        }
    }

    fn outgoing(&self, node: &NodeId) -> impl Iterator<Item = &StoredLink> {
        let node = node.clone();
        self.links.iter().filter(move |link| link.src == node)
    }

    // =========================================================================
    // Link Writes
    // =========================================================================

    fn plan_links(subject: &NodeId, inputs: &[LinkInput]) -> Vec<PendingLink> {
        let mut planned = Vec::new();
        for input in inputs {
            match input.direction {
                LinkDirection::To => planned.push(PendingLink {
                    src: subject.clone(),
                    dst: input.node_id.clone(),
                    tag: input.tag.clone(),
                    reciprocal: None,
                }),
                LinkDirection::From => planned.push(PendingLink {
                    src: input.node_id.clone(),
                    dst: subject.clone(),
                    tag: input.tag.clone(),
                    reciprocal: None,
                }),
                LinkDirection::Bidirectional => {
                    let forward = planned.len();
                    planned.push(PendingLink {
                        src: subject.clone(),
                        dst: input.node_id.clone(),
                        tag: input.tag.clone(),
                        reciprocal: Some(forward + 1),
                    });
                    planned.push(PendingLink {
                        src: input.node_id.clone(),
                        dst: subject.clone(),
                        tag: input.tag.clone(),
                        reciprocal: Some(forward),
                    });
                }
            }
        }
        planned
    }

    fn check_links(&self, operation: &str, planned: &[PendingLink]) -> Result<()> {
        for link in planned {
            for node in [&link.src, &link.dst] {
                if !self.node_exists(node) {
                    return Err(Error::remote(
                        operation,
                        format!("linked thing not found: {}", node),
                    ));
                }
            }
        }
        Ok(())
    }

    fn write_links(&mut self, planned: Vec<PendingLink>) -> Vec<NodeLink> {
        let refs: Vec<ActionRef> = planned.iter().map(|_| self.next_ref()).collect();
        let mut written = Vec::with_capacity(planned.len());

        for (i, link) in planned.into_iter().enumerate() {
            let (thing_created_at, thing_created_by) = match &link.dst {
                NodeId::Content(id) => match self.original(id) {
                    Some(thing) => (Some(thing.created_at), Some(thing.creator.clone())),
                    None => (None, None),
                },
                _ => (None, None),
            };

            let stored = StoredLink {
                src: link.src,
                create_ref: refs[i].clone(),
                meta: LinkTagContent {
                    tag: link.tag,
                    backlink: link.reciprocal.map(|j| refs[j].clone()),
                    target_node_id: link.dst,
                    thing_created_at,
                    thing_created_by,
                },
            };
            written.push(stored.to_node_link());
            self.links.push(stored);
        }

        written
    }

    /// Remove links matching the predicate, returning them
    fn remove_links<F>(&mut self, mut predicate: F) -> Vec<NodeLink>
    where
        F: FnMut(&StoredLink) -> bool,
    {
        let mut removed = Vec::new();
        self.links.retain(|link| {
            if predicate(link) {
                removed.push(link.to_node_link());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn create_links(&mut self, input: CreateOrDeleteLinksInput) -> Result<WriteOutcome<()>> {
        let planned = Self::plan_links(&input.src, &input.links);
        self.check_links(ops::CREATE_LINKS_FROM_NODE, &planned)?;

        let links = self.write_links(planned);
        let signals = if links.is_empty() {
            Vec::new()
        } else {
            vec![SignalKind::LinksAdded { links }]
        };
        Ok(((), signals))
    }

    /// Delete links matched by (other node, tag). To and Bidirectional remove
    /// src -> other together with its backlink; From removes other -> src.
    pub fn delete_links(&mut self, input: CreateOrDeleteLinksInput) -> WriteOutcome<()> {
        let mut removed = Vec::new();

        for link in &input.links {
            match link.direction {
                LinkDirection::To | LinkDirection::Bidirectional => {
                    let backlinks: HashSet<ActionRef> = self
                        .links
                        .iter()
                        .filter(|l| l.matches(&input.src, &link.node_id, &link.tag))
                        .filter_map(|l| l.meta.backlink.clone())
                        .collect();
                    removed.extend(self.remove_links(|l| {
                        l.matches(&input.src, &link.node_id, &link.tag)
                            || backlinks.contains(&l.create_ref)
                    }));
                }
                LinkDirection::From => {
                    removed.extend(
                        self.remove_links(|l| l.matches(&link.node_id, &input.src, &link.tag)),
                    );
                }
            }
        }

        let signals = if removed.is_empty() {
            Vec::new()
        } else {
            vec![SignalKind::LinksRemoved { links: removed }]
        };
        ((), signals)
    }

    /// Add `src -> dst` unless an equal link already exists
    pub fn ensure_link(&mut self, src: NodeId, dst: NodeId) {
        if self.links.iter().any(|l| l.matches(&src, &dst, &None)) {
            return;
        }
        self.write_links(vec![PendingLink {
            src,
            dst,
            tag: None,
            reciprocal: None,
        }]);
    }

    // =========================================================================
    // Thing Writes
    // =========================================================================

    pub fn create_thing(
        &mut self,
        creator: &PublicKey,
        input: CreateThingInput,
    ) -> Result<WriteOutcome<Thing>> {
        let link_inputs = input.links.unwrap_or_default();

        // Targets are checked before anything is written
        for link in &link_inputs {
            if !self.node_exists(&link.node_id) {
                return Err(Error::remote(
                    ops::CREATE_THING,
                    format!("linked thing not found: {}", link.node_id),
                ));
            }
        }

        let create_ref = self.next_ref();
        let thing = Thing {
            id: ContentId::new(create_ref.as_bytes()),
            content: input.content,
            creator: creator.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.things.insert(thing.id.clone(), vec![thing.clone()]);

        let mut signals = vec![SignalKind::ContentCreated {
            thing: thing.clone(),
        }];

        let planned = Self::plan_links(&thing.node_id(), &link_inputs);
        let links = self.write_links(planned);
        if !links.is_empty() {
            signals.push(SignalKind::LinksAdded { links });
        }

        Ok((thing, signals))
    }

    pub fn update_thing(&mut self, input: UpdateThingInput) -> Result<WriteOutcome<Thing>> {
        let Some(latest) = self.latest(&input.thing_id).cloned() else {
            return Err(Error::remote(
                ops::UPDATE_THING,
                format!("Thing not found: {}", input.thing_id),
            ));
        };

        let update_ref = self.next_ref();
        let update_link_ref = self.next_ref();
        let revision = Thing {
            content: input.updated_content,
            updated_at: Some(Utc::now()),
            ..latest
        };

        if let Some(revisions) = self.things.get_mut(&input.thing_id) {
            revisions.push(revision.clone());
        }

        let signals = vec![SignalKind::ContentUpdated {
            thing: revision.clone(),
            update_ref,
            update_link_ref,
        }];
        Ok((revision, signals))
    }

    pub fn delete_thing(&mut self, input: DeleteThingInput) -> Result<WriteOutcome<()>> {
        let Some(original) = self.original(&input.thing_id).cloned() else {
            return Err(Error::remote(
                ops::DELETE_THING,
                "Did not find Thing to delete.",
            ));
        };
        self.things.remove(&input.thing_id);

        let node = original.node_id();
        let mut removed = Vec::new();

        if input.delete_backlinks {
            let backlinks: HashSet<ActionRef> = self
                .outgoing(&node)
                .filter_map(|l| l.meta.backlink.clone())
                .collect();
            removed.extend(self.remove_links(|l| backlinks.contains(&l.create_ref)));
        }

        if input.delete_links_from_creator {
            let creator = NodeId::Identity(original.creator.clone());
            removed.extend(self.remove_links(|l| l.src == creator && l.meta.target_node_id == node));
        }

        for link in input.delete_links.unwrap_or_default() {
            let (src, dst) = match link.direction {
                LinkDirection::To => (node.clone(), link.node_id.clone()),
                LinkDirection::From | LinkDirection::Bidirectional => {
                    (link.node_id.clone(), node.clone())
                }
            };
            removed.extend(self.remove_links(|l| l.matches(&src, &dst, &link.tag)));
        }

        let mut signals = vec![SignalKind::ContentDeleted {
            id: original.id.clone(),
        }];
        if !removed.is_empty() {
            signals.push(SignalKind::LinksRemoved { links: removed });
        }
        Ok(((), signals))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_latest_thing(&self, id: &ContentId) -> Option<Thing> {
        self.latest(id).cloned()
    }

    pub fn get_all_revisions_for_thing(&self, id: &ContentId) -> Result<Vec<Thing>> {
        self.things.get(id).cloned().ok_or_else(|| {
            Error::remote(
                ops::GET_ALL_REVISIONS_FOR_THING,
                format!("Thing not found: {}", id),
            )
        })
    }

    pub fn get_all_linked_node_ids(&self, node: &NodeId) -> Vec<NodeIdAndTag> {
        self.outgoing(node)
            .map(|l| NodeIdAndTag::new(l.meta.target_node_id.clone(), l.meta.tag.clone()))
            .collect()
    }

    pub fn node_content(&self, node: &NodeId) -> Option<NodeContent> {
        match node {
            NodeId::Anchor(name) => Some(NodeContent::Anchor(name.clone())),
            NodeId::Identity(key) => Some(NodeContent::Identity(key.clone())),
            NodeId::Content(id) => self.latest(id).cloned().map(NodeContent::Content),
        }
    }

    /// Content of every linked node. Links to deleted things are skipped.
    pub fn get_all_linked_nodes(&self, node: &NodeId) -> Vec<NodeContent> {
        self.outgoing(node)
            .filter_map(|l| self.node_content(&l.meta.target_node_id))
            .collect()
    }

    pub fn get_linked_thing_ids(&self, node: &NodeId) -> Vec<(ContentId, LinkTagContent)> {
        self.outgoing(node)
            .filter_map(|l| {
                l.meta
                    .target_node_id
                    .as_content()
                    .map(|id| (id.clone(), l.meta.clone()))
            })
            .collect()
    }

    pub fn get_linked_things(&self, node: &NodeId) -> Vec<(Thing, Option<Tag>)> {
        self.outgoing(node)
            .filter_map(|l| {
                let id = l.meta.target_node_id.as_content()?;
                self.latest(id).map(|thing| (thing.clone(), l.meta.tag.clone()))
            })
            .collect()
    }

    pub fn get_linked_anchors(&self, node: &NodeId) -> Vec<(String, Option<Tag>)> {
        self.outgoing(node)
            .filter_map(|l| {
                l.meta
                    .target_node_id
                    .as_anchor()
                    .map(|name| (name.to_string(), l.meta.tag.clone()))
            })
            .collect()
    }

    pub fn get_linked_agents(&self, node: &NodeId) -> Vec<(PublicKey, Option<Tag>)> {
        self.outgoing(node)
            .filter_map(|l| {
                l.meta
                    .target_node_id
                    .as_identity()
                    .map(|key| (key.clone(), l.meta.tag.clone()))
            })
            .collect()
    }

    pub fn get_node_and_linked_node_ids(&self, node: &NodeId) -> Option<NodeAndLinkedIds> {
        let content = self.node_content(node)?;
        Some(NodeAndLinkedIds {
            content,
            linked_node_ids: self.get_all_linked_node_ids(node),
        })
    }

    pub fn batch_get_node_and_linked_node_ids(&self, nodes: &[NodeId]) -> Vec<NodeLookup> {
        nodes
            .iter()
            .map(|node| self.get_node_and_linked_node_ids(node).into())
            .collect()
    }

    pub fn get_records(&self, refs: &[ActionRef]) -> Vec<bool> {
        refs.iter().map(|r| self.records.contains(r)).collect()
    }
}
