//! Node hierarchy.
//!
//! Nodes live in the document's registry (an id-keyed arena). A node's parent
//! is a [`ParentLink`] holding the parent's id and the key the parent stores
//! it under; it is a lookup key, never an owner. Containers hold the ids of
//! their children.
//!
//! ```text
//!  registry: HashMap<NodeId, Node>
//!
//!  "root" Object ──key "todos"──► "0:1" List ──pos "V"──► "0:2" Register
//!        ▲                              │
//!        └────── ParentLink ────────────┘
//! ```
//!
//! Kind-specific behavior sits in [`object`], [`list`], [`map`] and
//! [`register`]; the base contract shared by all kinds is the [`Crdt`] trait
//! plus the default handling of `DeleteCrdt` and `SetParentKey` below.

pub mod list;
pub mod map;
pub mod object;
pub mod register;

use serde_json::Value;

use crate::document::Document;
use crate::error::CrdtError;
use crate::id::NodeId;
use crate::op::{CrdtType, Op};

pub use list::{ListMut, ListNode};
pub use map::{MapMut, MapNode};
pub use object::{ObjectMut, ObjectNode, Property};
pub use register::RegisterNode;

/// Where a node is stored in its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub id: NodeId,
    /// Object/Map key, or List position.
    pub key: String,
}

impl ParentLink {
    pub fn new(id: NodeId, key: impl Into<String>) -> Self {
        Self { id, key: key.into() }
    }
}

/// One replicated container or leaf.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    parent: Option<ParentLink>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Object(ObjectNode),
    List(ListNode),
    Map(MapNode),
    Register(RegisterNode),
}

impl Node {
    pub(crate) fn new(id: NodeId, parent: Option<ParentLink>, kind: NodeKind) -> Self {
        Self { id, parent, kind }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent_key(&mut self, key: String) {
        if let Some(parent) = &mut self.parent {
            parent.key = key;
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn crdt_type(&self) -> CrdtType {
        self.kind.crdt_type()
    }

    pub fn as_object(&self) -> Option<&ObjectNode> {
        match &self.kind {
            NodeKind::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListNode> {
        match &self.kind {
            NodeKind::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapNode> {
        match &self.kind {
            NodeKind::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<&RegisterNode> {
        match &self.kind {
            NodeKind::Register(register) => Some(register),
            _ => None,
        }
    }

    /// This node's create op, children excluded.
    pub(crate) fn create_op(&self) -> Op {
        self.kind.create_op(&self.id, self.parent.as_ref())
    }
}

/// Behavior every node kind provides.
pub(crate) trait Crdt {
    fn crdt_type(&self) -> CrdtType;

    /// The op that recreates this node alone under `parent`.
    fn create_op(&self, id: &NodeId, parent: Option<&ParentLink>) -> Op;

    /// Direct children, in container order.
    fn children(&self) -> Vec<NodeId>;

    /// Forgets `child`; returns the key it was stored under.
    fn remove_child(&mut self, child: &NodeId) -> Option<String>;

    fn to_json(&self, doc: &Document) -> Value;
}

impl Crdt for NodeKind {
    fn crdt_type(&self) -> CrdtType {
        match self {
            NodeKind::Object(n) => n.crdt_type(),
            NodeKind::List(n) => n.crdt_type(),
            NodeKind::Map(n) => n.crdt_type(),
            NodeKind::Register(n) => n.crdt_type(),
        }
    }

    fn create_op(&self, id: &NodeId, parent: Option<&ParentLink>) -> Op {
        match self {
            NodeKind::Object(n) => n.create_op(id, parent),
            NodeKind::List(n) => n.create_op(id, parent),
            NodeKind::Map(n) => n.create_op(id, parent),
            NodeKind::Register(n) => n.create_op(id, parent),
        }
    }

    fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Object(n) => n.children(),
            NodeKind::List(n) => n.children(),
            NodeKind::Map(n) => n.children(),
            NodeKind::Register(n) => n.children(),
        }
    }

    fn remove_child(&mut self, child: &NodeId) -> Option<String> {
        match self {
            NodeKind::Object(n) => n.remove_child(child),
            NodeKind::List(n) => n.remove_child(child),
            NodeKind::Map(n) => n.remove_child(child),
            NodeKind::Register(n) => n.remove_child(child),
        }
    }

    fn to_json(&self, doc: &Document) -> Value {
        match self {
            NodeKind::Object(n) => n.to_json(doc),
            NodeKind::List(n) => n.to_json(doc),
            NodeKind::Map(n) => n.to_json(doc),
            NodeKind::Register(n) => n.to_json(doc),
        }
    }
}

/// Whether an op came from this replica (local call, undo/redo replay) or
/// from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Local,
    Remote,
}

/// Outcome of applying one op that changed something.
#[derive(Debug)]
pub(crate) struct Applied {
    pub modified: NodeId,
    pub reverse: Vec<Op>,
}

/// Default `DeleteCrdt` handling: remove the node from its parent.
///
/// The parent is reported as modified and the reverse is the node's own
/// serialization. Unknown ids are stale and ignored; the root has no parent
/// and cannot be deleted.
pub(crate) fn apply_delete(doc: &mut Document, id: &NodeId) -> Result<Option<Applied>, CrdtError> {
    let Some(node) = doc.node(id) else {
        log::debug!("Dropping DeleteCrdt for unknown node {id}");
        return Ok(None);
    };
    let Some(parent) = node.parent().cloned() else {
        return Ok(None);
    };
    let reverse = doc.serialize(id);
    doc.detach_child(&parent.id, id);
    Ok(Some(Applied {
        modified: parent.id,
        reverse,
    }))
}

/// Default `SetParentKey` handling: only List parents order children by key.
pub(crate) fn apply_set_parent_key(
    doc: &mut Document,
    id: &NodeId,
    parent_key: &str,
) -> Result<Option<Applied>, CrdtError> {
    let Some(node) = doc.node(id) else {
        log::debug!("Dropping SetParentKey for unknown node {id}");
        return Ok(None);
    };
    let Some(parent) = node.parent().cloned() else {
        return Ok(None);
    };
    match doc.node(&parent.id).map(Node::crdt_type) {
        Some(CrdtType::List) => list::set_child_key(doc, &parent.id, id, parent_key),
        _ => {
            log::warn!("Ignoring SetParentKey for {id}: parent {} is not a list", parent.id);
            Ok(None)
        }
    }
}
