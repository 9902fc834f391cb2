//! Document coordinator.
//!
//! The document owns every node in a flat registry and is the single entry
//! point for mutations. Local mutations go through the typed handles
//! ([`ObjectMut`], [`ListMut`], [`MapMut`]), which apply optimistically and
//! call [`Document::dispatch`]: the reverse ops go to the undo stack, the
//! forward ops to the outbox, and subscribers are notified once. Remote ops
//! come in through [`Document::apply_remote`].

use indexmap::IndexSet;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::draft::{Draft, ObjectDraft};
use crate::error::CrdtError;
use crate::history::History;
use crate::id::{NodeId, OpId};
use crate::node::{
    self, list, map, object, Applied, Crdt, ListMut, ListNode, MapMut, MapNode, Node, NodeKind,
    ObjectMut, ObjectNode, Origin, ParentLink, Property, RegisterNode,
};
use crate::op::{CrdtType, Op, SerializedCrdt, SnapshotItem};
use crate::position;

/// Handle returned by the `subscribe*` calls.
pub type SubscriptionId = u64;

type Callback = Box<dyn FnMut(&Document, &[NodeId]) + Send>;

struct Subscriber {
    id: SubscriptionId,
    /// `None` listens to everything; otherwise `(node, deep)`.
    target: Option<(NodeId, bool)>,
    callback: Callback,
}

#[derive(Default)]
struct Batch {
    ops: Vec<Op>,
    reverse: Vec<Op>,
    modified: IndexSet<NodeId>,
}

/// A replicated tree of Objects, Lists, Maps and Registers.
pub struct Document {
    actor: u64,
    clock: u64,
    op_clock: u64,
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
    /// Ids of every node deleted or dropped since the document was created
    /// or loaded. Creates addressed to them are dropped. Never pruned, so it
    /// grows with the number of deletions in a session.
    tombstones: HashSet<NodeId>,
    history: History,
    batch: Option<Batch>,
    outbox: Vec<Op>,
    subscribers: Vec<Subscriber>,
    next_subscription: SubscriptionId,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("actor", &self.actor)
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

impl Document {
    fn empty(actor: u64, root: NodeId) -> Self {
        Self {
            actor,
            clock: 0,
            op_clock: 0,
            root,
            nodes: HashMap::new(),
            tombstones: HashSet::new(),
            history: History::default(),
            batch: None,
            outbox: Vec::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// A document whose root is an empty Object.
    pub fn new(actor: u64) -> Self {
        let root = NodeId::root();
        let mut doc = Self::empty(actor, root.clone());
        doc.nodes.insert(
            root.clone(),
            Node::new(root, None, NodeKind::Object(ObjectNode::default())),
        );
        doc
    }

    /// Builds a document from a root draft, assigning ids eagerly.
    ///
    /// The initial tree is the shared baseline: nothing is dispatched.
    pub fn from_root(actor: u64, root: ObjectDraft) -> Result<Self, CrdtError> {
        let mut doc = Self::empty(actor, NodeId::root());
        doc.attach_draft_with_id(NodeId::root(), Draft::Object(root), None)?;
        Ok(doc)
    }

    /// Rebuilds a document from a flat snapshot.
    ///
    /// Exactly one item must lack a parent and it must be an Object.
    pub fn load(actor: u64, items: Vec<SnapshotItem>) -> Result<Self, CrdtError> {
        let mut root = None;
        let mut children: HashMap<NodeId, Vec<(NodeId, SerializedCrdt)>> = HashMap::new();
        for (id, crdt) in items {
            match crdt.parent_id().cloned() {
                Some(parent) => children.entry(parent).or_default().push((id, crdt)),
                None => {
                    if root.is_some() {
                        return Err(CrdtError::InvalidSnapshot(format!(
                            "more than one root ({id})"
                        )));
                    }
                    match crdt {
                        SerializedCrdt::Object { data, .. } => root = Some((id, data)),
                        other => {
                            return Err(CrdtError::InvalidSnapshot(format!(
                                "root {id} is a {:?}, not an Object",
                                other.crdt_type()
                            )))
                        }
                    }
                }
            }
        }
        let (root_id, data) =
            root.ok_or_else(|| CrdtError::InvalidSnapshot("no root item".to_string()))?;

        let mut doc = Self::empty(actor, root_id.clone());
        doc.add_item(Node::new(
            root_id.clone(),
            None,
            NodeKind::Object(ObjectNode::from_data(data)),
        ))?;
        doc.load_children(&root_id, &mut children)?;

        if let Some((parent_id, orphans)) = children.into_iter().next() {
            let id = orphans
                .into_iter()
                .next()
                .map(|(id, _)| id)
                .unwrap_or_else(|| parent_id.clone());
            return Err(CrdtError::UnknownParent { id, parent_id });
        }
        log::debug!("Loaded document with {} nodes", doc.nodes.len());
        Ok(doc)
    }

    fn load_children(
        &mut self,
        parent: &NodeId,
        index: &mut HashMap<NodeId, Vec<(NodeId, SerializedCrdt)>>,
    ) -> Result<(), CrdtError> {
        let Some(items) = index.remove(parent) else {
            return Ok(());
        };
        for (id, crdt) in items {
            let key = crdt
                .parent_key()
                .ok_or_else(|| CrdtError::MissingParent(id.clone()))?
                .to_string();
            let kind = match crdt {
                SerializedCrdt::Object { data, .. } => NodeKind::Object(ObjectNode::from_data(data)),
                SerializedCrdt::List { .. } => NodeKind::List(ListNode::default()),
                SerializedCrdt::Map { .. } => NodeKind::Map(MapNode::default()),
                SerializedCrdt::Register { data, .. } => NodeKind::Register(RegisterNode::new(data)),
            };
            self.link_child(parent, &key, &id)?;
            self.add_item(Node::new(
                id.clone(),
                Some(ParentLink::new(parent.clone(), key)),
                kind,
            ))?;
            self.load_children(&id, index)?;
        }
        Ok(())
    }

    /// Records `child` in `parent`'s container under `key`.
    fn link_child(&mut self, parent: &NodeId, key: &str, child: &NodeId) -> Result<(), CrdtError> {
        let node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| CrdtError::NodeNotFound(parent.clone()))?;
        match node.kind_mut() {
            NodeKind::Object(object) => {
                object.insert(key.to_string(), Property::Node(child.clone()));
            }
            NodeKind::List(list) => list.insert_sorted(key.to_string(), child.clone()),
            NodeKind::Map(map) => {
                map.insert(key.to_string(), child.clone());
            }
            NodeKind::Register(_) => return Err(CrdtError::NotAContainer(parent.clone())),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn actor(&self) -> u64 {
        self.actor
    }

    /// Switches the id namespace, e.g. after reconnecting with a new actor.
    /// Counters are not reset.
    pub fn set_actor(&mut self, actor: u64) {
        self.actor = actor;
    }

    pub(crate) fn generate_id(&mut self) -> NodeId {
        let id = NodeId::generated(self.actor, self.clock);
        self.clock += 1;
        id
    }

    pub(crate) fn generate_op_id(&mut self) -> OpId {
        let id = OpId::generated(self.actor, self.op_clock);
        self.op_clock += 1;
        id
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Number of attached nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether `id` was attached once and has since been deleted.
    pub fn is_deleted(&self, id: &NodeId) -> bool {
        self.tombstones.contains(id)
    }

    pub(crate) fn add_item(&mut self, node: Node) -> Result<(), CrdtError> {
        if self.nodes.contains_key(node.id()) {
            return Err(CrdtError::AlreadyAttached(node.id().clone()));
        }
        self.tombstones.remove(node.id());
        self.nodes.insert(node.id().clone(), node);
        Ok(())
    }

    fn delete_item(&mut self, id: &NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.tombstones.insert(id.clone());
        Some(node)
    }

    pub(crate) fn mark_deleted(&mut self, id: NodeId) {
        self.tombstones.insert(id);
    }

    /// Removes `id` and all of its descendants from the registry.
    pub(crate) fn detach(&mut self, id: &NodeId) {
        if let Some(node) = self.delete_item(id) {
            for child in node.kind().children() {
                self.detach(&child);
            }
        }
    }

    /// Removes `child` from `parent`'s container, then detaches it.
    pub(crate) fn detach_child(&mut self, parent: &NodeId, child: &NodeId) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.kind_mut().remove_child(child);
        }
        self.detach(child);
    }

    fn typed_node_mut(&mut self, id: &NodeId, expected: CrdtType) -> Result<&mut NodeKind, CrdtError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| CrdtError::NodeNotFound(id.clone()))?;
        if node.crdt_type() != expected {
            return Err(CrdtError::TypeMismatch {
                id: id.clone(),
                expected,
            });
        }
        Ok(node.kind_mut())
    }

    pub(crate) fn object_node_mut(&mut self, id: &NodeId) -> Result<&mut ObjectNode, CrdtError> {
        match self.typed_node_mut(id, CrdtType::Object)? {
            NodeKind::Object(object) => Ok(object),
            _ => Err(CrdtError::TypeMismatch {
                id: id.clone(),
                expected: CrdtType::Object,
            }),
        }
    }

    pub(crate) fn list_node_mut(&mut self, id: &NodeId) -> Result<&mut ListNode, CrdtError> {
        match self.typed_node_mut(id, CrdtType::List)? {
            NodeKind::List(list) => Ok(list),
            _ => Err(CrdtError::TypeMismatch {
                id: id.clone(),
                expected: CrdtType::List,
            }),
        }
    }

    pub(crate) fn map_node_mut(&mut self, id: &NodeId) -> Result<&mut MapNode, CrdtError> {
        match self.typed_node_mut(id, CrdtType::Map)? {
            NodeKind::Map(map) => Ok(map),
            _ => Err(CrdtError::TypeMismatch {
                id: id.clone(),
                expected: CrdtType::Map,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Typed handles
    // ------------------------------------------------------------------

    pub fn root_mut(&mut self) -> ObjectMut<'_> {
        let root = self.root.clone();
        ObjectMut::new(self, root)
    }

    pub fn object_mut(&mut self, id: &NodeId) -> Result<ObjectMut<'_>, CrdtError> {
        self.object_node_mut(id)?;
        Ok(ObjectMut::new(self, id.clone()))
    }

    pub fn list_mut(&mut self, id: &NodeId) -> Result<ListMut<'_>, CrdtError> {
        self.list_node_mut(id)?;
        Ok(ListMut::new(self, id.clone()))
    }

    pub fn map_mut(&mut self, id: &NodeId) -> Result<MapMut<'_>, CrdtError> {
        self.map_node_mut(id)?;
        Ok(MapMut::new(self, id.clone()))
    }

    /// Id of the node stored under `key` of object `id`.
    pub fn child(&self, id: &NodeId, key: &str) -> Option<&NodeId> {
        match self.nodes.get(id)?.kind() {
            NodeKind::Object(object) => object.get(key)?.as_node(),
            NodeKind::Map(map) => map.get(key),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Create ops for `id` and all of its descendants, parents first.
    pub fn serialize(&self, id: &NodeId) -> Vec<Op> {
        let mut ops = Vec::new();
        self.serialize_into(id, &mut ops);
        ops
    }

    fn serialize_into(&self, id: &NodeId, ops: &mut Vec<Op>) {
        if let Some(node) = self.nodes.get(id) {
            ops.push(node.create_op());
            for child in node.kind().children() {
                self.serialize_into(&child, ops);
            }
        }
    }

    /// Flat snapshot of the whole tree, root first.
    pub fn to_snapshot(&self) -> Vec<SnapshotItem> {
        let mut items = Vec::with_capacity(self.nodes.len());
        for op in self.serialize(&self.root) {
            let item = match op {
                Op::CreateObject {
                    id,
                    parent_id,
                    parent_key,
                    data,
                    ..
                } => (
                    id,
                    SerializedCrdt::Object {
                        parent_id,
                        parent_key,
                        data,
                    },
                ),
                Op::CreateList {
                    id,
                    parent_id,
                    parent_key,
                    ..
                } => (id, SerializedCrdt::List { parent_id, parent_key }),
                Op::CreateMap {
                    id,
                    parent_id,
                    parent_key,
                    ..
                } => (id, SerializedCrdt::Map { parent_id, parent_key }),
                Op::CreateRegister {
                    id,
                    parent_id,
                    parent_key,
                    data,
                    ..
                } => (
                    id,
                    SerializedCrdt::Register {
                        parent_id,
                        parent_key,
                        data,
                    },
                ),
                _ => continue,
            };
            items.push(item);
        }
        items
    }

    /// Plain JSON view of the whole document.
    pub fn to_json(&self) -> Value {
        self.json_of(&self.root).unwrap_or(Value::Null)
    }

    /// Plain JSON view of one node.
    pub fn json_of(&self, id: &NodeId) -> Option<Value> {
        Some(self.nodes.get(id)?.kind().to_json(self))
    }

    // ------------------------------------------------------------------
    // Attaching drafts
    // ------------------------------------------------------------------

    /// Attaches `draft` under `parent` with fresh ids. The caller records
    /// the new id in the parent's container.
    pub(crate) fn attach_draft(&mut self, draft: Draft, parent: ParentLink) -> Result<NodeId, CrdtError> {
        let id = self.generate_id();
        self.attach_draft_with_id(id.clone(), draft, Some(parent))?;
        Ok(id)
    }

    fn attach_draft_with_id(
        &mut self,
        id: NodeId,
        draft: Draft,
        parent: Option<ParentLink>,
    ) -> Result<(), CrdtError> {
        match draft {
            Draft::Json(value) => self.add_item(Node::new(
                id,
                parent,
                NodeKind::Register(RegisterNode::new(value)),
            )),
            Draft::Object(draft) => {
                let mut object = ObjectNode::default();
                let mut children = Vec::new();
                for (key, value) in draft.entries {
                    match value {
                        Draft::Json(value) => {
                            object.insert(key, Property::Value(value));
                        }
                        nested => {
                            let child = self.generate_id();
                            object.insert(key.clone(), Property::Node(child.clone()));
                            children.push((child, key, nested));
                        }
                    }
                }
                self.add_item(Node::new(id.clone(), parent, NodeKind::Object(object)))?;
                for (child, key, nested) in children {
                    self.attach_draft_with_id(child, nested, Some(ParentLink::new(id.clone(), key)))?;
                }
                Ok(())
            }
            Draft::List(draft) => {
                let mut list = ListNode::default();
                let mut children = Vec::new();
                let mut last: Option<String> = None;
                for value in draft.items {
                    let position = match &last {
                        Some(last) => position::after(last),
                        None => position::first(),
                    };
                    let child = self.generate_id();
                    list.insert_sorted(position.clone(), child.clone());
                    children.push((child, position.clone(), value));
                    last = Some(position);
                }
                self.add_item(Node::new(id.clone(), parent, NodeKind::List(list)))?;
                for (child, position, value) in children {
                    self.attach_draft_with_id(child, value, Some(ParentLink::new(id.clone(), position)))?;
                }
                Ok(())
            }
            Draft::Map(draft) => {
                let mut map = MapNode::default();
                let mut children = Vec::new();
                for (key, value) in draft.entries {
                    let child = self.generate_id();
                    map.insert(key.clone(), child.clone());
                    children.push((child, key, value));
                }
                self.add_item(Node::new(id.clone(), parent, NodeKind::Map(map)))?;
                for (child, key, value) in children {
                    self.attach_draft_with_id(child, value, Some(ParentLink::new(id.clone(), key)))?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Applying ops
    // ------------------------------------------------------------------

    fn apply_op(&mut self, op: &Op, origin: Origin) -> Result<Option<Applied>, CrdtError> {
        match op {
            Op::CreateObject { .. } | Op::CreateList { .. } | Op::CreateMap { .. } | Op::CreateRegister { .. } => {
                self.apply_create(op, origin)
            }
            Op::UpdateObject { id, data, op_id } => match self.nodes.get(id).map(Node::crdt_type) {
                Some(CrdtType::Object) => object::apply_update(self, id, data, op_id.as_ref(), origin),
                Some(other) => {
                    log::warn!("Ignoring UpdateObject for {id}: node is a {other:?}");
                    Ok(None)
                }
                None => {
                    log::debug!("Dropping UpdateObject for unknown node {id}");
                    Ok(None)
                }
            },
            Op::DeleteObjectKey { id, key } => match self.nodes.get(id).map(Node::crdt_type) {
                Some(CrdtType::Object) => object::apply_delete_key(self, id, key),
                _ => {
                    log::debug!("Dropping DeleteObjectKey for {id}.{key}");
                    Ok(None)
                }
            },
            Op::DeleteCrdt { id } => node::apply_delete(self, id),
            Op::SetParentKey { id, parent_key } => node::apply_set_parent_key(self, id, parent_key),
        }
    }

    fn apply_create(&mut self, op: &Op, origin: Origin) -> Result<Option<Applied>, CrdtError> {
        let id = op.id();
        if self.nodes.contains_key(id) {
            // Echo of a create this replica already applied.
            if let (Some(op_id), Some((parent_id, key))) = (op.op_id(), op.parent()) {
                object::acknowledge(self, parent_id, key, op_id);
            }
            return Ok(None);
        }
        let Some((parent_id, key)) = op.parent() else {
            return Err(CrdtError::MissingParent(id.clone()));
        };
        let Some(parent_type) = self.nodes.get(parent_id).map(Node::crdt_type) else {
            if self.tombstones.contains(parent_id) {
                log::debug!("Dropping create of {id}: parent {parent_id} was deleted");
                self.mark_deleted(id.clone());
                return Ok(None);
            }
            return Err(CrdtError::UnknownParent {
                id: id.clone(),
                parent_id: parent_id.clone(),
            });
        };

        let kind = match op {
            Op::CreateObject { data, .. } => NodeKind::Object(ObjectNode::from_data(data.clone())),
            Op::CreateList { .. } => NodeKind::List(ListNode::default()),
            Op::CreateMap { .. } => NodeKind::Map(MapNode::default()),
            Op::CreateRegister { data, .. } => NodeKind::Register(RegisterNode::new(data.clone())),
            _ => return Ok(None),
        };
        let child = Node::new(id.clone(), Some(ParentLink::new(parent_id.clone(), key)), kind);

        match parent_type {
            CrdtType::Object => object::attach_child(self, parent_id, key, child, op.op_id(), origin),
            CrdtType::List => list::attach_child(self, parent_id, child),
            CrdtType::Map => map::attach_child(self, parent_id, child),
            CrdtType::Register => Err(CrdtError::NotAContainer(parent_id.clone())),
        }
    }

    /// Applies ops received from the network.
    ///
    /// Returns the distinct modified nodes. Subscribers are notified once,
    /// also when an op fails part-way; ops before the failure stay applied.
    pub fn apply_remote(&mut self, ops: Vec<Op>) -> Result<Vec<NodeId>, CrdtError> {
        let mut modified = IndexSet::new();
        let mut failure = None;
        for op in &ops {
            match self.apply_op(op, Origin::Remote) {
                Ok(Some(applied)) => {
                    modified.insert(applied.modified);
                }
                Ok(None) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        self.notify(&modified);
        match failure {
            Some(err) => Err(err),
            None => Ok(modified.into_iter().collect()),
        }
    }

    /// Replays ops as local writes, stamping fresh op ids.
    ///
    /// Returns the stamped ops, the reverse of the whole replay and the
    /// modified nodes.
    fn apply_local(&mut self, ops: Vec<Op>) -> Result<(Vec<Op>, Vec<Op>, IndexSet<NodeId>), CrdtError> {
        let mut applied_ops = Vec::with_capacity(ops.len());
        let mut reverse = Vec::new();
        let mut modified = IndexSet::new();
        for mut op in ops {
            if op.is_create() || matches!(op, Op::UpdateObject { .. }) {
                op.set_op_id(self.generate_op_id());
            }
            if let Some(applied) = self.apply_op(&op, Origin::Local)? {
                modified.insert(applied.modified);
                reverse.splice(0..0, applied.reverse);
            }
            applied_ops.push(op);
        }
        Ok((applied_ops, reverse, modified))
    }

    // ------------------------------------------------------------------
    // Dispatch, batching, history
    // ------------------------------------------------------------------

    /// Records one local mutation: history, outbox and notification, or the
    /// open batch.
    pub(crate) fn dispatch(&mut self, ops: Vec<Op>, reverse: Vec<Op>, modified: impl IntoIterator<Item = NodeId>) {
        if let Some(batch) = &mut self.batch {
            batch.ops.extend(ops);
            batch.reverse.splice(0..0, reverse);
            batch.modified.extend(modified);
            return;
        }
        self.history.record(reverse);
        self.outbox.extend(ops);
        let modified: IndexSet<NodeId> = modified.into_iter().collect();
        self.notify(&modified);
    }

    /// Runs `f` with every mutation collapsed into one undo entry, one
    /// outbox append and one notification.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Document) -> R) -> Result<R, CrdtError> {
        if self.batch.is_some() {
            return Err(CrdtError::NestedBatch);
        }
        self.batch = Some(Batch::default());
        let result = f(self);
        let batch = self.batch.take().unwrap_or_default();
        if !batch.ops.is_empty() {
            self.history.record(batch.reverse);
        }
        self.outbox.extend(batch.ops);
        self.notify(&batch.modified);
        Ok(result)
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    /// Reverts the last history entry. Returns `false` when there is none.
    pub fn undo(&mut self) -> Result<bool, CrdtError> {
        if self.batch.is_some() {
            return Err(CrdtError::HistoryDuringBatch);
        }
        let Some(entry) = self.history.pop_undo() else {
            return Ok(false);
        };
        let (ops, reverse, modified) = self.apply_local(entry)?;
        self.history.push_redo(reverse);
        self.outbox.extend(ops);
        self.notify(&modified);
        Ok(true)
    }

    /// Re-applies the last undone entry. Returns `false` when there is none.
    pub fn redo(&mut self) -> Result<bool, CrdtError> {
        if self.batch.is_some() {
            return Err(CrdtError::HistoryDuringBatch);
        }
        let Some(entry) = self.history.pop_redo() else {
            return Ok(false);
        };
        let (ops, reverse, modified) = self.apply_local(entry)?;
        self.history.push_undo(reverse);
        self.outbox.extend(ops);
        self.notify(&modified);
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Starts collecting mutations into a single undo entry.
    pub fn pause_history(&mut self) {
        self.history.pause();
    }

    /// Pushes everything collected since [`Document::pause_history`] as one
    /// undo entry.
    pub fn resume_history(&mut self) {
        self.history.resume();
    }

    pub fn is_history_paused(&self) -> bool {
        self.history.is_paused()
    }

    /// Forward ops waiting to be sent, oldest first.
    pub fn take_outbox(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outbox(&self) -> bool {
        !self.outbox.is_empty()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Calls `callback` after every change with the modified nodes.
    pub fn subscribe(&mut self, callback: impl FnMut(&Document, &[NodeId]) + Send + 'static) -> SubscriptionId {
        self.add_subscriber(None, Box::new(callback))
    }

    /// Calls `callback` when `node` is modified, or with `deep` when any
    /// node below it is.
    pub fn subscribe_node(
        &mut self,
        node: NodeId,
        deep: bool,
        callback: impl FnMut(&Document, &[NodeId]) + Send + 'static,
    ) -> SubscriptionId {
        self.add_subscriber(Some((node, deep)), Box::new(callback))
    }

    fn add_subscriber(&mut self, target: Option<(NodeId, bool)>, callback: Callback) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push(Subscriber { id, target, callback });
        id
    }

    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    fn is_within(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(Node::parent).map(|p| &p.id);
        }
        false
    }

    fn notify(&mut self, modified: &IndexSet<NodeId>) {
        if modified.is_empty() || self.subscribers.is_empty() {
            return;
        }
        let nodes: Vec<NodeId> = modified.iter().cloned().collect();
        let mut subscribers = std::mem::take(&mut self.subscribers);
        for subscriber in subscribers.iter_mut() {
            let hit = match &subscriber.target {
                None => true,
                Some((id, false)) => modified.contains(id),
                Some((id, true)) => nodes.iter().any(|n| self.is_within(id, n)),
            };
            if hit {
                (subscriber.callback)(self, &nodes);
            }
        }
        // Callbacks cannot subscribe (they only see `&Document`), so the
        // list is restored as taken.
        self.subscribers = subscribers;
    }
}
