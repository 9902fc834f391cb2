//! Object: string keys mapping to inline JSON values or child nodes.
//!
//! Concurrent writes to the same key are arbitrated with per-key pending
//! markers. A local write records its op id against each key it touches;
//! until the server echoes that op back, remote writes to the key are
//! ignored. When the echo arrives the marker is cleared and later remote
//! writes apply again. Every replica therefore ends up with the value that
//! the server sequenced last.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{Applied, Crdt, Node, Origin, ParentLink};
use crate::document::Document;
use crate::draft::Draft;
use crate::error::CrdtError;
use crate::id::{NodeId, OpId};
use crate::op::{CrdtType, Op};

/// Value stored under an Object key.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Value(Value),
    Node(NodeId),
}

impl Property {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Property::Value(value) => Some(value),
            Property::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            Property::Node(id) => Some(id),
            Property::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectNode {
    entries: IndexMap<String, Property>,
    pending: HashMap<String, OpId>,
}

impl ObjectNode {
    pub(crate) fn from_data(data: Map<String, Value>) -> Self {
        Self {
            entries: data
                .into_iter()
                .map(|(k, v)| (k, Property::Value(v)))
                .collect(),
            pending: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Property> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Op id of the unacknowledged local write to `key`, if any.
    pub fn pending_op(&self, key: &str) -> Option<&OpId> {
        self.pending.get(key)
    }

    pub(crate) fn insert(&mut self, key: String, property: Property) -> Option<Property> {
        self.entries.insert(key, property)
    }

    pub(crate) fn mark_pending(&mut self, key: String, op_id: OpId) {
        self.pending.insert(key, op_id);
    }

    /// Decides whether a remote write to `key` stamped `op_id` may apply.
    ///
    /// Clears the marker when the write is the echo of our own.
    fn admit_remote(&mut self, key: &str, op_id: Option<&OpId>) -> bool {
        match self.pending.get(key) {
            None => true,
            Some(pending) if Some(pending) == op_id => {
                self.pending.remove(key);
                false
            }
            Some(_) => false,
        }
    }
}

impl Crdt for ObjectNode {
    fn crdt_type(&self) -> CrdtType {
        CrdtType::Object
    }

    fn create_op(&self, id: &NodeId, parent: Option<&ParentLink>) -> Op {
        let data = self
            .entries
            .iter()
            .filter_map(|(k, v)| v.as_value().map(|v| (k.clone(), v.clone())))
            .collect();
        Op::CreateObject {
            id: id.clone(),
            parent_id: parent.map(|p| p.id.clone()),
            parent_key: parent.map(|p| p.key.clone()),
            data,
            op_id: None,
        }
    }

    fn children(&self) -> Vec<NodeId> {
        self.entries
            .values()
            .filter_map(|v| v.as_node().cloned())
            .collect()
    }

    fn remove_child(&mut self, child: &NodeId) -> Option<String> {
        let key = self
            .entries
            .iter()
            .find(|(_, v)| v.as_node() == Some(child))
            .map(|(k, _)| k.clone())?;
        self.entries.shift_remove(&key);
        Some(key)
    }

    fn to_json(&self, doc: &Document) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Property::Value(value) => value.clone(),
                        Property::Node(id) => doc.json_of(id).unwrap_or(Value::Null),
                    };
                    (k.clone(), value)
                })
                .collect(),
        )
    }
}

/// Reverse ops that restore `previous` under `key` of object `id`.
///
/// A node-valued previous entry is serialized and then detached from the
/// registry, so call this only once the key is being overwritten or removed.
fn restore_previous(
    doc: &mut Document,
    id: &NodeId,
    key: &str,
    previous: Option<Property>,
    reverse_data: &mut Map<String, Value>,
    reverse: &mut Vec<Op>,
) {
    match previous {
        Some(Property::Value(value)) => {
            reverse_data.entry(key.to_string()).or_insert(value);
        }
        Some(Property::Node(old)) => {
            reverse.extend(doc.serialize(&old));
            doc.detach(&old);
        }
        None => reverse.push(Op::DeleteObjectKey {
            id: id.clone(),
            key: key.to_string(),
        }),
    }
}

fn finish_reverse(id: &NodeId, reverse_data: Map<String, Value>, mut reverse: Vec<Op>) -> Vec<Op> {
    if !reverse_data.is_empty() {
        reverse.insert(
            0,
            Op::UpdateObject {
                id: id.clone(),
                data: reverse_data,
                op_id: None,
            },
        );
    }
    reverse
}

/// Applies an `UpdateObject` to object `id`.
pub(crate) fn apply_update(
    doc: &mut Document,
    id: &NodeId,
    data: &Map<String, Value>,
    op_id: Option<&OpId>,
    origin: Origin,
) -> Result<Option<Applied>, CrdtError> {
    let mut reverse_data = Map::new();
    let mut reverse = Vec::new();
    let mut modified = false;

    for (key, value) in data {
        let object = doc.object_node_mut(id)?;
        match (origin, op_id) {
            (Origin::Local, Some(op_id)) => object.mark_pending(key.clone(), op_id.clone()),
            (Origin::Local, None) => {}
            (Origin::Remote, _) => {
                if !object.admit_remote(key, op_id) {
                    continue;
                }
            }
        }
        let previous = object.insert(key.clone(), Property::Value(value.clone()));
        restore_previous(doc, id, key, previous, &mut reverse_data, &mut reverse);
        modified = true;
    }

    if !modified {
        return Ok(None);
    }
    Ok(Some(Applied {
        modified: id.clone(),
        reverse: finish_reverse(id, reverse_data, reverse),
    }))
}

/// Applies a `DeleteObjectKey`. Removal is unconditional.
pub(crate) fn apply_delete_key(
    doc: &mut Document,
    id: &NodeId,
    key: &str,
) -> Result<Option<Applied>, CrdtError> {
    let Some(previous) = doc.object_node_mut(id)?.entries.shift_remove(key) else {
        return Ok(None);
    };
    let mut reverse_data = Map::new();
    let mut reverse = Vec::new();
    restore_previous(doc, id, key, Some(previous), &mut reverse_data, &mut reverse);
    Ok(Some(Applied {
        modified: id.clone(),
        reverse: finish_reverse(id, reverse_data, reverse),
    }))
}

/// Attaches a freshly created child under `key`, subject to arbitration.
pub(crate) fn attach_child(
    doc: &mut Document,
    parent: &NodeId,
    key: &str,
    child: Node,
    op_id: Option<&OpId>,
    origin: Origin,
) -> Result<Option<Applied>, CrdtError> {
    let object = doc.object_node_mut(parent)?;
    let admitted = match (origin, op_id) {
        (Origin::Local, Some(op_id)) => {
            object.mark_pending(key.to_string(), op_id.clone());
            true
        }
        (Origin::Local, None) => true,
        (Origin::Remote, _) => object.admit_remote(key, op_id),
    };
    let child_id = child.id().clone();
    if !admitted {
        log::debug!("Ignoring remote create of {child_id} under {parent}.{key}");
        // Descendant creates that follow are stale, not orphans.
        doc.mark_deleted(child_id);
        return Ok(None);
    }
    let object = doc.object_node_mut(parent)?;
    let previous = object.insert(key.to_string(), Property::Node(child_id));
    let mut reverse_data = Map::new();
    let mut reverse = Vec::new();
    restore_previous(doc, parent, key, previous, &mut reverse_data, &mut reverse);
    doc.add_item(child)?;
    Ok(Some(Applied {
        modified: parent.clone(),
        reverse: finish_reverse(parent, reverse_data, reverse),
    }))
}

/// Clears the marker left by our own create under `key` once it is echoed.
pub(crate) fn acknowledge(doc: &mut Document, parent: &NodeId, key: &str, op_id: &OpId) {
    if let Ok(object) = doc.object_node_mut(parent) {
        if object.pending.get(key) == Some(op_id) {
            object.pending.remove(key);
        }
    }
}

/// Mutable handle on an attached Object.
pub struct ObjectMut<'a> {
    doc: &'a mut Document,
    id: NodeId,
}

impl<'a> ObjectMut<'a> {
    pub(crate) fn new(doc: &'a mut Document, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    fn node(&self) -> Option<&ObjectNode> {
        self.doc.node(&self.id)?.as_object()
    }

    pub fn get(&self, key: &str) -> Option<&Property> {
        self.node()?.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.node().into_iter().flat_map(|object| object.keys())
    }

    pub fn len(&self) -> usize {
        self.node().map_or(0, ObjectNode::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        self.doc.json_of(&self.id).unwrap_or(Value::Null)
    }

    /// Writes one key. See [`ObjectMut::update`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Draft>) -> Result<(), CrdtError> {
        self.update([(key.into(), value.into())])
    }

    /// Shallow-merges `overrides` into the object.
    ///
    /// Emits one `UpdateObject` for the inline values, stamped with a single
    /// op id shared by every key of the call, plus the create ops of any
    /// container values. The reverse restores each previous value or
    /// deletes keys that did not exist.
    pub fn update<K, V>(&mut self, overrides: impl IntoIterator<Item = (K, V)>) -> Result<(), CrdtError>
    where
        K: Into<String>,
        V: Into<Draft>,
    {
        let overrides: IndexMap<String, Draft> = overrides
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if overrides.is_empty() {
            return Ok(());
        }
        let id = self.id.clone();
        let op_id = self.doc.generate_op_id();

        let mut update_data = Map::new();
        let mut created = Vec::new();
        let mut reverse_data = Map::new();
        let mut reverse = Vec::new();

        for (key, draft) in overrides {
            let previous = self.doc.object_node_mut(&id)?.get(&key).cloned();
            restore_previous(self.doc, &id, &key, previous, &mut reverse_data, &mut reverse);

            match draft {
                Draft::Json(value) => {
                    let object = self.doc.object_node_mut(&id)?;
                    object.insert(key.clone(), Property::Value(value.clone()));
                    object.mark_pending(key.clone(), op_id.clone());
                    update_data.insert(key, value);
                }
                draft => {
                    let child = self
                        .doc
                        .attach_draft(draft, ParentLink::new(id.clone(), key.clone()))?;
                    let object = self.doc.object_node_mut(&id)?;
                    object.insert(key.clone(), Property::Node(child.clone()));
                    object.mark_pending(key, op_id.clone());
                    let mut ops = self.doc.serialize(&child);
                    if let Some(first) = ops.first_mut() {
                        first.set_op_id(op_id.clone());
                    }
                    created.extend(ops);
                }
            }
        }

        let mut ops = Vec::with_capacity(created.len() + 1);
        if !update_data.is_empty() {
            ops.push(Op::UpdateObject {
                id: id.clone(),
                data: update_data,
                op_id: Some(op_id),
            });
        }
        ops.extend(created);
        let reverse = finish_reverse(&id, reverse_data, reverse);
        self.doc.dispatch(ops, reverse, [id]);
        Ok(())
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn delete(&mut self, key: &str) -> Result<(), CrdtError> {
        let id = self.id.clone();
        let Some(previous) = self.doc.object_node_mut(&id)?.entries.shift_remove(key) else {
            return Ok(());
        };
        let mut reverse_data = Map::new();
        let mut reverse = Vec::new();
        restore_previous(self.doc, &id, key, Some(previous), &mut reverse_data, &mut reverse);
        let ops = vec![Op::DeleteObjectKey {
            id: id.clone(),
            key: key.to_string(),
        }];
        let reverse = finish_reverse(&id, reverse_data, reverse);
        self.doc.dispatch(ops, reverse, [id]);
        Ok(())
    }
}
