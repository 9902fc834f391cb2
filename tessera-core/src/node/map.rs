//! Map: string keys to child nodes. Plain JSON values are stored as
//! Register children.

use indexmap::IndexMap;
use serde_json::Value;

use super::{Applied, Crdt, Node, ParentLink};
use crate::document::Document;
use crate::draft::Draft;
use crate::error::CrdtError;
use crate::id::NodeId;
use crate::op::{CrdtType, Op};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapNode {
    entries: IndexMap<String, NodeId>,
}

impl MapNode {
    pub fn get(&self, key: &str) -> Option<&NodeId> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, key: String, id: NodeId) -> Option<NodeId> {
        self.entries.insert(key, id)
    }
}

impl Crdt for MapNode {
    fn crdt_type(&self) -> CrdtType {
        CrdtType::Map
    }

    fn create_op(&self, id: &NodeId, parent: Option<&ParentLink>) -> Op {
        let (parent_id, parent_key) = parent
            .map(|p| (p.id.clone(), p.key.clone()))
            .unwrap_or_else(|| (NodeId::root(), String::new()));
        Op::CreateMap {
            id: id.clone(),
            parent_id,
            parent_key,
            op_id: None,
        }
    }

    fn children(&self) -> Vec<NodeId> {
        self.entries.values().cloned().collect()
    }

    fn remove_child(&mut self, child: &NodeId) -> Option<String> {
        let key = self
            .entries
            .iter()
            .find(|(_, id)| *id == child)
            .map(|(k, _)| k.clone())?;
        self.entries.shift_remove(&key);
        Some(key)
    }

    fn to_json(&self, doc: &Document) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, id)| (k.clone(), doc.json_of(id).unwrap_or(Value::Null)))
                .collect(),
        )
    }
}

/// Serializes and detaches the child previously stored under `key`.
fn take_previous(doc: &mut Document, previous: Option<NodeId>) -> Vec<Op> {
    match previous {
        Some(old) => {
            let reverse = doc.serialize(&old);
            doc.detach(&old);
            reverse
        }
        None => Vec::new(),
    }
}

/// Attaches a freshly created child under the key carried in its link,
/// replacing whatever was there.
pub(crate) fn attach_child(doc: &mut Document, map: &NodeId, child: Node) -> Result<Option<Applied>, CrdtError> {
    let child_id = child.id().clone();
    let key = child.parent().map(|p| p.key.clone()).unwrap_or_default();
    let previous = doc.map_node_mut(map)?.insert(key, child_id.clone());
    let mut reverse = take_previous(doc, previous);
    if reverse.is_empty() {
        reverse.push(Op::DeleteCrdt { id: child_id });
    }
    doc.add_item(child)?;
    Ok(Some(Applied {
        modified: map.clone(),
        reverse,
    }))
}

/// Mutable handle on an attached Map.
pub struct MapMut<'a> {
    doc: &'a mut Document,
    id: NodeId,
}

impl<'a> MapMut<'a> {
    pub(crate) fn new(doc: &'a mut Document, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    fn node(&self) -> Option<&MapNode> {
        self.doc.node(&self.id)?.as_map()
    }

    pub fn get(&self, key: &str) -> Option<&NodeId> {
        self.node()?.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.node().is_some_and(|map| map.has(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.node().into_iter().flat_map(|map| map.keys())
    }

    pub fn len(&self) -> usize {
        self.node().map_or(0, MapNode::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        self.doc.json_of(&self.id).unwrap_or(Value::Null)
    }

    /// Stores `value` under `key`, replacing the previous child.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Draft>) -> Result<NodeId, CrdtError> {
        let key = key.into();
        let map = self.id.clone();
        let previous = self.doc.map_node_mut(&map)?.get(&key).cloned();
        let mut reverse = take_previous(self.doc, previous);
        let child = self
            .doc
            .attach_draft(value.into(), ParentLink::new(map.clone(), key.clone()))?;
        self.doc.map_node_mut(&map)?.insert(key, child.clone());
        if reverse.is_empty() {
            reverse.push(Op::DeleteCrdt { id: child.clone() });
        }
        let ops = self.doc.serialize(&child);
        self.doc.dispatch(ops, reverse, [map]);
        Ok(child)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> Result<bool, CrdtError> {
        let map = self.id.clone();
        let Some(child) = self.doc.map_node_mut(&map)?.get(key).cloned() else {
            return Ok(false);
        };
        let reverse = self.doc.serialize(&child);
        self.doc.detach_child(&map, &child);
        self.doc
            .dispatch(vec![Op::DeleteCrdt { id: child }], reverse, [map]);
        Ok(true)
    }
}
