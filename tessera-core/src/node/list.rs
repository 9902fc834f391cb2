//! List: children ordered by fractional position.
//!
//! Every child stores its position as its parent key. Children are kept
//! sorted by `(position, id)`, so two concurrent inserts at the same position
//! still order the same way on every replica.

use serde_json::Value;

use super::{Applied, Crdt, Node, ParentLink};
use crate::document::Document;
use crate::draft::Draft;
use crate::error::CrdtError;
use crate::id::NodeId;
use crate::op::{CrdtType, Op};
use crate::position;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListNode {
    items: Vec<(String, NodeId)>,
}

impl ListNode {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeId> {
        self.items.get(index).map(|(_, id)| id)
    }

    /// Position of the child at `index`.
    pub fn position(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|(pos, _)| pos.as_str())
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.items.iter().position(|(_, child)| child == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.items.iter().map(|(_, id)| id)
    }

    pub(crate) fn insert_sorted(&mut self, position: String, id: NodeId) {
        let index = self
            .items
            .partition_point(|(p, i)| (p.as_str(), i) < (position.as_str(), &id));
        self.items.insert(index, (position, id));
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    }

    /// Position strictly between the children at `index - 1` and `index`.
    fn position_before(&self, index: usize) -> String {
        let lo = index.checked_sub(1).and_then(|i| self.position(i));
        position::between(lo, self.position(index))
    }

    fn last_position(&self) -> Option<&str> {
        self.items.last().map(|(pos, _)| pos.as_str())
    }
}

impl Crdt for ListNode {
    fn crdt_type(&self) -> CrdtType {
        CrdtType::List
    }

    fn create_op(&self, id: &NodeId, parent: Option<&ParentLink>) -> Op {
        let (parent_id, parent_key) = parent
            .map(|p| (p.id.clone(), p.key.clone()))
            .unwrap_or_else(|| (NodeId::root(), String::new()));
        Op::CreateList {
            id: id.clone(),
            parent_id,
            parent_key,
            op_id: None,
        }
    }

    fn children(&self) -> Vec<NodeId> {
        self.items.iter().map(|(_, id)| id.clone()).collect()
    }

    fn remove_child(&mut self, child: &NodeId) -> Option<String> {
        let index = self.index_of(child)?;
        Some(self.items.remove(index).0)
    }

    fn to_json(&self, doc: &Document) -> Value {
        Value::Array(
            self.items
                .iter()
                .map(|(_, id)| doc.json_of(id).unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// Attaches a freshly created child at the position carried in its link.
pub(crate) fn attach_child(doc: &mut Document, list: &NodeId, child: Node) -> Result<Option<Applied>, CrdtError> {
    let child_id = child.id().clone();
    let position = child.parent().map(|p| p.key.clone()).unwrap_or_default();
    doc.list_node_mut(list)?;
    if !position::is_valid(&position) {
        log::warn!("Ignoring create of {child_id}: invalid list position {position:?}");
        doc.mark_deleted(child_id);
        return Ok(None);
    }
    doc.add_item(child)?;
    doc.list_node_mut(list)?.insert_sorted(position, child_id.clone());
    Ok(Some(Applied {
        modified: list.clone(),
        reverse: vec![Op::DeleteCrdt { id: child_id }],
    }))
}

/// Moves `child` of `list` to position `key`.
pub(crate) fn set_child_key(
    doc: &mut Document,
    list: &NodeId,
    child: &NodeId,
    key: &str,
) -> Result<Option<Applied>, CrdtError> {
    if !position::is_valid(key) {
        log::warn!("Ignoring SetParentKey for {child}: invalid list position {key:?}");
        return Ok(None);
    }
    let node = doc.list_node_mut(list)?;
    let Some(index) = node.index_of(child) else {
        return Ok(None);
    };
    if node.items[index].0 == key {
        return Ok(None);
    }
    let previous = std::mem::replace(&mut node.items[index].0, key.to_string());
    node.sort();
    if let Some(child_node) = doc.node_mut(child) {
        child_node.set_parent_key(key.to_string());
    }
    Ok(Some(Applied {
        modified: list.clone(),
        reverse: vec![Op::SetParentKey {
            id: child.clone(),
            parent_key: previous,
        }],
    }))
}

/// Mutable handle on an attached List.
pub struct ListMut<'a> {
    doc: &'a mut Document,
    id: NodeId,
}

impl<'a> ListMut<'a> {
    pub(crate) fn new(doc: &'a mut Document, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    fn node(&self) -> Option<&ListNode> {
        self.doc.node(&self.id)?.as_list()
    }

    pub fn len(&self) -> usize {
        self.node().map_or(0, ListNode::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&NodeId> {
        self.node()?.get(index)
    }

    pub fn index_of(&self, child: &NodeId) -> Option<usize> {
        self.node()?.index_of(child)
    }

    /// Child ids in list order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.node().into_iter().flat_map(|list| list.iter())
    }

    pub fn to_json(&self) -> Value {
        self.doc.json_of(&self.id).unwrap_or(Value::Null)
    }

    /// Appends after the last child.
    pub fn push(&mut self, value: impl Into<Draft>) -> Result<NodeId, CrdtError> {
        let position = match self.doc.list_node_mut(&self.id)?.last_position() {
            Some(last) => position::after(last),
            None => position::first(),
        };
        self.insert_at(position, value.into(), Vec::new(), Vec::new())
    }

    /// Inserts so that the new child ends up at `index`.
    pub fn insert(&mut self, index: usize, value: impl Into<Draft>) -> Result<NodeId, CrdtError> {
        let len = self.doc.list_node_mut(&self.id)?.len();
        if index > len {
            return Err(CrdtError::IndexOutOfRange {
                operation: "insert",
                index,
                len,
            });
        }
        let (ops, reverse) = self.untie(index)?;
        let position = self.doc.list_node_mut(&self.id)?.position_before(index);
        self.insert_at(position, value.into(), ops, reverse)
    }

    /// Attaches `draft` at `position`. `ops` and `reverse` are earlier
    /// changes that belong to the same history step.
    fn insert_at(
        &mut self,
        position: String,
        draft: Draft,
        mut ops: Vec<Op>,
        mut reverse: Vec<Op>,
    ) -> Result<NodeId, CrdtError> {
        let list = self.id.clone();
        let child = self
            .doc
            .attach_draft(draft, ParentLink::new(list.clone(), position.clone()))?;
        self.doc
            .list_node_mut(&list)?
            .insert_sorted(position, child.clone());
        ops.extend(self.doc.serialize(&child));
        reverse.insert(0, Op::DeleteCrdt { id: child.clone() });
        self.doc.dispatch(ops, reverse, [list]);
        Ok(child)
    }

    /// Spreads the children sharing a position with the child at
    /// `index - 1`, from `index` onwards, over distinct increasing
    /// positions so that a new position fits between `index - 1` and
    /// `index`. Order is unchanged. Returns the forward and reverse ops.
    fn untie(&mut self, index: usize) -> Result<(Vec<Op>, Vec<Op>), CrdtError> {
        let list = self.id.clone();
        let node = self.doc.list_node_mut(&list)?;
        let tied = match (index.checked_sub(1).and_then(|i| node.position(i)), node.position(index)) {
            (Some(lo), Some(hi)) if lo == hi => hi.to_string(),
            _ => return Ok((Vec::new(), Vec::new())),
        };
        let run: Vec<NodeId> = node.items[index..]
            .iter()
            .take_while(|(p, _)| *p == tied)
            .map(|(_, id)| id.clone())
            .collect();
        let next = node.position(index + run.len()).map(str::to_string);

        let mut ops = Vec::with_capacity(run.len());
        let mut reverse = Vec::with_capacity(run.len());
        let mut previous = tied;
        for child in run {
            let position = position::between(Some(previous.as_str()), next.as_deref());
            if let Some(applied) = set_child_key(self.doc, &list, &child, &position)? {
                reverse.splice(0..0, applied.reverse);
                ops.push(Op::SetParentKey {
                    id: child,
                    parent_key: position.clone(),
                });
            }
            previous = position;
        }
        Ok((ops, reverse))
    }

    /// Moves the child at `from` so that it ends up at `to`.
    ///
    /// Only the moved child's position changes, unless it lands between
    /// siblings that share a position. Moving to the same index is a no-op.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), CrdtError> {
        let list = self.id.clone();
        let node = self.doc.list_node_mut(&list)?;
        let len = node.len();
        if from >= len {
            return Err(CrdtError::IndexOutOfRange {
                operation: "move",
                index: from,
                len,
            });
        }
        if to >= len {
            return Err(CrdtError::IndexOutOfRange {
                operation: "move",
                index: to,
                len,
            });
        }
        if from == to {
            return Ok(());
        }
        let child = node.items[from].1.clone();
        // Bounds are taken from the list as it is before the move.
        let (mut ops, mut reverse) = if from < to {
            self.untie(to + 1)?
        } else {
            self.untie(to)?
        };
        let node = self.doc.list_node_mut(&list)?;
        let position = if from < to {
            position::between(node.position(to), node.position(to + 1))
        } else {
            node.position_before(to)
        };
        if let Some(applied) = set_child_key(self.doc, &list, &child, &position)? {
            reverse.splice(0..0, applied.reverse);
            ops.push(Op::SetParentKey {
                id: child,
                parent_key: position,
            });
        }
        if !ops.is_empty() {
            self.doc.dispatch(ops, reverse, [list]);
        }
        Ok(())
    }

    /// Removes the child at `index`.
    pub fn delete(&mut self, index: usize) -> Result<(), CrdtError> {
        let list = self.id.clone();
        let node = self.doc.list_node_mut(&list)?;
        let Some(child) = node.get(index).cloned() else {
            return Err(CrdtError::IndexOutOfRange {
                operation: "delete",
                index,
                len: node.len(),
            });
        };
        let reverse = self.doc.serialize(&child);
        self.doc.detach_child(&list, &child);
        self.doc
            .dispatch(vec![Op::DeleteCrdt { id: child }], reverse, [list]);
        Ok(())
    }

    /// Removes every child in one history step.
    pub fn clear(&mut self) -> Result<(), CrdtError> {
        let list = self.id.clone();
        let children = self.doc.list_node_mut(&list)?.children();
        if children.is_empty() {
            return Ok(());
        }
        let mut ops = Vec::with_capacity(children.len());
        let mut reverse = Vec::new();
        for child in children {
            reverse.extend(self.doc.serialize(&child));
            self.doc.detach_child(&list, &child);
            ops.push(Op::DeleteCrdt { id: child });
        }
        self.doc.dispatch(ops, reverse, [list]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sorted_breaks_ties_by_id() {
        let mut list = ListNode::default();
        list.insert_sorted("V".into(), NodeId::new("2:0"));
        list.insert_sorted("V".into(), NodeId::new("1:0"));
        list.insert_sorted("A".into(), NodeId::new("3:0"));
        let order: Vec<_> = list.iter().map(NodeId::as_str).collect();
        assert_eq!(order, ["3:0", "1:0", "2:0"]);
    }

    #[test]
    fn test_position_before_bounds() {
        let mut list = ListNode::default();
        list.insert_sorted("M".into(), NodeId::new("1:0"));
        list.insert_sorted("d".into(), NodeId::new("1:1"));
        let front = list.position_before(0);
        let middle = list.position_before(1);
        let back = list.position_before(2);
        assert!(front.as_str() < "M");
        assert!("M" < middle.as_str() && middle.as_str() < "d");
        assert!(back.as_str() > "d");
    }
}
