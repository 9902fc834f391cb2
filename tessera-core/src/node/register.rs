//! Register: an immutable JSON leaf stored in a List or Map.

use serde_json::Value;

use super::{Crdt, ParentLink};
use crate::document::Document;
use crate::id::NodeId;
use crate::op::{CrdtType, Op};

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterNode {
    data: Value,
}

impl RegisterNode {
    pub(crate) fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl Crdt for RegisterNode {
    fn crdt_type(&self) -> CrdtType {
        CrdtType::Register
    }

    fn create_op(&self, id: &NodeId, parent: Option<&ParentLink>) -> Op {
        // Registers only ever live inside a container.
        let (parent_id, parent_key) = parent
            .map(|p| (p.id.clone(), p.key.clone()))
            .unwrap_or_else(|| (NodeId::root(), String::new()));
        Op::CreateRegister {
            id: id.clone(),
            parent_id,
            parent_key,
            data: self.data.clone(),
            op_id: None,
        }
    }

    fn children(&self) -> Vec<NodeId> {
        Vec::new()
    }

    fn remove_child(&mut self, _child: &NodeId) -> Option<String> {
        None
    }

    fn to_json(&self, _doc: &Document) -> Value {
        self.data.clone()
    }
}
