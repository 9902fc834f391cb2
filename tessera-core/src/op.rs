//! Wire operations and serialized node snapshots.
//!
//! JSON format (one record per op, `type` tag):
//! ```text
//! {"type":"CreateObject","id":"1:0","parentId":"root","parentKey":"a","data":{}}
//! {"type":"UpdateObject","id":"root","data":{"a":1},"opId":"1:3"}
//! {"type":"SetParentKey","id":"1:4","parentKey":"V"}
//! ```
//! Root nodes carry no `parentId`/`parentKey`. Unknown `type` tags fail to
//! deserialize.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::{NodeId, OpId};

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrdtType {
    Object,
    List,
    Map,
    Register,
}

/// One atomic change to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Op {
    CreateObject {
        id: NodeId,
        #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<NodeId>,
        #[serde(rename = "parentKey", default, skip_serializing_if = "Option::is_none")]
        parent_key: Option<String>,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
    },
    CreateList {
        id: NodeId,
        #[serde(rename = "parentId")]
        parent_id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
    },
    CreateMap {
        id: NodeId,
        #[serde(rename = "parentId")]
        parent_id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
    },
    CreateRegister {
        id: NodeId,
        #[serde(rename = "parentId")]
        parent_id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
        #[serde(default)]
        data: Value,
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
    },
    UpdateObject {
        id: NodeId,
        data: Map<String, Value>,
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
    },
    DeleteObjectKey {
        id: NodeId,
        key: String,
    },
    DeleteCrdt {
        id: NodeId,
    },
    SetParentKey {
        id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
    },
}

impl Op {
    /// Id of the node this op targets (or creates).
    pub fn id(&self) -> &NodeId {
        match self {
            Op::CreateObject { id, .. }
            | Op::CreateList { id, .. }
            | Op::CreateMap { id, .. }
            | Op::CreateRegister { id, .. }
            | Op::UpdateObject { id, .. }
            | Op::DeleteObjectKey { id, .. }
            | Op::DeleteCrdt { id }
            | Op::SetParentKey { id, .. } => id,
        }
    }

    pub fn op_id(&self) -> Option<&OpId> {
        match self {
            Op::CreateObject { op_id, .. }
            | Op::CreateList { op_id, .. }
            | Op::CreateMap { op_id, .. }
            | Op::CreateRegister { op_id, .. }
            | Op::UpdateObject { op_id, .. } => op_id.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn set_op_id(&mut self, value: OpId) {
        match self {
            Op::CreateObject { op_id, .. }
            | Op::CreateList { op_id, .. }
            | Op::CreateMap { op_id, .. }
            | Op::CreateRegister { op_id, .. }
            | Op::UpdateObject { op_id, .. } => *op_id = Some(value),
            _ => {}
        }
    }

    /// `(parent_id, parent_key)` of a create op.
    pub fn parent(&self) -> Option<(&NodeId, &str)> {
        match self {
            Op::CreateObject {
                parent_id: Some(parent_id),
                parent_key: Some(parent_key),
                ..
            } => Some((parent_id, parent_key)),
            Op::CreateList { parent_id, parent_key, .. }
            | Op::CreateMap { parent_id, parent_key, .. }
            | Op::CreateRegister { parent_id, parent_key, .. } => Some((parent_id, parent_key)),
            _ => None,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Op::CreateObject { .. }
                | Op::CreateList { .. }
                | Op::CreateMap { .. }
                | Op::CreateRegister { .. }
        )
    }
}

/// One node of a flat snapshot, keyed by its id in [`SnapshotItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SerializedCrdt {
    Object {
        #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<NodeId>,
        #[serde(rename = "parentKey", default, skip_serializing_if = "Option::is_none")]
        parent_key: Option<String>,
        #[serde(default)]
        data: Map<String, Value>,
    },
    List {
        #[serde(rename = "parentId")]
        parent_id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
    },
    Map {
        #[serde(rename = "parentId")]
        parent_id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
    },
    Register {
        #[serde(rename = "parentId")]
        parent_id: NodeId,
        #[serde(rename = "parentKey")]
        parent_key: String,
        #[serde(default)]
        data: Value,
    },
}

impl SerializedCrdt {
    pub fn parent_id(&self) -> Option<&NodeId> {
        match self {
            SerializedCrdt::Object { parent_id, .. } => parent_id.as_ref(),
            SerializedCrdt::List { parent_id, .. }
            | SerializedCrdt::Map { parent_id, .. }
            | SerializedCrdt::Register { parent_id, .. } => Some(parent_id),
        }
    }

    pub fn parent_key(&self) -> Option<&str> {
        match self {
            SerializedCrdt::Object { parent_key, .. } => parent_key.as_deref(),
            SerializedCrdt::List { parent_key, .. }
            | SerializedCrdt::Map { parent_key, .. }
            | SerializedCrdt::Register { parent_key, .. } => Some(parent_key),
        }
    }

    pub fn crdt_type(&self) -> CrdtType {
        match self {
            SerializedCrdt::Object { .. } => CrdtType::Object,
            SerializedCrdt::List { .. } => CrdtType::List,
            SerializedCrdt::Map { .. } => CrdtType::Map,
            SerializedCrdt::Register { .. } => CrdtType::Register,
        }
    }
}

/// `[id, node]` pair of a flat snapshot.
pub type SnapshotItem = (NodeId, SerializedCrdt);
