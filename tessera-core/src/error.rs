//! Error types for document operations.

use thiserror::Error;

use crate::id::NodeId;
use crate::op::CrdtType;

/// Errors raised by the document model.
///
/// Stale operations (addressed to nodes that no longer exist) and conflict
/// losses are not errors; they are dropped silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrdtError {
    /// A node with this id is already part of the document.
    #[error("cannot attach {0}: a node with this id is already attached")]
    AlreadyAttached(NodeId),

    /// No node with this id exists in the document.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The node exists but is of a different kind.
    #[error("node {id} is not a {expected:?}")]
    TypeMismatch { id: NodeId, expected: CrdtType },

    /// Registers are leaves and cannot hold children.
    #[error("node {0} cannot hold children")]
    NotAContainer(NodeId),

    /// A create operation names a parent this replica has never seen.
    #[error("node {id} references unknown parent {parent_id}")]
    UnknownParent { id: NodeId, parent_id: NodeId },

    /// A non-root create operation has no parent.
    #[error("node {0} has no parent id or parent key")]
    MissingParent(NodeId),

    /// A flat snapshot could not be turned into a tree.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// List index outside the valid range for the operation.
    #[error("cannot {operation} list item at index {index}: list has {len} items")]
    IndexOutOfRange {
        operation: &'static str,
        index: usize,
        len: usize,
    },

    /// `batch` was called while another batch is open.
    #[error("batch cannot be called during a batch")]
    NestedBatch,

    /// `undo`/`redo` was called while a batch is open.
    #[error("undo and redo are not allowed during a batch")]
    HistoryDuringBatch,
}
