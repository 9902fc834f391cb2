//! Replicated document model: a tree of Objects, Lists, Maps and Registers
//! whose mutations are expressed as serializable ops that converge across
//! replicas.

pub mod document;
pub mod draft;
pub mod error;
pub mod history;
pub mod id;
pub mod node;
pub mod op;
pub mod position;

pub use document::{Document, SubscriptionId};
pub use draft::{Draft, ListDraft, MapDraft, ObjectDraft};
pub use error::CrdtError;
pub use history::HISTORY_CAPACITY;
pub use id::{NodeId, OpId, ROOT_ID};
pub use node::{ListMut, MapMut, Node, NodeKind, ObjectMut, ParentLink, Property};
pub use op::{CrdtType, Op, SerializedCrdt, SnapshotItem};
