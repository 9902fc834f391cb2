//! Node and operation identifiers.
//!
//! Both are `actor:counter` strings. The root object is always `"root"`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Id of the root object node.
pub const ROOT_ID: &str = "root";

/// Identifier of a node, unique within a document.
///
/// Ordering compares the parsed `(actor, counter)` pair numerically. Ids that
/// do not parse (the root) sort before all others; equal pairs fall back to
/// the raw string so the order stays total and consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    pub(crate) fn generated(actor: u64, counter: u64) -> Self {
        Self(format!("{actor}:{counter}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    /// The `(actor, counter)` pair, if this id was generated by a replica.
    pub fn parts(&self) -> Option<(u64, u64)> {
        parse_parts(&self.0)
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a local write, used for Object conflict arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(String);

impl OpId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub(crate) fn generated(actor: u64, counter: u64) -> Self {
        Self(format!("{actor}:{counter}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_parts(raw: &str) -> Option<(u64, u64)> {
    let (actor, counter) = raw.split_once(':')?;
    Some((actor.parse().ok()?, counter.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_format() {
        let id = NodeId::generated(3, 14);
        assert_eq!(id.as_str(), "3:14");
        assert_eq!(id.parts(), Some((3, 14)));
        assert!(!id.is_root());
    }

    #[test]
    fn test_numeric_ordering() {
        // Lexicographically "10:0" < "9:0"; numerically it is greater.
        assert!(NodeId::new("9:0") < NodeId::new("10:0"));
        assert!(NodeId::new("1:2") < NodeId::new("1:10"));
    }

    #[test]
    fn test_root_sorts_first() {
        assert!(NodeId::root() < NodeId::new("0:0"));
        assert!(NodeId::root().is_root());
    }

    #[test]
    fn test_order_consistent_with_eq() {
        let a = NodeId::new("01:2");
        let b = NodeId::new("1:2");
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_serde_transparent() {
        let id = NodeId::new("2:5");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"2:5\"");
        let back: NodeId = serde_json::from_str("\"2:5\"").unwrap();
        assert_eq!(back, id);
    }
}
