//! Unattached values.
//!
//! A draft is a node that is not part of any document yet. Drafts are plain
//! owned data: mutating one changes it in place and produces no operations.
//! Ids are assigned when a draft is attached, never before.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::CrdtError;

/// A value about to be written into a document.
///
/// `Json` stays inline when written to an Object key and becomes a Register
/// node when written into a List or Map.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Json(Value),
    Object(ObjectDraft),
    List(ListDraft),
    Map(MapDraft),
}

impl Draft {
    pub fn object() -> ObjectDraft {
        ObjectDraft::default()
    }

    pub fn list() -> ListDraft {
        ListDraft::default()
    }

    pub fn map() -> MapDraft {
        MapDraft::default()
    }

    /// Plain JSON view of the draft.
    pub fn to_json(&self) -> Value {
        match self {
            Draft::Json(value) => value.clone(),
            Draft::Object(object) => Value::Object(
                object
                    .entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Draft::List(list) => Value::Array(list.items.iter().map(Draft::to_json).collect()),
            Draft::Map(map) => Value::Object(
                map.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// An Object node before attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDraft {
    pub(crate) entries: IndexMap<String, Draft>,
}

impl ObjectDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ObjectDraft::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Draft>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Draft>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Shallow-merges `overrides` into the draft.
    pub fn update<K, V>(&mut self, overrides: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Draft>,
    {
        for (key, value) in overrides {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Draft> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Draft> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A List node before attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListDraft {
    pub(crate) items: Vec<Draft>,
}

impl ListDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, value: impl Into<Draft>) -> Self {
        self.push(value);
        self
    }

    pub fn push(&mut self, value: impl Into<Draft>) {
        self.items.push(value.into());
    }

    /// Inserts at `index`. Fails if `index` is past the end.
    pub fn insert(&mut self, index: usize, value: impl Into<Draft>) -> Result<(), CrdtError> {
        if index > self.items.len() {
            return Err(CrdtError::IndexOutOfRange {
                operation: "insert",
                index,
                len: self.items.len(),
            });
        }
        self.items.insert(index, value.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A Map node before attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapDraft {
    pub(crate) entries: IndexMap<String, Draft>,
}

impl MapDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Draft>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Draft>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<ObjectDraft> for Draft {
    fn from(value: ObjectDraft) -> Self {
        Draft::Object(value)
    }
}

impl From<ListDraft> for Draft {
    fn from(value: ListDraft) -> Self {
        Draft::List(value)
    }
}

impl From<MapDraft> for Draft {
    fn from(value: MapDraft) -> Self {
        Draft::Map(value)
    }
}

macro_rules! json_draft {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Draft {
                fn from(value: $ty) -> Self {
                    Draft::Json(Value::from(value))
                }
            }
        )*
    };
}

json_draft!(Value, &str, String, bool, i32, i64, u32, u64, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_update_in_place() {
        let mut draft = Draft::object().with("a", 1);
        draft.update([("a", 2), ("b", 3)]);
        assert_eq!(Draft::Object(draft).to_json(), json!({"a": 2, "b": 3}));
    }

    #[test]
    fn test_nested_to_json() {
        let draft = Draft::object()
            .with("list", Draft::list().with("x").with(Draft::map().with("k", true)))
            .with("n", Value::Null);
        assert_eq!(
            Draft::from(draft).to_json(),
            json!({"list": ["x", {"k": true}], "n": null})
        );
    }

    #[test]
    fn test_list_insert_out_of_range_fails() {
        let mut list = Draft::list().with(1);
        assert_eq!(
            list.insert(10, 2),
            Err(CrdtError::IndexOutOfRange {
                operation: "insert",
                index: 10,
                len: 1
            })
        );
        list.insert(1, 2).unwrap();
        list.insert(0, 0).unwrap();
        assert_eq!(Draft::from(list).to_json(), json!([0, 1, 2]));
    }
}
