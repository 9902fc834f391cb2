//! Undo/redo behavior and reverse-op correctness.

use proptest::prelude::*;
use serde_json::json;
use tessera_core::{CrdtError, Document, Draft, NodeId, Op, HISTORY_CAPACITY};

fn list_doc(values: &[&str]) -> (Document, NodeId) {
    let mut list = Draft::list();
    for v in values {
        list.push(*v);
    }
    let doc = Document::from_root(0, Draft::object().with("items", list)).unwrap();
    let items = doc.child(doc.root(), "items").cloned().unwrap();
    (doc, items)
}

/// A list whose children all arrived from remote peers at the same position.
fn tied_list(values: &[&str]) -> (Document, NodeId) {
    let (mut doc, items) = list_doc(&[]);
    let ops = values
        .iter()
        .enumerate()
        .map(|(n, v)| Op::CreateRegister {
            id: NodeId::new(format!("{}:0", n + 1)),
            parent_id: items.clone(),
            parent_key: "V".into(),
            data: json!(v),
            op_id: None,
        })
        .collect();
    doc.apply_remote(ops).unwrap();
    assert_eq!(doc.to_json()["items"], json!(values));
    (doc, items)
}

#[test]
fn test_object_update_undo() {
    let mut doc = Document::new(0);
    doc.root_mut().update([("a", 1)]).unwrap();
    assert_eq!(doc.to_json(), json!({"a": 1}));
    assert!(doc.undo().unwrap());
    assert_eq!(doc.to_json(), json!({}));
}

#[test]
fn test_list_move_undo() {
    let (mut doc, items) = list_doc(&["A", "B", "C"]);
    doc.list_mut(&items).unwrap().move_item(0, 2).unwrap();
    assert_eq!(doc.to_json()["items"], json!(["B", "C", "A"]));
    assert!(doc.undo().unwrap());
    assert_eq!(doc.to_json()["items"], json!(["A", "B", "C"]));
}

#[test]
fn test_move_forward_and_backward() {
    let (mut doc, items) = list_doc(&["A", "B", "C", "D"]);
    doc.list_mut(&items).unwrap().move_item(1, 2).unwrap();
    assert_eq!(doc.to_json()["items"], json!(["A", "C", "B", "D"]));
    doc.list_mut(&items).unwrap().move_item(3, 0).unwrap();
    assert_eq!(doc.to_json()["items"], json!(["D", "A", "C", "B"]));
}

#[test]
fn test_move_emits_single_set_parent_key() {
    let (mut doc, items) = list_doc(&["A", "B", "C"]);
    doc.list_mut(&items).unwrap().move_item(2, 0).unwrap();
    let ops = doc.take_outbox();
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], Op::SetParentKey { .. }));
}

#[test]
fn test_move_to_same_index_is_noop() {
    let (mut doc, items) = list_doc(&["A", "B"]);
    doc.list_mut(&items).unwrap().move_item(1, 1).unwrap();
    assert!(!doc.has_outbox());
    assert!(!doc.can_undo());
}

#[test]
fn test_out_of_range_list_ops_fail() {
    let (mut doc, items) = list_doc(&["A"]);
    let mut list = doc.list_mut(&items).unwrap();
    assert_eq!(
        list.insert(3, "x"),
        Err(CrdtError::IndexOutOfRange {
            operation: "insert",
            index: 3,
            len: 1
        })
    );
    assert!(matches!(
        list.move_item(0, 1),
        Err(CrdtError::IndexOutOfRange { operation: "move", .. })
    ));
    assert!(matches!(
        list.delete(1),
        Err(CrdtError::IndexOutOfRange { operation: "delete", .. })
    ));
}

#[test]
fn test_list_delete_undo_restores_nested() {
    let mut doc = Document::from_root(
        0,
        Draft::object().with(
            "items",
            Draft::list()
                .with(Draft::object().with("name", "a").with("tags", Draft::list().with("t")))
                .with("b"),
        ),
    )
    .unwrap();
    let before = doc.to_json();
    let items = doc.child(doc.root(), "items").cloned().unwrap();
    doc.list_mut(&items).unwrap().delete(0).unwrap();
    assert_eq!(doc.to_json()["items"], json!(["b"]));
    doc.undo().unwrap();
    assert_eq!(doc.to_json(), before);
}

#[test]
fn test_list_clear_is_one_step() {
    let (mut doc, items) = list_doc(&["A", "B", "C"]);
    doc.list_mut(&items).unwrap().clear().unwrap();
    assert_eq!(doc.to_json()["items"], json!([]));
    assert_eq!(doc.take_outbox().len(), 3);
    doc.undo().unwrap();
    assert_eq!(doc.to_json()["items"], json!(["A", "B", "C"]));
}

#[test]
fn test_redo_after_undo() {
    let mut doc = Document::new(0);
    doc.root_mut().set("a", 1).unwrap();
    doc.root_mut().set("a", 2).unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.to_json(), json!({"a": 1}));
    assert!(doc.can_redo());
    doc.redo().unwrap();
    assert_eq!(doc.to_json(), json!({"a": 2}));
    doc.undo().unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.to_json(), json!({}));
    assert!(!doc.undo().unwrap());
}

#[test]
fn test_new_mutation_clears_redo() {
    let mut doc = Document::new(0);
    doc.root_mut().set("a", 1).unwrap();
    doc.undo().unwrap();
    assert!(doc.can_redo());
    doc.root_mut().set("b", 1).unwrap();
    assert!(!doc.can_redo());
}

#[test]
fn test_undo_replays_are_dispatched_with_op_ids() {
    let mut doc = Document::new(0);
    doc.root_mut().set("a", 1).unwrap();
    doc.take_outbox();
    doc.undo().unwrap();
    let ops = doc.take_outbox();
    assert_eq!(ops, vec![Op::DeleteObjectKey { id: NodeId::root(), key: "a".into() }]);

    doc.redo().unwrap();
    let ops = doc.take_outbox();
    assert_eq!(ops.len(), 1);
    assert!(ops[0].op_id().is_some());
}

#[test]
fn test_history_is_bounded() {
    let mut doc = Document::new(0);
    for n in 0..HISTORY_CAPACITY + 5 {
        doc.root_mut().set("n", n as i64).unwrap();
    }
    let mut undone = 0;
    while doc.undo().unwrap() {
        undone += 1;
    }
    assert_eq!(undone, HISTORY_CAPACITY);
    assert_eq!(doc.to_json(), json!({"n": 4}));
}

#[test]
fn test_object_node_value_replaced_and_restored() {
    let mut doc = Document::new(0);
    doc.root_mut()
        .set("child", Draft::object().with("x", 1))
        .unwrap();
    let before = doc.to_json();
    let child = doc.child(doc.root(), "child").cloned().unwrap();
    doc.root_mut().set("child", "plain").unwrap();
    assert!(!doc.contains(&child));
    assert!(doc.is_deleted(&child));
    doc.undo().unwrap();
    assert_eq!(doc.to_json(), before);
    assert!(doc.contains(&child));
}

#[test]
fn test_object_delete_key_undo() {
    let mut doc = Document::from_root(0, Draft::object().with("a", 1).with("b", Draft::map())).unwrap();
    let before = doc.to_json();
    doc.root_mut().delete("a").unwrap();
    doc.root_mut().delete("b").unwrap();
    doc.root_mut().delete("missing").unwrap();
    assert_eq!(doc.to_json(), json!({}));
    doc.undo().unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.to_json(), before);
}

#[test]
fn test_null_and_absent_stay_distinct() {
    let mut doc = Document::new(0);
    doc.root_mut().set("a", serde_json::Value::Null).unwrap();
    assert_eq!(doc.to_json(), json!({"a": null}));
    doc.root_mut().delete("a").unwrap();
    assert_eq!(doc.to_json(), json!({}));
    doc.undo().unwrap();
    assert_eq!(doc.to_json(), json!({"a": null}));
}

#[test]
fn test_map_set_and_delete_undo() {
    let mut doc = Document::from_root(0, Draft::object().with("m", Draft::map().with("k", 1))).unwrap();
    let m = doc.child(doc.root(), "m").cloned().unwrap();
    doc.map_mut(&m).unwrap().set("k", 2).unwrap();
    doc.map_mut(&m).unwrap().set("j", Draft::list().with(true)).unwrap();
    assert_eq!(doc.to_json()["m"], json!({"k": 2, "j": [true]}));
    assert!(doc.map_mut(&m).unwrap().delete("k").unwrap());
    assert!(!doc.map_mut(&m).unwrap().delete("k").unwrap());
    doc.undo().unwrap();
    assert_eq!(doc.to_json()["m"], json!({"k": 2, "j": [true]}));
    doc.undo().unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.to_json()["m"], json!({"k": 1}));
}

#[test]
fn test_map_delete_removes_nested_nodes() {
    let mut doc = Document::from_root(
        0,
        Draft::object().with(
            "m",
            Draft::map().with("first", Draft::object().with("inner", Draft::object().with("a", 0))),
        ),
    )
    .unwrap();
    let m = doc.child(doc.root(), "m").cloned().unwrap();
    let count = doc.len();
    doc.map_mut(&m).unwrap().delete("first").unwrap();
    assert_eq!(doc.len(), count - 2);
}

#[test]
fn test_remote_insert_before_pending_push() {
    let (mut doc, items) = list_doc(&[]);
    doc.list_mut(&items).unwrap().push("0").unwrap();
    let remote = Op::CreateRegister {
        id: NodeId::new("1:0"),
        parent_id: items.clone(),
        parent_key: "A".into(),
        data: json!("1"),
        op_id: None,
    };
    let modified = doc.apply_remote(vec![remote]).unwrap();
    assert_eq!(modified, vec![items]);
    assert_eq!(doc.to_json()["items"], json!(["1", "0"]));
}

#[test]
fn test_insert_between_tied_siblings() {
    let (mut doc, items) = tied_list(&["a", "b"]);
    let mut peer = Document::load(9, doc.to_snapshot()).unwrap();

    doc.list_mut(&items).unwrap().insert(1, "x").unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "x", "b"]));

    let ops = doc.take_outbox();
    assert!(matches!(&ops[..], [Op::SetParentKey { id, .. }, Op::CreateRegister { .. }] if id.as_str() == "2:0"));
    peer.apply_remote(ops).unwrap();
    assert_eq!(peer.to_json(), doc.to_json());

    assert!(doc.undo().unwrap());
    assert_eq!(doc.to_json()["items"], json!(["a", "b"]));
    assert!(!doc.can_undo());
    doc.redo().unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "x", "b"]));
}

#[test]
fn test_insert_into_tied_run_keeps_order() {
    let (mut doc, items) = tied_list(&["a", "b", "c", "d"]);
    doc.list_mut(&items).unwrap().insert(2, "x").unwrap();
    doc.list_mut(&items).unwrap().insert(1, "y").unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "y", "b", "x", "c", "d"]));
    doc.undo().unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "b", "c", "d"]));
}

#[test]
fn test_remote_ops_with_invalid_positions_are_dropped() {
    let (mut doc, items) = tied_list(&["a"]);
    let ops = vec![
        Op::CreateRegister {
            id: NodeId::new("5:0"),
            parent_id: items.clone(),
            parent_key: "~".into(),
            data: json!("z"),
            op_id: None,
        },
        Op::SetParentKey {
            id: NodeId::new("1:0"),
            parent_key: "".into(),
        },
    ];
    assert!(doc.apply_remote(ops).unwrap().is_empty());
    assert!(!doc.contains(&NodeId::new("5:0")));
    assert!(doc.is_deleted(&NodeId::new("5:0")));
    doc.list_mut(&items).unwrap().push("b").unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "b"]));
}

#[test]
fn test_move_between_tied_siblings() {
    let (mut doc, items) = tied_list(&["a", "b", "c"]);
    doc.list_mut(&items).unwrap().move_item(0, 1).unwrap();
    assert_eq!(doc.to_json()["items"], json!(["b", "a", "c"]));
    doc.undo().unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "b", "c"]));

    doc.list_mut(&items).unwrap().move_item(2, 1).unwrap();
    assert_eq!(doc.to_json()["items"], json!(["a", "c", "b"]));
    assert!(doc.undo().unwrap());
    assert_eq!(doc.to_json()["items"], json!(["a", "b", "c"]));
}

#[derive(Debug, Clone)]
enum Action {
    Set(u8, i64),
    SetNode(u8, i64),
    Unset(u8),
    Push(i64),
    Insert(usize, i64),
    Delete(usize),
    Move(usize, usize),
    MapSet(u8, i64),
    MapDelete(u8),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..3, 0i64..100).prop_map(|(k, v)| Action::Set(k, v)),
        (0u8..3, 0i64..100).prop_map(|(k, v)| Action::SetNode(k, v)),
        (0u8..3).prop_map(Action::Unset),
        (0i64..100).prop_map(Action::Push),
        (0usize..8, 0i64..100).prop_map(|(i, v)| Action::Insert(i, v)),
        (0usize..8).prop_map(Action::Delete),
        (0usize..8, 0usize..8).prop_map(|(f, t)| Action::Move(f, t)),
        (0u8..3, 0i64..100).prop_map(|(k, v)| Action::MapSet(k, v)),
        (0u8..3).prop_map(Action::MapDelete),
    ]
}

fn apply(doc: &mut Document, action: &Action) {
    let items = doc.child(doc.root(), "items").cloned().unwrap();
    let map = doc.child(doc.root(), "m").cloned().unwrap();
    match *action {
        Action::Set(k, v) => doc.root_mut().set(format!("k{k}"), v).unwrap(),
        Action::SetNode(k, v) => doc
            .root_mut()
            .set(format!("k{k}"), Draft::object().with("v", v))
            .unwrap(),
        Action::Unset(k) => doc.root_mut().delete(&format!("k{k}")).unwrap(),
        Action::Push(v) => {
            doc.list_mut(&items).unwrap().push(v).unwrap();
        }
        Action::Insert(index, v) => {
            let mut list = doc.list_mut(&items).unwrap();
            let index = index % (list.len() + 1);
            list.insert(index, v).unwrap();
        }
        Action::Delete(index) => {
            let mut list = doc.list_mut(&items).unwrap();
            if !list.is_empty() {
                let index = index % list.len();
                list.delete(index).unwrap();
            }
        }
        Action::Move(from, to) => {
            let mut list = doc.list_mut(&items).unwrap();
            if !list.is_empty() {
                let len = list.len();
                list.move_item(from % len, to % len).unwrap();
            }
        }
        Action::MapSet(k, v) => {
            doc.map_mut(&map).unwrap().set(format!("k{k}"), v).unwrap();
        }
        Action::MapDelete(k) => {
            doc.map_mut(&map).unwrap().delete(&format!("k{k}")).unwrap();
        }
    }
}

proptest! {
    #[test]
    fn prop_undo_redo_round_trip(actions in proptest::collection::vec(action(), 1..40)) {
        let mut doc = Document::from_root(
            0,
            Draft::object()
                .with("k0", "x")
                .with("items", Draft::list().with("a").with("b"))
                .with("m", Draft::map().with("k1", 1)),
        )
        .unwrap();
        let initial = doc.to_json();
        for action in &actions {
            apply(&mut doc, action);
        }
        let last = doc.to_json();

        let mut undone = 0;
        while doc.undo().unwrap() {
            undone += 1;
        }
        prop_assert_eq!(doc.to_json(), initial);

        let mut redone = 0;
        while doc.redo().unwrap() {
            redone += 1;
        }
        prop_assert_eq!(redone, undone);
        prop_assert_eq!(doc.to_json(), last);
    }
}
