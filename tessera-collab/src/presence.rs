//! Roster of the other participants connected to a room.
//!
//! Each participant is identified by the actor number the server assigned to
//! its connection. Presence is a free-form JSON object that other clients
//! patch with shallow merges: top-level keys replace, nested values do not
//! merge.

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::Presence;

/// Another participant, as seen from this client.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub actor: u64,
    pub id: Option<String>,
    pub info: Option<Value>,
    pub presence: Presence,
}

impl User {
    pub fn new(actor: u64, id: Option<String>, info: Option<Value>) -> Self {
        Self {
            actor,
            id,
            info,
            presence: Presence::new(),
        }
    }
}

/// Roster change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum OthersEvent {
    Enter(User),
    Leave(User),
    /// `patch` is the delta that was merged into `user.presence`.
    Update { user: User, patch: Presence },
    Reset,
}

/// Copies every top-level key of `patch` into `target`.
pub fn merge_presence(target: &mut Presence, patch: &Presence) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Other participants keyed by actor, in join order.
#[derive(Debug, Clone, Default)]
pub struct Others {
    users: IndexMap<u64, User>,
}

impl Others {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: u64) -> Option<&User> {
        self.users.get(&actor)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn to_vec(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    /// Adds or replaces a user. A rejoin keeps no presence from before.
    pub fn join(&mut self, actor: u64, id: Option<String>, info: Option<Value>) -> OthersEvent {
        let user = User::new(actor, id, info);
        self.users.insert(actor, user.clone());
        OthersEvent::Enter(user)
    }

    pub fn leave(&mut self, actor: u64) -> Option<OthersEvent> {
        self.users.shift_remove(&actor).map(OthersEvent::Leave)
    }

    /// Merges a presence patch, creating the user if it has not been
    /// announced yet.
    pub fn update_presence(&mut self, actor: u64, patch: Presence) -> OthersEvent {
        let user = self
            .users
            .entry(actor)
            .or_insert_with(|| User::new(actor, None, None));
        merge_presence(&mut user.presence, &patch);
        OthersEvent::Update {
            user: user.clone(),
            patch,
        }
    }

    /// Replaces the whole roster. Users already known keep their presence.
    pub fn reset<I>(&mut self, users: I) -> OthersEvent
    where
        I: IntoIterator<Item = (u64, Option<String>, Option<Value>)>,
    {
        let mut previous = std::mem::take(&mut self.users);
        for (actor, id, info) in users {
            let mut user = User::new(actor, id, info);
            if let Some(known) = previous.shift_remove(&actor) {
                user.presence = known.presence;
            }
            self.users.insert(actor, user);
        }
        OthersEvent::Reset
    }

    pub fn clear(&mut self) -> OthersEvent {
        self.users.clear();
        OthersEvent::Reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> Presence {
        match value {
            Value::Object(map) => map,
            _ => panic!("presence patch must be an object"),
        }
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut presence = patch(json!({"cursor": {"x": 1, "y": 2}, "name": "a"}));
        merge_presence(&mut presence, &patch(json!({"cursor": {"x": 5}})));
        assert_eq!(
            Value::Object(presence),
            json!({"cursor": {"x": 5}, "name": "a"})
        );
    }

    #[test]
    fn test_join_and_leave() {
        let mut others = Others::new();
        let event = others.join(2, Some("bob".into()), None);
        assert!(matches!(event, OthersEvent::Enter(ref u) if u.actor == 2));
        assert_eq!(others.len(), 1);

        match others.leave(2) {
            Some(OthersEvent::Leave(user)) => assert_eq!(user.id.as_deref(), Some("bob")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(others.leave(2).is_none());
        assert!(others.is_empty());
    }

    #[test]
    fn test_update_creates_unknown_user() {
        let mut others = Others::new();
        let event = others.update_presence(9, patch(json!({"x": 1})));
        match event {
            OthersEvent::Update { user, patch } => {
                assert_eq!(user.actor, 9);
                assert_eq!(user.id, None);
                assert_eq!(Value::Object(patch), json!({"x": 1}));
            }
            other => panic!("unexpected {other:?}"),
        }
        others.update_presence(9, patch(json!({"y": 2})));
        assert_eq!(
            Value::Object(others.get(9).unwrap().presence.clone()),
            json!({"x": 1, "y": 2})
        );
    }

    #[test]
    fn test_reset_replaces_roster() {
        let mut others = Others::new();
        others.join(1, None, None);
        others.update_presence(1, patch(json!({"x": 1})));
        others.join(2, None, None);

        let event = others.reset(vec![(1, Some("a".into()), None), (3, None, None)]);
        assert_eq!(event, OthersEvent::Reset);
        let actors: Vec<u64> = others.iter().map(|u| u.actor).collect();
        assert_eq!(actors, vec![1, 3]);
        assert_eq!(others.get(1).unwrap().id.as_deref(), Some("a"));
        assert_eq!(
            Value::Object(others.get(1).unwrap().presence.clone()),
            json!({"x": 1})
        );
    }
}
