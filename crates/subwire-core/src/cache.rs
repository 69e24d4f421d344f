//! Dedup/memoization store for resolved and in-flight resources.

use std::collections::HashMap;

use crate::message::{Message, ResourceKey};

/// Three-state resource cache.
///
/// One cell per key encodes every state: a missing entry means the resource
/// was never seen, `None` is the pending sentinel (requested, no answer yet)
/// and `Some` holds the last received message. Pending and resolved can
/// therefore never hold for the same key at once.
#[derive(Debug, Default)]
pub struct Cache {
    slots: HashMap<ResourceKey, Option<Message>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True only if the slot holds a resolved message.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        matches!(self.slots.get(key), Some(Some(_)))
    }

    /// The resolved value; never yields the pending sentinel.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<&Message> {
        self.slots.get(key).and_then(Option::as_ref)
    }

    /// Store the message at its own key, overwriting pending or stale state.
    pub fn add(&mut self, msg: Message) {
        self.slots.insert(msg.key(), Some(msg));
    }

    /// True only if the slot is pending.
    #[must_use]
    pub fn is_value_requested(&self, key: &ResourceKey) -> bool {
        matches!(self.slots.get(key), Some(None))
    }

    /// Mark the key as requested. Never regresses a resolved value.
    pub fn set_value_is_requested(&mut self, key: ResourceKey) {
        self.slots.entry(key).or_insert(None);
    }

    /// Evict the slot entirely, back to the never-seen state.
    pub fn remove(&mut self, key: &ResourceKey) {
        self.slots.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user_msg(id: &str) -> Message {
        let mut msg = Message::new("user", "set");
        msg.set_id(id);
        msg.set_data(json!({ "id": id }));
        msg
    }

    #[test]
    fn absent_key_is_neither_pending_nor_resolved() {
        let cache = Cache::new();
        let key = ResourceKey::new("user", Some("42".into()));
        assert!(!cache.contains(&key));
        assert!(!cache.is_value_requested(&key));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn add_resolves_and_roundtrips() {
        let mut cache = Cache::new();
        let msg = user_msg("42");
        let key = msg.key();
        cache.add(msg.clone());
        assert!(cache.contains(&key));
        assert_eq!(cache.get(&key), Some(&msg));
    }

    #[test]
    fn pending_and_resolved_are_exclusive() {
        let mut cache = Cache::new();
        let key = ResourceKey::new("user", Some("42".into()));

        cache.set_value_is_requested(key.clone());
        assert!(cache.is_value_requested(&key));
        assert!(!cache.contains(&key));
        assert!(cache.get(&key).is_none());

        cache.add(user_msg("42"));
        assert!(!cache.is_value_requested(&key));
        assert!(cache.contains(&key));
    }

    #[test]
    fn set_requested_never_regresses_resolved() {
        let mut cache = Cache::new();
        let msg = user_msg("42");
        let key = msg.key();
        cache.add(msg.clone());

        cache.set_value_is_requested(key.clone());
        assert!(cache.contains(&key));
        assert_eq!(cache.get(&key), Some(&msg));
    }

    #[test]
    fn add_overwrites_previous_value() {
        let mut cache = Cache::new();
        let key = user_msg("42").key();
        cache.add(user_msg("42"));

        let mut newer = user_msg("42");
        newer.set_data(json!({ "name": "Ann" }));
        cache.add(newer.clone());
        assert_eq!(cache.get(&key), Some(&newer));
    }

    #[test]
    fn remove_returns_slot_to_absent() {
        let mut cache = Cache::new();
        let msg = user_msg("42");
        let key = msg.key();
        cache.add(msg);
        cache.remove(&key);
        assert!(!cache.contains(&key));
        assert!(!cache.is_value_requested(&key));
    }

    #[test]
    fn collection_slot_is_distinct_from_instances() {
        let mut cache = Cache::new();
        let list = Message::new("user", "set");
        cache.add(list);

        let list_key = ResourceKey::new("user", None);
        let instance_key = ResourceKey::new("user", Some("42".into()));
        assert!(cache.contains(&list_key));
        assert!(!cache.contains(&instance_key));
    }
}
