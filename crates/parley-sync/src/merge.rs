//! Ordered, id-deduplicated containers fed by both bulk loads and live streams.

use std::collections::HashSet;
use std::hash::Hash;

use parley_shared::transport::ConversationRef;
use parley_shared::types::{ConversationId, MessageId, MessageRecord};

/// Anything with a stable identity.
pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> &Self::Key;
}

impl Keyed for MessageRecord {
    type Key = MessageId;

    fn key(&self) -> &MessageId {
        &self.id
    }
}

impl Keyed for ConversationRef {
    type Key = ConversationId;

    fn key(&self) -> &ConversationId {
        self.id()
    }
}

/// Where a newly seen item goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Front,
    Back,
}

/// Insert `incoming` unless an item with the same key is already present.
/// The first-seen copy always wins. Returns whether `existing` changed.
pub fn merge<T: Keyed>(existing: &mut Vec<T>, incoming: T, placement: Placement) -> bool {
    if existing.iter().any(|item| item.key() == incoming.key()) {
        return false;
    }
    match placement {
        Placement::Front => existing.insert(0, incoming),
        Placement::Back => existing.push(incoming),
    }
    true
}

/// Drop later duplicates, keeping order.
pub fn dedupe<T: Keyed>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.key().clone()))
        .collect()
}

/// Stable ascending sort by sent time.
pub fn sort_chronological(messages: &mut [MessageRecord]) {
    messages.sort_by_key(|m| m.sent_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(&'static str, u32);

    impl Keyed for Item {
        type Key = &'static str;

        fn key(&self) -> &&'static str {
            &self.0
        }
    }

    #[test]
    fn test_merge_prepends_and_appends() {
        let mut items = vec![Item("b", 0)];
        assert!(merge(&mut items, Item("a", 0), Placement::Front));
        assert!(merge(&mut items, Item("c", 0), Placement::Back));
        let keys: Vec<_> = items.iter().map(|i| i.0).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_duplicate_leaves_container_untouched() {
        let mut items = vec![Item("a", 1), Item("b", 1)];
        let before = items.clone();

        assert!(!merge(&mut items, Item("b", 2), Placement::Front));
        assert!(!merge(&mut items, Item("a", 2), Placement::Back));
        assert_eq!(items, before);
    }

    #[test]
    fn test_dedupe_first_seen_wins() {
        let items = vec![Item("a", 1), Item("b", 1), Item("a", 2)];
        assert_eq!(dedupe(items), vec![Item("a", 1), Item("b", 1)]);
    }
}
