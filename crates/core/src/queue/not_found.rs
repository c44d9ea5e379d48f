use std::collections::HashSet;
use std::sync::Mutex;

use super::types::NotFoundKey;

/// Set of `(name, set)` pairs the remote has confirmed absent.
///
/// Shared between every queue of a process. Locked independently of any
/// queue state.
#[derive(Debug, Default)]
pub struct NotFoundMemo {
    keys: Mutex<HashSet<NotFoundKey>>,
}

impl NotFoundMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: NotFoundKey) {
        self.lock().insert(key);
    }

    pub fn discard(&self, key: &NotFoundKey) {
        self.lock().remove(key);
    }

    pub fn contains(&self, key: &NotFoundKey) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<NotFoundKey>> {
        // A poisoned set is still a valid set.
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_contains_discard() {
        let memo = NotFoundMemo::new();
        let key = NotFoundKey::new("Mirrorpool", "AEOE");
        assert!(!memo.contains(&key));

        memo.add(key.clone());
        assert!(memo.contains(&NotFoundKey::new("mirrorpool", "aeoe")));
        assert_eq!(memo.len(), 1);

        memo.discard(&key);
        assert!(memo.is_empty());
    }

    #[test]
    fn test_different_set_not_blocked() {
        let memo = NotFoundMemo::new();
        memo.add(NotFoundKey::new("Bolt", "m11"));
        assert!(!memo.contains(&NotFoundKey::new("Bolt", "m10")));
        assert!(!memo.contains(&NotFoundKey::new("Bolt", "")));
    }
}
