//! Injected Key/Value Storage
//!
//! Identity state and the read cache never touch ambient globals. Both are
//! handed a [`KeyValueStore`] at construction time: the identity provider gets
//! a store that outlives the session (tokens, anonymous session id), the cache
//! gets one scoped to the session. Tests pass fresh [`MemoryStore`]s.

use std::collections::HashMap;

use parking_lot::RwLock;

/// String key/value storage shared across the client
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: String);

    /// Remove a value; removing a missing key is a no-op
    fn remove(&self, key: &str);

    /// All keys currently stored
    fn keys(&self) -> Vec<String>;

    /// Remove every key starting with `prefix`, returning how many went
    fn remove_prefix(&self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

/// Process-local store; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", "1".to_string());
        store.set("a", "2".to_string());
        assert_eq!(store.get("a"), Some("2".to_string()));
        assert_eq!(store.len(), 1);

        store.remove("a");
        store.remove("a");
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_remove_prefix() {
        let store = MemoryStore::new();
        store.set("cache:/x:u1", "x".to_string());
        store.set("cache:/y:u1", "y".to_string());
        store.set("other", "z".to_string());

        assert_eq!(store.remove_prefix("cache:"), 2);
        assert_eq!(store.keys(), vec!["other".to_string()]);
    }
}
