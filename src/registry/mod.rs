use parking_lot::RwLock;
use std::collections::HashMap;

/// Concurrency-safe map from camera id to a live session handle. The
/// single source of truth for what is currently running.
///
/// Generic over the handle type so the insertion contract can be tested
/// without spawning real transcoder processes.
pub struct Registry<V: Clone> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<V> {
        self.entries.read().get(id).cloned()
    }

    /// Atomically insert the value produced by `factory` unless an entry
    /// already exists for `id`.
    ///
    /// Exactly one of N concurrent callers racing on the same id runs its
    /// factory; every caller observes the same resulting value. The second
    /// element is `true` for the caller whose factory ran. A factory error
    /// leaves no entry behind.
    ///
    /// The factory executes while the write lock is held, so it must not
    /// block: spawning a process is fine, waiting on one is not.
    pub fn insert_if_absent<F, E>(
        &self,
        id: &str,
        factory: F,
    ) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(id) {
            return Ok((existing.clone(), false));
        }

        let value = factory()?;
        entries.insert(id.to_string(), value.clone());
        Ok((value, true))
    }

    /// Remove and return the entry for `id`. Removing an absent key is a
    /// no-op, not an error.
    pub fn remove(&self, id: &str) -> Option<V> {
        self.entries.write().remove(id)
    }

    /// Point-in-time copy, safe to iterate while the registry keeps
    /// mutating under concurrent starts and stops.
    pub fn snapshot(&self) -> Vec<(String, V)> {
        self.entries
            .read()
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}
