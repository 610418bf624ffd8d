//! In-memory registry of live containers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::container::Container;
use crate::types::ContainerId;

/// Thread-safe map from identifier to container handle.
///
/// The table is never exposed directly: [`ContainerStore::list`] returns a
/// snapshot taken under the lock.
#[derive(Debug, Default)]
pub struct ContainerStore {
    containers: Mutex<HashMap<ContainerId, Arc<Container>>>,
}

impl ContainerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `container`, replacing any handle with the same identifier.
    pub fn add(&self, container: Arc<Container>) {
        let id = container.id().clone();
        self.containers.lock().insert(id, container);
    }

    /// Inserts `container` unless its identifier is present. Returns false
    /// and leaves the store unchanged if it is.
    pub fn add_if_absent(&self, container: Arc<Container>) -> bool {
        let id = container.id().clone();
        let mut containers = self.containers.lock();
        if containers.contains_key(&id) {
            return false;
        }
        containers.insert(id, container);
        true
    }

    /// Returns the container with exactly this identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.lock().get(id).cloned()
    }

    /// Returns true if `id` is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.containers.lock().contains_key(id)
    }

    /// Removes and returns the container.
    pub fn delete(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.lock().remove(id)
    }

    /// Returns every container, newest first, ties by identifier.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Container>> {
        let mut containers: Vec<Arc<Container>> =
            self.containers.lock().values().cloned().collect();
        containers.sort_by_cached_key(|c| (std::cmp::Reverse(c.created()), c.id().clone()));
        containers
    }

    /// Number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerRecord;
    use chrono::{Duration, Utc};

    fn container(id: &str, age_secs: i64) -> Arc<Container> {
        let mut record = ContainerRecord::new(ContainerId::new(id), "vfs");
        record.created = Utc::now() - Duration::seconds(age_secs);
        Arc::new(Container::new(format!("/tmp/{id}"), record))
    }

    #[test]
    fn test_add_get_delete() {
        let store = ContainerStore::new();
        store.add(container("abc", 0));
        assert!(store.get("abc").is_some());
        assert!(store.get("ab").is_none());
        assert!(store.contains("abc"));

        assert!(store.delete("abc").is_some());
        assert!(store.get("abc").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_overwrites() {
        let store = ContainerStore::new();
        store.add(container("abc", 10));
        let newer = container("abc", 0);
        store.add(Arc::clone(&newer));
        assert_eq!(store.len(), 1);
        assert!(Arc::ptr_eq(&store.get("abc").unwrap(), &newer));
    }

    #[test]
    fn test_add_if_absent_keeps_first() {
        let store = ContainerStore::new();
        let first = container("abc", 10);
        assert!(store.add_if_absent(Arc::clone(&first)));
        assert!(!store.add_if_absent(container("abc", 0)));
        assert_eq!(store.len(), 1);
        assert!(Arc::ptr_eq(&store.get("abc").unwrap(), &first));
    }

    #[test]
    fn test_list_is_newest_first() {
        let store = ContainerStore::new();
        store.add(container("old", 100));
        store.add(container("new", 1));
        store.add(container("mid", 50));

        let ids: Vec<String> = store.list().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
    }

    #[test]
    fn test_list_ties_break_by_id() {
        let store = ContainerStore::new();
        let created = Utc::now();
        for id in ["ccc", "aaa", "bbb"] {
            let mut record = ContainerRecord::new(ContainerId::new(id), "vfs");
            record.created = created;
            store.add(Arc::new(Container::new(format!("/tmp/{id}"), record)));
        }
        let ids: Vec<String> = store.list().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, ["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let store = ContainerStore::new();
        store.add(container("abc", 0));
        let snapshot = store.list();
        store.delete("abc");
        assert_eq!(snapshot.len(), 1);
        assert!(store.list().is_empty());
    }
}
