//! In-memory storage implementation.

use super::{AnnotationSnapshot, BoxFuture, Storage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    snapshots: RwLock<HashMap<String, AnnotationSnapshot>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl Storage for MemoryStorage {
    fn save(&self, id: &str, snapshot: &AnnotationSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let mut snapshots = self.snapshots.write().map_err(lock_error)?;
            log::debug!("Saving {} annotations for {}", snapshot.total_len(), id);
            snapshots.insert(id, snapshot);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<AnnotationSnapshot>> {
        let id = id.to_string();
        Box::pin(async move {
            let snapshots = self.snapshots.read().map_err(lock_error)?;
            snapshots.get(&id).cloned().ok_or(StorageError::NotFound(id))
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut snapshots = self.snapshots.write().map_err(lock_error)?;
            snapshots.remove(&id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let snapshots = self.snapshots.read().map_err(lock_error)?;
            Ok(snapshots.keys().cloned().collect())
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let snapshots = self.snapshots.read().map_err(lock_error)?;
            Ok(snapshots.contains_key(&id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{block_on, sample_snapshot};

    #[test]
    fn test_save_and_load() {
        let storage = MemoryStorage::new();
        let snapshot = sample_snapshot();

        block_on(storage.save("book", &snapshot)).unwrap();
        let loaded = block_on(storage.load("book")).unwrap();

        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_not_found() {
        let storage = MemoryStorage::new();
        let result = block_on(storage.load("nonexistent"));

        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_exists_and_delete() {
        let storage = MemoryStorage::new();
        let snapshot = AnnotationSnapshot::default();

        assert!(!block_on(storage.exists("book")).unwrap());
        block_on(storage.save("book", &snapshot)).unwrap();
        assert!(block_on(storage.exists("book")).unwrap());
        block_on(storage.delete("book")).unwrap();
        assert!(!block_on(storage.exists("book")).unwrap());
    }

    #[test]
    fn test_list() {
        let storage = MemoryStorage::new();
        let snapshot = AnnotationSnapshot::default();

        block_on(storage.save("book1", &snapshot)).unwrap();
        block_on(storage.save("book2", &snapshot)).unwrap();

        let list = block_on(storage.list()).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains(&"book1".to_string()));
        assert!(list.contains(&"book2".to_string()));
    }
}
