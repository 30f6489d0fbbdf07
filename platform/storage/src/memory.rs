use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{ObjectStore, StorageError, StorageResult, validate_path};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process store. The failure switches simulate an unavailable backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    // Deletes still allowed before the backend starts failing; `None` never fails.
    delete_budget: Mutex<Option<usize>>,
    fail_puts: AtomicBool,
}

impl MemoryStorage {
    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()
            .and_then(|map| map.get(path).cloned())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.set_delete_budget(fail.then_some(0));
    }

    /// Lets the next `successes` deletes through, then fails every later one.
    pub fn fail_deletes_after(&self, successes: usize) {
        self.set_delete_budget(Some(successes));
    }

    fn set_delete_budget(&self, budget: Option<usize>) {
        if let Ok(mut slot) = self.delete_budget.lock() {
            *slot = budget;
        }
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    fn unavailable() -> StorageError {
        StorageError::Backend {
            status: 503,
            message: "storage unavailable".into(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    fn bucket(&self) -> &str {
        "memory"
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        validate_path(path)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut map = self.objects.lock().map_err(|_| Self::unavailable())?;
        map.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_path(path)?;
        {
            let mut budget = self.delete_budget.lock().map_err(|_| Self::unavailable())?;
            match budget.as_mut() {
                Some(0) => return Err(Self::unavailable()),
                Some(left) => *left -= 1,
                None => {}
            }
        }
        let mut map = self.objects.lock().map_err(|_| Self::unavailable())?;
        map.remove(path);
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        validate_path(path)?;
        Ok(format!("memory://{path}?expires_in={}", ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stored(paths: &[&str]) -> MemoryStorage {
        let store = MemoryStorage::default();
        for path in paths {
            store.put(path, b"x".to_vec(), "text/plain").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn deletes_fail_after_the_budget_is_spent() {
        let store = stored(&["u/d/a.pdf", "u/d/b.pdf", "u/d/c.pdf"]).await;
        store.fail_deletes_after(1);

        store.delete("u/d/a.pdf").await.unwrap();
        assert!(matches!(
            store.delete("u/d/b.pdf").await,
            Err(StorageError::Backend { status: 503, .. })
        ));
        assert!(store.delete("u/d/c.pdf").await.is_err());
        assert!(!store.contains("u/d/a.pdf"));
        assert_eq!(store.len(), 2);

        store.set_fail_deletes(false);
        store.delete("u/d/b.pdf").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failing_puts_store_nothing() {
        let store = MemoryStorage::default();
        store.set_fail_puts(true);
        assert!(store.put("u/d/a.pdf", b"x".to_vec(), "text/plain").await.is_err());
        assert!(store.is_empty());
    }
}
