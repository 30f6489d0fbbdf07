use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use url::Url;

use crate::{ObjectStore, StorageError, StorageResult, validate_path};

/// Stores objects under `<root>/<bucket>/<path>`.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    bucket: String,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bucket: bucket.to_string(),
        }
    }

    fn full_path(&self, path: &str) -> StorageResult<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(&self.bucket).join(path))
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        let target = self.full_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let target = self.full_path(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn signed_url(&self, path: &str, _ttl: Duration) -> StorageResult<String> {
        let target = self.full_path(path)?;
        let absolute = if target.is_absolute() {
            target
        } else {
            std::env::current_dir()?.join(target)
        };
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| StorageError::InvalidPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_delete_round_trip() {
        let root = std::env::temp_dir().join(format!("deal-desk-{}", uuid::Uuid::new_v4()));
        let store = LocalStorage::new(&root, "deal-documents");
        store
            .put("u1/d1/cim.pdf", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();
        let on_disk = root.join("deal-documents/u1/d1/cim.pdf");
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap(), b"%PDF-1.7");

        let url = store
            .signed_url("u1/d1/cim.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));

        store.delete("u1/d1/cim.pdf").await.unwrap();
        assert!(!on_disk.exists());
        store.delete("u1/d1/cim.pdf").await.unwrap();
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let store = LocalStorage::new(std::env::temp_dir(), "deal-documents");
        let err = store
            .put("../escape.txt", b"x".to_vec(), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
