//! Object storage for uploaded deal documents.
//!
//! Documents live in a private bucket; rows in `deal_documents` only keep the
//! object path. Three backends implement [`ObjectStore`]:
//!
//! - [`SupabaseStorage`]: the Supabase Storage REST API (production)
//! - [`LocalStorage`]: a directory on disk (development)
//! - [`MemoryStorage`]: an in-process map (tests)

mod local;
mod memory;
mod supabase;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalStorage;
pub use memory::{MemoryStorage, StoredObject};
pub use supabase::SupabaseStorage;

pub const DEFAULT_BUCKET: &str = "deal-documents";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Removing an object that does not exist succeeds.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    async fn signed_url(&self, path: &str, ttl: Duration) -> StorageResult<String>;
}

/// Backend selection, built by the server from its environment.
#[derive(Clone, Debug)]
pub enum StorageConfig {
    Supabase {
        base_url: String,
        service_key: String,
        bucket: String,
        timeout: Duration,
    },
    Local {
        root: std::path::PathBuf,
        bucket: String,
    },
    Memory,
}

pub fn build_store(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::Supabase {
            base_url,
            service_key,
            bucket,
            timeout,
        } => Arc::new(SupabaseStorage::new(
            base_url,
            service_key,
            bucket,
            *timeout,
        )?),
        StorageConfig::Local { root, bucket } => Arc::new(LocalStorage::new(root, bucket)),
        StorageConfig::Memory => Arc::new(MemoryStorage::default()),
    };
    Ok(store)
}

/// Rejects empty, absolute and parent-relative paths.
pub fn validate_path(path: &str) -> StorageResult<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Reduces a user-supplied file name to a safe single path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.chars().take(128).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation() {
        assert!(validate_path("user/deal/file.pdf").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("user/../other/file.pdf").is_err());
        assert!(validate_path("user//file.pdf").is_err());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("P&L 2024 (final).xlsx"), "P_L_2024__final_.xlsx");
        assert_eq!(sanitize_file_name("../../secret.pdf"), "secret.pdf");
        assert_eq!(sanitize_file_name("C:\\docs\\cim.pdf"), "cim.pdf");
        assert_eq!(sanitize_file_name(".."), "file");
    }
}
