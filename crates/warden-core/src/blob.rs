//! Blob storage interface (§6.3) behind which the Media Processor (C5)
//! reads attachment bytes. `LocalFsBlobStore` is the only bundled
//! implementation — this workspace has no S3-compatible object store
//! crate in its dependency stack, so that half of the interface (the
//! "recommended when configured" path) is a pluggable extension point,
//! not a shipped adapter; see DESIGN.md.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use warden_types::WardenError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<String, WardenError>;
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, WardenError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), WardenError>;
    fn presigned_url(&self, bucket: &str, key: &str, ttl_s: u64) -> Option<String>;
}

pub struct LocalFsBlobStore {
    base: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        self.base.join(bucket).join(key)
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, WardenError> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| WardenError::TransientIo(e.to_string()))?;
        }
        fs::write(&path, bytes).await.map_err(|e| WardenError::TransientIo(e.to_string()))?;
        Ok(format!("file://{}", path.display()))
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, WardenError> {
        fs::read(self.path_for(bucket, key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WardenError::BusinessInvariantViolated(format!("blob not found: {bucket}/{key}"))
            } else {
                WardenError::TransientIo(e.to_string())
            }
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), WardenError> {
        match fs::remove_file(self.path_for(bucket, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WardenError::TransientIo(e.to_string())),
        }
    }

    fn presigned_url(&self, bucket: &str, key: &str, _ttl_s: u64) -> Option<String> {
        Some(format!("file://{}", self.path_for(bucket, key).display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());
        store.upload("media", "voice/abc.ogg", b"hello bytes", "audio/ogg").await.unwrap();
        let bytes = store.download("media", "voice/abc.ogg").await.unwrap();
        assert_eq!(bytes, b"hello bytes");
    }

    #[tokio::test]
    async fn download_of_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());
        let result = store.download("media", "nope").await;
        assert!(matches!(result, Err(WardenError::BusinessInvariantViolated(_))));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());
        store.upload("media", "x", b"data", "text/plain").await.unwrap();
        store.delete("media", "x").await.unwrap();
        store.delete("media", "x").await.unwrap();
    }
}
