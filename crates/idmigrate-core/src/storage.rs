//! Object storage used by the file relocation phase.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;

use crate::error::{Error, Result};

/// Minimal object operations needed to relocate per-user files.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, object_store::Error>;

    /// Copy `src` to `dst`, overwriting `dst`.
    async fn copy(&self, dst: &str, src: &str) -> Result<(), object_store::Error>;

    /// Move `old` to `new`. The source no longer exists afterwards.
    async fn rename(&self, new: &str, old: &str) -> Result<(), object_store::Error>;
}

/// [`ObjectStorage`] over any `object_store` backend.
#[derive(Clone)]
pub struct ObjectStoreStorage {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// In-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Build from a storage URL: `s3://bucket`, `file:///dir` or `memory://`.
    ///
    /// S3 credentials and region come from the standard AWS environment
    /// variables.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if let Some(bucket) = url.strip_prefix("s3://") {
            let bucket = bucket.trim_end_matches('/');
            if bucket.is_empty() {
                return Err(Error::Config(format!("storage url '{}' has no bucket", url)));
            }
            let s3 = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| Error::Config(format!("cannot configure S3 bucket {}: {}", bucket, e)))?;
            Ok(Self::new(Arc::new(s3)))
        } else if let Some(dir) = url.strip_prefix("file://") {
            let local = LocalFileSystem::new_with_prefix(dir)
                .map_err(|e| Error::Config(format!("cannot open storage directory {}: {}", dir, e)))?;
            Ok(Self::new(Arc::new(local)))
        } else if url == "memory://" {
            Ok(Self::in_memory())
        } else {
            Err(Error::Config(format!(
                "unsupported storage url '{}' (expected s3://, file:// or memory://)",
                url
            )))
        }
    }

    /// Underlying backend.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn exists(&self, path: &str) -> Result<bool, object_store::Error> {
        match self.inner.head(&Path::from(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn copy(&self, dst: &str, src: &str) -> Result<(), object_store::Error> {
        self.inner.copy(&Path::from(src), &Path::from(dst)).await
    }

    async fn rename(&self, new: &str, old: &str) -> Result<(), object_store::Error> {
        self.inner.rename(&Path::from(old), &Path::from(new)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn put(storage: &ObjectStoreStorage, path: &str, data: &'static [u8]) {
        storage
            .inner()
            .put(&Path::from(path), Bytes::from_static(data).into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exists_copy_rename() {
        let storage = ObjectStoreStorage::in_memory();
        assert!(!storage.exists("t1/a/profile_picture").await.unwrap());

        put(&storage, "t1/a/profile_picture", b"png").await;
        assert!(storage.exists("t1/a/profile_picture").await.unwrap());

        storage
            .copy("t1/backup/a/profile_picture", "t1/a/profile_picture")
            .await
            .unwrap();
        storage
            .rename("users/u/profile_picture", "t1/a/profile_picture")
            .await
            .unwrap();

        assert!(storage.exists("t1/backup/a/profile_picture").await.unwrap());
        assert!(storage.exists("users/u/profile_picture").await.unwrap());
        assert!(!storage.exists("t1/a/profile_picture").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_directory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        let storage = ObjectStoreStorage::from_url(&url).unwrap();

        put(&storage, "admin/a/profile_picture", b"png").await;
        assert!(dir.path().join("admin/a/profile_picture").exists());
        assert!(storage.exists("admin/a/profile_picture").await.unwrap());
    }

    #[test]
    fn test_unsupported_url() {
        assert!(matches!(
            ObjectStoreStorage::from_url("ftp://host"),
            Err(Error::Config(_))
        ));
        assert!(ObjectStoreStorage::from_url("s3://").is_err());
        assert!(ObjectStoreStorage::from_url("memory://").is_ok());
    }
}
