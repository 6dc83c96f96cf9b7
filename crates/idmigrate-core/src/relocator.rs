//! Moves per-user files from the tenant-scoped layout to the user-scoped one.
//!
//! Every move is preceded by a backup copy inside the tenant namespace. A
//! missing source file is not an error: the user either never had one or it
//! was moved by an earlier run. A destination that already holds a file is
//! never overwritten; the source stays where it is and the task fails.

use std::sync::Arc;

use crate::config::FileLayout;
use crate::error::{Error, Result};
use crate::model::{FileMigrationTask, MigratedUser};
use crate::report::{Phase, PhaseSummary};
use crate::signal::StopSignal;
use crate::storage::ObjectStorage;
use crate::store::MigrationStore;

/// What happened to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// No file at the old path.
    Missing,
    /// Backed up and moved (or would be, in dry-run mode).
    Moved,
}

/// Drives the file relocation phase.
#[derive(Clone)]
pub struct FileRelocator {
    store: Arc<dyn MigrationStore>,
    storage: Arc<dyn ObjectStorage>,
    layout: FileLayout,
    stop: StopSignal,
    dry_run: bool,
}

impl FileRelocator {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        storage: Arc<dyn ObjectStorage>,
        layout: FileLayout,
        stop: StopSignal,
    ) -> Self {
        Self {
            store,
            storage,
            layout,
            stop,
            dry_run: false,
        }
    }

    /// Report moves without performing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Relocation tasks for every migrated legacy user.
    pub async fn tasks(&self) -> Result<Vec<FileMigrationTask>> {
        let users = self.store.list_migrated_users().await?;
        Ok(users.into_iter().map(|u| self.task(u)).collect())
    }

    fn task(&self, user: MigratedUser) -> FileMigrationTask {
        FileMigrationTask {
            tenant_id: self.layout.tenant_segment(user.tenant_id.as_deref()),
            legacy_id: user.legacy_id,
            new_id: user.new_id,
        }
    }

    /// Back up and move one user's file.
    pub async fn relocate(&self, task: &FileMigrationTask) -> Result<FileOutcome> {
        let old = self.layout.old_path(&task.tenant_id, &task.legacy_id);
        let backup = self.layout.backup_path(&task.tenant_id, &task.legacy_id);
        let new = self.layout.new_path(&task.new_id);

        let exists = self.storage.exists(&old).await.map_err(|e| Error::File {
            path: old.clone(),
            reason: e.to_string(),
        })?;
        if !exists {
            tracing::debug!(legacy_id = %task.legacy_id, path = %old, "no file to relocate");
            return Ok(FileOutcome::Missing);
        }

        // Converged accounts share one new path; the first move keeps it.
        let taken = self.storage.exists(&new).await.map_err(|e| Error::File {
            path: new.clone(),
            reason: e.to_string(),
        })?;
        if taken {
            return Err(Error::File {
                path: new,
                reason: format!("already holds a file, {} left in place", old),
            });
        }

        if self.dry_run {
            tracing::info!(path = %old, backup = %backup, new = %new, "would relocate file");
            return Ok(FileOutcome::Moved);
        }

        self.storage
            .copy(&backup, &old)
            .await
            .map_err(|e| Error::File {
                path: backup.clone(),
                reason: e.to_string(),
            })?;
        self.storage
            .rename(&new, &old)
            .await
            .map_err(|e| Error::File {
                path: new.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            legacy_id = %task.legacy_id,
            new_id = %task.new_id,
            path = %new,
            "relocated file"
        );
        Ok(FileOutcome::Moved)
    }

    /// Relocate files for all migrated users. Per-file failures are counted.
    pub async fn migrate_user_files(&self) -> Result<PhaseSummary> {
        let tasks = self.tasks().await?;
        let mut summary = PhaseSummary::new(Phase::Files);
        tracing::info!(tasks = tasks.len(), dry_run = self.dry_run, "relocating user files");

        for task in &tasks {
            if self.stop.is_stopped() {
                summary.interrupted = true;
                tracing::warn!(
                    processed = summary.total(),
                    total = tasks.len(),
                    "stop requested, ending file relocation"
                );
                break;
            }
            match self.relocate(task).await {
                Ok(FileOutcome::Moved) => summary.success += 1,
                Ok(FileOutcome::Missing) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(legacy_id = %task.legacy_id, error = %e, "file relocation failed");
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            moved = summary.success,
            missing = summary.skipped,
            errors = summary.errors,
            interrupted = summary.interrupted,
            "file relocation finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreStorage;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    const L1: &str = "aB3dE5gH7jK9mN1pQ3sT5vW7yZ01";

    /// Storage whose renames always fail.
    struct BrokenRename(ObjectStoreStorage);

    #[async_trait]
    impl ObjectStorage for BrokenRename {
        async fn exists(&self, path: &str) -> Result<bool, object_store::Error> {
            self.0.exists(path).await
        }

        async fn copy(&self, dst: &str, src: &str) -> Result<(), object_store::Error> {
            self.0.copy(dst, src).await
        }

        async fn rename(&self, _new: &str, _old: &str) -> Result<(), object_store::Error> {
            Err(object_store::Error::NotImplemented)
        }
    }

    /// Storage whose copies always fail.
    struct BrokenCopy(ObjectStoreStorage);

    #[async_trait]
    impl ObjectStorage for BrokenCopy {
        async fn exists(&self, path: &str) -> Result<bool, object_store::Error> {
            self.0.exists(path).await
        }

        async fn copy(&self, _dst: &str, _src: &str) -> Result<(), object_store::Error> {
            Err(object_store::Error::NotImplemented)
        }

        async fn rename(&self, new: &str, old: &str) -> Result<(), object_store::Error> {
            self.0.rename(new, old).await
        }
    }

    fn relocator(storage: Arc<dyn ObjectStorage>) -> FileRelocator {
        FileRelocator::new(
            Arc::new(MemoryStore::new()),
            storage,
            FileLayout::default(),
            StopSignal::new(),
        )
    }

    fn task(tenant: &str) -> FileMigrationTask {
        FileMigrationTask {
            legacy_id: L1.to_string(),
            new_id: "user_1".to_string(),
            tenant_id: tenant.to_string(),
        }
    }

    async fn seed(storage: &ObjectStoreStorage, path: &str) {
        seed_with(storage, path, b"png").await;
    }

    async fn seed_with(storage: &ObjectStoreStorage, path: &str, data: &'static [u8]) {
        storage
            .inner()
            .put(
                &object_store::path::Path::from(path),
                bytes::Bytes::from_static(data).into(),
            )
            .await
            .unwrap();
    }

    async fn read(storage: &ObjectStoreStorage, path: &str) -> bytes::Bytes {
        storage
            .inner()
            .get(&object_store::path::Path::from(path))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_skipped() {
        let storage = ObjectStoreStorage::in_memory();
        let outcome = relocator(Arc::new(storage)).relocate(&task("t1")).await.unwrap();
        assert_eq!(outcome, FileOutcome::Missing);
    }

    #[tokio::test]
    async fn test_backup_then_move() {
        let storage = ObjectStoreStorage::in_memory();
        let old = format!("t1/{}/profile_picture", L1);
        seed(&storage, &old).await;

        let outcome = relocator(Arc::new(storage.clone()))
            .relocate(&task("t1"))
            .await
            .unwrap();
        assert_eq!(outcome, FileOutcome::Moved);
        assert!(!storage.exists(&old).await.unwrap());
        assert!(storage
            .exists(&format!("t1/backup/{}/profile_picture", L1))
            .await
            .unwrap());
        assert!(storage.exists("users/user_1/profile_picture").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_source() {
        let storage = ObjectStoreStorage::in_memory();
        let old = format!("admin/{}/profile_picture", L1);
        seed(&storage, &old).await;

        let err = relocator(Arc::new(BrokenCopy(storage.clone())))
            .relocate(&task("admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::File { .. }));
        assert!(storage.exists(&old).await.unwrap());
        assert!(!storage.exists("users/user_1/profile_picture").await.unwrap());
    }

    #[tokio::test]
    async fn test_backup_and_new_path_hold_original_bytes() {
        let storage = ObjectStoreStorage::in_memory();
        seed_with(&storage, &format!("t1/{}/profile_picture", L1), b"t1-picture").await;

        relocator(Arc::new(storage.clone()))
            .relocate(&task("t1"))
            .await
            .unwrap();
        assert_eq!(
            read(&storage, &format!("t1/backup/{}/profile_picture", L1)).await,
            &b"t1-picture"[..]
        );
        assert_eq!(read(&storage, "users/user_1/profile_picture").await, &b"t1-picture"[..]);
    }

    #[tokio::test]
    async fn test_occupied_destination_not_overwritten() {
        let storage = ObjectStoreStorage::in_memory();
        let old = format!("t2/{}/profile_picture", L1);
        seed_with(&storage, "users/user_1/profile_picture", b"t1-picture").await;
        seed_with(&storage, &old, b"t2-picture").await;

        let err = relocator(Arc::new(storage.clone()))
            .relocate(&task("t2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::File { ref path, .. } if path == "users/user_1/profile_picture"));
        assert_eq!(read(&storage, "users/user_1/profile_picture").await, &b"t1-picture"[..]);
        assert_eq!(read(&storage, &old).await, &b"t2-picture"[..]);
        assert!(!storage
            .exists(&format!("t2/backup/{}/profile_picture", L1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_move_keeps_backup_and_source() {
        let storage = ObjectStoreStorage::in_memory();
        let old = format!("t1/{}/profile_picture", L1);
        seed(&storage, &old).await;

        let err = relocator(Arc::new(BrokenRename(storage.clone())))
            .relocate(&task("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::File { .. }));
        assert!(storage.exists(&old).await.unwrap());
        assert!(storage
            .exists(&format!("t1/backup/{}/profile_picture", L1))
            .await
            .unwrap());
        assert!(!storage.exists("users/user_1/profile_picture").await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_moves_nothing() {
        let storage = ObjectStoreStorage::in_memory();
        let old = format!("t1/{}/profile_picture", L1);
        seed(&storage, &old).await;

        let outcome = relocator(Arc::new(storage.clone()))
            .with_dry_run(true)
            .relocate(&task("t1"))
            .await
            .unwrap();
        assert_eq!(outcome, FileOutcome::Moved);
        assert!(storage.exists(&old).await.unwrap());
        assert!(!storage.exists("users/user_1/profile_picture").await.unwrap());
    }
}
