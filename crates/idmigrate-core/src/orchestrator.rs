//! Entry point tying the migration phases together.
//!
//! Phases are independent and re-runnable: users first, then foreign keys,
//! then files. [`MigrationOrchestrator::initialize`] must run once before any
//! of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::MigrationConfig;
use crate::error::{Error, Result};
use crate::identity::{IdentityProvider, IdentityResolver};
use crate::mapping::MappingStore;
use crate::migrator::{UserMigrator, UserOutcome};
use crate::model::{ColumnDescriptor, IdentityMapping};
use crate::relocator::FileRelocator;
use crate::report::{PhaseSummary, RewriteReport};
use crate::rewriter::ForeignKeyRewriter;
use crate::signal::StopSignal;
use crate::storage::ObjectStorage;
use crate::store::MigrationStore;

/// Builder for [`MigrationOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn MigrationStore>>,
    provider: Option<Arc<dyn IdentityProvider>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    config: MigrationConfig,
    stop: StopSignal,
}

impl OrchestratorBuilder {
    /// Relational store. Required.
    pub fn store(mut self, store: Arc<dyn MigrationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Identity provider, needed by the user phase.
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Object storage, needed by the file phase.
    pub fn object_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Signal shared with whoever may request a stop.
    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn build(self) -> Result<MigrationOrchestrator> {
        let store = self
            .store
            .ok_or_else(|| Error::Config("a relational store is required".to_string()))?;
        let mappings = MappingStore::new(Arc::clone(&store));
        let migrator = self.provider.map(|provider| {
            UserMigrator::new(
                Arc::clone(&store),
                mappings.clone(),
                IdentityResolver::new(provider),
                self.stop.clone(),
            )
        });
        let rewriter = ForeignKeyRewriter::new(Arc::clone(&store), self.stop.clone())
            .with_dry_run(self.config.dry_run);
        let relocator = self.storage.map(|storage| {
            FileRelocator::new(
                Arc::clone(&store),
                storage,
                self.config.file_layout.clone(),
                self.stop.clone(),
            )
            .with_dry_run(self.config.dry_run)
        });

        Ok(MigrationOrchestrator {
            mappings,
            migrator,
            rewriter,
            relocator,
            stop: self.stop,
            initialized: AtomicBool::new(false),
        })
    }
}

/// Runs migration phases against configured collaborators.
pub struct MigrationOrchestrator {
    mappings: MappingStore,
    migrator: Option<UserMigrator>,
    rewriter: ForeignKeyRewriter,
    relocator: Option<FileRelocator>,
    stop: StopSignal,
    initialized: AtomicBool,
}

impl MigrationOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Prepare the mapping table. Later calls are no-ops.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.mappings.ensure_schema().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Config(
                "orchestrator used before initialize()".to_string(),
            ))
        }
    }

    fn migrator(&self) -> Result<&UserMigrator> {
        self.ensure_initialized()?;
        self.migrator
            .as_ref()
            .ok_or_else(|| Error::Config("no identity provider configured".to_string()))
    }

    fn relocator(&self) -> Result<&FileRelocator> {
        self.ensure_initialized()?;
        self.relocator
            .as_ref()
            .ok_or_else(|| Error::Config("no object storage configured".to_string()))
    }

    /// Signal that stops running phases.
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Migrate every legacy user.
    pub async fn migrate_all_users(&self) -> Result<PhaseSummary> {
        self.migrator()?.migrate_all().await
    }

    /// Migrate one legacy user by id.
    pub async fn migrate_user(&self, legacy_id: &str) -> Result<UserOutcome> {
        self.migrator()?.migrate_single(legacy_id).await
    }

    /// Mapping for a legacy id or email.
    pub async fn lookup(&self, identifier: &str) -> Result<IdentityMapping> {
        self.ensure_initialized()?;
        self.mappings.get(identifier).await
    }

    /// All mappings, most recent first.
    pub async fn list_mappings(&self) -> Result<Vec<IdentityMapping>> {
        self.ensure_initialized()?;
        self.mappings.list().await
    }

    /// Rewrite legacy identifiers in the described columns.
    pub async fn migrate_foreign_keys(
        &self,
        descriptors: &[ColumnDescriptor],
    ) -> Result<RewriteReport> {
        self.ensure_initialized()?;
        let cache = self.mappings.cache().await?;
        Ok(self.rewriter.migrate_foreign_keys(descriptors, &cache).await)
    }

    /// Relocate per-user files for all migrated users.
    pub async fn migrate_user_files(&self) -> Result<PhaseSummary> {
        self.relocator()?.migrate_user_files().await
    }
}
