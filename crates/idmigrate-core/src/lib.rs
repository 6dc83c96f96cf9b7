//! idmigrate core - identity migration and foreign-key remapping.
//!
//! Moves users from a legacy per-tenant identity space to a shared target
//! identity system, records the correspondence in a mapping table, rewrites
//! stored legacy identifiers, and relocates per-user files.

pub mod config;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod migrator;
pub mod model;
pub mod orchestrator;
pub mod relocator;
pub mod report;
pub mod rewriter;
pub mod signal;
pub mod storage;
pub mod store;

pub use config::{load_descriptors, parse_descriptors, FileLayout, MigrationConfig};
pub use error::{Error, Result};
pub use identity::{
    is_legacy_format, IdentityProvider, IdentityResolver, MemoryIdentityProvider, ProviderConfig,
    ProviderError, ProviderKind, LEGACY_ID_LEN,
};
pub use mapping::{MappingCache, MappingStore};
pub use migrator::{UserMigrator, UserOutcome, UserState};
pub use model::{
    ColumnDescriptor, ColumnKind, ColumnRow, ColumnValue, FileMigrationTask, IdentityMapping,
    LegacyUserRecord, MembershipStatus, MigratedUser, RowLocator, TargetUser, TenantMembership,
};
pub use orchestrator::{MigrationOrchestrator, OrchestratorBuilder};
pub use relocator::{FileOutcome, FileRelocator};
pub use report::{Phase, PhaseSummary, RewriteReport, TableSummary};
pub use rewriter::{rewrite_array, rewrite_scalar, ForeignKeyRewriter};
pub use signal::StopSignal;
pub use storage::{ObjectStorage, ObjectStoreStorage};
pub use store::{MemoryStore, MigrationStore, StoreError, StoreTransaction, TableNames};

#[cfg(feature = "postgres")]
pub use store::PgStore;
