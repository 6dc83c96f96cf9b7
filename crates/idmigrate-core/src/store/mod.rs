//! Relational store capabilities consumed by the engine.
//!
//! The engine never talks to a database directly. It uses [`MigrationStore`]
//! for reads, mapping DDL, and per-row column rewrites, and opens one
//! [`StoreTransaction`] per migrated user.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    ColumnDescriptor, ColumnRow, ColumnValue, IdentityMapping, LegacyUserRecord, MigratedUser,
    RowLocator, TargetUser, TenantMembership,
};

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend failure that is not a driver error.
    #[error("backend error: {0}")]
    Backend(String),

    /// Stored data does not have the expected shape.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Descriptor names a table or column the store does not know.
    #[error("unknown column {table}.{column}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

/// Default legacy user table.
pub const DEFAULT_LEGACY_USERS_TABLE: &str = "users";
/// Default target user table.
pub const DEFAULT_TARGET_USERS_TABLE: &str = "shared_users";
/// Default tenant membership table.
pub const DEFAULT_MEMBERSHIPS_TABLE: &str = "tenant_users";
/// Default mapping table.
pub const DEFAULT_MAPPING_TABLE: &str = "user_id_mappings";

/// Names of the tables the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub legacy_users: String,
    pub target_users: String,
    pub memberships: String,
    pub mappings: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            legacy_users: DEFAULT_LEGACY_USERS_TABLE.to_string(),
            target_users: DEFAULT_TARGET_USERS_TABLE.to_string(),
            memberships: DEFAULT_MEMBERSHIPS_TABLE.to_string(),
            mappings: DEFAULT_MAPPING_TABLE.to_string(),
        }
    }
}

/// Store operations used outside of per-user transactions.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Create the mapping table if it does not exist.
    async fn ensure_mapping_table(&self) -> Result<(), StoreError>;

    /// Open a transaction for one unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Most recent mapping whose legacy id or email equals `identifier`.
    async fn find_mapping(&self, identifier: &str) -> Result<Option<IdentityMapping>, StoreError>;

    /// All mappings, most recent first.
    async fn list_mappings(&self) -> Result<Vec<IdentityMapping>, StoreError>;

    /// All legacy users, oldest first (ties broken by legacy id).
    async fn list_legacy_users(&self) -> Result<Vec<LegacyUserRecord>, StoreError>;

    /// One legacy user by id.
    async fn get_legacy_user(&self, legacy_id: &str)
        -> Result<Option<LegacyUserRecord>, StoreError>;

    /// Legacy users that have a mapping row, joined with their mapping.
    async fn list_migrated_users(&self) -> Result<Vec<MigratedUser>, StoreError>;

    /// Read `(locator, value)` for every row of the described column.
    async fn scan_column(&self, column: &ColumnDescriptor) -> Result<Vec<ColumnRow>, StoreError>;

    /// Overwrite the described column of the row at `locator`.
    async fn update_column(
        &self,
        column: &ColumnDescriptor,
        locator: &RowLocator,
        value: &ColumnValue,
    ) -> Result<(), StoreError>;
}

/// Writes performed atomically for one legacy user.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert or update the mapping row for `legacy_id`.
    async fn upsert_mapping(
        &mut self,
        legacy_id: &str,
        email: &str,
        new_id: &str,
    ) -> Result<(), StoreError>;

    async fn target_user_exists(&mut self, id: &str) -> Result<bool, StoreError>;

    async fn create_target_user(&mut self, user: &TargetUser) -> Result<(), StoreError>;

    async fn membership_exists(&mut self, user_id: &str, tenant_id: &str)
        -> Result<bool, StoreError>;

    async fn create_membership(&mut self, membership: &TenantMembership) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
