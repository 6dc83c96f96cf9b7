//! In-process store.
//!
//! Keeps every table in memory behind one lock. Transactions stage their
//! writes and apply them on commit, so a rolled-back user leaves no trace.
//! Failure injection hooks let callers exercise the per-unit error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{MigrationStore, StoreError, StoreTransaction};
use crate::model::{
    ColumnDescriptor, ColumnKind, ColumnRow, ColumnValue, IdentityMapping, LegacyUserRecord,
    MigratedUser, RowLocator, TargetUser, TenantMembership,
};

struct MemoryRow {
    locator: RowLocator,
    values: BTreeMap<String, ColumnValue>,
}

#[derive(Default)]
struct State {
    mapping_table: bool,
    legacy_users: Vec<LegacyUserRecord>,
    target_users: BTreeMap<String, TargetUser>,
    memberships: BTreeMap<(String, String), TenantMembership>,
    mappings: BTreeMap<String, IdentityMapping>,
    tables: BTreeMap<String, Vec<MemoryRow>>,
    next_block: u64,
    failing_target_emails: HashSet<String>,
    failing_membership_tenants: HashSet<String>,
    failing_rows: HashSet<(String, String)>,
    failing_scans: HashSet<String>,
}

impl State {
    fn apply(&mut self, op: Op) {
        match op {
            Op::UpsertMapping {
                legacy_id,
                email,
                new_id,
            } => {
                let now = Utc::now();
                self.mappings
                    .entry(legacy_id.clone())
                    .and_modify(|m| {
                        m.email = email.clone();
                        m.new_id = new_id.clone();
                    })
                    .or_insert(IdentityMapping {
                        legacy_id,
                        email,
                        new_id,
                        migrated_at: now,
                        created_at: now,
                    });
            }
            Op::CreateTargetUser(user) => {
                self.target_users.insert(user.id.clone(), user);
            }
            Op::CreateMembership(membership) => {
                self.memberships.insert(
                    (membership.user_id.clone(), membership.tenant_id.clone()),
                    membership,
                );
            }
        }
    }

    fn locate(&self, column: &ColumnDescriptor, row: &MemoryRow) -> Result<RowLocator, StoreError> {
        match &column.key {
            None => Ok(row.locator.clone()),
            Some(key) => match row.values.get(key) {
                Some(ColumnValue::Scalar(Some(value))) => Ok(RowLocator(value.clone())),
                _ => Err(StoreError::InvalidData(format!(
                    "row {} of {} has no scalar key {}",
                    row.locator, column.table, key
                ))),
            },
        }
    }
}

enum Op {
    UpsertMapping {
        legacy_id: String,
        email: String,
        new_id: String,
    },
    CreateTargetUser(TargetUser),
    CreateMembership(TenantMembership),
}

/// Store that keeps all tables in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a legacy user row.
    pub fn insert_legacy_user(&self, record: LegacyUserRecord) {
        self.state.lock().legacy_users.push(record);
    }

    /// Add a target user row directly, bypassing the migration.
    pub fn insert_target_user(&self, user: TargetUser) {
        self.state.lock().target_users.insert(user.id.clone(), user);
    }

    /// Add a row to an arbitrary table and return its physical locator.
    pub fn insert_row(&self, table: &str, values: Vec<(&str, ColumnValue)>) -> RowLocator {
        let mut state = self.state.lock();
        state.next_block += 1;
        let locator = RowLocator(format!("(0,{})", state.next_block));
        let row = MemoryRow {
            locator: locator.clone(),
            values: values
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        };
        state.tables.entry(table.to_string()).or_default().push(row);
        locator
    }

    /// Current value of a column in the row at a physical locator.
    pub fn row_value(&self, table: &str, locator: &RowLocator, column: &str) -> Option<ColumnValue> {
        let state = self.state.lock();
        state
            .tables
            .get(table)?
            .iter()
            .find(|row| &row.locator == locator)
            .and_then(|row| row.values.get(column).cloned())
    }

    /// Whether the mapping table has been created.
    pub fn has_mapping_table(&self) -> bool {
        self.state.lock().mapping_table
    }

    /// Mapping rows ordered by legacy id.
    pub fn mappings(&self) -> Vec<IdentityMapping> {
        self.state.lock().mappings.values().cloned().collect()
    }

    /// Target user rows ordered by id.
    pub fn target_users(&self) -> Vec<TargetUser> {
        self.state.lock().target_users.values().cloned().collect()
    }

    /// Membership rows ordered by (user id, tenant id).
    pub fn memberships(&self) -> Vec<TenantMembership> {
        self.state.lock().memberships.values().cloned().collect()
    }

    /// Fail target user creation for `email`.
    pub fn fail_target_writes_for(&self, email: &str) {
        self.state.lock().failing_target_emails.insert(email.to_string());
    }

    /// Fail membership creation for `tenant_id`.
    pub fn fail_memberships_for_tenant(&self, tenant_id: &str) {
        self.state
            .lock()
            .failing_membership_tenants
            .insert(tenant_id.to_string());
    }

    /// Fail updates addressed to `locator` in `table`.
    pub fn fail_row_update(&self, table: &str, locator: &RowLocator) {
        self.state
            .lock()
            .failing_rows
            .insert((table.to_string(), locator.0.clone()));
    }

    /// Fail scans of `table`.
    pub fn fail_scan(&self, table: &str) {
        self.state.lock().failing_scans.insert(table.to_string());
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_mapping_table(&self) -> Result<(), StoreError> {
        self.state.lock().mapping_table = true;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            ops: Vec::new(),
        }))
    }

    async fn find_mapping(&self, identifier: &str) -> Result<Option<IdentityMapping>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .mappings
            .values()
            .filter(|m| m.legacy_id == identifier || m.email == identifier)
            .max_by_key(|m| m.migrated_at)
            .cloned())
    }

    async fn list_mappings(&self) -> Result<Vec<IdentityMapping>, StoreError> {
        let state = self.state.lock();
        let mut mappings: Vec<_> = state.mappings.values().cloned().collect();
        mappings.sort_by(|a, b| {
            b.migrated_at
                .cmp(&a.migrated_at)
                .then_with(|| a.legacy_id.cmp(&b.legacy_id))
        });
        Ok(mappings)
    }

    async fn list_legacy_users(&self) -> Result<Vec<LegacyUserRecord>, StoreError> {
        let state = self.state.lock();
        let mut users = state.legacy_users.clone();
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.legacy_id.cmp(&b.legacy_id))
        });
        Ok(users)
    }

    async fn get_legacy_user(
        &self,
        legacy_id: &str,
    ) -> Result<Option<LegacyUserRecord>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .legacy_users
            .iter()
            .find(|u| u.legacy_id == legacy_id)
            .cloned())
    }

    async fn list_migrated_users(&self) -> Result<Vec<MigratedUser>, StoreError> {
        let state = self.state.lock();
        let mut users: Vec<_> = state
            .legacy_users
            .iter()
            .filter_map(|user| {
                state.mappings.get(&user.legacy_id).map(|m| MigratedUser {
                    legacy_id: user.legacy_id.clone(),
                    new_id: m.new_id.clone(),
                    tenant_id: user.tenant_id.clone(),
                })
            })
            .collect();
        users.sort_by(|a, b| a.legacy_id.cmp(&b.legacy_id));
        Ok(users)
    }

    async fn scan_column(&self, column: &ColumnDescriptor) -> Result<Vec<ColumnRow>, StoreError> {
        let state = self.state.lock();
        if state.failing_scans.contains(&column.table) {
            return Err(StoreError::Backend(format!(
                "scan of {} cancelled by statement timeout",
                column.table
            )));
        }
        let rows = state
            .tables
            .get(&column.table)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: column.table.clone(),
                column: column.column.clone(),
            })?;

        rows.iter()
            .map(|row| {
                let value = row.values.get(&column.column).cloned().unwrap_or(match column.kind {
                    ColumnKind::Scalar => ColumnValue::Scalar(None),
                    ColumnKind::Array => ColumnValue::Array(None),
                });
                Ok(ColumnRow {
                    locator: state.locate(column, row)?,
                    value,
                })
            })
            .collect()
    }

    async fn update_column(
        &self,
        column: &ColumnDescriptor,
        locator: &RowLocator,
        value: &ColumnValue,
    ) -> Result<(), StoreError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state
            .failing_rows
            .contains(&(column.table.clone(), locator.0.clone()))
        {
            return Err(StoreError::Backend(format!(
                "could not update row {} of {}",
                locator, column.table
            )));
        }

        let rows = state
            .tables
            .get(&column.table)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: column.table.clone(),
                column: column.column.clone(),
            })?;
        let idx = rows
            .iter()
            .position(|row| {
                state
                    .locate(column, row)
                    .map(|l| &l == locator)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                StoreError::InvalidData(format!("no row at {} in {}", locator, column.table))
            })?;

        if let Some(rows) = state.tables.get_mut(&column.table) {
            rows[idx]
                .values
                .insert(column.column.clone(), value.clone());
        }
        Ok(())
    }
}

/// Staged writes of one memory transaction.
pub struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    ops: Vec<Op>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn upsert_mapping(
        &mut self,
        legacy_id: &str,
        email: &str,
        new_id: &str,
    ) -> Result<(), StoreError> {
        if !self.state.lock().mapping_table {
            return Err(StoreError::Backend(
                "mapping table does not exist".to_string(),
            ));
        }
        self.ops.push(Op::UpsertMapping {
            legacy_id: legacy_id.to_string(),
            email: email.to_string(),
            new_id: new_id.to_string(),
        });
        Ok(())
    }

    async fn target_user_exists(&mut self, id: &str) -> Result<bool, StoreError> {
        let staged = self
            .ops
            .iter()
            .any(|op| matches!(op, Op::CreateTargetUser(u) if u.id == id));
        Ok(staged || self.state.lock().target_users.contains_key(id))
    }

    async fn create_target_user(&mut self, user: &TargetUser) -> Result<(), StoreError> {
        let state = self.state.lock();
        if state.failing_target_emails.contains(&user.email) {
            return Err(StoreError::Backend(format!(
                "insert into target users failed for {}",
                user.email
            )));
        }
        if state.target_users.contains_key(&user.id) {
            return Err(StoreError::Backend(format!(
                "duplicate key value violates unique constraint: id={}",
                user.id
            )));
        }
        drop(state);
        self.ops.push(Op::CreateTargetUser(user.clone()));
        Ok(())
    }

    async fn membership_exists(
        &mut self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<bool, StoreError> {
        let staged = self.ops.iter().any(|op| {
            matches!(op, Op::CreateMembership(m) if m.user_id == user_id && m.tenant_id == tenant_id)
        });
        let key = (user_id.to_string(), tenant_id.to_string());
        Ok(staged || self.state.lock().memberships.contains_key(&key))
    }

    async fn create_membership(&mut self, membership: &TenantMembership) -> Result<(), StoreError> {
        let state = self.state.lock();
        if state
            .failing_membership_tenants
            .contains(&membership.tenant_id)
        {
            return Err(StoreError::Backend(format!(
                "insert into memberships failed for tenant {}",
                membership.tenant_id
            )));
        }
        let key = (membership.user_id.clone(), membership.tenant_id.clone());
        if state.memberships.contains_key(&key) {
            return Err(StoreError::Backend(format!(
                "duplicate membership for ({}, {})",
                membership.user_id, membership.tenant_id
            )));
        }
        drop(state);
        self.ops.push(Op::CreateMembership(membership.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { state, ops } = *self;
        let mut state = state.lock();
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, email: &str) -> TargetUser {
        TargetUser {
            id: id.to_string(),
            email: email.to_string(),
            profile: None,
        }
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let store = MemoryStore::new();
        store.ensure_mapping_table().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_mapping("aB3dE5gH7jK9mN1pQ3sT5vW7yZ01", "a@x.com", "user_1")
            .await
            .unwrap();
        tx.create_target_user(&user("user_1", "a@x.com")).await.unwrap();
        assert!(tx.target_user_exists("user_1").await.unwrap());
        assert!(store.target_users().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.target_users().len(), 1);
        assert_eq!(store.mappings().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        store.ensure_mapping_table().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_mapping("aB3dE5gH7jK9mN1pQ3sT5vW7yZ01", "a@x.com", "user_1")
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.mappings().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_requires_mapping_table() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.upsert_mapping("a", "a@x.com", "user_1").await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_migration_time() {
        let store = MemoryStore::new();
        store.ensure_mapping_table().await.unwrap();

        for new_id in ["user_1", "user_2"] {
            let mut tx = store.begin().await.unwrap();
            tx.upsert_mapping("aB3dE5gH7jK9mN1pQ3sT5vW7yZ01", "a@x.com", new_id)
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }
        let first = store.mappings();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].new_id, "user_2");
        assert_eq!(first[0].migrated_at, first[0].created_at);
    }

    #[tokio::test]
    async fn test_scan_by_declared_key() {
        let store = MemoryStore::new();
        store.insert_row(
            "documents",
            vec![
                ("id", ColumnValue::Scalar(Some("doc-1".into()))),
                ("owner_id", ColumnValue::Scalar(Some("x".into()))),
            ],
        );
        let descriptor = ColumnDescriptor::scalar("documents", "owner_id").with_key("id");
        let rows = store.scan_column(&descriptor).await.unwrap();
        assert_eq!(rows[0].locator, RowLocator("doc-1".into()));

        store
            .update_column(
                &descriptor,
                &RowLocator("doc-1".into()),
                &ColumnValue::Scalar(Some("y".into())),
            )
            .await
            .unwrap();
        let rows = store.scan_column(&descriptor).await.unwrap();
        assert_eq!(rows[0].value, ColumnValue::Scalar(Some("y".into())));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = MemoryStore::new();
        let err = store
            .scan_column(&ColumnDescriptor::scalar("missing", "owner_id"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }
}
