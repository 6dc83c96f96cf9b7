//! Per-user migration.
//!
//! Each legacy user runs through a small state machine:
//!
//! ```text
//! Start ─▶ Skipped                                  (not legacy-shaped)
//! Start ─▶ Resolving ─▶ ResolutionFailed
//! Resolving ─▶ Resolved ─▶ TxOpen ─▶ MappingUpserted ─▶ ExistenceCheck
//!     ExistenceCheck ─▶ AlreadyExists ─▶ MembershipAdded ─▶ Committed
//!     ExistenceCheck ─▶ NotExists ─▶ TargetCreated ─▶ Committed
//! any store failure after TxOpen ─▶ RolledBack
//! ```
//!
//! The mapping row and the target user writes share one transaction. The
//! identity created in the target system during resolution is not undone on
//! rollback; the next run finds it again through lookup-before-create.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identity::{is_legacy_format, IdentityResolver};
use crate::mapping::MappingStore;
use crate::model::{LegacyUserRecord, TargetUser, TenantMembership};
use crate::report::{Phase, PhaseSummary};
use crate::signal::StopSignal;
use crate::store::{MigrationStore, StoreError, StoreTransaction};

/// Log a progress line every this many users.
const PROGRESS_INTERVAL: usize = 100;

/// Position of a legacy user in the migration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Start,
    Skipped,
    Resolving,
    ResolutionFailed,
    Resolved,
    TxOpen,
    MappingUpserted,
    ExistenceCheck,
    AlreadyExists,
    MembershipAdded,
    NotExists,
    TargetCreated,
    Committed,
    RolledBack,
}

impl UserState {
    /// Whether no further transition follows.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UserState::Skipped
                | UserState::ResolutionFailed
                | UserState::Committed
                | UserState::RolledBack
        )
    }
}

impl std::fmt::Display for UserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UserState::Start => "start",
            UserState::Skipped => "skipped",
            UserState::Resolving => "resolving",
            UserState::ResolutionFailed => "resolution_failed",
            UserState::Resolved => "resolved",
            UserState::TxOpen => "tx_open",
            UserState::MappingUpserted => "mapping_upserted",
            UserState::ExistenceCheck => "existence_check",
            UserState::AlreadyExists => "already_exists",
            UserState::MembershipAdded => "membership_added",
            UserState::NotExists => "not_exists",
            UserState::TargetCreated => "target_created",
            UserState::Committed => "committed",
            UserState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Successful result of migrating one legacy user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    /// The id is not legacy-shaped; nothing was touched.
    Skipped,
    /// Mapping and target records are committed.
    Migrated {
        new_id: String,
        /// A new target user row was created.
        created_user: bool,
        /// A new tenant membership row was created.
        membership_added: bool,
    },
}

fn transition(legacy_id: &str, state: UserState) {
    tracing::debug!(legacy_id, state = %state, terminal = state.is_terminal(), "user state");
}

/// Migrates legacy users one transaction at a time.
#[derive(Clone)]
pub struct UserMigrator {
    store: Arc<dyn MigrationStore>,
    mappings: MappingStore,
    resolver: IdentityResolver,
    stop: StopSignal,
}

impl UserMigrator {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        mappings: MappingStore,
        resolver: IdentityResolver,
        stop: StopSignal,
    ) -> Self {
        Self {
            store,
            mappings,
            resolver,
            stop,
        }
    }

    /// Migrate one legacy record. Store side effects are atomic per call.
    pub async fn migrate_user(&self, record: &LegacyUserRecord) -> Result<UserOutcome> {
        let legacy_id = record.legacy_id.as_str();
        transition(legacy_id, UserState::Start);

        if !is_legacy_format(legacy_id) {
            transition(legacy_id, UserState::Skipped);
            return Ok(UserOutcome::Skipped);
        }

        transition(legacy_id, UserState::Resolving);
        let new_id = match self.resolver.resolve_or_create(&record.email).await {
            Ok(id) => id,
            Err(e) => {
                transition(legacy_id, UserState::ResolutionFailed);
                return Err(e);
            }
        };
        transition(legacy_id, UserState::Resolved);

        let mut tx = self.store.begin().await.map_err(|source| {
            transition(legacy_id, UserState::RolledBack);
            Error::Transaction {
                legacy_id: legacy_id.to_string(),
                source,
            }
        })?;
        transition(legacy_id, UserState::TxOpen);

        match self.write_user(tx.as_mut(), record, &new_id).await {
            Ok((created_user, membership_added)) => {
                if let Err(source) = tx.commit().await {
                    transition(legacy_id, UserState::RolledBack);
                    return Err(Error::Transaction {
                        legacy_id: legacy_id.to_string(),
                        source,
                    });
                }
                transition(legacy_id, UserState::Committed);
                Ok(UserOutcome::Migrated {
                    new_id,
                    created_user,
                    membership_added,
                })
            }
            Err(source) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(legacy_id, error = %e, "rollback failed");
                }
                transition(legacy_id, UserState::RolledBack);
                Err(Error::Transaction {
                    legacy_id: legacy_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Transactional part of the state machine. Returns whether a target user
    /// and a membership were created.
    async fn write_user(
        &self,
        tx: &mut dyn StoreTransaction,
        record: &LegacyUserRecord,
        new_id: &str,
    ) -> Result<(bool, bool), StoreError> {
        let legacy_id = record.legacy_id.as_str();
        let email = record.email.trim();

        self.mappings.upsert(tx, legacy_id, email, new_id).await?;
        transition(legacy_id, UserState::MappingUpserted);

        transition(legacy_id, UserState::ExistenceCheck);
        if tx.target_user_exists(new_id).await? {
            transition(legacy_id, UserState::AlreadyExists);
            let mut membership_added = false;
            if let Some(tenant) = record.tenant() {
                if !tx.membership_exists(new_id, tenant).await? {
                    tx.create_membership(&TenantMembership::migrated(new_id, tenant, record))
                        .await?;
                    membership_added = true;
                    transition(legacy_id, UserState::MembershipAdded);
                }
            }
            return Ok((false, membership_added));
        }

        transition(legacy_id, UserState::NotExists);
        tx.create_target_user(&TargetUser {
            id: new_id.to_string(),
            email: email.to_string(),
            profile: record.profile.clone(),
        })
        .await?;

        let membership_added = match record.tenant() {
            Some(tenant) => {
                tx.create_membership(&TenantMembership::migrated(new_id, tenant, record))
                    .await?;
                true
            }
            None => false,
        };
        transition(legacy_id, UserState::TargetCreated);
        Ok((true, membership_added))
    }

    /// Migrate every legacy user, oldest first. Per-user failures are logged
    /// and counted; only failing to list the users aborts.
    pub async fn migrate_all(&self) -> Result<PhaseSummary> {
        let users = self.store.list_legacy_users().await?;
        let total = users.len();
        let mut summary = PhaseSummary::new(Phase::Users);
        tracing::info!(total, provider = self.resolver.provider_name(), "migrating legacy users");

        for (idx, record) in users.iter().enumerate() {
            if self.stop.is_stopped() {
                summary.interrupted = true;
                tracing::warn!(processed = idx, total, "stop requested, ending user migration");
                break;
            }

            match self.migrate_user(record).await {
                Ok(UserOutcome::Skipped) => summary.skipped += 1,
                Ok(UserOutcome::Migrated {
                    new_id,
                    created_user,
                    membership_added,
                }) => {
                    tracing::info!(
                        legacy_id = %record.legacy_id,
                        new_id = %new_id,
                        created_user,
                        membership_added,
                        "migrated user"
                    );
                    summary.success += 1;
                }
                Err(e) => {
                    tracing::warn!(legacy_id = %record.legacy_id, error = %e, "user migration failed");
                    summary.errors += 1;
                }
            }

            if (idx + 1) % PROGRESS_INTERVAL == 0 {
                tracing::info!(processed = idx + 1, total, "user migration progress");
            }
        }

        tracing::info!(
            success = summary.success,
            skipped = summary.skipped,
            errors = summary.errors,
            interrupted = summary.interrupted,
            "user migration finished"
        );
        Ok(summary)
    }

    /// Migrate one legacy user by id. Fails fast when the id is not
    /// legacy-shaped or no such user exists.
    pub async fn migrate_single(&self, legacy_id: &str) -> Result<UserOutcome> {
        let legacy_id = legacy_id.trim();
        if !is_legacy_format(legacy_id) {
            return Err(Error::NotLegacyFormat(legacy_id.to_string()));
        }
        let record = self
            .store
            .get_legacy_user(legacy_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("legacy user '{}'", legacy_id)))?;

        let outcome = self.migrate_user(&record).await?;
        if let UserOutcome::Migrated { new_id, .. } = &outcome {
            tracing::info!(legacy_id, new_id = %new_id, "migrated user");
        }
        Ok(outcome)
    }
}
