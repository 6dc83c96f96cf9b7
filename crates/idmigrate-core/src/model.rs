//! Records read and written by the migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role granted to tenant members whose legacy record carries no roles.
pub const DEFAULT_TENANT_ROLE: &str = "USER";

/// Persisted legacy → target identity correspondence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Legacy identifier (primary key).
    pub legacy_id: String,
    /// Email the identity was resolved from.
    pub email: String,
    /// Identifier in the target identity system.
    pub new_id: String,
    /// When the legacy user was first migrated.
    pub migrated_at: DateTime<Utc>,
    /// When the mapping row was created.
    pub created_at: DateTime<Utc>,
}

/// A user row in the legacy identity space. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyUserRecord {
    pub legacy_id: String,
    pub profile: Option<serde_json::Value>,
    pub email: String,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LegacyUserRecord {
    /// Tenant the record belongs to; blank tenant ids count as none.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Roles the target membership should carry.
    ///
    /// Tenant-scoped records without explicit roles get [`DEFAULT_TENANT_ROLE`];
    /// records without a tenant keep whatever they carry (usually nothing).
    pub fn effective_roles(&self) -> Vec<String> {
        if self.tenant().is_some() && self.roles.is_empty() {
            vec![DEFAULT_TENANT_ROLE.to_string()]
        } else {
            self.roles.clone()
        }
    }
}

/// Destination user entity, keyed by the target identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetUser {
    pub id: String,
    pub email: String,
    pub profile: Option<serde_json::Value>,
}

/// Membership lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    Invited,
    Disabled,
}

impl MembershipStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "ACTIVE",
            MembershipStatus::Invited => "INVITED",
            MembershipStatus::Disabled => "DISABLED",
        }
    }
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(MembershipStatus::Active),
            "INVITED" => Ok(MembershipStatus::Invited),
            "DISABLED" => Ok(MembershipStatus::Disabled),
            other => Err(format!("unknown membership status '{}'", other)),
        }
    }
}

/// Association of one target user with one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub user_id: String,
    pub tenant_id: String,
    pub roles: Vec<String>,
    pub invited_by: Option<String>,
    pub invited_at: DateTime<Utc>,
    pub status: MembershipStatus,
}

impl TenantMembership {
    /// Active membership carried over from a legacy tenant-scoped record.
    pub fn migrated(user_id: &str, tenant_id: &str, record: &LegacyUserRecord) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            roles: record.effective_roles(),
            invited_by: None,
            invited_at: record.created_at,
            status: MembershipStatus::Active,
        }
    }
}

/// Shape of a column holding legacy identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// A single identifier per row.
    Scalar,
    /// An array of identifiers per row.
    Array,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnKind::Scalar => write!(f, "scalar"),
            ColumnKind::Array => write!(f, "array"),
        }
    }
}

/// Where legacy identifiers may be stored as foreign-key-like references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub table: String,
    pub column: String,
    pub kind: ColumnKind,
    /// Declared primary-key column used to address rows when the store has no
    /// physical row locator. `None` uses the physical locator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ColumnDescriptor {
    /// Describe a single-identifier column.
    pub fn scalar(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            kind: ColumnKind::Scalar,
            key: None,
        }
    }

    /// Describe an identifier-array column.
    pub fn array(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            kind: ColumnKind::Array,
            key: None,
        }
    }

    /// Address rows by a declared key column instead of the physical locator.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl std::fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} ({})", self.table, self.column, self.kind)
    }
}

/// Store-level address of a row, distinct from the rewritten value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowLocator(pub String);

impl std::fmt::Display for RowLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of a described column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Scalar(Option<String>),
    Array(Option<Vec<Option<String>>>),
}

/// One scanned row of a described column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub locator: RowLocator,
    pub value: ColumnValue,
}

/// A migrated user as seen by the file relocation phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedUser {
    pub legacy_id: String,
    pub new_id: String,
    pub tenant_id: Option<String>,
}

/// One file relocation unit, computed per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMigrationTask {
    pub legacy_id: String,
    pub new_id: String,
    /// Tenant segment, already normalized to the administrative segment when absent.
    pub tenant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tenant: Option<&str>, roles: &[&str]) -> LegacyUserRecord {
        LegacyUserRecord {
            legacy_id: "aB3dE5gH7jK9mN1pQ3sT5vW7yZ01".to_string(),
            profile: None,
            email: "a@x.com".to_string(),
            tenant_id: tenant.map(str::to_string),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tenant_user_without_roles_defaults_to_user() {
        assert_eq!(record(Some("t1"), &[]).effective_roles(), vec!["USER"]);
    }

    #[test]
    fn test_explicit_roles_kept() {
        assert_eq!(
            record(Some("t1"), &["ADMIN", "EDITOR"]).effective_roles(),
            vec!["ADMIN", "EDITOR"]
        );
    }

    #[test]
    fn test_no_tenant_defaults_to_empty() {
        assert!(record(None, &[]).effective_roles().is_empty());
    }

    #[test]
    fn test_migrated_membership() {
        let legacy = record(Some("t1"), &[]);
        let membership = TenantMembership::migrated("user_1", "t1", &legacy);
        assert_eq!(membership.status, MembershipStatus::Active);
        assert_eq!(membership.roles, vec!["USER"]);
        assert_eq!(membership.invited_at, legacy.created_at);
        assert!(membership.invited_by.is_none());
    }

    #[test]
    fn test_descriptor_json() {
        let json = r#"[
            {"table": "documents", "column": "owner_id", "kind": "scalar"},
            {"table": "projects", "column": "member_ids", "kind": "array", "key": "id"}
        ]"#;
        let descriptors: Vec<ColumnDescriptor> = serde_json::from_str(json).unwrap();
        assert_eq!(descriptors[0], ColumnDescriptor::scalar("documents", "owner_id"));
        assert_eq!(
            descriptors[1],
            ColumnDescriptor::array("projects", "member_ids").with_key("id")
        );
    }

    #[test]
    fn test_membership_status_round_trip() {
        for status in [
            MembershipStatus::Active,
            MembershipStatus::Invited,
            MembershipStatus::Disabled,
        ] {
            assert_eq!(status.as_str().parse::<MembershipStatus>(), Ok(status));
        }
        assert!("PENDING".parse::<MembershipStatus>().is_err());
    }
}
