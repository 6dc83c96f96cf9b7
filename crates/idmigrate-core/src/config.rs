//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ColumnDescriptor;
use crate::store::TableNames;

/// Default object name of a user's stored file.
pub const DEFAULT_FILE_NAME: &str = "profile_picture";

/// Default tenant segment for users that belong to no tenant.
pub const DEFAULT_ADMIN_SEGMENT: &str = "admin";

/// Default backup namespace inside a tenant.
pub const DEFAULT_BACKUP_SEGMENT: &str = "backup";

/// Default tenant-agnostic namespace for relocated files.
pub const DEFAULT_USERS_SEGMENT: &str = "users";

/// Object-storage addressing of per-user files.
///
/// - old: `{tenant}/{legacy_id}/{file_name}`
/// - backup: `{tenant}/{backup_segment}/{legacy_id}/{file_name}`
/// - new: `{users_segment}/{new_id}/{file_name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLayout {
    pub file_name: String,
    pub admin_segment: String,
    pub backup_segment: String,
    pub users_segment: String,
}

impl Default for FileLayout {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            admin_segment: DEFAULT_ADMIN_SEGMENT.to_string(),
            backup_segment: DEFAULT_BACKUP_SEGMENT.to_string(),
            users_segment: DEFAULT_USERS_SEGMENT.to_string(),
        }
    }
}

impl FileLayout {
    /// Tenant segment for a possibly tenantless user.
    pub fn tenant_segment(&self, tenant_id: Option<&str>) -> String {
        match tenant_id.map(str::trim) {
            Some(tenant) if !tenant.is_empty() => tenant.to_string(),
            _ => self.admin_segment.clone(),
        }
    }

    pub fn old_path(&self, tenant: &str, legacy_id: &str) -> String {
        format!("{}/{}/{}", tenant, legacy_id, self.file_name)
    }

    pub fn backup_path(&self, tenant: &str, legacy_id: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            tenant, self.backup_segment, legacy_id, self.file_name
        )
    }

    pub fn new_path(&self, new_id: &str) -> String {
        format!("{}/{}/{}", self.users_segment, new_id, self.file_name)
    }
}

/// Migration engine configuration.
#[derive(Debug, Clone, Default)]
pub struct MigrationConfig {
    /// Tables read and written by the engine.
    pub tables: TableNames,

    /// Object-storage addressing of per-user files.
    pub file_layout: FileLayout,

    /// Report what the rewrite and file phases would change without writing.
    pub dry_run: bool,
}

impl MigrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the table names.
    pub fn with_tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }

    /// Set the file layout.
    pub fn with_file_layout(mut self, layout: FileLayout) -> Self {
        self.file_layout = layout;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Parse a JSON array of column descriptors.
pub fn parse_descriptors(json: &str) -> Result<Vec<ColumnDescriptor>> {
    let descriptors: Vec<ColumnDescriptor> = serde_json::from_str(json)?;
    for descriptor in &descriptors {
        if descriptor.table.trim().is_empty() || descriptor.column.trim().is_empty() {
            return Err(Error::Config(format!(
                "descriptor {:?} needs a table and a column",
                descriptor
            )));
        }
    }
    Ok(descriptors)
}

/// Load column descriptors from a JSON file.
pub fn load_descriptors(path: impl AsRef<Path>) -> Result<Vec<ColumnDescriptor>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "cannot read descriptor file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_descriptors(&json)
}
