//! Command-line arguments and the settings derived from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use idmigrate_core::config::{
    DEFAULT_ADMIN_SEGMENT, DEFAULT_BACKUP_SEGMENT, DEFAULT_FILE_NAME, DEFAULT_USERS_SEGMENT,
};
use idmigrate_core::identity::DEFAULT_PROVIDER_TIMEOUT_SECS;
use idmigrate_core::store::postgres::DEFAULT_MAX_CONNECTIONS;
use idmigrate_core::store::{
    DEFAULT_LEGACY_USERS_TABLE, DEFAULT_MAPPING_TABLE, DEFAULT_MEMBERSHIPS_TABLE,
    DEFAULT_TARGET_USERS_TABLE,
};
use idmigrate_core::{FileLayout, MigrationConfig, ProviderConfig, ProviderKind, TableNames};

use crate::formatter::OutputFormat;

/// Identity provider selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// HTTP user-management API
    Rest,
    /// In-process provider, for rehearsals
    Memory,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Rest => ProviderKind::Rest,
            ProviderArg::Memory => ProviderKind::Memory,
        }
    }
}

/// Migration operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Migrate all legacy users, or a single one
    Migrate {
        /// Legacy id of the only user to migrate
        #[arg(long)]
        user: Option<String>,
    },
    /// Show the mapping for a legacy id or email
    Lookup {
        /// Legacy id or email
        identifier: String,
    },
    /// List all mappings, most recent first
    List,
    /// Rewrite legacy ids stored in the described columns
    RewriteKeys {
        /// JSON file with column descriptors
        #[arg(long)]
        descriptors: PathBuf,
        /// Count changes without writing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Move per-user files to the user-scoped layout
    RelocateFiles {
        /// Report moves without performing them
        #[arg(long)]
        dry_run: bool,
    },
}

impl Command {
    pub fn dry_run(&self) -> bool {
        match self {
            Command::RewriteKeys { dry_run, .. } | Command::RelocateFiles { dry_run } => *dry_run,
            _ => false,
        }
    }

    pub fn needs_identity_provider(&self) -> bool {
        matches!(self, Command::Migrate { .. })
    }

    pub fn needs_object_storage(&self) -> bool {
        matches!(self, Command::RelocateFiles { .. })
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "idmigrate")]
#[command(version, about = "Legacy identity migration and foreign-key remapping")]
pub struct Args {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Identity provider.
    #[arg(long, value_enum, default_value_t = ProviderArg::Rest)]
    pub identity_provider: ProviderArg,

    /// Base URL of the identity API.
    #[arg(long, env = "IDENTITY_API_URL")]
    pub identity_url: Option<String>,

    /// Identity API key.
    #[arg(long, env = "IDENTITY_API_KEY", hide_env_values = true)]
    pub identity_api_key: Option<String>,

    /// Object storage URL (s3://bucket, file:///dir or memory://).
    #[arg(long, env = "STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Legacy user table.
    #[arg(long, default_value = DEFAULT_LEGACY_USERS_TABLE)]
    pub legacy_users_table: String,

    /// Target user table.
    #[arg(long, default_value = DEFAULT_TARGET_USERS_TABLE)]
    pub target_users_table: String,

    /// Tenant membership table.
    #[arg(long, default_value = DEFAULT_MEMBERSHIPS_TABLE)]
    pub memberships_table: String,

    /// Mapping table.
    #[arg(long, default_value = DEFAULT_MAPPING_TABLE)]
    pub mapping_table: String,

    /// Object name of each user's file.
    #[arg(long, default_value = DEFAULT_FILE_NAME)]
    pub file_name: String,

    /// Tenant segment for users without a tenant.
    #[arg(long, default_value = DEFAULT_ADMIN_SEGMENT)]
    pub admin_segment: String,

    /// Backup namespace inside a tenant.
    #[arg(long, default_value = DEFAULT_BACKUP_SEGMENT)]
    pub backup_segment: String,

    /// Namespace of relocated files.
    #[arg(long, default_value = DEFAULT_USERS_SEGMENT)]
    pub users_segment: String,

    /// Output format.
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Database pool size.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Identity API request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_PROVIDER_TIMEOUT_SECS)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings for one invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub provider: ProviderConfig,
    pub storage_url: Option<String>,
    pub migration: MigrationConfig,
    pub format: OutputFormat,
    pub command: Command,
}

impl Args {
    /// Convert command-line arguments into invocation settings.
    pub fn into_config(self) -> CliConfig {
        let mut provider = ProviderConfig::new(self.identity_provider.into())
            .with_timeout(Duration::from_secs(self.timeout));
        if let Some(url) = self.identity_url {
            provider = provider.with_endpoint(url);
        }
        if let Some(key) = self.identity_api_key {
            provider = provider.with_api_key(key);
        }

        let migration = MigrationConfig::new()
            .with_tables(TableNames {
                legacy_users: self.legacy_users_table,
                target_users: self.target_users_table,
                memberships: self.memberships_table,
                mappings: self.mapping_table,
            })
            .with_file_layout(FileLayout {
                file_name: self.file_name,
                admin_segment: self.admin_segment,
                backup_segment: self.backup_segment,
                users_segment: self.users_segment,
            })
            .with_dry_run(self.command.dry_run());

        CliConfig {
            database_url: self.database_url,
            max_connections: self.max_connections,
            provider,
            storage_url: self.storage_url.filter(|url| !url.trim().is_empty()),
            migration,
            format: self.format,
            command: self.command,
        }
    }
}
