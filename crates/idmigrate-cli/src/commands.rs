//! Subcommand execution.

use std::sync::Arc;

use idmigrate_core::{
    load_descriptors, Error, MigrationOrchestrator, ObjectStoreStorage, PgStore, Result,
    StopSignal,
};

use crate::config::{CliConfig, Command};
use crate::formatter::Formatter;

/// Connect the collaborators the command needs and prepare the mapping table.
async fn orchestrator(config: &CliConfig, stop: StopSignal) -> Result<MigrationOrchestrator> {
    let store = PgStore::connect(
        &config.database_url,
        config.max_connections,
        config.migration.tables.clone(),
    )
    .await
    .map_err(|e| Error::Config(format!("cannot connect to database: {}", e)))?;
    tracing::info!(max_connections = config.max_connections, "database connected");

    let mut builder = MigrationOrchestrator::builder()
        .store(Arc::new(store))
        .config(config.migration.clone())
        .stop_signal(stop);

    if config.command.needs_identity_provider() {
        let provider = config.provider.build()?;
        tracing::info!(provider = provider.name(), "identity provider ready");
        builder = builder.identity_provider(provider);
    }

    if config.command.needs_object_storage() {
        let url = config.storage_url.as_deref().ok_or_else(|| {
            Error::Config("relocate-files needs --storage-url or STORAGE_URL".to_string())
        })?;
        let storage = ObjectStoreStorage::from_url(url)?;
        tracing::info!(storage_url = url, "object storage ready");
        builder = builder.object_storage(Arc::new(storage));
    }

    let orchestrator = builder.build()?;
    orchestrator.initialize().await?;
    Ok(orchestrator)
}

/// Run the configured command and return its formatted output.
pub async fn run(config: &CliConfig, formatter: &dyn Formatter, stop: StopSignal) -> Result<String> {
    let orchestrator = orchestrator(config, stop).await?;

    match &config.command {
        Command::Migrate { user: Some(legacy_id) } => {
            let outcome = orchestrator.migrate_user(legacy_id).await?;
            Ok(formatter.format_outcome(legacy_id.trim(), &outcome))
        }
        Command::Migrate { user: None } => {
            let summary = orchestrator.migrate_all_users().await?;
            Ok(formatter.format_summary(&summary))
        }
        Command::Lookup { identifier } => {
            let mapping = orchestrator.lookup(identifier).await?;
            Ok(formatter.format_mappings(std::slice::from_ref(&mapping)))
        }
        Command::List => {
            let mappings = orchestrator.list_mappings().await?;
            Ok(formatter.format_mappings(&mappings))
        }
        Command::RewriteKeys { descriptors, .. } => {
            let descriptors = load_descriptors(descriptors)?;
            let report = orchestrator.migrate_foreign_keys(&descriptors).await?;
            Ok(formatter.format_rewrite(&report))
        }
        Command::RelocateFiles { .. } => {
            let summary = orchestrator.migrate_user_files().await?;
            Ok(formatter.format_summary(&summary))
        }
    }
}
