//! Rewrites stored legacy identifiers to their target identities.
//!
//! Each described column is scanned in full, then the changed rows are written
//! back one at a time, addressed by row locator. Values that are not
//! legacy-shaped, or that have no mapping, are never touched, so a second run
//! over an already rewritten table changes nothing.

use std::sync::Arc;

use crate::error::Error;
use crate::mapping::MappingCache;
use crate::model::{ColumnDescriptor, ColumnValue};
use crate::report::{Phase, PhaseSummary, RewriteReport, TableSummary};
use crate::signal::StopSignal;
use crate::store::MigrationStore;

/// Replacement for a scalar value, or `None` when it stays as is.
pub fn rewrite_scalar(value: Option<&str>, cache: &MappingCache) -> Option<String> {
    value
        .and_then(|id| cache.lookup(id))
        .map(str::to_string)
}

/// Replacement for an identifier array, or `None` when no element changes.
///
/// Nulls and unmapped elements pass through; order and length are preserved.
pub fn rewrite_array(
    values: Option<&[Option<String>]>,
    cache: &MappingCache,
) -> Option<Vec<Option<String>>> {
    let values = values?;
    let mut changed = false;
    let rewritten: Vec<Option<String>> = values
        .iter()
        .map(|element| match element.as_deref().and_then(|id| cache.lookup(id)) {
            Some(new_id) => {
                changed = true;
                Some(new_id.to_string())
            }
            None => element.clone(),
        })
        .collect();
    changed.then_some(rewritten)
}

fn rewrite_value(value: &ColumnValue, cache: &MappingCache) -> Option<ColumnValue> {
    match value {
        ColumnValue::Scalar(v) => {
            rewrite_scalar(v.as_deref(), cache).map(|id| ColumnValue::Scalar(Some(id)))
        }
        ColumnValue::Array(v) => {
            rewrite_array(v.as_deref(), cache).map(|ids| ColumnValue::Array(Some(ids)))
        }
    }
}

/// Drives the foreign-key rewrite phase.
#[derive(Clone)]
pub struct ForeignKeyRewriter {
    store: Arc<dyn MigrationStore>,
    stop: StopSignal,
    dry_run: bool,
}

impl ForeignKeyRewriter {
    pub fn new(store: Arc<dyn MigrationStore>, stop: StopSignal) -> Self {
        Self {
            store,
            stop,
            dry_run: false,
        }
    }

    /// Count changes without writing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Rewrite every described column. Row and scan failures are counted, not
    /// returned.
    pub async fn migrate_foreign_keys(
        &self,
        descriptors: &[ColumnDescriptor],
        cache: &MappingCache,
    ) -> RewriteReport {
        let mut summary = PhaseSummary::new(Phase::ForeignKeys);
        let mut tables = Vec::with_capacity(descriptors.len());
        tracing::info!(
            descriptors = descriptors.len(),
            mappings = cache.len(),
            dry_run = self.dry_run,
            "rewriting foreign keys"
        );

        for descriptor in descriptors {
            if self.stop.is_stopped() {
                summary.interrupted = true;
                break;
            }
            let table = self.rewrite_column(descriptor, cache).await;

            summary.success += table.updated;
            summary.errors += table.errors;
            if table.scan_failed {
                summary.errors += 1;
            }
            summary.skipped += table.unchanged;
            tables.push(table);

            if self.stop.is_stopped() {
                summary.interrupted = true;
                break;
            }
        }

        if summary.interrupted {
            tracing::warn!("stop requested, ending foreign key rewrite");
        }
        tracing::info!(
            updated = summary.success,
            unchanged = summary.skipped,
            errors = summary.errors,
            interrupted = summary.interrupted,
            "foreign key rewrite finished"
        );
        RewriteReport { summary, tables }
    }

    async fn rewrite_column(
        &self,
        descriptor: &ColumnDescriptor,
        cache: &MappingCache,
    ) -> TableSummary {
        let mut table = TableSummary {
            table: descriptor.table.clone(),
            column: descriptor.column.clone(),
            kind: descriptor.kind,
            scanned: 0,
            updated: 0,
            errors: 0,
            unchanged: 0,
            scan_failed: false,
        };

        let rows = match self.store.scan_column(descriptor).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    table = %descriptor.table,
                    column = %descriptor.column,
                    error = %e,
                    "column scan failed"
                );
                table.scan_failed = true;
                return table;
            }
        };
        table.scanned = rows.len();

        for row in &rows {
            if self.stop.is_stopped() {
                break;
            }
            let Some(value) = rewrite_value(&row.value, cache) else {
                table.unchanged += 1;
                continue;
            };
            if self.dry_run {
                tracing::debug!(table = %descriptor.table, locator = %row.locator, "would update row");
                table.updated += 1;
                continue;
            }
            match self.store.update_column(descriptor, &row.locator, &value).await {
                Ok(()) => table.updated += 1,
                Err(e) => {
                    let err = Error::RowUpdate {
                        table: descriptor.table.clone(),
                        column: descriptor.column.clone(),
                        locator: row.locator.to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %err, "row update failed");
                    table.errors += 1;
                }
            }
        }

        tracing::info!(
            table = %table.table,
            column = %table.column,
            kind = %table.kind,
            scanned = table.scanned,
            updated = table.updated,
            unchanged = table.unchanged,
            errors = table.errors,
            "column rewritten"
        );
        table
    }
}
