//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use idmigrate_core::{IdentityMapping, PhaseSummary, RewriteReport, UserOutcome};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format mapping rows.
    fn format_mappings(&self, mappings: &[IdentityMapping]) -> String;

    /// Format the result of migrating a single user.
    fn format_outcome(&self, legacy_id: &str, outcome: &UserOutcome) -> String;

    /// Format a batch phase summary.
    fn format_summary(&self, summary: &PhaseSummary) -> String;

    /// Format a foreign-key rewrite report.
    fn format_rewrite(&self, report: &RewriteReport) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

fn outcome_fields(outcome: &UserOutcome) -> (&'static str, &str, bool, bool) {
    match outcome {
        UserOutcome::Skipped => ("skipped", "", false, false),
        UserOutcome::Migrated {
            new_id,
            created_user,
            membership_added,
        } => ("migrated", new_id.as_str(), *created_user, *membership_added),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_mappings(&self, mappings: &[IdentityMapping]) -> String {
        if mappings.is_empty() {
            return "No mappings".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["legacy_id", "email", "new_id", "migrated_at"]);
        for mapping in mappings {
            table.add_row(vec![
                Cell::new(&mapping.legacy_id),
                Cell::new(&mapping.email),
                Cell::new(&mapping.new_id),
                Cell::new(mapping.migrated_at.to_rfc3339()),
            ]);
        }
        format!("{}\n{} mapping(s)", table, mappings.len())
    }

    fn format_outcome(&self, legacy_id: &str, outcome: &UserOutcome) -> String {
        match outcome {
            UserOutcome::Skipped => format!("{}: not a legacy id, skipped", legacy_id),
            UserOutcome::Migrated {
                new_id,
                created_user,
                membership_added,
            } => {
                let mut line = format!("{} -> {}", legacy_id, new_id);
                if *created_user {
                    line.push_str(" (user created)");
                }
                if *membership_added {
                    line.push_str(" (membership added)");
                }
                line
            }
        }
    }

    fn format_summary(&self, summary: &PhaseSummary) -> String {
        summary.to_string()
    }

    fn format_rewrite(&self, report: &RewriteReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["table", "column", "kind", "scanned", "updated", "errors"]);
        for t in &report.tables {
            let scanned = if t.scan_failed {
                "scan failed".to_string()
            } else {
                t.scanned.to_string()
            };
            table.add_row(vec![
                Cell::new(&t.table),
                Cell::new(&t.column),
                Cell::new(t.kind),
                Cell::new(scanned),
                Cell::new(t.updated),
                Cell::new(t.errors),
            ]);
        }
        format!("{}\n{}", table, report.summary)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_mappings(&self, mappings: &[IdentityMapping]) -> String {
        serde_json::to_string_pretty(mappings).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_outcome(&self, legacy_id: &str, outcome: &UserOutcome) -> String {
        let (status, new_id, created_user, membership_added) = outcome_fields(outcome);
        let new_id = (!new_id.is_empty()).then_some(new_id);
        serde_json::json!({
            "legacy_id": legacy_id,
            "status": status,
            "new_id": new_id,
            "created_user": created_user,
            "membership_added": membership_added,
        })
        .to_string()
    }

    fn format_summary(&self, summary: &PhaseSummary) -> String {
        serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_rewrite(&self, report: &RewriteReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_mappings(&self, mappings: &[IdentityMapping]) -> String {
        let mut output = String::from("legacy_id,email,new_id,migrated_at\n");
        for mapping in mappings {
            output.push_str(&format!(
                "{},\"{}\",{},{}\n",
                mapping.legacy_id,
                escape_csv(&mapping.email),
                mapping.new_id,
                mapping.migrated_at.to_rfc3339()
            ));
        }
        output
    }

    fn format_outcome(&self, legacy_id: &str, outcome: &UserOutcome) -> String {
        let (status, new_id, created_user, membership_added) = outcome_fields(outcome);
        format!(
            "legacy_id,status,new_id,created_user,membership_added\n{},{},{},{},{}\n",
            legacy_id, status, new_id, created_user, membership_added
        )
    }

    fn format_summary(&self, summary: &PhaseSummary) -> String {
        format!(
            "phase,success,skipped,errors,interrupted\n{},{},{},{},{}\n",
            summary.phase, summary.success, summary.skipped, summary.errors, summary.interrupted
        )
    }

    fn format_rewrite(&self, report: &RewriteReport) -> String {
        let mut output = String::from("table,column,kind,scanned,updated,errors,scan_failed\n");
        for t in &report.tables {
            output.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                t.table, t.column, t.kind, t.scanned, t.updated, t.errors, t.scan_failed
            ));
        }
        output
    }
}

/// Escape a string for CSV.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}
