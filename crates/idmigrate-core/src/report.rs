//! Per-phase counters.

use serde::Serialize;

use crate::model::ColumnKind;

/// Batch phase of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Users,
    ForeignKeys,
    Files,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Users => write!(f, "users"),
            Phase::ForeignKeys => write!(f, "foreign_keys"),
            Phase::Files => write!(f, "files"),
        }
    }
}

/// Outcome counts of one batch phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub success: usize,
    pub skipped: usize,
    pub errors: usize,
    /// The phase stopped early on request; remaining units were not started.
    pub interrupted: bool,
}

impl PhaseSummary {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            success: 0,
            skipped: 0,
            errors: 0,
            interrupted: false,
        }
    }

    /// Units that were attempted.
    pub fn total(&self) -> usize {
        self.success + self.skipped + self.errors
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0 && !self.interrupted
    }
}

impl std::fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} skipped, {} failed",
            self.phase, self.success, self.skipped, self.errors
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Rewrite counts for one described column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub column: String,
    pub kind: ColumnKind,
    pub scanned: usize,
    pub updated: usize,
    pub errors: usize,
    /// Rows examined that needed no change. Rows left behind by a stop are
    /// in neither this nor `updated`.
    pub unchanged: usize,
    /// The scan itself failed; no rows were examined.
    pub scan_failed: bool,
}

/// Result of the foreign-key rewrite phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub summary: PhaseSummary,
    pub tables: Vec<TableSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let mut summary = PhaseSummary::new(Phase::Users);
        summary.success = 3;
        summary.skipped = 1;
        assert_eq!(summary.to_string(), "users: 3 succeeded, 1 skipped, 0 failed");
        assert!(summary.is_clean());

        summary.interrupted = true;
        assert!(summary.to_string().ends_with("(interrupted)"));
        assert!(!summary.is_clean());
        assert_eq!(summary.total(), 4);
    }
}
