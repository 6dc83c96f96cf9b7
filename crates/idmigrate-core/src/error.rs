//! Engine error types.

use crate::identity::ProviderError;
use crate::store::StoreError;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Migration engine errors.
///
/// `Config` is the only fatal class during a batch run. The per-unit classes
/// (`Resolution`, `Transaction`, `RowUpdate`, `File`) are logged and counted
/// by the batch operations and only surface directly from single-record calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid setup (endpoint, credential, connection string).
    #[error("configuration error: {0}")]
    Config(String),

    /// Target identity lookup or creation failed for a reason other than not-found.
    #[error("identity resolution failed for {email}: {source}")]
    Resolution {
        /// Email being resolved.
        email: String,
        /// Provider failure.
        #[source]
        source: ProviderError,
    },

    /// A per-user transaction was rolled back.
    #[error("transaction for legacy user {legacy_id} rolled back: {source}")]
    Transaction {
        /// Legacy id of the user being migrated.
        legacy_id: String,
        /// Store failure that caused the rollback.
        #[source]
        source: StoreError,
    },

    /// Rewriting a single row failed.
    #[error("update of {table}.{column} at {locator} failed: {reason}")]
    RowUpdate {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Row locator.
        locator: String,
        /// Failure reason.
        reason: String,
    },

    /// Relocating a single file failed.
    #[error("file operation on {path} failed: {reason}")]
    File {
        /// Object path involved.
        path: String,
        /// Failure reason.
        reason: String,
    },

    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Identifier is not a legacy identifier.
    #[error("not a legacy identifier: {0}")]
    NotLegacyFormat(String),

    /// Store error outside of a per-user transaction.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Object storage error outside of a per-file operation.
    #[error("object storage error: {0}")]
    Storage(#[from] object_store::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error aborts a run rather than a single unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Io(_) | Error::Json(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RowUpdate {
            table: "documents".to_string(),
            column: "owner_id".to_string(),
            locator: "(0,1)".to_string(),
            reason: "deadlock detected".to_string(),
        };
        assert!(err.to_string().contains("documents.owner_id"));
        assert!(err.to_string().contains("(0,1)"));
    }

    #[test]
    fn test_fatal_classes() {
        assert!(Error::Config("DATABASE_URL is not set".into()).is_fatal());
        assert!(!Error::NotFound("abc".into()).is_fatal());
        assert!(!Error::File {
            path: "t1/abc/profile".into(),
            reason: "timeout".into()
        }
        .is_fatal());
    }
}
