//! Error taxonomy shared by the importer, diff engine, store and resolver.
//!
//! Setup errors (`EmptyInput`, `PrimaryKeyNotFound`, `Authentication`,
//! `Schema`) are raised before any rows are touched. `ImportFailed` is only
//! raised after a full pass, once the good rows have been committed.

use std::fmt;

use thiserror::Error;

use crate::import::{FailedRow, ImportReport};

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Number of failed rows quoted in an [`ImportFailure`] message.
pub const FAILURE_SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("CSV input '{origin}' is empty or contains only a header row")]
    EmptyInput { origin: String },

    #[error("Primary key column '{column}' not found in CSV")]
    PrimaryKeyNotFound { column: String },

    #[error("{0}")]
    ImportFailed(Box<ImportFailure>),

    #[error("Cannot find {name} in member database. Tried: {tried:?}")]
    IdentityNotFound { name: String, tried: Vec<String> },

    #[error("Cannot extract name from: {0}")]
    NameTooShort(String),

    #[error("Cannot unlock database {path}: {reason}")]
    Authentication { path: String, reason: String },

    #[error("Encrypted storage requested but SQLCipher support is not compiled in")]
    EncryptionUnavailable,

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Cannot find member {0}")]
    MemberNotFound(i64),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl LedgerError {
    pub fn schema(message: impl Into<String>) -> Self {
        LedgerError::Schema(message.into())
    }

    /// The partial-success details when this is an aggregate import failure.
    pub fn import_failure(&self) -> Option<&ImportFailure> {
        match self {
            LedgerError::ImportFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Rows that could not be stored during an otherwise completed import.
#[derive(Debug)]
pub struct ImportFailure {
    pub origin: String,
    pub report: ImportReport,
    pub failures: Vec<FailedRow>,
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to import: {} ({} row(s) failed, {} inserted)",
            self.origin,
            self.failures.len(),
            self.report.inserted
        )?;
        for failed in self.failures.iter().take(FAILURE_SAMPLE_LIMIT) {
            write!(f, "\n  Failed: {} | Data: {:?}", failed.error, failed.raw)?;
        }
        if self.failures.len() > FAILURE_SAMPLE_LIMIT {
            write!(
                f,
                "\n  ... and {} more",
                self.failures.len() - FAILURE_SAMPLE_LIMIT
            )?;
        }
        Ok(())
    }
}
