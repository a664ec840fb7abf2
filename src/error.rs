use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Lookup denied: {0}")]
    LookupForbidden(String),

    #[error("Existing-record lookup failed: {0}")]
    Lookup(String),

    #[error("Upsert transport failure: {0}")]
    Transport(String),

    #[error("Audit write failed: {0}")]
    Audit(String),

    #[error("Import is not ready: {blocking_errors} row(s) with blocking errors, {unresolved_conflicts} row(s) in unresolved conflicts")]
    NotReady {
        blocking_errors: usize,
        unresolved_conflicts: usize,
    },

    #[error("Invalid import configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown row: {0}")]
    UnknownRow(String),

    #[error("Unknown conflict group: {0}")]
    UnknownConflictGroup(String),

    #[error("Row {row} does not belong to conflict group {group}")]
    WinnerNotInGroup { group: String, row: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;
