use thiserror::Error;

/// Closed persistence error kinds (§4.1 of the spec). Every repository
/// operation resolves to one of these, never a raw driver error.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient I/O error: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Domain-level error kinds (§7). These are not Rust exception types in the
/// panic sense — they classify outcomes that business logic must branch on
/// (retry, surface to a state machine, or exit the process).
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("input malformed: {0}")]
    InputMalformed(String),
    #[error("transient I/O: {0}")]
    TransientIo(String),
    #[error("provider rate limited, resets at {reset_at:?}")]
    ProviderRateLimited {
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    #[error("budget exhausted")]
    BudgetExhausted,
    #[error("business invariant violated: {0}")]
    BusinessInvariantViolated(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("fatal bootstrap error: {0}")]
    Fatal(String),
}

impl From<PersistError> for WardenError {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::NotFound => WardenError::BusinessInvariantViolated("not found".into()),
            PersistError::Conflict(msg) => WardenError::BusinessInvariantViolated(msg),
            PersistError::Transient(msg) => WardenError::TransientIo(msg),
            PersistError::Fatal(msg) => WardenError::Fatal(msg),
        }
    }
}
