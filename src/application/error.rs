use thiserror::Error;

use crate::domain::{AdjustError, CashAccountId};

/// Broad classes of failure callers translate into user-facing responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input rejected before anything was written
    Validation,
    /// An entry or a referenced record does not exist
    NotFound,
    /// Lost a race or collided with existing data
    Conflict,
    /// Storage infrastructure failure
    Store,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid week: {0}")]
    InvalidWeek(String),

    #[error("Balance adjustment rejected: {0}")]
    Adjustment(#[from] AdjustError),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Cash account not found: {0}")]
    CashAccountNotFound(String),

    #[error("Week not found: {0}")]
    WeekNotFound(String),

    #[error("Person not found: {0}")]
    PersonNotFound(String),

    #[error("Referenced record not found: {0}")]
    ReferenceNotFound(String),

    #[error("Cash account already exists: {0}")]
    CashAccountAlreadyExists(String),

    #[error("Person already exists: {0}")]
    PersonAlreadyExists(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Ledger is busy, retry the operation: {0}")]
    Busy(String),

    #[error("Balance of cash account {0} changed concurrently")]
    BalanceConflict(CashAccountId),

    #[error("Database error: {0}")]
    Database(anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidAmount(_)
            | AppError::MissingField(_)
            | AppError::InvalidField { .. }
            | AppError::InvalidWeek(_)
            | AppError::Adjustment(_) => ErrorKind::Validation,

            AppError::EntryNotFound(_)
            | AppError::CashAccountNotFound(_)
            | AppError::WeekNotFound(_)
            | AppError::PersonNotFound(_)
            | AppError::ReferenceNotFound(_) => ErrorKind::NotFound,

            AppError::CashAccountAlreadyExists(_)
            | AppError::PersonAlreadyExists(_)
            | AppError::AlreadyExists(_)
            | AppError::Busy(_)
            | AppError::BalanceConflict(_) => ErrorKind::Conflict,

            AppError::Database(_) => ErrorKind::Store,
        }
    }

    /// Whether the same request may succeed if simply issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_) | AppError::BalanceConflict(_))
    }
}

// SQLite primary result codes, compared against the low byte of extended codes
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::PoolTimedOut) => AppError::Busy(format!("{:#}", err)),
            Some(sqlx::Error::Database(db_err)) => {
                let primary_code = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);

                if matches!(primary_code, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                    AppError::Busy(db_err.message().to_string())
                } else if db_err.is_foreign_key_violation() {
                    AppError::ReferenceNotFound(db_err.message().to_string())
                } else if db_err.is_unique_violation() {
                    AppError::AlreadyExists(db_err.message().to_string())
                } else {
                    AppError::Database(err)
                }
            }
            _ => AppError::Database(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            AppError::InvalidAmount("zero".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AppError::EntryNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(AppError::Busy("locked".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            AppError::Database(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Store
        );
    }

    #[test]
    fn test_only_lock_failures_are_retryable() {
        assert!(AppError::Busy("locked".into()).is_retryable());
        assert!(AppError::BalanceConflict(uuid::Uuid::new_v4()).is_retryable());
        assert!(!AppError::CashAccountAlreadyExists("Main".into()).is_retryable());
        assert!(!AppError::EntryNotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_pool_timeout_maps_to_busy() {
        let err = anyhow::Error::new(sqlx::Error::PoolTimedOut).context("Failed to begin unit of work");
        let app: AppError = err.into();
        assert!(matches!(app, AppError::Busy(_)));
    }

    #[test]
    fn test_other_errors_map_to_database() {
        let app: AppError = anyhow::anyhow!("something broke").into();
        assert!(matches!(app, AppError::Database(_)));
    }
}
