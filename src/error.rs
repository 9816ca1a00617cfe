use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors reported by the cohort engine and its numerical helpers.
///
/// Every check runs before any computation starts, so an error never comes
/// with a partial result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid transition matrix for cycle {cycle}, row {row}: {reason}")]
    InvalidTransitionMatrix {
        cycle: usize,
        row: usize,
        reason: String,
    },

    #[error("invalid parameter {what}: {reason}")]
    InvalidParameter { what: String, reason: String },
}

impl ModelError {
    pub(crate) fn dim(what: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            found,
        }
    }

    pub(crate) fn param(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidParameter {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
