//! Error types for formula construction and evaluation.

use thiserror::Error;

use crate::bitmap::PrimaryKey;

/// Errors raised while building or computing a formula tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    /// Price ids survived every known price index without being resolved.
    #[error("price ids {price_ids:?} were not resolved by any of {indexes_consulted} price indexes")]
    UnresolvedPriceIds {
        /// Ids left without a backing price record.
        price_ids: Vec<PrimaryKey>,
        /// Number of price indexes consulted.
        indexes_consulted: usize,
    },

    /// A deferred supplier was asked for its bitmap before the execution context was bound.
    #[error("{0} was computed before the query execution context was initialized")]
    NotInitialized(String),

    /// The node kind does not support the requested operation.
    #[error("unsupported operation on {kind} formula: {message}")]
    UnsupportedOperation {
        /// Kind of the formula node.
        kind: &'static str,
        /// What was attempted.
        message: String,
    },

    /// A node was built with a child count its kind does not accept.
    #[error("{kind} formula expects {expected} children, got {actual}")]
    InvalidArity {
        /// Kind of the formula node.
        kind: &'static str,
        /// Accepted child count.
        expected: &'static str,
        /// Provided child count.
        actual: usize,
    },

    /// Internal state contradicts itself.
    #[error("internal consistency violated: {0}")]
    InternalConsistency(String),
}

/// Classification of formula errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal, indicates a bug in index construction or evaluation.
    InternalConsistency,
    /// Misuse detected before evaluation begins.
    Usage,
    /// A structural request the node kind cannot honor.
    UnsupportedOperation,
}

impl FormulaError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormulaError::UnresolvedPriceIds { .. } | FormulaError::InternalConsistency(_) => {
                ErrorKind::InternalConsistency
            }
            FormulaError::NotInitialized(_) | FormulaError::InvalidArity { .. } => ErrorKind::Usage,
            FormulaError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
        }
    }

    pub(crate) fn unsupported(kind: &'static str, message: impl Into<String>) -> Self {
        FormulaError::UnsupportedOperation {
            kind,
            message: message.into(),
        }
    }
}

/// Result type for formula operations.
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unresolved_price_ids() {
        let err = FormulaError::UnresolvedPriceIds {
            price_ids: vec![7, 9],
            indexes_consulted: 2,
        };
        assert_eq!(
            err.to_string(),
            "price ids [7, 9] were not resolved by any of 2 price indexes"
        );
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
    }

    #[test]
    fn test_error_display_not_initialized() {
        let err = FormulaError::NotInitialized("formula wrapper".to_string());
        assert_eq!(
            err.to_string(),
            "formula wrapper was computed before the query execution context was initialized"
        );
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_error_display_invalid_arity() {
        let err = FormulaError::InvalidArity {
            kind: "not",
            expected: "exactly 2",
            actual: 3,
        };
        assert_eq!(err.to_string(), "not formula expects exactly 2 children, got 3");
    }

    #[test]
    fn test_unsupported_operation_kind() {
        let err = FormulaError::unsupported("constant", "terminal formulas cannot have children");
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(
            err.to_string(),
            "unsupported operation on constant formula: terminal formulas cannot have children"
        );
    }
}
