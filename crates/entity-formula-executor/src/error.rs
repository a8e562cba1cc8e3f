//! Error types for query execution.

use entity_formula::{ErrorKind, FormulaError, PrimaryKey};
use thiserror::Error;

/// Errors that can occur while executing a query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Error raised by the formula tree.
    #[error("formula error: {0}")]
    Formula(#[from] FormulaError),

    /// Hierarchy statistics were requested on an entity type without a hierarchy.
    #[error("entity type `{0}` is not hierarchical")]
    TargetEntityIsNotHierarchical(String),

    /// Reference is not known for the queried entity type.
    #[error("reference `{reference}` is not defined on entity type `{entity_type}`")]
    ReferenceNotFound {
        /// Queried entity type.
        entity_type: String,
        /// Requested reference name.
        reference: String,
    },

    /// Hierarchy node used as an anchor does not exist.
    #[error("hierarchy node {node} not found in `{entity_type}`")]
    HierarchyNodeNotFound {
        /// Hierarchical entity type.
        entity_type: String,
        /// Missing node.
        node: PrimaryKey,
    },

    /// Conditional gap expression could not be parsed.
    #[error("invalid gap expression at position {position}: {message}")]
    InvalidGapExpression {
        /// Position in the input where parsing failed.
        position: usize,
        /// Description of the error.
        message: String,
    },

    /// Page number or size is out of range.
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// Result set exceeds the configured limit.
    #[error("result set too large: {count} exceeds limit {limit}")]
    ResultTooLarge {
        /// Number of matching records.
        count: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl QueryError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Formula(err) => err.kind(),
            _ => ErrorKind::Usage,
        }
    }
}

/// Result type for query execution.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_hierarchical() {
        let err = QueryError::TargetEntityIsNotHierarchical("brand".to_string());
        assert_eq!(err.to_string(), "entity type `brand` is not hierarchical");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_error_display_gap_expression() {
        let err = QueryError::InvalidGapExpression {
            position: 4,
            message: "unexpected input at: '&'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid gap expression at position 4: unexpected input at: '&'"
        );
    }

    #[test]
    fn test_error_display_result_too_large() {
        let err = QueryError::ResultTooLarge { count: 150, limit: 100 };
        assert_eq!(err.to_string(), "result set too large: 150 exceeds limit 100");
    }

    #[test]
    fn test_error_from_formula_error() {
        let err: QueryError = FormulaError::UnresolvedPriceIds {
            price_ids: vec![1],
            indexes_consulted: 0,
        }
        .into();
        assert!(matches!(err, QueryError::Formula(_)));
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
    }
}
