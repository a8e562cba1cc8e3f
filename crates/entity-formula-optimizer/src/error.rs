//! Error types for the optimizer crate.

/// Result type for optimizer operations.
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Errors that can occur during optimizer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptimizerError {
    /// Formula construction or evaluation error.
    #[error("formula error: {0}")]
    Formula(#[from] entity_formula::FormulaError),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(#[from] entity_formula_executor::QueryError),

    /// Cache configuration is unusable.
    #[cfg(feature = "formula-cache")]
    #[error("invalid cache configuration: {0}")]
    InvalidCacheConfig(String),
}

impl OptimizerError {
    /// Creates an invalid cache configuration error.
    #[cfg(feature = "formula-cache")]
    pub fn invalid_cache_config(message: impl Into<String>) -> Self {
        Self::InvalidCacheConfig(message.into())
    }
}

impl From<OptimizerError> for entity_formula::FormulaError {
    fn from(err: OptimizerError) -> Self {
        match err {
            OptimizerError::Formula(inner) => inner,
            other => entity_formula::FormulaError::InternalConsistency(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_formula::FormulaError;

    #[test]
    fn test_formula_error_round_trips() {
        let err: OptimizerError = FormulaError::NotInitialized("wrapper".to_string()).into();
        assert!(matches!(err, OptimizerError::Formula(_)));
        let back: FormulaError = err.into();
        assert_eq!(back, FormulaError::NotInitialized("wrapper".to_string()));
    }

    #[cfg(feature = "formula-cache")]
    #[test]
    fn test_invalid_config_display() {
        let err = OptimizerError::invalid_cache_config("max_entries must be positive");
        assert_eq!(
            err.to_string(),
            "invalid cache configuration: max_entries must be positive"
        );
    }
}
