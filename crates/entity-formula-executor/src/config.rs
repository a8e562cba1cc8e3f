//! Configuration types for the query executor.

use entity_formula::{CostModel, DEFAULT_BUFFER_SIZE};

/// Default page size used when a request carries no pagination.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Configuration for the query executor.
///
/// # Example
///
/// ```rust
/// use entity_formula_executor::{ExecutorConfig, PrefetchConfig};
///
/// let config = ExecutorConfig::builder()
///     .with_prefetch(PrefetchConfig::default())
///     .with_default_page_size(50)
///     .with_max_results(100_000)
///     .build();
/// assert_eq!(config.default_page_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Operation weights of the formulas built through [`QueryExecutor::factory`](crate::QueryExecutor::factory).
    pub cost_model: CostModel,
    /// Prefetch heuristics.
    pub prefetch: PrefetchConfig,
    /// Page size used when the request has no pagination.
    pub default_page_size: usize,
    /// Capacity of scratch buffers in the per-query pool.
    pub buffer_size: usize,
    /// Maximum number of matching records (None = unlimited).
    pub max_results: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cost_model: CostModel::default(),
            prefetch: PrefetchConfig::default(),
            default_page_size: DEFAULT_PAGE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_results: None,
        }
    }
}

impl ExecutorConfig {
    /// Creates a new builder for ExecutorConfig.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }
}

/// Builder for ExecutorConfig.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    /// Sets the cost model.
    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.config.cost_model = cost_model;
        self
    }

    /// Sets the prefetch configuration.
    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.config.prefetch = prefetch;
        self
    }

    /// Disables entity prefetching.
    pub fn without_prefetch(mut self) -> Self {
        self.config.prefetch.enabled = false;
        self
    }

    /// Sets the default page size.
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.config.default_page_size = size;
        self
    }

    /// Sets the scratch buffer capacity.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Sets the maximum number of results.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.config.max_results = Some(max_results);
        self
    }

    /// Builds the ExecutorConfig.
    pub fn build(self) -> ExecutorConfig {
        self.config
    }
}

/// Heuristics deciding whether entity bodies are fetched before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Whether prefetching is considered at all.
    pub enabled: bool,
    /// Largest constant bitmap (in conjunctive scope) that still allows prefetching.
    pub bitmap_size_threshold: usize,
    /// Cost of fetching one requirement of one entity.
    pub cost_per_requirement: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bitmap_size_threshold: 1000,
            cost_per_requirement: 148,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.cost_model, CostModel::default());
        assert!(config.prefetch.enabled);
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.max_results.is_none());
    }

    #[test]
    fn test_executor_config_builder() {
        let config = ExecutorConfig::builder()
            .without_prefetch()
            .with_buffer_size(64)
            .with_max_results(50_000)
            .build();

        assert!(!config.prefetch.enabled);
        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.max_results, Some(50_000));
    }

    #[test]
    fn test_prefetch_config_default() {
        let prefetch = PrefetchConfig::default();
        assert_eq!(prefetch.bitmap_size_threshold, 1000);
        assert_eq!(prefetch.cost_per_requirement, 148);
    }
}
