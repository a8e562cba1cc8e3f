//! # entity-formula-optimizer
//!
//! Tree rewriting and result caching for [`entity_formula`] trees.
//!
//! ## Features
//!
//! - **Always on**: [`FormulaTreeOptimizer`] regroups conjunctions around a
//!   recurring subtree so it becomes a single stable, cacheable node
//! - **`formula-cache`** (default): shared LRU cache of flattened formula
//!   results with TTL, staleness checks on transactional ids and single-flight
//!   computation, plus the [`CachedQueryService`] wrapping the executor
//!
//! ## Quick Start
//!
//! ### Using FormulaTreeOptimizer
//!
//! ```ignore
//! use entity_formula_optimizer::FormulaTreeOptimizer;
//!
//! let optimizer = FormulaTreeOptimizer::matching_hash(price_filter.hash());
//! let outcome = optimizer.optimize(&filter)?;
//! println!("split {} nodes", outcome.split_nodes);
//! ```
//!
//! ### Using LruFormulaCache (feature: `formula-cache`)
//!
//! ```ignore
//! use entity_formula_optimizer::cache::{FormulaCacheConfig, LruFormulaCache};
//!
//! let cache = Arc::new(LruFormulaCache::new(
//!     FormulaCacheConfig::default().with_ttl(Duration::from_secs(60)),
//! )?);
//!
//! // Expensive subtrees are served from, or computed into, the cache
//! let filter = cache.register(&filter)?;
//! let bitmap = filter.compute()?;
//! ```
//!
//! ### Using CachedQueryService (feature: `formula-cache`)
//!
//! ```ignore
//! use entity_formula_optimizer::service::CachedQueryService;
//!
//! let service = CachedQueryService::new(executor)?;
//! let response = service.execute(QueryRequest::new("product", filter))?;
//! ```

pub mod error;
pub mod rewrite;

// Feature-gated modules
#[cfg(feature = "formula-cache")]
pub mod cache;

#[cfg(feature = "formula-cache")]
pub mod service;

// Re-export commonly used types
pub use error::{OptimizerError, OptimizerResult};
pub use rewrite::{FormulaTreeOptimizer, OptimizationOutcome};

#[cfg(feature = "formula-cache")]
pub use cache::{CacheStats, CacheStore, FormulaCacheConfig, LruFormulaCache};

#[cfg(feature = "formula-cache")]
pub use service::{CachedQueryService, ServiceStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = FormulaTreeOptimizer::new(|_| false);
        let _: OptimizerResult<()> = Ok(());
        #[cfg(feature = "formula-cache")]
        {
            let _ = FormulaCacheConfig::default();
            let _ = CacheStats::default();
            let _ = ServiceStats::default();
        }
    }
}
