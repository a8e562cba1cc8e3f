//! Shared cache of flattened formula results.
//!
//! Expensive cacheable subtrees (conjunctions, disjunctions, negations and
//! price translations whose estimated cost reaches the configured threshold)
//! are keyed by their structural hash. [`LruFormulaCache::register`] walks a
//! filter tree before evaluation and substitutes every such subtree:
//!
//! - a fresh hit becomes a terminal `Flattened` node,
//! - a miss or a stale payload becomes a `Deferred` node that computes
//!   through [`LruFormulaCache::get_or_compute`], so concurrent queries with
//!   the same hash compute it at most once.
//!
//! A payload is stale when the hash of the transactional ids it was computed
//! over differs from the current subtree's, or when it outlived the TTL.
//!
//! # Example
//!
//! ```ignore
//! use entity_formula_optimizer::cache::{FormulaCacheConfig, LruFormulaCache};
//!
//! let cache = Arc::new(LruFormulaCache::new(FormulaCacheConfig::default())?);
//! let filter = cache.register(&filter)?;
//! let result = filter.compute()?;
//! println!("{}", cache.stats());
//! ```

mod config;
mod store;
mod supplier;

pub use config::{CacheStats, FormulaCacheConfig};
pub use store::LruFormulaCache;
pub use supplier::CacheFlightSupplier;

use std::sync::Arc;

use entity_formula::FlattenedFormula;

/// Storage of flattened payloads keyed by structural hash.
pub trait CacheStore: Send + Sync {
    /// Returns the stored payload, if any.
    fn lookup(&self, hash: u64) -> Option<Arc<FlattenedFormula>>;

    /// Stores a payload, replacing any previous one.
    fn store(&self, hash: u64, payload: Arc<FlattenedFormula>);
}
