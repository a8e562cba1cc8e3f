//! Query execution through the shared formula cache.
//!
//! The service prepares every filter before handing the request to the
//! executor: the optional tree optimizer regroups recurring subtrees first,
//! then the cache substitutes expensive cacheable subtrees.
//!
//! # Example
//!
//! ```ignore
//! use entity_formula_optimizer::service::CachedQueryService;
//! use entity_formula_optimizer::FormulaTreeOptimizer;
//!
//! let service = CachedQueryService::new(executor)?
//!     .with_optimizer(FormulaTreeOptimizer::matching_hash(shared_price_filter.hash()));
//!
//! let response = service.execute(QueryRequest::new("product", filter))?;
//! println!("{}", service.stats());
//! println!("{}", service.cache().stats());
//! ```

mod types;

pub use types::ServiceStats;

use std::sync::Arc;
use std::time::Instant;

use entity_formula::{FormulaKind, FormulaRef, VisitControl};
use entity_formula_executor::{QueryExecutor, QueryPlan, QueryRequest, QueryResponse};
use parking_lot::RwLock;

use crate::cache::{FormulaCacheConfig, LruFormulaCache};
use crate::error::OptimizerResult;
use crate::rewrite::FormulaTreeOptimizer;

/// Query executor backed by a formula cache.
pub struct CachedQueryService {
    executor: QueryExecutor,
    cache: Arc<LruFormulaCache>,
    optimizer: Option<FormulaTreeOptimizer>,
    stats: RwLock<ServiceStats>,
}

impl CachedQueryService {
    /// Creates a service with the default cache configuration.
    pub fn new(executor: QueryExecutor) -> OptimizerResult<Self> {
        Self::with_config(executor, FormulaCacheConfig::default())
    }

    /// Creates a service with its own cache.
    pub fn with_config(executor: QueryExecutor, config: FormulaCacheConfig) -> OptimizerResult<Self> {
        Ok(Self::with_shared_cache(executor, Arc::new(LruFormulaCache::new(config)?)))
    }

    /// Creates a service using a cache shared with other services.
    pub fn with_shared_cache(executor: QueryExecutor, cache: Arc<LruFormulaCache>) -> Self {
        Self {
            executor,
            cache,
            optimizer: None,
            stats: RwLock::new(ServiceStats::default()),
        }
    }

    /// Rewrites filters with `optimizer` before registering them.
    pub fn with_optimizer(mut self, optimizer: FormulaTreeOptimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Optimizes the filter and substitutes cached subtrees.
    pub fn prepare(&self, filter: &FormulaRef) -> OptimizerResult<FormulaRef> {
        let filter = match &self.optimizer {
            Some(optimizer) => {
                let outcome = optimizer.optimize(filter)?;
                if outcome.is_rewritten() {
                    self.stats.write().optimized_queries += 1;
                }
                outcome.formula
            }
            None => Arc::clone(filter),
        };
        let registered = self.cache.register(&filter)?;

        let (mut flattened, mut deferred) = (0, 0);
        registered.visit(&mut |formula, _| match formula.kind() {
            FormulaKind::Flattened(_) => {
                flattened += 1;
                VisitControl::SkipChildren
            }
            FormulaKind::Deferred(supplier) if supplier.description() == "cached" => {
                deferred += 1;
                VisitControl::SkipChildren
            }
            _ => VisitControl::Continue,
        });
        let mut stats = self.stats.write();
        stats.flattened_subtrees += flattened;
        stats.deferred_subtrees += deferred;
        Ok(registered)
    }

    /// Executes the request with a prepared filter.
    pub fn execute(&self, mut request: QueryRequest) -> OptimizerResult<QueryResponse> {
        let start = Instant::now();
        request.filter = self.prepare(&request.filter)?;
        let response = self.executor.execute(request)?;

        let mut stats = self.stats.write();
        stats.queries_executed += 1;
        stats.total_execution_time_ms += start.elapsed().as_secs_f64() * 1000.0;
        Ok(response)
    }

    /// Creates the plan of the prepared filter without evaluating it.
    pub fn explain(&self, filter: &FormulaRef) -> OptimizerResult<QueryPlan> {
        let prepared = self.prepare(filter)?;
        Ok(self.executor.explain(&prepared))
    }

    /// Returns the formula cache.
    pub fn cache(&self) -> &Arc<LruFormulaCache> {
        &self.cache
    }

    /// Returns the underlying executor.
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Returns service statistics.
    pub fn stats(&self) -> ServiceStats {
        self.stats.read().clone()
    }

    /// Resets statistics.
    pub fn reset_stats(&self) {
        *self.stats.write() = ServiceStats::default();
    }
}

impl std::fmt::Debug for CachedQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedQueryService")
            .field("executor", &self.executor)
            .field("cache", &self.cache)
            .field("optimizer", &self.optimizer.is_some())
            .finish()
    }
}
