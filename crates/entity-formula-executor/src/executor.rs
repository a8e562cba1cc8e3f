//! Query executor driving a filter formula end to end.

use std::sync::Arc;
use std::time::Instant;

use entity_formula::{BufferPool, EntityFetcher, Formula, FormulaFactory, FormulaRef, QueryExecutionContext};
use log::debug;

use crate::config::ExecutorConfig;
use crate::error::{QueryError, QueryResult};
use crate::hierarchy::{ExtraResults, HierarchyRequest, ProducerRegistry, StatisticsBase, StatisticsBases};
use crate::planner::{QueryPlan, QueryPlanner};
use crate::result::{DataChunk, ExecutionStats, QueryResponse};
use crate::slice::{slicer_for, Pagination};
use crate::sort::{Sorter, SorterChain};
use crate::traits::IndexProvider;

/// A query over one entity type.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Queried entity type.
    pub entity_type: String,
    /// Filter formula.
    pub filter: FormulaRef,
    /// Requested window; the configured default page without one.
    pub pagination: Option<Pagination>,
    /// Sorters in priority order.
    pub sorters: SorterChain,
    /// Hierarchy statistics requests.
    pub hierarchy: Vec<HierarchyRequest>,
}

impl QueryRequest {
    /// Creates a request returning the default page in natural order.
    pub fn new(entity_type: impl Into<String>, filter: FormulaRef) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter,
            pagination: None,
            sorters: SorterChain::default(),
            hierarchy: Vec::new(),
        }
    }

    /// Sets the pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Appends a sorter.
    pub fn with_sorter(mut self, sorter: Arc<dyn Sorter>) -> Self {
        self.sorters = self.sorters.then(sorter);
        self
    }

    /// Adds a hierarchy statistics request.
    pub fn with_hierarchy(mut self, request: HierarchyRequest) -> Self {
        self.hierarchy.push(request);
        self
    }
}

/// Executes queries against an index provider.
///
/// # Example
///
/// ```ignore
/// let executor = QueryExecutor::new(provider, ExecutorConfig::default()).with_fetcher(fetcher);
///
/// let request = QueryRequest::new("product", filter)
///     .with_pagination(Pagination::page(2, 20))
///     .with_sorter(Arc::new(PreSortedRecordsSorter::new(price_index)));
/// let response = executor.execute(request)?;
/// ```
pub struct QueryExecutor {
    provider: Arc<dyn IndexProvider>,
    fetcher: Option<Arc<dyn EntityFetcher>>,
    config: ExecutorConfig,
    planner: QueryPlanner,
}

impl QueryExecutor {
    /// Creates an executor.
    pub fn new(provider: Arc<dyn IndexProvider>, config: ExecutorConfig) -> Self {
        let planner = QueryPlanner::new(config.prefetch);
        Self {
            provider,
            fetcher: None,
            config,
            planner,
        }
    }

    /// Sets the entity fetcher used for prefetching and entity sorting.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Returns the executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the index provider.
    pub fn provider(&self) -> &Arc<dyn IndexProvider> {
        &self.provider
    }

    /// Formula factory using the configured cost model.
    pub fn factory(&self) -> FormulaFactory {
        FormulaFactory::new(self.config.cost_model)
    }

    /// Creates the plan of a filter without evaluating it.
    pub fn explain(&self, filter: &Formula) -> QueryPlan {
        self.planner.plan(filter)
    }

    /// Executes the request.
    pub fn execute(&self, request: QueryRequest) -> QueryResult<QueryResponse> {
        let start = Instant::now();

        let mut registry = ProducerRegistry::new();
        for hierarchy in &request.hierarchy {
            registry.register_hierarchy(&self.provider, &request.entity_type, hierarchy)?;
        }

        let plan = self.planner.plan(&request.filter);
        let pool = Arc::new(BufferPool::new(self.config.buffer_size));
        let ctx = Arc::new(self.context(&request, &plan, pool.clone()));
        let prefetched_entities = ctx.prefetched_entities().map_or(0, <[_]>::len);

        request.filter.initialize(&ctx);
        let matching = request.filter.compute()?;
        let total = matching.size();
        if let Some(limit) = self.config.max_results {
            if total > limit {
                return Err(QueryError::ResultTooLarge { count: total, limit });
            }
        }

        let pagination = request
            .pagination
            .clone()
            .unwrap_or_else(|| Pagination::page(1, self.config.default_page_size));
        let window = slicer_for(&pagination).calculate_offset_and_limit(&pagination, total)?;
        let primary_keys = request
            .sorters
            .sort_and_slice(&ctx, &matching, window.offset, window.end(total))?;

        let extra_results = if registry.is_empty() {
            ExtraResults::default()
        } else {
            let without_user_filter = if registry.needs_base(StatisticsBase::WithoutUserFilter) {
                match request.filter.without_user_filter()? {
                    Some(formula) => {
                        formula.initialize(&ctx);
                        Some(formula.compute()?)
                    }
                    None => None,
                }
            } else {
                None
            };
            let bases = StatisticsBases::new(matching.clone()).with_without_user_filter(without_user_filter);
            registry.produce_all(&bases)?
        };

        let stats = ExecutionStats {
            duration: start.elapsed(),
            estimated_cost: plan.estimated_cost,
            actual_cost: request.filter.cost(),
            prefetched_entities,
            buffers_allocated: pool.allocated(),
        };
        debug!(
            "query on `{}` matched {} records, returned {} in {:?}",
            request.entity_type,
            total,
            primary_keys.len(),
            stats.duration
        );

        Ok(QueryResponse {
            primary_keys,
            data_chunk: DataChunk::new(&window, total),
            extra_results,
            filtered_price_records: request.filter.collect_filtered_price_records(),
            stats,
        })
    }

    fn context(&self, request: &QueryRequest, plan: &QueryPlan, pool: Arc<BufferPool>) -> QueryExecutionContext {
        let mut builder = QueryExecutionContext::builder(request.entity_type.as_str()).with_buffer_pool(pool);
        if let Some(fetcher) = &self.fetcher {
            builder = builder.with_fetcher(fetcher.clone());
            if plan.prefetch.worthwhile {
                let entities = fetcher.fetch_entities(&request.entity_type, &plan.prefetch.entities.to_vec());
                debug!("prefetched {} `{}` entities", entities.len(), request.entity_type);
                builder = builder.with_prefetched_entities(entities);
            }
        } else if plan.prefetch.worthwhile {
            debug!("prefetch skipped, no entity fetcher configured");
        }
        builder.build()
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}
