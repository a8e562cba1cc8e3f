//! # entity-formula-executor
//!
//! Query execution over [`entity_formula`] trees.
//!
//! The executor plans a filter formula, optionally prefetches entity bodies,
//! evaluates the filter inside a per-query execution context, slices the
//! result into the requested page, orders the window with a chain of sorters
//! and computes hierarchy statistics as extra results.
//!
//! ## Key Features
//!
//! - **Explain plans** - estimates and hints straight from the formula tree
//! - **Prefetch heuristics** - small candidate sets are filtered on entity bodies
//! - **Sorter chains** - pre-sorted indexes, comparators, natural-order fill
//! - **Conditional gaps** - pages shrunk by `$pageNumber` expressions
//! - **Hierarchy statistics** - one shared producer per hierarchy and query
//!
//! ## Quick Start
//!
//! ```ignore
//! use entity_formula::{Bitmap, Formula};
//! use entity_formula_executor::{ExecutorConfig, Pagination, QueryExecutor, QueryRequest};
//!
//! let executor = QueryExecutor::new(provider, ExecutorConfig::default());
//! let filter = Formula::and(vec![brand_formula, category_formula]);
//!
//! let response = executor.execute(
//!     QueryRequest::new("product", filter).with_pagination(Pagination::page(1, 20)),
//! )?;
//! println!("{} of {} products", response.len(), response.total_record_count());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  entity-formula-executor                  │
//! │                                                           │
//! │  QueryExecutor                                            │
//! │  ├── QueryPlanner ──── explain steps + PrefetchDecision   │
//! │  ├── Slicer ────────── DefaultSlicer / ConditionalGap     │
//! │  ├── SorterChain ───── PreSorted / EntityComparator       │
//! │  └── ProducerRegistry ─ HierarchyStatisticsProducer       │
//! │                                                           │
//! │  IndexProvider / HierarchyIndex / SortedRecordsProvider   │
//! └───────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod config;
mod error;
mod executor;
pub mod hierarchy;
mod planner;
mod result;
pub mod slice;
pub mod sort;
mod traits;

// Public re-exports
pub use config::{ExecutorConfig, ExecutorConfigBuilder, PrefetchConfig, DEFAULT_PAGE_SIZE};
pub use error::{QueryError, QueryResult};
pub use executor::{QueryExecutor, QueryRequest};
pub use hierarchy::{
    EmptyNodeBehaviour, ExtraResults, HierarchyAxis, HierarchyRequest, HierarchyRequirement,
    HierarchyStatisticsProducer, HierarchyTarget, LevelInfo, ProducerKey, ProducerRegistry, StatisticsBase,
    StatisticsBases, StatisticsType, StopCondition,
};
pub use planner::{PrefetchDecision, QueryPlan, QueryPlanner, QueryStep, LARGE_DEFERRED_COST};
pub use result::{DataChunk, ExecutionStats, QueryResponse};
pub use slice::{
    slicer_for, ConditionalGap, ConditionalGapSlicer, DefaultSlicer, GapExpression, OffsetAndLimit, Pagination,
    Slicer,
};
pub use sort::{
    AttributeComparator, EntityComparator, EntityComparatorSorter, PreSortedRecordsSorter,
    ReferenceAttributeComparator, SortDirection, SortOutcome, Sorter, SorterChain,
};
pub use traits::{
    HierarchyIndex, InMemoryHierarchyIndex, InMemoryHierarchyIndexBuilder, InMemorySortedRecords, IndexProvider,
    SortedRecordsProvider,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = ExecutorConfig::default();
        let _ = PrefetchConfig::default();
        let _ = QueryPlanner::default();
        let _ = Pagination::default();
        let _ = SorterChain::default();
        let _ = ProducerRegistry::new();
        let _ = InMemoryHierarchyIndex::builder().build();
        let _ = HierarchyRequest::of_self();
        let _: QueryResult<()> = Ok(());
    }
}
