//! Sorting through pre-sorted attribute indexes.

use std::sync::Arc;

use entity_formula::{Bitmap, QueryExecutionContext};
use log::trace;

use super::comparator::EntityComparatorSorter;
use super::{SortOutcome, Sorter};
use crate::error::QueryResult;
use crate::traits::SortedRecordsProvider;

/// Sorter reading the order of a pre-sorted index.
///
/// Candidates are translated into positions of the sorted order through a
/// scratch buffer borrowed from the execution context. When the context holds
/// prefetched entities and a comparator is configured, the entities are
/// sorted directly instead.
pub struct PreSortedRecordsSorter {
    provider: Arc<dyn SortedRecordsProvider>,
    comparator: Option<EntityComparatorSorter>,
}

impl PreSortedRecordsSorter {
    /// Creates the sorter over one index.
    pub fn new(provider: Arc<dyn SortedRecordsProvider>) -> Self {
        Self {
            provider,
            comparator: None,
        }
    }

    /// Sets the comparator used for prefetched entities.
    pub fn with_comparator(mut self, comparator: EntityComparatorSorter) -> Self {
        self.comparator = Some(comparator);
        self
    }

    fn sort_by_index(&self, exec: &QueryExecutionContext, candidates: &Bitmap, limit: usize) -> SortOutcome {
        let all_records = self.provider.all_records();
        let record_positions = self.provider.record_positions();
        let sorted_ids = self.provider.sorted_record_ids();

        let mut positions = exec.borrow_buffer();
        for pk in candidates.and(all_records).iter() {
            let position = all_records
                .index_of(pk)
                .and_then(|idx| record_positions.get(idx))
                .and_then(|&p| u32::try_from(p).ok());
            if let Some(position) = position {
                positions.push(position);
            }
        }
        positions.sort_unstable();
        trace!("pre-sorted index placed {} candidates", positions.len());

        let sorted = positions
            .iter()
            .filter_map(|&p| sorted_ids.get(p as usize).copied())
            .take(limit)
            .collect();
        SortOutcome {
            sorted,
            residue: candidates.andnot(all_records),
        }
    }
}

impl std::fmt::Debug for PreSortedRecordsSorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSortedRecordsSorter")
            .field("records", &self.provider.all_records().size())
            .field("comparator", &self.comparator)
            .finish()
    }
}

impl Sorter for PreSortedRecordsSorter {
    fn name(&self) -> &'static str {
        "pre_sorted_records"
    }

    fn sort(&self, exec: &QueryExecutionContext, candidates: &Bitmap, limit: usize) -> QueryResult<SortOutcome> {
        match (&self.comparator, exec.prefetched_entities()) {
            (Some(comparator), Some(_)) => comparator.sort(exec, candidates, limit),
            _ => Ok(self.sort_by_index(exec, candidates, limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::{AttributeComparator, SortDirection};
    use crate::traits::InMemorySortedRecords;
    use entity_formula::{BufferPool, SealedEntity};

    fn provider() -> Arc<dyn SortedRecordsProvider> {
        Arc::new(InMemorySortedRecords::from_sorted(vec![7, 3, 9, 1]))
    }

    #[test]
    fn test_index_order_and_residue() {
        let pool = Arc::new(BufferPool::new(16));
        let exec = QueryExecutionContext::builder("product")
            .with_buffer_pool(pool.clone())
            .build();
        let sorter = PreSortedRecordsSorter::new(provider());

        let outcome = sorter.sort(&exec, &Bitmap::from_iter([1, 3, 5, 7]), 10).unwrap();
        assert_eq!(outcome.sorted, vec![7, 3, 1]);
        assert_eq!(outcome.residue.to_vec(), vec![5]);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_index_order_respects_limit() {
        let exec = QueryExecutionContext::builder("product").build();
        let outcome = PreSortedRecordsSorter::new(provider())
            .sort(&exec, &Bitmap::from_iter([1, 3, 7, 9]), 2)
            .unwrap();
        assert_eq!(outcome.sorted, vec![7, 3]);
    }

    #[test]
    fn test_prefetched_entities_use_comparator() {
        let exec = QueryExecutionContext::builder("product")
            .with_prefetched_entities(vec![
                SealedEntity::new("product", 1).with_attribute("rank", 2i64),
                SealedEntity::new("product", 3).with_attribute("rank", 1i64),
            ])
            .build();
        let sorter = PreSortedRecordsSorter::new(provider()).with_comparator(EntityComparatorSorter::new(
            AttributeComparator::new("rank", SortDirection::Ascending),
        ));

        let outcome = sorter.sort(&exec, &Bitmap::from_iter([1, 3]), 10).unwrap();
        assert_eq!(outcome.sorted, vec![3, 1]);
    }
}
