//! Ordering of filtered primary keys.
//!
//! A [`SorterChain`] hands the candidates to its sorters in turn. Every sorter
//! orders what it can and passes the rest on; whatever no sorter can place is
//! appended in natural (ascending key) order so the window is never short.

mod comparator;
mod presorted;

pub use comparator::{
    AttributeComparator, EntityComparator, EntityComparatorSorter, ReferenceAttributeComparator, SortDirection,
};
pub use presorted::PreSortedRecordsSorter;

use std::sync::Arc;

use entity_formula::{Bitmap, PrimaryKey, QueryExecutionContext};
use log::{debug, warn};

use crate::error::QueryResult;

/// Result of a single sorter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortOutcome {
    /// Ordered keys, at most the requested number.
    pub sorted: Vec<PrimaryKey>,
    /// Candidates the sorter could not place.
    pub residue: Bitmap,
}

/// Orders a candidate bitmap.
pub trait Sorter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Orders up to `limit` of the candidates.
    ///
    /// `sorted` and `residue` must be disjoint subsets of `candidates`.
    fn sort(&self, exec: &QueryExecutionContext, candidates: &Bitmap, limit: usize) -> QueryResult<SortOutcome>;
}

/// Chain of sorters with natural-order fill for the residue.
#[derive(Clone, Default)]
pub struct SorterChain {
    sorters: Vec<Arc<dyn Sorter>>,
}

impl SorterChain {
    /// Creates a chain; the first sorter has the highest priority.
    pub fn new(sorters: Vec<Arc<dyn Sorter>>) -> Self {
        Self { sorters }
    }

    /// Appends a fallback sorter.
    pub fn then(mut self, sorter: Arc<dyn Sorter>) -> Self {
        self.sorters.push(sorter);
        self
    }

    /// Number of sorters in the chain.
    pub fn len(&self) -> usize {
        self.sorters.len()
    }

    /// Returns true if the chain orders naturally only.
    pub fn is_empty(&self) -> bool {
        self.sorters.is_empty()
    }

    /// Orders the candidates and returns the `[start_index, end_index)` window.
    ///
    /// The window holds `min(end_index, candidates) - start_index` keys.
    pub fn sort_and_slice(
        &self,
        exec: &QueryExecutionContext,
        candidates: &Bitmap,
        start_index: usize,
        end_index: usize,
    ) -> QueryResult<Vec<PrimaryKey>> {
        let end_index = end_index.min(candidates.size());
        if start_index >= end_index {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<PrimaryKey> = Vec::with_capacity(end_index);
        let mut remaining = candidates.clone();
        for sorter in &self.sorters {
            if ordered.len() >= end_index || remaining.is_empty() {
                break;
            }
            let outcome = sorter.sort(exec, &remaining, end_index - ordered.len())?;
            debug!(
                "sorter {} placed {} of {} candidates",
                sorter.name(),
                outcome.sorted.len(),
                remaining.size()
            );
            ordered.extend(outcome.sorted);
            remaining = outcome.residue;
        }

        if ordered.len() < end_index && !remaining.is_empty() {
            if !self.sorters.is_empty() {
                warn!(
                    "{} candidates could not be sorted, appending them in natural order",
                    remaining.size()
                );
            }
            let missing = end_index - ordered.len();
            ordered.extend(remaining.iter().take(missing));
        }

        ordered.truncate(end_index);
        Ok(ordered.split_off(start_index.min(ordered.len())))
    }
}

impl std::fmt::Debug for SorterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.sorters.iter().map(|s| s.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EvenFirst;

    impl Sorter for EvenFirst {
        fn name(&self) -> &'static str {
            "even_first"
        }

        fn sort(&self, _: &QueryExecutionContext, candidates: &Bitmap, limit: usize) -> QueryResult<SortOutcome> {
            let even: Bitmap = candidates.iter().filter(|pk| pk % 2 == 0).collect();
            let mut sorted = even.to_vec();
            sorted.reverse();
            sorted.truncate(limit);
            Ok(SortOutcome {
                sorted,
                residue: candidates.andnot(&even),
            })
        }
    }

    fn exec() -> QueryExecutionContext {
        QueryExecutionContext::builder("product").build()
    }

    #[test]
    fn test_natural_order_without_sorters() {
        let candidates = Bitmap::from_iter([5, 1, 3, 9]);
        let window = SorterChain::default().sort_and_slice(&exec(), &candidates, 1, 3).unwrap();
        assert_eq!(window, vec![3, 5]);
    }

    #[test]
    fn test_residue_fills_window() {
        let chain = SorterChain::new(vec![Arc::new(EvenFirst)]);
        let candidates = Bitmap::from_iter([1, 2, 3, 4, 5]);
        let window = chain.sort_and_slice(&exec(), &candidates, 0, 10).unwrap();
        assert_eq!(window, vec![4, 2, 1, 3, 5]);

        let window = chain.sort_and_slice(&exec(), &candidates, 1, 4).unwrap();
        assert_eq!(window, vec![2, 1, 3]);
    }

    #[test]
    fn test_window_beyond_candidates_is_empty() {
        let candidates = Bitmap::from_iter([1, 2]);
        let window = SorterChain::default().sort_and_slice(&exec(), &candidates, 5, 10).unwrap();
        assert!(window.is_empty());
    }
}
