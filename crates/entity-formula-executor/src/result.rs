//! Query response types.

use std::time::Duration;

use entity_formula::{FilteredPriceRecords, PrimaryKey};

use crate::hierarchy::ExtraResults;
use crate::slice::OffsetAndLimit;

/// Response of a query execution.
///
/// # Example
///
/// ```ignore
/// let response = executor.execute(request)?;
///
/// println!("page {} of {:?}", response.data_chunk.page_number, response.data_chunk.last_page_number);
/// for pk in &response {
///     println!("product {}", pk);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    /// Primary keys of the requested window in sort order.
    pub primary_keys: Vec<PrimaryKey>,
    /// Paging metadata.
    pub data_chunk: DataChunk,
    /// Hierarchy statistics and other extra results.
    pub extra_results: ExtraResults,
    /// Price records of the filter, if it translated prices.
    pub filtered_price_records: Option<FilteredPriceRecords>,
    /// Execution statistics.
    pub stats: ExecutionStats,
}

impl QueryResponse {
    /// Number of keys in the window.
    pub fn len(&self) -> usize {
        self.primary_keys.len()
    }

    /// Returns true if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.primary_keys.is_empty()
    }

    /// Number of records matching the filter.
    pub fn total_record_count(&self) -> usize {
        self.data_chunk.total_record_count
    }
}

impl<'a> IntoIterator for &'a QueryResponse {
    type Item = &'a PrimaryKey;
    type IntoIter = std::slice::Iter<'a, PrimaryKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.primary_keys.iter()
    }
}

/// Paging metadata of the returned window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataChunk {
    /// Effective page number.
    pub page_number: usize,
    /// Window limit (page size after gaps).
    pub limit: usize,
    /// Offset of the window.
    pub offset: usize,
    /// Number of records matching the filter.
    pub total_record_count: usize,
    /// Last page number; None for strips.
    pub last_page_number: Option<usize>,
}

impl DataChunk {
    /// Creates the chunk from a slicer window.
    pub fn new(window: &OffsetAndLimit, total_record_count: usize) -> Self {
        Self {
            page_number: window.page_number,
            limit: window.limit,
            offset: window.offset,
            total_record_count,
            last_page_number: window.last_page_number,
        }
    }

    /// Returns true for the first page.
    pub fn is_first(&self) -> bool {
        self.offset == 0
    }

    /// Returns true if no records follow the window.
    pub fn is_last(&self) -> bool {
        self.offset.saturating_add(self.limit) >= self.total_record_count
    }

    /// Returns true if records follow the window.
    pub fn has_next(&self) -> bool {
        !self.is_last()
    }
}

/// Statistics from query execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Total execution duration.
    pub duration: Duration,
    /// Estimated cost of the filter tree.
    pub estimated_cost: u64,
    /// Actual cost of the filter root after evaluation.
    pub actual_cost: Option<u64>,
    /// Number of prefetched entity bodies.
    pub prefetched_entities: usize,
    /// Number of scratch buffers allocated during the query.
    pub buffers_allocated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_chunk_paging_flags() {
        let window = OffsetAndLimit {
            offset: 20,
            limit: 10,
            page_number: 3,
            last_page_number: Some(3),
        };
        let chunk = DataChunk::new(&window, 25);
        assert!(!chunk.is_first());
        assert!(chunk.is_last());
        assert!(!chunk.has_next());

        let first = DataChunk::new(
            &OffsetAndLimit {
                offset: 0,
                limit: 10,
                page_number: 1,
                last_page_number: Some(3),
            },
            25,
        );
        assert!(first.is_first());
        assert!(first.has_next());
    }

    #[test]
    fn test_response_iteration() {
        let response = QueryResponse {
            primary_keys: vec![3, 1],
            ..QueryResponse::default()
        };
        assert_eq!(response.len(), 2);
        let keys: Vec<PrimaryKey> = (&response).into_iter().copied().collect();
        assert_eq!(keys, vec![3, 1]);
    }
}
