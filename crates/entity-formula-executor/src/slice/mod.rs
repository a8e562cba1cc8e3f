//! Translation of pagination requests into offset and limit.
//!
//! Two slicers exist: [`DefaultSlicer`] pages uniformly (and handles strips),
//! [`ConditionalGapSlicer`] shrinks individual pages by the sizes of the
//! conditional gaps whose expressions hold for the page number.

mod expression;
mod gap;

pub use expression::{BinaryOperator, GapExpression, GapValue};
pub use gap::{ConditionalGap, ConditionalGapSlicer};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{QueryError, QueryResult};

/// Requested window of the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// Page-based window, optionally with conditional gaps.
    Page {
        /// Page number starting at 1.
        number: usize,
        /// Requested page size.
        size: usize,
        /// Conditional gaps applied per page.
        spacing: Vec<ConditionalGap>,
    },
    /// Raw offset/limit window without a last page.
    Strip {
        /// Number of records to skip.
        offset: usize,
        /// Number of records to return.
        limit: usize,
    },
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::page(1, DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    /// Uniform page.
    pub fn page(number: usize, size: usize) -> Self {
        Pagination::Page {
            number,
            size,
            spacing: Vec::new(),
        }
    }

    /// Page with conditional gaps.
    pub fn page_with_spacing(number: usize, size: usize, spacing: Vec<ConditionalGap>) -> Self {
        Pagination::Page { number, size, spacing }
    }

    /// Offset/limit strip.
    pub fn strip(offset: usize, limit: usize) -> Self {
        Pagination::Strip { offset, limit }
    }
}

/// Window computed by a slicer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OffsetAndLimit {
    /// Number of records to skip.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: usize,
    /// Effective page number (1 when the request fell back to the first page).
    pub page_number: usize,
    /// Number of the last page; None for strips.
    pub last_page_number: Option<usize>,
}

impl OffsetAndLimit {
    /// Exclusive end index of the window, bounded by `total`.
    pub fn end(&self, total: usize) -> usize {
        self.offset.saturating_add(self.limit).min(total)
    }
}

/// Computes the window for a pagination request.
pub trait Slicer: Send + Sync {
    /// Returns offset, limit and last page number for `total` records.
    fn calculate_offset_and_limit(&self, pagination: &Pagination, total: usize) -> QueryResult<OffsetAndLimit>;
}

/// Uniform paging and strips.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSlicer;

impl Slicer for DefaultSlicer {
    fn calculate_offset_and_limit(&self, pagination: &Pagination, total: usize) -> QueryResult<OffsetAndLimit> {
        match pagination {
            Pagination::Page { number, size, .. } => {
                validate_page(*number, *size)?;
                let last_page_number = total.div_ceil(*size);
                let offset = (number - 1).saturating_mul(*size);
                if offset > 0 && offset >= total {
                    return Ok(OffsetAndLimit {
                        offset: 0,
                        limit: *size,
                        page_number: 1,
                        last_page_number: Some(last_page_number),
                    });
                }
                Ok(OffsetAndLimit {
                    offset,
                    limit: *size,
                    page_number: *number,
                    last_page_number: Some(last_page_number),
                })
            }
            Pagination::Strip { offset, limit } => Ok(OffsetAndLimit {
                offset: *offset,
                limit: *limit,
                page_number: if *limit > 0 { offset / limit + 1 } else { 1 },
                last_page_number: None,
            }),
        }
    }
}

/// Returns the slicer responsible for the request.
pub fn slicer_for(pagination: &Pagination) -> &'static dyn Slicer {
    match pagination {
        Pagination::Page { spacing, .. } if !spacing.is_empty() => &ConditionalGapSlicer,
        _ => &DefaultSlicer,
    }
}

pub(crate) fn validate_page(number: usize, size: usize) -> QueryResult<()> {
    if number == 0 {
        return Err(QueryError::InvalidPagination("page number must start at 1".to_string()));
    }
    if size == 0 {
        return Err(QueryError::InvalidPagination("page size must be positive".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: usize, size: usize, total: usize) -> OffsetAndLimit {
        DefaultSlicer
            .calculate_offset_and_limit(&Pagination::page(number, size), total)
            .unwrap()
    }

    #[test]
    fn test_uniform_page_offset() {
        let window = page(3, 10, 95);
        assert_eq!(window.offset, 20);
        assert_eq!(window.limit, 10);
        assert_eq!(window.page_number, 3);
        assert_eq!(window.last_page_number, Some(10));
    }

    #[test]
    fn test_page_beyond_end_falls_back_to_first() {
        let window = page(11, 10, 95);
        assert_eq!(window.offset, 0);
        assert_eq!(window.page_number, 1);
        assert_eq!(window.last_page_number, Some(10));
    }

    #[test]
    fn test_empty_result_has_no_pages() {
        let window = page(1, 10, 0);
        assert_eq!(window.offset, 0);
        assert_eq!(window.last_page_number, Some(0));
    }

    #[test]
    fn test_strip_has_no_last_page() {
        let window = DefaultSlicer
            .calculate_offset_and_limit(&Pagination::strip(15, 5), 100)
            .unwrap();
        assert_eq!(window.offset, 15);
        assert_eq!(window.limit, 5);
        assert_eq!(window.page_number, 4);
        assert_eq!(window.last_page_number, None);
        assert_eq!(window.end(17), 17);
    }

    #[test]
    fn test_invalid_pagination() {
        assert!(matches!(
            DefaultSlicer.calculate_offset_and_limit(&Pagination::page(0, 10), 10),
            Err(QueryError::InvalidPagination(_))
        ));
        assert!(matches!(
            DefaultSlicer.calculate_offset_and_limit(&Pagination::page(1, 0), 10),
            Err(QueryError::InvalidPagination(_))
        ));
    }

    #[test]
    fn test_default_pagination() {
        assert_eq!(Pagination::default(), Pagination::page(1, 20));
    }
}
