//! Paging with conditional gaps.

use log::trace;

use super::expression::GapExpression;
use super::{validate_page, DefaultSlicer, OffsetAndLimit, Pagination, Slicer};
use crate::error::QueryResult;

/// Number of slots removed from every page whose number satisfies the expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalGap {
    size: usize,
    expression: GapExpression,
    source: String,
}

impl ConditionalGap {
    /// Parses the expression and creates the gap.
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_formula_executor::ConditionalGap;
    ///
    /// let gap = ConditionalGap::new(2, "$pageNumber % 2 == 1")?;
    /// assert!(gap.applies_to(3));
    /// assert!(!gap.applies_to(4));
    /// # Ok::<(), entity_formula_executor::QueryError>(())
    /// ```
    pub fn new(size: usize, expression: &str) -> QueryResult<Self> {
        Ok(Self {
            size,
            expression: GapExpression::parse(expression)?,
            source: expression.to_string(),
        })
    }

    /// Number of slots the gap occupies.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The expression text as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns true if the gap applies to the page.
    pub fn applies_to(&self, page_number: usize) -> bool {
        self.expression.matches(page_number)
    }
}

/// Slicer walking pages one by one and shrinking them by applicable gaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalGapSlicer;

impl ConditionalGapSlicer {
    fn page_size(size: usize, spacing: &[ConditionalGap], page_number: usize) -> usize {
        let gaps: usize = spacing
            .iter()
            .filter(|gap| gap.applies_to(page_number))
            .map(ConditionalGap::size)
            .sum();
        size.saturating_sub(gaps)
    }
}

impl Slicer for ConditionalGapSlicer {
    fn calculate_offset_and_limit(&self, pagination: &Pagination, total: usize) -> QueryResult<OffsetAndLimit> {
        let (number, size, spacing) = match pagination {
            Pagination::Page { number, size, spacing } => (*number, *size, spacing.as_slice()),
            Pagination::Strip { .. } => return DefaultSlicer.calculate_offset_and_limit(pagination, total),
        };
        validate_page(number, size)?;

        let first_page_size = Self::page_size(size, spacing, 1);
        let mut requested = None;
        let mut offset = 0usize;
        let mut page = 1usize;
        let mut last_page = 0usize;
        let mut swallowed = 0usize;

        while offset < total {
            let page_size = Self::page_size(size, spacing, page);
            if page == number {
                requested = Some((offset, page_size));
            }
            if page_size == 0 {
                // a second swallowed page in a row makes no progress
                swallowed += 1;
                if swallowed > 1 {
                    break;
                }
            } else {
                swallowed = 0;
                last_page = page;
            }
            offset = offset.saturating_add(page_size);
            page += 1;
        }

        trace!(
            "conditional gap slicing of {} records: requested page {} of {}",
            total,
            number,
            last_page
        );

        Ok(match requested {
            Some((offset, limit)) => OffsetAndLimit {
                offset,
                limit,
                page_number: number,
                last_page_number: Some(last_page),
            },
            None => OffsetAndLimit {
                offset: 0,
                limit: first_page_size,
                page_number: 1,
                last_page_number: Some(last_page),
            },
        })
    }
}
