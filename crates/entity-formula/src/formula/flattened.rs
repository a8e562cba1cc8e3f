//! Flattened formula payloads.
//!
//! A cacheable formula exports its computed bitmap together with enough
//! context to stand in for the computed subtree later: the structural hash,
//! the sorted ids of the transactional data sources it read and any kind
//! specific side data. Rehydrating a payload yields a terminal node.

use std::mem;

use crate::bitmap::Bitmap;
use crate::formula::price::{FilteredPriceRecords, PriceIndexKey, PriceRecord};
use crate::formula::{Formula, FormulaRef};
use crate::hash::hash_transactional_ids;

/// Kind specific context stored next to a flattened bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlattenedContext {
    /// Plain bitmap result.
    None,
    /// Result of a price translation.
    PriceRecords {
        /// Records matched during translation.
        records: FilteredPriceRecords,
        /// Price indexes that were consulted.
        indexes: Vec<PriceIndexKey>,
    },
}

/// Position independent, reusable result of a cacheable formula.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlattenedFormula {
    hash: u64,
    transactional_ids: Vec<u64>,
    transactional_ids_hash: u64,
    bitmap: Bitmap,
    size_estimate: usize,
    context: FlattenedContext,
}

impl FlattenedFormula {
    /// Creates a payload; transactional ids are sorted and deduplicated.
    pub fn new(hash: u64, mut transactional_ids: Vec<u64>, bitmap: Bitmap, context: FlattenedContext) -> Self {
        transactional_ids.sort_unstable();
        transactional_ids.dedup();
        let transactional_ids_hash = hash_transactional_ids(&transactional_ids);
        let context_size = match &context {
            FlattenedContext::None => 0,
            FlattenedContext::PriceRecords { records, indexes } => {
                records.len() * mem::size_of::<PriceRecord>()
                    + indexes.len() * mem::size_of::<PriceIndexKey>()
            }
        };
        let size_estimate = mem::size_of::<Self>()
            + transactional_ids.len() * mem::size_of::<u64>()
            + bitmap.serialized_size()
            + context_size;
        Self {
            hash,
            transactional_ids,
            transactional_ids_hash,
            bitmap,
            size_estimate,
            context,
        }
    }

    /// Structural hash of the formula the payload was produced from.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Sorted, distinct transactional ids the computation read.
    pub fn transactional_ids(&self) -> &[u64] {
        &self.transactional_ids
    }

    /// Hash of [`transactional_ids`](Self::transactional_ids).
    pub fn transactional_ids_hash(&self) -> u64 {
        self.transactional_ids_hash
    }

    /// The computed bitmap.
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Approximate memory footprint in bytes.
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    /// Kind specific context.
    pub fn context(&self) -> &FlattenedContext {
        &self.context
    }

    /// Price records, when the payload comes from a price translation.
    pub fn filtered_price_records(&self) -> Option<&FilteredPriceRecords> {
        match &self.context {
            FlattenedContext::PriceRecords { records, .. } => Some(records),
            FlattenedContext::None => None,
        }
    }

    /// Returns true if the payload was computed over the same data versions.
    pub fn is_valid_for(&self, transactional_ids_hash: u64) -> bool {
        self.transactional_ids_hash == transactional_ids_hash
    }

    /// Rehydrates the payload into a terminal formula node.
    pub fn into_formula(self) -> FormulaRef {
        Formula::flattened(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactional_ids_are_normalized() {
        let a = FlattenedFormula::new(1, vec![5, 3, 5], Bitmap::from_iter([1]), FlattenedContext::None);
        let b = FlattenedFormula::new(1, vec![3, 5], Bitmap::from_iter([1]), FlattenedContext::None);
        assert_eq!(a.transactional_ids(), &[3, 5]);
        assert!(a.is_valid_for(b.transactional_ids_hash()));
    }

    #[test]
    fn test_version_change_invalidates() {
        let a = FlattenedFormula::new(1, vec![3, 5], Bitmap::empty(), FlattenedContext::None);
        let b = FlattenedFormula::new(1, vec![3, 6], Bitmap::empty(), FlattenedContext::None);
        assert!(!a.is_valid_for(b.transactional_ids_hash()));
    }

    #[test]
    fn test_rehydrated_node_keeps_hash() {
        let payload = FlattenedFormula::new(42, vec![1], Bitmap::from_iter([7, 8]), FlattenedContext::None);
        let formula = payload.clone().into_formula();
        assert_eq!(formula.hash(), 42);
        assert_eq!(formula.compute().unwrap().to_vec(), vec![7, 8]);
        assert!(formula.children().is_empty());
        assert!(payload.size_estimate() > 0);
    }
}
