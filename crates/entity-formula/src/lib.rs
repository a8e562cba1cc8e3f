//! # entity-formula
//!
//! Lazily evaluated formula algebra over primary-key bitmaps.
//!
//! Filtering, sorting input and hierarchy statistics of an entity query are
//! expressed as immutable trees of set operations. Every node knows its
//! structural hash, an estimated cost and an estimated cardinality before it
//! is evaluated; evaluation happens on demand and is memoized per node.
//!
//! ## Quick Start
//!
//! ```rust
//! use entity_formula::{Bitmap, Formula};
//!
//! let brand = Formula::constant(Bitmap::from_iter([1, 2, 3, 5, 8]));
//! let category = Formula::constant(Bitmap::from_iter([2, 3, 4, 5]));
//! let filter = Formula::and(vec![brand, category]);
//!
//! assert_eq!(filter.compute()?.to_vec(), vec![2, 3, 5]);
//! # Ok::<(), entity_formula::FormulaError>(())
//! ```
//!
//! ## Node kinds
//!
//! | Kind | Children | Result |
//! |------|----------|--------|
//! | `Empty` | none | empty bitmap |
//! | `Constant` | none | precomputed bitmap |
//! | `And` / `UserFilter` | any | intersection |
//! | `Or` | any | union |
//! | `Not` | `[subtracted, superset]` | difference |
//! | `Deferred` | none | bitmap of a [`BitmapSupplier`] |
//! | `PriceIdContainer` | 1 | price ids owned by a price index |
//! | `PriceTranslate` | 1+ | entity ids owning the child price ids |
//! | `Selection` | 1 | delegate, or entity filter over prefetched entities |
//! | `Flattened` | none | rehydrated cache payload |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      entity-formula                      │
//! │                                                          │
//! │  Formula (Arc tree, OnceLock memo)                       │
//! │  ├── hash ─────── XXH3 over kind tag + children hashes   │
//! │  ├── cost ─────── CostModel weights × input cardinality  │
//! │  ├── Deferred ─── BitmapSupplier / FormulaWrapper        │
//! │  ├── PriceTranslate ── PriceIndex lookups                │
//! │  └── to_flattened ──── FlattenedFormula cache payload    │
//! │                                                          │
//! │  QueryExecutionContext                                   │
//! │  ├── prefetched entities + entity translation            │
//! │  └── BufferPool (scratch buffers, RAII guards)           │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod bitmap;
mod context;
mod cost;
mod entity;
mod error;
pub mod formula;
pub mod hash;

// Public re-exports
pub use bitmap::{Bitmap, PrimaryKey};
pub use context::{
    BufferGuard, BufferPool, EntityFetcher, QueryExecutionContext, QueryExecutionContextBuilder,
    ReferenceBinding, DEFAULT_BUFFER_SIZE,
};
pub use cost::{CostModel, CostModelBuilder};
pub use entity::{AttributeValue, EntityReference, SealedEntity};
pub use error::{ErrorKind, FormulaError, FormulaResult};
pub use formula::deferred::{BitmapSupplier, FormulaWrapper, LazyBitmap, WrapperCallback};
pub use formula::flattened::{FlattenedContext, FlattenedFormula};
pub use formula::price::{
    FilteredPriceRecords, InMemoryPriceIndex, PriceIndex, PriceIndexKey, PriceRecord, PriceRecordLookup,
    PriceRecordsSortOrder, PriceTranslation, Validity,
};
pub use formula::selection::{AttributeFilter, AttributePredicate, EntityFilter, Selection};
pub use formula::{ConstantBitmap, Formula, FormulaFactory, FormulaKind, FormulaRef, VisitControl};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = Bitmap::empty();
        let _ = CostModel::default();
        let _ = FormulaFactory::default();
        let _ = BufferPool::default();
        let _ = QueryExecutionContext::builder("product").build();
        let _ = PriceIndexKey::new("basic", "EUR");
        let _ = AttributeValue::Int(1);
        let _: FormulaResult<()> = Ok(());
    }
}
