//! Deferred supplier computing through the shared cache.

use std::sync::{Arc, OnceLock};

use entity_formula::{
    Bitmap, BitmapSupplier, FilteredPriceRecords, FlattenedFormula, FormulaRef, FormulaResult,
    QueryExecutionContext,
};

use super::store::LruFormulaCache;

/// Stands in for a cacheable subtree that missed the cache.
///
/// Reports the hash, estimates and transactional ids of the subtree, so the
/// enclosing tree hashes and plans exactly as before registration.
pub struct CacheFlightSupplier {
    cache: Arc<LruFormulaCache>,
    formula: FormulaRef,
    computed: OnceLock<Arc<FlattenedFormula>>,
}

impl CacheFlightSupplier {
    /// Creates a supplier for `formula`.
    pub fn new(cache: Arc<LruFormulaCache>, formula: FormulaRef) -> Self {
        Self {
            cache,
            formula,
            computed: OnceLock::new(),
        }
    }

    /// The replaced subtree.
    pub fn formula(&self) -> &FormulaRef {
        &self.formula
    }
}

impl BitmapSupplier for CacheFlightSupplier {
    fn get(&self) -> FormulaResult<Bitmap> {
        if let Some(payload) = self.computed.get() {
            return Ok(payload.bitmap().clone());
        }
        let payload = self.cache.get_or_compute(&self.formula)?;
        Ok(self.computed.get_or_init(|| payload).bitmap().clone())
    }

    fn hash(&self) -> u64 {
        self.formula.hash()
    }

    fn estimated_cost(&self) -> u64 {
        self.formula.estimated_cost()
    }

    fn cost(&self) -> Option<u64> {
        self.formula.cost()
    }

    fn estimated_cardinality(&self) -> u64 {
        self.formula.estimated_cardinality()
    }

    fn transactional_ids(&self) -> Vec<u64> {
        self.formula.transactional_ids().to_vec()
    }

    fn initialize(&self, ctx: &Arc<QueryExecutionContext>) {
        self.formula.initialize(ctx);
    }

    fn filtered_price_records(&self) -> Option<FilteredPriceRecords> {
        self.computed
            .get()
            .and_then(|payload| payload.filtered_price_records().cloned())
    }

    fn description(&self) -> &str {
        "cached"
    }
}
