//! Deferred evaluation.
//!
//! A deferred formula is a terminal node whose bitmap comes from a
//! [`BitmapSupplier`]. The supplier reports hash, cost and cardinality up
//! front and produces the bitmap only when a parent asks for it.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::bitmap::Bitmap;
use crate::context::QueryExecutionContext;
use crate::cost::CostModel;
use crate::error::{FormulaError, FormulaResult};
use crate::formula::price::FilteredPriceRecords;
use crate::formula::{Formula, FormulaRef};
use crate::hash::StructuralHasher;

/// Produces a bitmap on demand, exactly once.
pub trait BitmapSupplier: Send + Sync {
    /// Produces (or returns the memoized) bitmap.
    fn get(&self) -> FormulaResult<Bitmap>;

    /// Structural hash of the computation.
    fn hash(&self) -> u64;

    /// Cost estimate available before evaluation.
    fn estimated_cost(&self) -> u64;

    /// Actual cost, known only after [`get`](Self::get) succeeded.
    fn cost(&self) -> Option<u64> {
        None
    }

    /// Cardinality estimate available before evaluation.
    fn estimated_cardinality(&self) -> u64;

    /// Sorted, distinct ids of the transactional data sources the computation reads.
    fn transactional_ids(&self) -> Vec<u64> {
        Vec::new()
    }

    /// Binds the query execution context.
    fn initialize(&self, _ctx: &Arc<QueryExecutionContext>) {}

    /// Price records matched by the computation, if it translates prices.
    fn filtered_price_records(&self) -> Option<FilteredPriceRecords> {
        None
    }

    /// Short label used in plans and logs.
    fn description(&self) -> &str {
        "deferred"
    }
}

/// Callback invoked by [`FormulaWrapper`] on first evaluation.
pub type WrapperCallback =
    dyn Fn(&QueryExecutionContext, &Formula) -> FormulaResult<Bitmap> + Send + Sync;

/// Supplier wrapping an inner formula behind a first-invocation callback.
///
/// The callback receives the bound execution context and the inner formula,
/// typically to instrument or redirect the inner computation. Its result is
/// memoized; later calls never invoke the callback again.
pub struct FormulaWrapper {
    inner: FormulaRef,
    callback: Box<WrapperCallback>,
    weight: u64,
    context: OnceLock<Arc<QueryExecutionContext>>,
    computed: OnceLock<Bitmap>,
}

impl FormulaWrapper {
    /// Wraps `inner` with the default cost model.
    pub fn new<F>(inner: FormulaRef, callback: F) -> Self
    where
        F: Fn(&QueryExecutionContext, &Formula) -> FormulaResult<Bitmap> + Send + Sync + 'static,
    {
        Self::with_cost_model(inner, callback, &CostModel::DEFAULT)
    }

    /// Wraps `inner`, charging the deferred weight of the given model.
    pub fn with_cost_model<F>(inner: FormulaRef, callback: F, model: &CostModel) -> Self
    where
        F: Fn(&QueryExecutionContext, &Formula) -> FormulaResult<Bitmap> + Send + Sync + 'static,
    {
        Self {
            inner,
            callback: Box::new(callback),
            weight: model.deferred,
            context: OnceLock::new(),
            computed: OnceLock::new(),
        }
    }

    /// The wrapped formula.
    pub fn inner(&self) -> &FormulaRef {
        &self.inner
    }

    /// Returns true once the execution context is bound.
    pub fn is_initialized(&self) -> bool {
        self.context.get().is_some()
    }
}

impl BitmapSupplier for FormulaWrapper {
    fn get(&self) -> FormulaResult<Bitmap> {
        if let Some(bitmap) = self.computed.get() {
            return Ok(bitmap.clone());
        }
        let ctx = self
            .context
            .get()
            .ok_or_else(|| FormulaError::NotInitialized("formula wrapper".to_string()))?;
        let bitmap = (self.callback)(ctx, &self.inner)?;
        Ok(self.computed.get_or_init(|| bitmap).clone())
    }

    fn hash(&self) -> u64 {
        StructuralHasher::new("formula-wrapper")
            .u64(self.inner.hash())
            .finish()
    }

    fn estimated_cost(&self) -> u64 {
        CostModel::estimate(
            self.weight,
            self.inner.estimated_cost(),
            self.inner.estimated_cardinality(),
        )
    }

    fn cost(&self) -> Option<u64> {
        let bitmap = self.computed.get()?;
        let inner_cost = self
            .inner
            .cost()
            .unwrap_or_else(|| self.inner.estimated_cost());
        Some(CostModel::estimate(self.weight, inner_cost, bitmap.size() as u64))
    }

    fn estimated_cardinality(&self) -> u64 {
        self.inner.estimated_cardinality()
    }

    fn transactional_ids(&self) -> Vec<u64> {
        self.inner.transactional_ids().to_vec()
    }

    fn initialize(&self, ctx: &Arc<QueryExecutionContext>) {
        self.inner.initialize(ctx);
        let _ = self.context.set(Arc::clone(ctx));
    }

    fn filtered_price_records(&self) -> Option<FilteredPriceRecords> {
        self.inner.collect_filtered_price_records()
    }

    fn description(&self) -> &str {
        "formula wrapper"
    }
}

impl fmt::Debug for FormulaWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormulaWrapper")
            .field("inner", &self.inner.hash())
            .field("initialized", &self.is_initialized())
            .field("computed", &self.computed.get().is_some())
            .finish()
    }
}

/// Supplier backed by a plain closure, e.g. a lazy index lookup.
pub struct LazyBitmap {
    label: String,
    hash: u64,
    estimated_cost: u64,
    estimated_cardinality: u64,
    transactional_ids: Vec<u64>,
    producer: Box<dyn Fn() -> FormulaResult<Bitmap> + Send + Sync>,
    computed: OnceLock<Bitmap>,
}

impl LazyBitmap {
    /// Creates a supplier; `label` and `parameters` identify it structurally.
    pub fn new<F>(label: impl Into<String>, parameters: &str, estimated_cardinality: u64, producer: F) -> Self
    where
        F: Fn() -> FormulaResult<Bitmap> + Send + Sync + 'static,
    {
        let label = label.into();
        let hash = StructuralHasher::new("lazy-bitmap")
            .str(&label)
            .str(parameters)
            .finish();
        Self {
            label,
            hash,
            estimated_cost: CostModel::estimate(CostModel::DEFAULT.deferred, 0, estimated_cardinality),
            estimated_cardinality,
            transactional_ids: Vec::new(),
            producer: Box::new(producer),
            computed: OnceLock::new(),
        }
    }

    /// Overrides the estimated cost.
    pub fn with_estimated_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Declares the transactional data sources the lookup reads.
    pub fn with_transactional_ids(mut self, mut ids: Vec<u64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        self.transactional_ids = ids;
        self
    }
}

impl BitmapSupplier for LazyBitmap {
    fn get(&self) -> FormulaResult<Bitmap> {
        if let Some(bitmap) = self.computed.get() {
            return Ok(bitmap.clone());
        }
        let bitmap = (self.producer)()?;
        Ok(self.computed.get_or_init(|| bitmap).clone())
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }

    fn cost(&self) -> Option<u64> {
        self.computed.get().map(|b| {
            CostModel::estimate(CostModel::DEFAULT.deferred, 0, b.size() as u64)
        })
    }

    fn estimated_cardinality(&self) -> u64 {
        self.estimated_cardinality
    }

    fn transactional_ids(&self) -> Vec<u64> {
        self.transactional_ids.clone()
    }

    fn description(&self) -> &str {
        &self.label
    }
}
