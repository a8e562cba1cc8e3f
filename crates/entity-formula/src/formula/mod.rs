//! Formula algebra.
//!
//! A [`Formula`] is a node of an immutable expression tree evaluating to a
//! [`Bitmap`] of primary keys. Hash, estimated cost and estimated cardinality
//! are computed once when the node is built; the bitmap is computed on first
//! request and memoized. Trees are edited copy-on-write through
//! [`Formula::clone_with_children`], sharing every untouched subtree.
//!
//! # Example
//!
//! ```rust
//! use entity_formula::{Bitmap, Formula};
//!
//! let in_stock = Formula::constant(Bitmap::from_iter([1, 2, 3, 4]));
//! let on_sale = Formula::constant(Bitmap::from_iter([2, 4, 6]));
//! let discontinued = Formula::constant(Bitmap::from_iter([4]));
//!
//! let filter = Formula::not(discontinued, Formula::and(vec![in_stock, on_sale]));
//! assert_eq!(filter.compute().unwrap().to_vec(), vec![2]);
//! ```

pub mod deferred;
pub mod flattened;
pub mod price;
pub mod selection;

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::bitmap::Bitmap;
use crate::context::QueryExecutionContext;
use crate::cost::CostModel;
use crate::error::{FormulaError, FormulaResult};
use crate::hash::{hash_bitmap, hash_transactional_ids, StructuralHasher};

use self::deferred::BitmapSupplier;
use self::flattened::{FlattenedContext, FlattenedFormula};
use self::price::{FilteredPriceRecords, PriceIndex, PriceIndexKey, PriceTranslation};
use self::selection::{EntityFilter, Selection};

/// Shared handle to a formula node.
pub type FormulaRef = Arc<Formula>;

/// Constant bitmap, optionally copied from a versioned index.
#[derive(Debug, Clone)]
pub struct ConstantBitmap {
    /// The bitmap.
    pub bitmap: Bitmap,
    /// Transactional id of the index the bitmap belongs to.
    pub transactional_id: Option<u64>,
}

/// Variant of a formula node together with its node specific parameters.
pub enum FormulaKind {
    /// Always empty.
    Empty,
    /// Precomputed bitmap.
    Constant(ConstantBitmap),
    /// Intersection of all children.
    And,
    /// Union of all children.
    Or,
    /// Conjunction of the filter parts supplied by the end user.
    UserFilter,
    /// `children[1]` minus `children[0]`.
    Not,
    /// Terminal node computed by a supplier.
    Deferred(Arc<dyn BitmapSupplier>),
    /// Passes through price ids owned by the named price index.
    PriceIdContainer(Arc<dyn PriceIndex>),
    /// Translates price ids of its children into entity primary keys.
    PriceTranslate(PriceTranslation),
    /// Index delegate with an entity based alternative.
    Selection(Selection),
    /// Rehydrated cache payload.
    Flattened(Arc<FlattenedFormula>),
}

impl FormulaKind {
    /// Stable name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            FormulaKind::Empty => "empty",
            FormulaKind::Constant(_) => "constant",
            FormulaKind::And => "and",
            FormulaKind::Or => "or",
            FormulaKind::UserFilter => "user-filter",
            FormulaKind::Not => "not",
            FormulaKind::Deferred(_) => "deferred",
            FormulaKind::PriceIdContainer(_) => "price-id-container",
            FormulaKind::PriceTranslate(_) => "price-translate",
            FormulaKind::Selection(_) => "selection",
            FormulaKind::Flattened(_) => "flattened",
        }
    }

    /// Terminal kinds never have children.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FormulaKind::Empty
                | FormulaKind::Constant(_)
                | FormulaKind::Deferred(_)
                | FormulaKind::Flattened(_)
        )
    }

    /// Kinds whose children form an order independent conjunction or disjunction.
    pub fn is_commutative(&self) -> bool {
        matches!(self, FormulaKind::And | FormulaKind::Or | FormulaKind::UserFilter)
    }

    fn weight(&self, model: &CostModel) -> u64 {
        match self {
            FormulaKind::Empty => 0,
            FormulaKind::Constant(_) | FormulaKind::Flattened(_) => model.constant,
            FormulaKind::And => model.and,
            FormulaKind::Or => model.or,
            FormulaKind::UserFilter => model.user_filter,
            FormulaKind::Not => model.not,
            FormulaKind::Deferred(_) => model.deferred,
            FormulaKind::PriceIdContainer(_) => model.price_id_container,
            FormulaKind::PriceTranslate(_) => model.price_translate,
            FormulaKind::Selection(_) => model.selection,
        }
    }

    fn check_arity(&self, actual: usize) -> FormulaResult<()> {
        let expected = match self {
            FormulaKind::Not => "exactly 2",
            FormulaKind::PriceIdContainer(_) | FormulaKind::Selection(_) => "exactly 1",
            FormulaKind::PriceTranslate(_) => "at least 1",
            _ => return Ok(()),
        };
        let valid = match self {
            FormulaKind::Not => actual == 2,
            FormulaKind::PriceTranslate(_) => actual >= 1,
            _ => actual == 1,
        };
        if valid {
            Ok(())
        } else {
            Err(FormulaError::InvalidArity {
                kind: self.name(),
                expected,
                actual,
            })
        }
    }

    /// Copies node parameters, dropping memoized side results.
    fn fresh(&self) -> FormulaKind {
        match self {
            FormulaKind::Empty => FormulaKind::Empty,
            FormulaKind::Constant(c) => FormulaKind::Constant(c.clone()),
            FormulaKind::And => FormulaKind::And,
            FormulaKind::Or => FormulaKind::Or,
            FormulaKind::UserFilter => FormulaKind::UserFilter,
            FormulaKind::Not => FormulaKind::Not,
            FormulaKind::Deferred(s) => FormulaKind::Deferred(Arc::clone(s)),
            FormulaKind::PriceIdContainer(i) => FormulaKind::PriceIdContainer(Arc::clone(i)),
            FormulaKind::PriceTranslate(_) => FormulaKind::PriceTranslate(PriceTranslation::default()),
            FormulaKind::Selection(s) => FormulaKind::Selection(s.fresh()),
            FormulaKind::Flattened(p) => FormulaKind::Flattened(Arc::clone(p)),
        }
    }
}

impl fmt::Debug for FormulaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaKind::Constant(c) => write!(f, "Constant({:?})", c.bitmap),
            FormulaKind::Deferred(s) => write!(f, "Deferred({})", s.description()),
            FormulaKind::PriceIdContainer(i) => {
                write!(f, "PriceIdContainer({}/{})", i.key().price_list, i.key().currency)
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Returned by visitors passed to [`Formula::visit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    /// Visit the children of the current node.
    Continue,
    /// Skip the children of the current node.
    SkipChildren,
}

/// Node of a formula tree.
pub struct Formula {
    kind: FormulaKind,
    children: Vec<FormulaRef>,
    weight: u64,
    hash: u64,
    estimated_cost: u64,
    estimated_cardinality: u64,
    transactional_ids: Arc<[u64]>,
    origin: Option<FormulaRef>,
    memo: OnceLock<Bitmap>,
}

impl Formula {
    // ------------------------------------------------------------------
    // Construction with the default cost model
    // ------------------------------------------------------------------

    /// Empty result.
    pub fn empty() -> FormulaRef {
        FormulaFactory::default().empty()
    }

    /// Precomputed bitmap.
    pub fn constant(bitmap: Bitmap) -> FormulaRef {
        FormulaFactory::default().constant(bitmap)
    }

    /// Bitmap copied from an index with the given transactional id.
    pub fn indexed_constant(bitmap: Bitmap, transactional_id: u64) -> FormulaRef {
        FormulaFactory::default().indexed_constant(bitmap, transactional_id)
    }

    /// Intersection.
    pub fn and(children: Vec<FormulaRef>) -> FormulaRef {
        FormulaFactory::default().and(children)
    }

    /// Union.
    pub fn or(children: Vec<FormulaRef>) -> FormulaRef {
        FormulaFactory::default().or(children)
    }

    /// User supplied part of the filter.
    pub fn user_filter(children: Vec<FormulaRef>) -> FormulaRef {
        FormulaFactory::default().user_filter(children)
    }

    /// `superset` minus `subtracted`.
    pub fn not(subtracted: FormulaRef, superset: FormulaRef) -> FormulaRef {
        FormulaFactory::default().not(subtracted, superset)
    }

    /// Terminal node backed by a supplier.
    pub fn deferred(supplier: Arc<dyn BitmapSupplier>) -> FormulaRef {
        FormulaFactory::default().deferred(supplier)
    }

    /// Marks `price_ids` as owned by `index`.
    pub fn price_id_container(index: Arc<dyn PriceIndex>, price_ids: FormulaRef) -> FormulaRef {
        FormulaFactory::default().price_id_container(index, price_ids)
    }

    /// Translates the price ids produced by `delegate` into entity primary keys.
    pub fn price_translate(delegate: FormulaRef) -> FormulaRef {
        FormulaFactory::default().price_translate(delegate)
    }

    /// Index delegate with an entity based alternative.
    pub fn selection(delegate: FormulaRef, alternative: Arc<dyn EntityFilter>) -> FormulaRef {
        FormulaFactory::default().selection(delegate, alternative)
    }

    /// Rehydrates a cache payload.
    pub fn flattened(payload: FlattenedFormula) -> FormulaRef {
        FormulaFactory::default().flattened(payload)
    }

    /// Terminal node standing in for the `origin` subtree it was derived from.
    ///
    /// The node keeps its own hash and estimates; `origin` is only consulted
    /// by rewrites that need to see through the substitute, such as
    /// [`without_user_filter`](Self::without_user_filter).
    pub fn substitute(replacement: &Formula, origin: FormulaRef) -> FormulaResult<FormulaRef> {
        if !replacement.kind.is_terminal() {
            return Err(FormulaError::unsupported(
                replacement.kind.name(),
                "only terminal formulas can substitute a subtree",
            ));
        }
        Ok(Formula::build_from(
            replacement.kind.fresh(),
            Vec::new(),
            replacement.weight,
            Some(origin),
        ))
    }

    fn build(kind: FormulaKind, children: Vec<FormulaRef>, weight: u64) -> FormulaRef {
        Formula::build_from(kind, children, weight, None)
    }

    fn build_from(
        kind: FormulaKind,
        children: Vec<FormulaRef>,
        weight: u64,
        origin: Option<FormulaRef>,
    ) -> FormulaRef {
        let hash = structural_hash(&kind, &children);
        let estimated_cardinality = estimate_cardinality(&kind, &children);
        let estimated_cost = match &kind {
            FormulaKind::Empty => 0,
            FormulaKind::Constant(c) => weight.saturating_mul(c.bitmap.size() as u64),
            FormulaKind::Flattened(p) => weight.saturating_mul(p.bitmap().size() as u64),
            FormulaKind::Deferred(s) => s.estimated_cost(),
            _ => {
                let children_cost = children.iter().map(|c| c.estimated_cost).fold(0u64, u64::saturating_add);
                let input = children
                    .iter()
                    .map(|c| c.estimated_cardinality)
                    .fold(0u64, u64::saturating_add);
                CostModel::estimate(weight, children_cost, input)
            }
        };
        let transactional_ids = collect_transactional_ids(&kind, &children);
        Arc::new(Formula {
            kind,
            children,
            weight,
            hash,
            estimated_cost,
            estimated_cardinality,
            transactional_ids,
            origin,
            memo: OnceLock::new(),
        })
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Variant and parameters of the node.
    pub fn kind(&self) -> &FormulaKind {
        &self.kind
    }

    /// Child nodes; empty for terminal nodes.
    pub fn children(&self) -> &[FormulaRef] {
        &self.children
    }

    /// Subtree this node substitutes, see [`Formula::substitute`].
    pub fn origin(&self) -> Option<&FormulaRef> {
        self.origin.as_ref()
    }

    /// Structural hash; equal for structurally identical trees.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Cost estimate available before evaluation.
    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }

    /// Cardinality estimate available before evaluation.
    pub fn estimated_cardinality(&self) -> u64 {
        self.estimated_cardinality
    }

    /// Sorted, distinct transactional ids of the data the subtree reads.
    pub fn transactional_ids(&self) -> &[u64] {
        &self.transactional_ids
    }

    /// Hash of [`transactional_ids`](Self::transactional_ids).
    pub fn transactional_ids_hash(&self) -> u64 {
        hash_transactional_ids(&self.transactional_ids)
    }

    /// Returns true if the node was already computed.
    pub fn is_computed(&self) -> bool {
        self.memo.get().is_some()
    }

    /// Actual cardinality, known only after evaluation.
    pub fn cardinality(&self) -> Option<usize> {
        self.memo.get().map(Bitmap::size)
    }

    /// Actual cost, known only after evaluation.
    ///
    /// Children that were never evaluated contribute their estimate.
    pub fn cost(&self) -> Option<u64> {
        let result = self.memo.get()?;
        let cost = match &self.kind {
            FormulaKind::Empty => 0,
            FormulaKind::Constant(_) | FormulaKind::Flattened(_) => {
                self.weight.saturating_mul(result.size() as u64)
            }
            FormulaKind::Deferred(s) => s.cost().unwrap_or(self.estimated_cost),
            _ => {
                let children_cost = self
                    .children
                    .iter()
                    .map(|c| c.cost().unwrap_or(c.estimated_cost))
                    .fold(0u64, u64::saturating_add);
                let input = self
                    .children
                    .iter()
                    .map(|c| c.cardinality().map_or(c.estimated_cardinality, |n| n as u64))
                    .fold(0u64, u64::saturating_add);
                CostModel::estimate(self.weight, children_cost, input)
            }
        };
        Some(cost)
    }

    /// Returns a node of the same kind and parameters with different children.
    ///
    /// Terminal nodes cannot acquire children.
    pub fn clone_with_children(&self, children: Vec<FormulaRef>) -> FormulaResult<FormulaRef> {
        if self.kind.is_terminal() {
            return Err(FormulaError::unsupported(
                self.kind.name(),
                "terminal formulas cannot acquire children",
            ));
        }
        self.kind.check_arity(children.len())?;
        Ok(Formula::build(self.kind.fresh(), children, self.weight))
    }

    /// Pre-order walk with depth (root is depth 0).
    pub fn visit<F>(&self, visitor: &mut F)
    where
        F: FnMut(&Formula, usize) -> VisitControl,
    {
        self.visit_at(visitor, 0);
    }

    fn visit_at<F>(&self, visitor: &mut F, depth: usize)
    where
        F: FnMut(&Formula, usize) -> VisitControl,
    {
        if visitor(self, depth) == VisitControl::Continue {
            for child in &self.children {
                child.visit_at(visitor, depth + 1);
            }
        }
    }

    /// Binds the execution context into every node that needs it.
    pub fn initialize(&self, ctx: &Arc<QueryExecutionContext>) {
        match &self.kind {
            FormulaKind::Deferred(supplier) => supplier.initialize(ctx),
            FormulaKind::Selection(selection) => selection.bind(ctx),
            _ => {}
        }
        for child in &self.children {
            child.initialize(ctx);
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Computes the bitmap; repeated calls return the memoized result.
    pub fn compute(&self) -> FormulaResult<Bitmap> {
        if let Some(bitmap) = self.memo.get() {
            return Ok(bitmap.clone());
        }
        let bitmap = self.evaluate()?;
        Ok(self.memo.get_or_init(|| bitmap).clone())
    }

    fn evaluate(&self) -> FormulaResult<Bitmap> {
        match &self.kind {
            FormulaKind::Empty => Ok(Bitmap::empty()),
            FormulaKind::Constant(c) => Ok(c.bitmap.clone()),
            FormulaKind::Flattened(p) => Ok(p.bitmap().clone()),
            FormulaKind::And | FormulaKind::UserFilter => self.evaluate_conjunction(),
            FormulaKind::Or => {
                let mut bitmaps = Vec::with_capacity(self.children.len());
                for child in &self.children {
                    bitmaps.push(child.compute()?);
                }
                Ok(Bitmap::or_all(&bitmaps))
            }
            FormulaKind::Not => {
                let (subtracted, superset) = (&self.children[0], &self.children[1]);
                let superset = superset.compute()?;
                if superset.is_empty() {
                    return Ok(superset);
                }
                Ok(superset.andnot(&subtracted.compute()?))
            }
            FormulaKind::Deferred(supplier) => supplier.get(),
            FormulaKind::PriceIdContainer(_) => self.children[0].compute(),
            FormulaKind::PriceTranslate(state) => price::translate(self, state),
            FormulaKind::Selection(selection) => selection.compute(&self.children[0]),
        }
    }

    /// Cheapest children first; stops once the intersection is empty.
    fn evaluate_conjunction(&self) -> FormulaResult<Bitmap> {
        let mut order: Vec<&FormulaRef> = self.children.iter().collect();
        order.sort_by_key(|c| c.estimated_cost);
        let mut iter = order.into_iter();
        let Some(first) = iter.next() else {
            return Ok(Bitmap::empty());
        };
        let mut result = first.compute()?;
        for child in iter {
            if result.is_empty() {
                break;
            }
            result = result.and(&child.compute()?);
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Caching support
    // ------------------------------------------------------------------

    /// Returns true if the node can export its result as a flattened payload.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self.kind,
            FormulaKind::And | FormulaKind::Or | FormulaKind::Not | FormulaKind::PriceTranslate(_)
        )
    }

    /// Computes the node and exports the result as a flattened payload.
    pub fn to_flattened(&self) -> FormulaResult<FlattenedFormula> {
        if !self.is_cacheable() {
            return Err(FormulaError::unsupported(
                self.kind.name(),
                "formula is not cacheable",
            ));
        }
        let bitmap = self.compute()?;
        let context = match &self.kind {
            FormulaKind::PriceTranslate(state) => {
                let records = state.filtered_price_records().cloned().ok_or_else(|| {
                    FormulaError::InternalConsistency(
                        "price translation computed without retaining price records".to_string(),
                    )
                })?;
                FlattenedContext::PriceRecords {
                    records,
                    indexes: state.involved_indexes().unwrap_or_default().to_vec(),
                }
            }
            _ => match self.collect_filtered_price_records() {
                Some(records) => FlattenedContext::PriceRecords {
                    records,
                    indexes: self.involved_price_indexes(),
                },
                None => FlattenedContext::None,
            },
        };
        Ok(FlattenedFormula::new(
            self.hash,
            self.transactional_ids.to_vec(),
            bitmap,
            context,
        ))
    }

    /// Price records retained by this node, if it translates prices.
    pub fn filtered_price_records(&self) -> Option<FilteredPriceRecords> {
        match &self.kind {
            FormulaKind::PriceTranslate(state) => state.filtered_price_records().cloned(),
            FormulaKind::Flattened(payload) => payload.filtered_price_records().cloned(),
            FormulaKind::Deferred(supplier) => supplier.filtered_price_records(),
            _ => None,
        }
    }

    /// Merges price records retained anywhere in the subtree.
    pub fn collect_filtered_price_records(&self) -> Option<FilteredPriceRecords> {
        let mut found = Vec::new();
        self.visit(&mut |formula, _| match formula.filtered_price_records() {
            Some(records) => {
                found.push(records);
                VisitControl::SkipChildren
            }
            None => VisitControl::Continue,
        });
        match found.len() {
            0 => None,
            1 => found.pop(),
            _ => Some(FilteredPriceRecords::merge(found)),
        }
    }

    /// Keys of the price indexes consulted anywhere in the subtree.
    fn involved_price_indexes(&self) -> Vec<PriceIndexKey> {
        let mut keys: Vec<PriceIndexKey> = Vec::new();
        let mut add = |key: &PriceIndexKey| {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        };
        self.visit(&mut |formula, _| {
            match &formula.kind {
                FormulaKind::PriceIdContainer(index) => add(index.key()),
                FormulaKind::PriceTranslate(state) => {
                    state.involved_indexes().unwrap_or_default().iter().for_each(&mut add)
                }
                FormulaKind::Flattened(payload) => {
                    if let FlattenedContext::PriceRecords { indexes, .. } = payload.context() {
                        indexes.iter().for_each(&mut add);
                    }
                }
                _ => {}
            }
            VisitControl::Continue
        });
        keys
    }

    /// Returns the tree with every user filter removed.
    ///
    /// Substitutes are seen through: when their origin holds a user filter,
    /// the stripped origin replaces them.
    ///
    /// `None` means nothing constrains the result any more.
    pub fn without_user_filter(self: &Arc<Self>) -> FormulaResult<Option<FormulaRef>> {
        if matches!(self.kind, FormulaKind::UserFilter) {
            return Ok(None);
        }
        if let Some(origin) = &self.origin {
            return Ok(match origin.without_user_filter()? {
                Some(stripped) if Arc::ptr_eq(&stripped, origin) => Some(Arc::clone(self)),
                stripped => stripped,
            });
        }
        if self.children.is_empty() {
            return Ok(Some(Arc::clone(self)));
        }
        let mut changed = false;
        let mut rewritten = Vec::with_capacity(self.children.len());
        for child in &self.children {
            match child.without_user_filter()? {
                Some(new_child) => {
                    changed |= !Arc::ptr_eq(&new_child, child);
                    rewritten.push(Some(new_child));
                }
                None => {
                    changed = true;
                    rewritten.push(None);
                }
            }
        }
        if !changed {
            return Ok(Some(Arc::clone(self)));
        }
        match &self.kind {
            FormulaKind::And => {
                let kept: Vec<FormulaRef> = rewritten.into_iter().flatten().collect();
                match kept.len() {
                    0 => Ok(None),
                    1 => Ok(kept.into_iter().next()),
                    _ => self.clone_with_children(kept).map(Some),
                }
            }
            FormulaKind::Not => {
                let mut iter = rewritten.into_iter();
                match (iter.next().flatten(), iter.next().flatten()) {
                    (_, None) => Ok(None),
                    (None, Some(superset)) => Ok(Some(superset)),
                    (Some(subtracted), Some(superset)) => {
                        self.clone_with_children(vec![subtracted, superset]).map(Some)
                    }
                }
            }
            _ => {
                if rewritten.iter().any(Option::is_none) {
                    Ok(None)
                } else {
                    self.clone_with_children(rewritten.into_iter().flatten().collect())
                        .map(Some)
                }
            }
        }
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("kind", &self.kind)
            .field("hash", &format_args!("{:016x}", self.hash))
            .field("estimated_cost", &self.estimated_cost)
            .field("estimated_cardinality", &self.estimated_cardinality)
            .field("children", &self.children)
            .finish()
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FormulaKind::Constant(c) => write!(f, "constant[{}]", c.bitmap.size()),
            FormulaKind::Flattened(p) => write!(f, "flattened[{}]", p.bitmap().size()),
            FormulaKind::Deferred(s) => write!(f, "deferred({})", s.description()),
            kind if self.children.is_empty() => f.write_str(kind.name()),
            kind => {
                write!(f, "{}(", kind.name())?;
                for (i, child) in self.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn structural_hash(kind: &FormulaKind, children: &[FormulaRef]) -> u64 {
    let child_hashes = children.iter().map(|c| c.hash);
    match kind {
        FormulaKind::Empty => StructuralHasher::new(kind.name()).finish(),
        FormulaKind::Constant(c) => StructuralHasher::new(kind.name())
            .u64(hash_bitmap(&c.bitmap))
            .finish(),
        FormulaKind::Deferred(supplier) => supplier.hash(),
        FormulaKind::Flattened(payload) => payload.hash(),
        FormulaKind::And | FormulaKind::Or | FormulaKind::UserFilter | FormulaKind::PriceTranslate(_) => {
            StructuralHasher::new(kind.name()).unordered(child_hashes).finish()
        }
        FormulaKind::Not => StructuralHasher::new(kind.name()).ordered(child_hashes).finish(),
        FormulaKind::PriceIdContainer(index) => StructuralHasher::new(kind.name())
            .str(&index.key().price_list)
            .str(&index.key().currency)
            .ordered(child_hashes)
            .finish(),
        FormulaKind::Selection(selection) => StructuralHasher::new(kind.name())
            .u64(selection.alternative().hash())
            .ordered(child_hashes)
            .finish(),
    }
}

fn estimate_cardinality(kind: &FormulaKind, children: &[FormulaRef]) -> u64 {
    let cardinalities = children.iter().map(|c| c.estimated_cardinality);
    match kind {
        FormulaKind::Empty => 0,
        FormulaKind::Constant(c) => c.bitmap.size() as u64,
        FormulaKind::Flattened(p) => p.bitmap().size() as u64,
        FormulaKind::Deferred(s) => s.estimated_cardinality(),
        FormulaKind::And | FormulaKind::UserFilter => cardinalities.min().unwrap_or(0),
        FormulaKind::Or | FormulaKind::PriceTranslate(_) => cardinalities.fold(0u64, u64::saturating_add),
        FormulaKind::Not => children.get(1).map_or(0, |c| c.estimated_cardinality),
        FormulaKind::PriceIdContainer(_) | FormulaKind::Selection(_) => {
            children.first().map_or(0, |c| c.estimated_cardinality)
        }
    }
}

fn collect_transactional_ids(kind: &FormulaKind, children: &[FormulaRef]) -> Arc<[u64]> {
    let mut ids: Vec<u64> = children
        .iter()
        .flat_map(|c| c.transactional_ids.iter().copied())
        .collect();
    match kind {
        FormulaKind::Constant(ConstantBitmap {
            transactional_id: Some(id),
            ..
        }) => ids.push(*id),
        FormulaKind::Deferred(supplier) => ids.extend(supplier.transactional_ids()),
        FormulaKind::Flattened(payload) => ids.extend_from_slice(payload.transactional_ids()),
        FormulaKind::PriceIdContainer(index) => ids.push(index.transactional_id()),
        _ => {}
    }
    ids.sort_unstable();
    ids.dedup();
    ids.into()
}

// ============================================================================
// Factory
// ============================================================================

/// Builds formula nodes with a configured [`CostModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaFactory {
    model: CostModel,
}

impl FormulaFactory {
    /// Creates a factory using the given cost model.
    pub fn new(model: CostModel) -> Self {
        Self { model }
    }

    /// The cost model nodes are built with.
    pub fn cost_model(&self) -> &CostModel {
        &self.model
    }

    fn node(&self, kind: FormulaKind, children: Vec<FormulaRef>) -> FormulaRef {
        let weight = kind.weight(&self.model);
        Formula::build(kind, children, weight)
    }

    /// Empty result.
    pub fn empty(&self) -> FormulaRef {
        self.node(FormulaKind::Empty, Vec::new())
    }

    /// Precomputed bitmap.
    pub fn constant(&self, bitmap: Bitmap) -> FormulaRef {
        self.node(
            FormulaKind::Constant(ConstantBitmap {
                bitmap,
                transactional_id: None,
            }),
            Vec::new(),
        )
    }

    /// Bitmap copied from an index with the given transactional id.
    pub fn indexed_constant(&self, bitmap: Bitmap, transactional_id: u64) -> FormulaRef {
        self.node(
            FormulaKind::Constant(ConstantBitmap {
                bitmap,
                transactional_id: Some(transactional_id),
            }),
            Vec::new(),
        )
    }

    /// Intersection.
    pub fn and(&self, children: Vec<FormulaRef>) -> FormulaRef {
        self.node(FormulaKind::And, children)
    }

    /// Union.
    pub fn or(&self, children: Vec<FormulaRef>) -> FormulaRef {
        self.node(FormulaKind::Or, children)
    }

    /// User supplied part of the filter.
    pub fn user_filter(&self, children: Vec<FormulaRef>) -> FormulaRef {
        self.node(FormulaKind::UserFilter, children)
    }

    /// `superset` minus `subtracted`.
    pub fn not(&self, subtracted: FormulaRef, superset: FormulaRef) -> FormulaRef {
        self.node(FormulaKind::Not, vec![subtracted, superset])
    }

    /// Terminal node backed by a supplier.
    pub fn deferred(&self, supplier: Arc<dyn BitmapSupplier>) -> FormulaRef {
        self.node(FormulaKind::Deferred(supplier), Vec::new())
    }

    /// Marks `price_ids` as owned by `index`.
    pub fn price_id_container(&self, index: Arc<dyn PriceIndex>, price_ids: FormulaRef) -> FormulaRef {
        self.node(FormulaKind::PriceIdContainer(index), vec![price_ids])
    }

    /// Translates the price ids produced by `delegate` into entity primary keys.
    pub fn price_translate(&self, delegate: FormulaRef) -> FormulaRef {
        self.node(
            FormulaKind::PriceTranslate(PriceTranslation::default()),
            vec![delegate],
        )
    }

    /// Index delegate with an entity based alternative.
    pub fn selection(&self, delegate: FormulaRef, alternative: Arc<dyn EntityFilter>) -> FormulaRef {
        self.node(FormulaKind::Selection(Selection::new(alternative)), vec![delegate])
    }

    /// Rehydrates a cache payload.
    pub fn flattened(&self, payload: FlattenedFormula) -> FormulaRef {
        self.node(FormulaKind::Flattened(Arc::new(payload)), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::deferred::LazyBitmap;
    use super::price::{InMemoryPriceIndex, PriceIndexKey, PriceRecord};
    use super::selection::AttributeFilter;
    use super::*;
    use crate::entity::SealedEntity;
    use crate::error::ErrorKind;

    fn constant(ids: &[u32]) -> FormulaRef {
        Formula::constant(ids.iter().copied().collect())
    }

    #[test]
    fn test_and_or_not() {
        let a = constant(&[1, 2, 3, 4]);
        let b = constant(&[3, 4, 5]);
        assert_eq!(Formula::and(vec![a.clone(), b.clone()]).compute().unwrap().to_vec(), vec![3, 4]);
        assert_eq!(Formula::or(vec![a.clone(), b.clone()]).compute().unwrap().to_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(Formula::not(b, a).compute().unwrap().to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_empty_constant_costs_nothing() {
        let empty = Formula::constant(Bitmap::empty());
        assert_eq!(empty.estimated_cost(), 0);
        assert_eq!(empty.estimated_cardinality(), 0);
        assert_eq!(Formula::empty().estimated_cost(), 0);
    }

    #[test]
    fn test_cost_covers_children() {
        let a = constant(&[1, 2, 3]);
        let b = constant(&[2, 3]);
        let and = Formula::and(vec![a.clone(), b.clone()]);
        assert!(and.estimated_cost() >= a.estimated_cost() + b.estimated_cost() + CostModel::DEFAULT.and);
        assert_eq!(and.estimated_cardinality(), 2);

        assert!(and.cost().is_none());
        and.compute().unwrap();
        assert!(and.cost().unwrap() >= a.estimated_cost() + b.estimated_cost() + CostModel::DEFAULT.and);
        assert_eq!(and.cardinality(), Some(2));
    }

    #[test]
    fn test_commutative_hash_ignores_order() {
        let a = constant(&[1]);
        let b = constant(&[2]);
        assert_eq!(
            Formula::and(vec![a.clone(), b.clone()]).hash(),
            Formula::and(vec![b.clone(), a.clone()]).hash()
        );
        assert_ne!(
            Formula::not(a.clone(), b.clone()).hash(),
            Formula::not(b.clone(), a.clone()).hash()
        );
        assert_ne!(
            Formula::and(vec![a.clone(), b.clone()]).hash(),
            Formula::or(vec![a, b]).hash()
        );
    }

    #[test]
    fn test_deferred_supplier_called_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lookup = Formula::deferred(Arc::new(LazyBitmap::new("index", "a", 2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bitmap::from_iter([1, 2]))
        })));
        let root = Formula::or(vec![lookup.clone(), constant(&[9])]);

        assert_eq!(root.compute().unwrap().to_vec(), vec![1, 2, 9]);
        assert_eq!(lookup.compute().unwrap().to_vec(), vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clone_with_children_rejects_terminals() {
        let err = constant(&[1]).clone_with_children(vec![constant(&[2])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

        let deferred = Formula::deferred(Arc::new(LazyBitmap::new("index", "a", 0, || Ok(Bitmap::empty()))));
        assert!(deferred.clone_with_children(Vec::new()).is_err());
    }

    #[test]
    fn test_clone_with_children_checks_arity() {
        let not = Formula::not(constant(&[1]), constant(&[1, 2]));
        let err = not.clone_with_children(vec![constant(&[1])]).unwrap_err();
        assert!(matches!(err, FormulaError::InvalidArity { actual: 1, .. }));
    }

    #[test]
    fn test_clone_with_children_rehashes() {
        let and = Formula::and(vec![constant(&[1, 2]), constant(&[2])]);
        let clone = and.clone_with_children(vec![constant(&[1, 2]), constant(&[3])]).unwrap();
        assert!(matches!(clone.kind(), FormulaKind::And));
        assert_ne!(clone.hash(), and.hash());
        assert!(clone.compute().unwrap().is_empty());
    }

    #[test]
    fn test_price_translation() {
        let index: Arc<dyn PriceIndex> = Arc::new(
            InMemoryPriceIndex::new(PriceIndexKey::new("basic", "EUR"), 3)
                .with_records([PriceRecord::new(10, 1, 100, 120), PriceRecord::new(11, 2, 50, 60)]),
        );
        let formula = Formula::price_translate(Formula::price_id_container(
            index,
            constant(&[10, 11]),
        ));
        assert_eq!(formula.compute().unwrap().to_vec(), vec![1, 2]);
        assert_eq!(formula.filtered_price_records().unwrap().len(), 2);
        assert_eq!(formula.transactional_ids(), &[3]);
    }

    #[test]
    fn test_selection_uses_prefetched_entities() {
        let delegate = constant(&[1, 2, 3]);
        let selection = Formula::selection(delegate, Arc::new(AttributeFilter::equals("code", "x")));

        let unbound = selection.clone_with_children(vec![constant(&[1, 2, 3])]).unwrap();
        assert_eq!(unbound.compute().unwrap().to_vec(), vec![1, 2, 3]);

        let ctx = Arc::new(
            QueryExecutionContext::builder("product")
                .with_prefetched_entities(vec![
                    SealedEntity::new("product", 1).with_attribute("code", "x"),
                    SealedEntity::new("product", 2).with_attribute("code", "y"),
                ])
                .build(),
        );
        selection.initialize(&ctx);
        assert_eq!(selection.compute().unwrap().to_vec(), vec![1]);
    }

    #[test]
    fn test_without_user_filter() {
        let base = constant(&[1, 2, 3, 4]);
        let user = Formula::user_filter(vec![constant(&[1])]);
        let root = Formula::and(vec![base.clone(), user]);

        let stripped = root.without_user_filter().unwrap().unwrap();
        assert!(Arc::ptr_eq(&stripped, &base));

        let untouched = Formula::or(vec![constant(&[1]), constant(&[2])]);
        let same = untouched.without_user_filter().unwrap().unwrap();
        assert!(Arc::ptr_eq(&same, &untouched));

        let only_user = Formula::user_filter(vec![constant(&[1])]);
        assert!(only_user.without_user_filter().unwrap().is_none());
    }

    #[test]
    fn test_to_flattened_requires_cacheable() {
        let err = constant(&[1]).to_flattened().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

        let or = Formula::or(vec![Formula::indexed_constant(Bitmap::from_iter([1]), 8), constant(&[2])]);
        let payload = or.to_flattened().unwrap();
        assert_eq!(payload.hash(), or.hash());
        assert_eq!(payload.transactional_ids(), &[8]);
        assert_eq!(payload.bitmap().to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_substitute_sees_through_to_origin() {
        let origin = Formula::and(vec![constant(&[1, 2, 3]), Formula::user_filter(vec![constant(&[2])])]);
        let payload = origin.to_flattened().unwrap();
        let substitute = Formula::substitute(&Formula::flattened(payload), Arc::clone(&origin)).unwrap();

        assert_eq!(substitute.hash(), origin.hash());
        assert!(substitute.children().is_empty());
        assert!(Arc::ptr_eq(substitute.origin().unwrap(), &origin));
        assert_eq!(substitute.compute().unwrap().to_vec(), vec![2]);
        let stripped = substitute.without_user_filter().unwrap().unwrap();
        assert_eq!(stripped.compute().unwrap().to_vec(), vec![1, 2, 3]);

        let err = Formula::substitute(&origin, constant(&[1])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_factory_uses_cost_model() {
        let cheap = FormulaFactory::new(CostModel::builder().with_or(1).build());
        let costly = FormulaFactory::new(CostModel::builder().with_or(1000).build());
        let a = cheap.or(vec![cheap.constant(Bitmap::from_iter([1]))]);
        let b = costly.or(vec![costly.constant(Bitmap::from_iter([1]))]);
        assert_eq!(a.hash(), b.hash());
        assert!(a.estimated_cost() < b.estimated_cost());
    }

    #[test]
    fn test_display() {
        let formula = Formula::and(vec![constant(&[1, 2]), Formula::or(vec![constant(&[3])])]);
        assert_eq!(formula.to_string(), "and(constant[2], or(constant[1]))");
    }
}
