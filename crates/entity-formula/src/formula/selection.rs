//! Selection between index-based and entity-based evaluation.
//!
//! When the planner prefetched a small candidate set, evaluating a filter
//! against the decorated entities is cheaper than consulting the index.
//! A selection node carries both: the index-backed delegate (its only child)
//! and an alternative [`EntityFilter`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::bitmap::Bitmap;
use crate::context::QueryExecutionContext;
use crate::entity::{AttributeValue, SealedEntity};
use crate::error::FormulaResult;
use crate::formula::Formula;
use crate::hash::StructuralHasher;

/// Predicate evaluated against decorated entity bodies.
pub trait EntityFilter: Send + Sync {
    /// Returns true if the entity satisfies the filter.
    fn matches(&self, entity: &SealedEntity) -> bool;

    /// Structural hash of the filter.
    fn hash(&self) -> u64;

    /// Entity content (attribute names) the filter needs to be fetched.
    fn requirements(&self) -> Vec<String>;
}

/// Comparison applied to a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributePredicate {
    /// Attribute equals the value.
    Equals(AttributeValue),
    /// Attribute lies in the inclusive range.
    Between(AttributeValue, AttributeValue),
    /// Attribute is present.
    Exists,
}

/// Entity filter over one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    attribute: String,
    predicate: AttributePredicate,
}

impl AttributeFilter {
    /// Attribute equals `value`.
    pub fn equals(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            predicate: AttributePredicate::Equals(value.into()),
        }
    }

    /// Attribute within `[from, to]`.
    pub fn between(
        attribute: impl Into<String>,
        from: impl Into<AttributeValue>,
        to: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            predicate: AttributePredicate::Between(from.into(), to.into()),
        }
    }

    /// Attribute is present.
    pub fn exists(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            predicate: AttributePredicate::Exists,
        }
    }
}

impl EntityFilter for AttributeFilter {
    fn matches(&self, entity: &SealedEntity) -> bool {
        let Some(value) = entity.attribute(&self.attribute) else {
            return false;
        };
        match &self.predicate {
            AttributePredicate::Exists => true,
            AttributePredicate::Equals(expected) => value.compare(expected).is_some_and(|o| o.is_eq()),
            AttributePredicate::Between(from, to) => {
                value.compare(from).is_some_and(|o| o.is_ge()) && value.compare(to).is_some_and(|o| o.is_le())
            }
        }
    }

    fn hash(&self) -> u64 {
        let hasher = StructuralHasher::new("attribute-filter").str(&self.attribute);
        match &self.predicate {
            AttributePredicate::Exists => hasher.str("exists").finish(),
            AttributePredicate::Equals(value) => hash_value(hasher.str("equals"), value).finish(),
            AttributePredicate::Between(from, to) => {
                hash_value(hash_value(hasher.str("between"), from), to).finish()
            }
        }
    }

    fn requirements(&self) -> Vec<String> {
        vec![self.attribute.clone()]
    }
}

fn hash_value(hasher: StructuralHasher, value: &AttributeValue) -> StructuralHasher {
    match value {
        AttributeValue::Int(v) => hasher.str("int").u64(*v as u64),
        AttributeValue::Float(v) => hasher.str("float").u64(v.to_bits()),
        AttributeValue::Text(v) => hasher.str("text").str(v),
        AttributeValue::Bool(v) => hasher.str("bool").u64(u64::from(*v)),
    }
}

/// State of a selection node.
pub struct Selection {
    alternative: Arc<dyn EntityFilter>,
    context: OnceLock<Arc<QueryExecutionContext>>,
}

impl Selection {
    pub(crate) fn new(alternative: Arc<dyn EntityFilter>) -> Self {
        Self {
            alternative,
            context: OnceLock::new(),
        }
    }

    pub(crate) fn fresh(&self) -> Self {
        let selection = Self::new(Arc::clone(&self.alternative));
        if let Some(ctx) = self.context.get() {
            let _ = selection.context.set(Arc::clone(ctx));
        }
        selection
    }

    /// The entity based alternative filter.
    pub fn alternative(&self) -> &Arc<dyn EntityFilter> {
        &self.alternative
    }

    pub(crate) fn bind(&self, ctx: &Arc<QueryExecutionContext>) {
        let _ = self.context.set(Arc::clone(ctx));
    }

    pub(crate) fn compute(&self, delegate: &Formula) -> FormulaResult<Bitmap> {
        if let Some(ctx) = self.context.get() {
            if let Some(entities) = ctx.prefetched_entities() {
                return Ok(entities
                    .iter()
                    .filter(|e| self.alternative.matches(e))
                    .map(|e| ctx.primary_key_of(e))
                    .collect());
            }
        }
        delegate.compute()
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("alternative", &self.alternative.hash())
            .field("bound", &self.context.get().is_some())
            .finish()
    }
}
