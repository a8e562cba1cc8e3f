//! Cost model for formula evaluation.
//!
//! Costs are relative units. Each node kind carries an operation weight that
//! is multiplied by the number of integers the operation touches. The weights
//! are tuning knobs, not a correctness contract: only their relative order
//! (cheap leaf < join < deferred index lookup) matters to the planner.

/// Per-kind operation weights used when estimating formula costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    /// Weight of reading a constant bitmap, per integer.
    pub constant: u64,
    /// Weight of an intersection, per input integer.
    pub and: u64,
    /// Weight of a union, per input integer.
    pub or: u64,
    /// Weight of a difference, per input integer.
    pub not: u64,
    /// Weight of the user filter container, per input integer.
    pub user_filter: u64,
    /// Weight of passing price ids through a price index container.
    pub price_id_container: u64,
    /// Weight of translating price ids to entity ids, per price id.
    pub price_translate: u64,
    /// Weight of the selection node on top of its delegate.
    pub selection: u64,
    /// Weight added by deferred wrappers on top of the wrapped computation.
    pub deferred: u64,
}

impl CostModel {
    /// Weights used when no model is configured explicitly.
    pub const DEFAULT: CostModel = CostModel {
        constant: 1,
        and: 11,
        or: 12,
        not: 15,
        user_filter: 11,
        price_id_container: 1,
        price_translate: 32,
        selection: 20,
        deferred: 60,
    };

    /// Creates a builder starting from default weights.
    pub fn builder() -> CostModelBuilder {
        CostModelBuilder::default()
    }

    /// Returns true when leaves are cheaper than joins and joins are cheaper
    /// than deferred lookups.
    pub fn is_well_ordered(&self) -> bool {
        let max_join = self.and.max(self.or).max(self.user_filter);
        let min_join = self.and.min(self.or).min(self.user_filter);
        self.constant < min_join && max_join < self.deferred
    }

    /// Estimated cost of a node: children costs plus the operation weight
    /// applied to the integers flowing into it (at least one).
    pub fn estimate(weight: u64, children_cost: u64, input_cardinality: u64) -> u64 {
        children_cost.saturating_add(weight.saturating_mul(input_cardinality.max(1)))
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Builder for [`CostModel`].
#[derive(Debug, Clone, Default)]
pub struct CostModelBuilder {
    model: CostModel,
}

impl CostModelBuilder {
    /// Sets the constant leaf weight.
    pub fn with_constant(mut self, weight: u64) -> Self {
        self.model.constant = weight;
        self
    }

    /// Sets the intersection weight.
    pub fn with_and(mut self, weight: u64) -> Self {
        self.model.and = weight;
        self
    }

    /// Sets the union weight.
    pub fn with_or(mut self, weight: u64) -> Self {
        self.model.or = weight;
        self
    }

    /// Sets the difference weight.
    pub fn with_not(mut self, weight: u64) -> Self {
        self.model.not = weight;
        self
    }

    /// Sets the user filter weight.
    pub fn with_user_filter(mut self, weight: u64) -> Self {
        self.model.user_filter = weight;
        self
    }

    /// Sets the price translation weight.
    pub fn with_price_translate(mut self, weight: u64) -> Self {
        self.model.price_translate = weight;
        self
    }

    /// Sets the selection weight.
    pub fn with_selection(mut self, weight: u64) -> Self {
        self.model.selection = weight;
        self
    }

    /// Sets the deferred wrapper weight.
    pub fn with_deferred(mut self, weight: u64) -> Self {
        self.model.deferred = weight;
        self
    }

    /// Builds the model.
    pub fn build(self) -> CostModel {
        self.model
    }
}
