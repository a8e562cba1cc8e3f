//! Query planner for formula evaluation.
//!
//! Produces an explain plan of a formula tree with the estimates computed at
//! construction, optimization hints, and the decision whether entity bodies
//! should be prefetched before the filter is evaluated.

use std::collections::BTreeSet;
use std::fmt;

use entity_formula::{Bitmap, Formula, FormulaKind, VisitControl};
use hashbrown::HashMap;
use log::debug;

use crate::config::PrefetchConfig;

/// Estimated cost above which a deferred lookup is reported.
pub const LARGE_DEFERRED_COST: u64 = 100_000;

/// A complete execution plan of a formula tree.
///
/// # Example
///
/// ```rust
/// use entity_formula::{Bitmap, Formula};
/// use entity_formula_executor::QueryPlanner;
///
/// let filter = Formula::and(vec![
///     Formula::constant(Bitmap::from_iter([1, 2, 3])),
///     Formula::constant(Bitmap::from_iter([2, 3])),
/// ]);
/// let plan = QueryPlanner::default().plan(&filter);
///
/// assert_eq!(plan.steps.len(), 3);
/// assert_eq!(plan.steps[0].operation, "and");
/// assert!(!plan.prefetch.worthwhile);
/// ```
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Nodes of the tree in pre-order.
    pub steps: Vec<QueryStep>,
    /// Estimated cardinality of the root.
    pub estimated_total: u64,
    /// Estimated cost of the root.
    pub estimated_cost: u64,
    /// Optimization hints and suggestions.
    pub optimization_hints: Vec<String>,
    /// Prefetch decision.
    pub prefetch: PrefetchDecision,
}

impl QueryPlan {
    /// Returns true if the plan has optimization hints.
    pub fn has_hints(&self) -> bool {
        !self.optimization_hints.is_empty()
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Estimated total: {} records", self.estimated_total)?;
        writeln!(f, "Estimated cost: {}", self.estimated_cost)?;
        writeln!(f)?;

        writeln!(f, "Steps:")?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {}. {}{}", i + 1, "  ".repeat(step.depth), step)?;
        }

        if self.prefetch.worthwhile {
            writeln!(f)?;
            writeln!(
                f,
                "Prefetch: {} entities with {:?} (expected cost {} > prefetch cost {})",
                self.prefetch.entities.size(),
                self.prefetch.requirements,
                self.prefetch.expected_cost,
                self.prefetch.prefetch_cost
            )?;
        }

        if !self.optimization_hints.is_empty() {
            writeln!(f)?;
            writeln!(f, "Optimization Hints:")?;
            for hint in &self.optimization_hints {
                writeln!(f, "  - {}", hint)?;
            }
        }

        Ok(())
    }
}

/// A single node of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStep {
    /// Kind of the node (e.g. "and", "constant").
    pub operation: &'static str,
    /// Structural hash of the node.
    pub hash: u64,
    /// Depth in the tree, root is 0.
    pub depth: usize,
    /// Estimated cardinality.
    pub estimated_cardinality: u64,
    /// Estimated cost.
    pub estimated_cost: u64,
}

impl fmt::Display for QueryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:016x}] (est. {} records, cost {})",
            self.operation, self.hash, self.estimated_cardinality, self.estimated_cost
        )
    }
}

/// Outcome of the prefetch analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefetchDecision {
    /// True if prefetching entity bodies is expected to pay off.
    pub worthwhile: bool,
    /// Entities to prefetch (intersection of constants in conjunctive scope).
    pub entities: Bitmap,
    /// Entity content the alternative filters need.
    pub requirements: Vec<String>,
    /// Estimated cost of the index-based delegates that could be skipped.
    pub expected_cost: u64,
    /// Estimated cost of fetching the entities.
    pub prefetch_cost: u64,
}

/// Query planner.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    prefetch: PrefetchConfig,
}

#[derive(Default)]
struct PrefetchScan {
    constants: Vec<Bitmap>,
    expected_cost: u64,
    requirements: BTreeSet<String>,
}

impl QueryPlanner {
    /// Creates a planner with the given prefetch heuristics.
    pub fn new(prefetch: PrefetchConfig) -> Self {
        Self { prefetch }
    }

    /// Creates the plan of a formula tree.
    pub fn plan(&self, root: &Formula) -> QueryPlan {
        let mut steps = Vec::new();
        root.visit(&mut |node: &Formula, depth| {
            steps.push(QueryStep {
                operation: node.kind().name(),
                hash: node.hash(),
                depth,
                estimated_cardinality: node.estimated_cardinality(),
                estimated_cost: node.estimated_cost(),
            });
            VisitControl::Continue
        });

        let mut plan = QueryPlan {
            steps,
            estimated_total: root.estimated_cardinality(),
            estimated_cost: root.estimated_cost(),
            optimization_hints: Vec::new(),
            prefetch: self.prefetch_decision(root),
        };
        self.generate_hints(&mut plan);
        debug!(
            "planned {} nodes, estimated cost {}, prefetch {}",
            plan.steps.len(),
            plan.estimated_cost,
            plan.prefetch.worthwhile
        );
        plan
    }

    /// Decides whether entity bodies should be prefetched.
    pub fn prefetch_decision(&self, root: &Formula) -> PrefetchDecision {
        let mut scan = PrefetchScan::default();
        Self::scan(root, true, &mut scan);

        let requirements: Vec<String> = scan.requirements.into_iter().collect();
        let smallest = scan.constants.iter().map(Bitmap::size).min();
        let entities = if scan.constants.is_empty() {
            Bitmap::empty()
        } else {
            Bitmap::and_all(&scan.constants)
        };
        let prefetch_cost = (entities.size() as u64)
            .saturating_mul(requirements.len() as u64)
            .saturating_mul(self.prefetch.cost_per_requirement);

        let worthwhile = self.prefetch.enabled
            && smallest.is_some_and(|size| size <= self.prefetch.bitmap_size_threshold)
            && !requirements.is_empty()
            && scan.expected_cost > prefetch_cost;

        if worthwhile {
            debug!(
                "prefetch of {} entities is worthwhile: expected cost {} > {}",
                entities.size(),
                scan.expected_cost,
                prefetch_cost
            );
        }

        PrefetchDecision {
            worthwhile,
            entities,
            requirements,
            expected_cost: scan.expected_cost,
            prefetch_cost,
        }
    }

    fn scan(node: &Formula, conjunctive: bool, scan: &mut PrefetchScan) {
        match node.kind() {
            FormulaKind::Constant(constant) if conjunctive => scan.constants.push(constant.bitmap.clone()),
            FormulaKind::Selection(selection) => {
                if let Some(delegate) = node.children().first() {
                    scan.expected_cost = scan.expected_cost.saturating_add(delegate.estimated_cost());
                }
                scan.requirements.extend(selection.alternative().requirements());
            }
            _ => {}
        }
        let conjunctive = conjunctive && matches!(node.kind(), FormulaKind::And | FormulaKind::UserFilter);
        for child in node.children() {
            Self::scan(child, conjunctive, scan);
        }
    }

    fn generate_hints(&self, plan: &mut QueryPlan) {
        let mut occurrences: HashMap<u64, (usize, &'static str, u64)> = HashMap::new();
        for step in &plan.steps {
            if step.operation == "deferred" && step.estimated_cost > LARGE_DEFERRED_COST {
                plan.optimization_hints.push(format!(
                    "deferred lookup [{:016x}] has a large estimated cost ({})",
                    step.hash, step.estimated_cost
                ));
            }
            let entry = occurrences
                .entry(step.hash)
                .or_insert((0, step.operation, step.estimated_cost));
            entry.0 += 1;
        }

        let mut repeated: Vec<_> = occurrences
            .into_iter()
            .filter(|(_, (count, operation, _))| *count > 1 && !matches!(*operation, "constant" | "empty"))
            .collect();
        repeated.sort_by_key(|(hash, _)| *hash);
        for (hash, (count, operation, cost)) in repeated {
            plan.optimization_hints.push(format!(
                "{} [{:016x}] appears {} times (cost {}) - enable the formula cache to evaluate it once",
                operation, hash, count, cost
            ));
        }
    }
}
