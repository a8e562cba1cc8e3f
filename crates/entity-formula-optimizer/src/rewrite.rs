//! Structural rewriting of formula trees.
//!
//! When the same subtree recurs across many queries (a shared price
//! translation, a common category constraint), the filters ANDed next to it
//! are re-evaluated every time the recurring part is looked up in the cache.
//! [`FormulaTreeOptimizer`] regroups every conjunction or disjunction on the
//! path to such a subtree into two children, the diverted siblings and the
//! matching part, so the matching part becomes one stable, cacheable node.
//!
//! # Example
//!
//! ```ignore
//! use entity_formula_optimizer::FormulaTreeOptimizer;
//!
//! let optimizer = FormulaTreeOptimizer::new(|f| f.hash() == recurring_hash);
//! let outcome = optimizer.optimize(&filter)?;
//! assert_eq!(outcome.formula.compute()?, filter.compute()?);
//! ```

use std::sync::Arc;

use entity_formula::{Formula, FormulaFactory, FormulaKind, FormulaRef, FormulaResult};
use log::debug;

type Predicate = dyn Fn(&Formula) -> bool + Send + Sync;

/// Result of one optimizer pass.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    /// Rewritten tree; the input instance when nothing changed.
    pub formula: FormulaRef,
    /// Number of subtrees matched by the predicate.
    pub matched: usize,
    /// Number of nodes split into diverted / matching groups.
    pub split_nodes: usize,
}

impl OptimizationOutcome {
    /// Returns true if the tree was rewritten.
    pub fn is_rewritten(&self) -> bool {
        self.split_nodes > 0
    }
}

/// Single-pass optimizer hoisting recurring subtrees.
pub struct FormulaTreeOptimizer {
    predicate: Box<Predicate>,
    factory: FormulaFactory,
}

impl FormulaTreeOptimizer {
    /// Creates an optimizer recognizing recurring subtrees with `predicate`.
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&Formula) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            factory: FormulaFactory::default(),
        }
    }

    /// Optimizer matching subtrees by structural hash.
    pub fn matching_hash(hash: u64) -> Self {
        Self::new(move |formula| formula.hash() == hash)
    }

    /// Uses `factory` for the conjunctions created while splitting user filters.
    pub fn with_factory(mut self, factory: FormulaFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Rewrites the tree in one depth-first pass.
    pub fn optimize(&self, root: &FormulaRef) -> FormulaResult<OptimizationOutcome> {
        let mut pass = Pass::default();
        let (formula, _) = self.rewrite(root, &mut pass)?;
        if pass.split_nodes > 0 {
            debug!(
                "optimizer split {} nodes around {} recurring subtrees, root {:016x} -> {:016x}",
                pass.split_nodes,
                pass.matched,
                root.hash(),
                formula.hash()
            );
        }
        Ok(OptimizationOutcome {
            formula,
            matched: pass.matched,
            split_nodes: pass.split_nodes,
        })
    }

    /// Returns the rewritten node and whether it is on a path to a match.
    fn rewrite(&self, node: &FormulaRef, pass: &mut Pass) -> FormulaResult<(FormulaRef, bool)> {
        if (self.predicate)(node) {
            pass.matched += 1;
            return Ok((Arc::clone(node), true));
        }
        if node.children().is_empty() {
            return Ok((Arc::clone(node), false));
        }

        let mut changed = false;
        let mut children = Vec::with_capacity(node.children().len());
        let mut marks = Vec::with_capacity(node.children().len());
        for child in node.children() {
            let (rewritten, marked) = self.rewrite(child, pass)?;
            changed |= !Arc::ptr_eq(&rewritten, child);
            children.push(rewritten);
            marks.push(marked);
        }

        let marked = marks.iter().any(|&m| m);
        if marked && children.len() > 2 && is_splittable(node.kind()) {
            let (matching, diverted): (Vec<_>, Vec<_>) =
                children.iter().cloned().zip(marks).partition(|(_, marked)| *marked);
            if !matching.is_empty() && !diverted.is_empty() {
                let matching = matching.into_iter().map(|(c, _)| c).collect();
                let diverted = diverted.into_iter().map(|(c, _)| c).collect();
                pass.split_nodes += 1;
                return Ok((self.split(node, diverted, matching)?, true));
            }
        }

        let formula = if changed {
            node.clone_with_children(children)?
        } else {
            Arc::clone(node)
        };
        Ok((formula, marked))
    }

    fn split(
        &self,
        node: &FormulaRef,
        diverted: Vec<FormulaRef>,
        matching: Vec<FormulaRef>,
    ) -> FormulaResult<FormulaRef> {
        let (diverted, matching) = match node.kind() {
            FormulaKind::UserFilter => (self.conjunction(diverted), self.conjunction(matching)),
            _ => (group(node, diverted)?, group(node, matching)?),
        };
        node.clone_with_children(vec![diverted, matching])
    }

    fn conjunction(&self, mut members: Vec<FormulaRef>) -> FormulaRef {
        if members.len() == 1 {
            return members.remove(0);
        }
        self.factory.and(members)
    }
}

impl std::fmt::Debug for FormulaTreeOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaTreeOptimizer").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Pass {
    matched: usize,
    split_nodes: usize,
}

/// Negation and the single-delegate kinds keep their shape.
fn is_splittable(kind: &FormulaKind) -> bool {
    matches!(kind, FormulaKind::And | FormulaKind::Or | FormulaKind::UserFilter)
}

/// Groups members under a node of the same kind as `node`.
fn group(node: &Formula, mut members: Vec<FormulaRef>) -> FormulaResult<FormulaRef> {
    if members.len() == 1 {
        return Ok(members.remove(0));
    }
    node.clone_with_children(members)
}
