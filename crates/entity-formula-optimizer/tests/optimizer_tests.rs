//! Property tests of the tree optimizer.

use std::sync::Arc;

use entity_formula::{Formula, FormulaRef, VisitControl};
use entity_formula_optimizer::FormulaTreeOptimizer;
use proptest::prelude::*;
use proptest::sample::Index;

#[derive(Debug, Clone)]
enum Shape {
    Leaf(Vec<u32>),
    And(Vec<Shape>),
    Or(Vec<Shape>),
    UserFilter(Vec<Shape>),
    Not(Box<Shape>, Box<Shape>),
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop::collection::vec(0u32..32, 0..12).prop_map(Shape::Leaf);
    leaf.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..5).prop_map(Shape::And),
            prop::collection::vec(inner.clone(), 1..5).prop_map(Shape::Or),
            prop::collection::vec(inner.clone(), 1..5).prop_map(Shape::UserFilter),
            (inner.clone(), inner).prop_map(|(a, b)| Shape::Not(Box::new(a), Box::new(b))),
        ]
    })
}

fn build(shape: &Shape) -> FormulaRef {
    match shape {
        Shape::Leaf(ids) => Formula::constant(ids.iter().copied().collect()),
        Shape::And(children) => Formula::and(children.iter().map(build).collect()),
        Shape::Or(children) => Formula::or(children.iter().map(build).collect()),
        Shape::UserFilter(children) => Formula::user_filter(children.iter().map(build).collect()),
        Shape::Not(subtracted, superset) => Formula::not(build(subtracted), build(superset)),
    }
}

fn subtree_hashes(root: &FormulaRef) -> Vec<u64> {
    let mut hashes = Vec::new();
    root.visit(&mut |formula, _| {
        hashes.push(formula.hash());
        VisitControl::Continue
    });
    hashes
}

proptest! {
    #[test]
    fn optimized_tree_computes_the_same_bitmap(shape in shape(), pick in any::<Index>()) {
        let root = build(&shape);
        let hashes = subtree_hashes(&root);
        let recurring = hashes[pick.index(hashes.len())];

        let outcome = FormulaTreeOptimizer::matching_hash(recurring).optimize(&root).unwrap();
        prop_assert!(outcome.matched >= 1);
        prop_assert_eq!(outcome.formula.compute().unwrap(), root.compute().unwrap());
    }

    #[test]
    fn tree_without_match_is_reused(shape in shape()) {
        let root = build(&shape);
        let outcome = FormulaTreeOptimizer::new(|_| false).optimize(&root).unwrap();
        prop_assert!(Arc::ptr_eq(&outcome.formula, &root));
        prop_assert_eq!(outcome.split_nodes, 0);
    }
}
