//! Integration tests for the formula algebra.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use entity_formula::{
    Bitmap, ErrorKind, Formula, FormulaError, FormulaRef, FormulaWrapper, InMemoryPriceIndex, LazyBitmap,
    PriceIndex, PriceIndexKey, PriceRecord, PriceRecordsSortOrder, QueryExecutionContext,
};
use proptest::prelude::*;

fn constant(ids: &[u32]) -> FormulaRef {
    Formula::constant(ids.iter().copied().collect())
}

fn ids() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..200, 0..40)
}

fn bitmap(ids: &[u32]) -> Bitmap {
    ids.iter().copied().collect()
}

// ============================================================================
// Algebra laws
// ============================================================================

proptest! {
    #[test]
    fn and_is_intersection(a in ids(), b in ids()) {
        let expected = bitmap(&a).and(&bitmap(&b));
        let actual = Formula::and(vec![constant(&a), constant(&b)]).compute().unwrap();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn or_is_union(a in ids(), b in ids()) {
        let expected = bitmap(&a).or(&bitmap(&b));
        let actual = Formula::or(vec![constant(&a), constant(&b)]).compute().unwrap();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn not_is_difference_against_superset(a in ids(), universe in ids()) {
        let expected = bitmap(&universe).andnot(&bitmap(&a));
        let actual = Formula::not(constant(&a), constant(&universe)).compute().unwrap();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn commutative_nodes_ignore_child_order(a in ids(), b in ids(), c in ids()) {
        let forward = Formula::and(vec![constant(&a), constant(&b), constant(&c)]);
        let reversed = Formula::and(vec![constant(&c), constant(&b), constant(&a)]);
        prop_assert_eq!(forward.hash(), reversed.hash());
        prop_assert_eq!(forward.compute().unwrap(), reversed.compute().unwrap());

        let forward = Formula::or(vec![constant(&a), constant(&b)]);
        let reversed = Formula::or(vec![constant(&b), constant(&a)]);
        prop_assert_eq!(forward.hash(), reversed.hash());
        prop_assert_eq!(forward.compute().unwrap(), reversed.compute().unwrap());
    }

    #[test]
    fn and_is_associative(a in ids(), b in ids(), c in ids()) {
        let left = Formula::and(vec![Formula::and(vec![constant(&a), constant(&b)]), constant(&c)]);
        let right = Formula::and(vec![constant(&a), Formula::and(vec![constant(&b), constant(&c)])]);
        prop_assert_eq!(left.compute().unwrap(), right.compute().unwrap());
    }

    #[test]
    fn or_is_associative(a in ids(), b in ids(), c in ids()) {
        let left = Formula::or(vec![Formula::or(vec![constant(&a), constant(&b)]), constant(&c)]);
        let right = Formula::or(vec![constant(&a), Formula::or(vec![constant(&b), constant(&c)])]);
        prop_assert_eq!(left.compute().unwrap(), right.compute().unwrap());
    }

    #[test]
    fn cost_is_monotonic(a in ids(), b in ids()) {
        let left = constant(&a);
        let right = constant(&b);
        let and = Formula::and(vec![left.clone(), right.clone()]);
        prop_assert!(and.estimated_cost() > left.estimated_cost() + right.estimated_cost());
        and.compute().unwrap();
        prop_assert!(and.cost().unwrap() > left.estimated_cost() + right.estimated_cost());
    }
}

// ============================================================================
// Hash stability
// ============================================================================

#[test]
fn test_independent_trees_share_hash() {
    let build = || {
        Formula::not(
            constant(&[4]),
            Formula::and(vec![constant(&[1, 2, 3, 4]), Formula::or(vec![constant(&[2]), constant(&[4])])]),
        )
    };
    assert_eq!(build().hash(), build().hash());
}

#[test]
fn test_leaf_parameter_changes_hash() {
    let a = Formula::and(vec![constant(&[1, 2]), constant(&[2, 3])]);
    let b = Formula::and(vec![constant(&[1, 2]), constant(&[2, 4])]);
    assert_ne!(a.hash(), b.hash());
}

// ============================================================================
// Memoization and deferred evaluation
// ============================================================================

#[test]
fn test_compute_twice_invokes_supplier_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let deferred = Formula::deferred(Arc::new(LazyBitmap::new("lookup", "x", 3, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Bitmap::from_iter([1, 2, 3]))
    })));

    assert_eq!(deferred.compute().unwrap().size(), 3);
    assert_eq!(deferred.compute().unwrap().size(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wrapper_requires_initialized_tree() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let wrapper = FormulaWrapper::new(constant(&[5, 6]), move |ctx, inner| {
        assert_eq!(ctx.entity_type(), "product");
        counter.fetch_add(1, Ordering::SeqCst);
        inner.compute()
    });
    let root = Formula::and(vec![Formula::deferred(Arc::new(wrapper)), constant(&[5, 6, 7])]);

    let err = root.compute().unwrap_err();
    assert!(matches!(err, FormulaError::NotInitialized(_)));
    assert_eq!(err.kind(), ErrorKind::Usage);

    let fresh_root = {
        let counter = calls.clone();
        let wrapper = FormulaWrapper::new(constant(&[5, 6]), move |_, inner| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.compute()
        });
        Formula::and(vec![Formula::deferred(Arc::new(wrapper)), constant(&[5, 6, 7])])
    };
    let ctx = Arc::new(QueryExecutionContext::builder("product").build());
    fresh_root.initialize(&ctx);
    assert_eq!(fresh_root.compute().unwrap().to_vec(), vec![5, 6]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Price translation
// ============================================================================

fn price_index(price_list: &str, tx: u64, records: &[(u32, u32)]) -> Arc<dyn PriceIndex> {
    Arc::new(
        InMemoryPriceIndex::new(PriceIndexKey::new(price_list, "EUR"), tx).with_records(
            records
                .iter()
                .map(|&(price_id, entity)| PriceRecord::new(price_id, entity, 100, 121)),
        ),
    )
}

#[test]
fn test_translation_is_complete_across_indexes() {
    let basic = price_index("basic", 1, &[(1, 10), (2, 11), (3, 12)]);
    let action = price_index("action", 2, &[(4, 10), (5, 13)]);
    let price_ids = Formula::or(vec![
        Formula::price_id_container(basic, constant(&[1, 2, 3])),
        Formula::price_id_container(action, constant(&[4, 5])),
    ]);
    let translate = Formula::price_translate(price_ids);

    assert_eq!(translate.compute().unwrap().to_vec(), vec![10, 11, 12, 13]);
    let records = translate.filtered_price_records().unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records.sort_order(), PriceRecordsSortOrder::InternalPriceId);
    assert_eq!(translate.transactional_ids(), &[1, 2]);
}

#[test]
fn test_translation_stops_once_resolved() {
    let basic = price_index("basic", 1, &[(1, 10), (2, 11)]);
    let unused = price_index("unused", 2, &[(1, 99)]);
    let price_ids = Formula::or(vec![
        Formula::price_id_container(basic, constant(&[1, 2])),
        Formula::price_id_container(unused, Formula::empty()),
    ]);
    let translate = Formula::price_translate(price_ids);

    assert_eq!(translate.compute().unwrap().to_vec(), vec![10, 11]);
    let payload = translate.to_flattened().unwrap();
    match payload.context() {
        entity_formula::FlattenedContext::PriceRecords { indexes, records } => {
            assert_eq!(indexes.len(), 2);
            assert_eq!(records.len(), 2);
        }
        other => panic!("unexpected context {:?}", other),
    }
}

#[test]
fn test_translation_fails_on_unbacked_price_id() {
    let basic = price_index("basic", 1, &[(1, 10)]);
    let translate = Formula::price_translate(Formula::price_id_container(basic, constant(&[1, 77])));

    let err = translate.compute().unwrap_err();
    assert_eq!(
        err,
        FormulaError::UnresolvedPriceIds {
            price_ids: vec![77],
            indexes_consulted: 1,
        }
    );
    assert_eq!(err.kind(), ErrorKind::InternalConsistency);
}

#[test]
fn test_translation_cardinality_estimate_is_sum_of_children() {
    let basic = price_index("basic", 1, &[(1, 10), (2, 10)]);
    let container = Formula::price_id_container(basic, constant(&[1, 2]));
    let translate = Formula::price_translate(container.clone());
    assert_eq!(translate.estimated_cardinality(), container.estimated_cardinality());
}

#[test]
fn test_rehydrated_translation_keeps_price_records() {
    let basic = price_index("basic", 1, &[(1, 10), (2, 11)]);
    let translate = Formula::price_translate(Formula::price_id_container(basic, constant(&[1, 2])));
    let rehydrated = translate.to_flattened().unwrap().into_formula();

    assert_eq!(rehydrated.hash(), translate.hash());
    assert_eq!(rehydrated.filtered_price_records().unwrap().len(), 2);
    let root = Formula::and(vec![rehydrated, constant(&[10])]);
    assert_eq!(root.collect_filtered_price_records().unwrap().len(), 2);
}

#[cfg(feature = "serde")]
#[test]
fn test_flattened_payload_serde() {
    let payload = Formula::or(vec![constant(&[1, 2]), constant(&[9])]).to_flattened().unwrap();
    let json = serde_json::to_string(&payload).unwrap();
    let back: entity_formula::FlattenedFormula = serde_json::from_str(&json).unwrap();
    assert_eq!(back, payload);
}
