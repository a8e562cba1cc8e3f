//! Property tests of page slicing.

use entity_formula_executor::{slicer_for, ConditionalGap, Pagination};
use proptest::prelude::*;

proptest! {
    #[test]
    fn uniform_pages_partition_all_records(total in 0usize..500, size in 1usize..40) {
        let last = total.div_ceil(size).max(1);
        let mut covered = 0;
        for number in 1..=last {
            let pagination = Pagination::page(number, size);
            let window = slicer_for(&pagination).calculate_offset_and_limit(&pagination, total).unwrap();
            prop_assert_eq!(window.page_number, number);
            prop_assert_eq!(window.offset, covered);
            covered = window.end(total);
        }
        prop_assert_eq!(covered, total);
    }

    #[test]
    fn page_past_the_end_falls_back_to_first(total in 1usize..200, size in 1usize..20, past in 1usize..5) {
        let number = total.div_ceil(size) + past;
        let pagination = Pagination::page(number, size);
        let window = slicer_for(&pagination).calculate_offset_and_limit(&pagination, total).unwrap();
        prop_assert_eq!(window.page_number, 1);
        prop_assert_eq!(window.offset, 0);
    }

    #[test]
    fn gapped_pages_never_overlap(total in 0usize..300, size in 2usize..15) {
        let spacing = vec![ConditionalGap::new(1, "$pageNumber % 3 == 0").unwrap()];
        let first = Pagination::page_with_spacing(1, size, spacing.clone());
        let first = slicer_for(&first).calculate_offset_and_limit(&first, total).unwrap();
        let last = first.last_page_number.unwrap_or(1);

        let mut covered = 0;
        for number in 1..=last {
            let pagination = Pagination::page_with_spacing(number, size, spacing.clone());
            let window = slicer_for(&pagination).calculate_offset_and_limit(&pagination, total).unwrap();
            prop_assert_eq!(window.offset, covered);
            let expected_limit = if number % 3 == 0 { size - 1 } else { size };
            prop_assert_eq!(window.limit, expected_limit);
            covered = window.end(total);
        }
        prop_assert_eq!(covered, total);
    }
}

#[test]
fn test_gap_limits_of_first_pages() {
    let spacing = vec![
        ConditionalGap::new(2, "($pageNumber - 1) % 2 == 0 && $pageNumber <= 6").unwrap(),
        ConditionalGap::new(1, "$pageNumber % 2 == 0 && $pageNumber <= 6").unwrap(),
    ];
    let limits: Vec<usize> = (1..=8)
        .map(|number| {
            let pagination = Pagination::page_with_spacing(number, 10, spacing.clone());
            slicer_for(&pagination)
                .calculate_offset_and_limit(&pagination, 100)
                .unwrap()
                .limit
        })
        .collect();
    assert_eq!(limits, vec![8, 9, 8, 9, 8, 9, 10, 10]);
}

#[test]
fn test_invalid_gap_expression_is_rejected() {
    assert!(ConditionalGap::new(1, "$pageNumber +").is_err());
}

#[test]
fn test_uniform_pages_of_twenty_five_records() {
    let window = |number: usize| {
        let pagination = Pagination::page(number, 10);
        slicer_for(&pagination).calculate_offset_and_limit(&pagination, 25).unwrap()
    };

    let second = window(2);
    assert_eq!((second.offset, second.limit, second.last_page_number), (10, 10, Some(3)));
    let third = window(3);
    assert_eq!((third.offset, third.limit), (20, 10));
    assert_eq!(third.end(25) - third.offset, 5);
    let beyond = window(4);
    assert_eq!((beyond.offset, beyond.page_number), (0, 1));
}

#[test]
fn test_unconditional_gap_shrinks_every_page() {
    let spacing = vec![ConditionalGap::new(2, "true").unwrap()];
    let windows: Vec<(usize, usize)> = (1..=3)
        .map(|number| {
            let pagination = Pagination::page_with_spacing(number, 10, spacing.clone());
            let window = slicer_for(&pagination).calculate_offset_and_limit(&pagination, 24).unwrap();
            assert_eq!(window.last_page_number, Some(3));
            (window.offset, window.limit)
        })
        .collect();
    assert_eq!(windows, vec![(0, 8), (8, 8), (16, 8)]);
}
