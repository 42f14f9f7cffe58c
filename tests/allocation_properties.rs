use proptest::prelude::*;
use rank_split::{RankRates, RateAllocator};

const EPS: f64 = 1e-6;

proptest! {
    #[test]
    fn edits_keep_rates_non_negative_and_bounded(
        rank_count in 1usize..=6,
        edits in prop::collection::vec((0usize..=5, 0.0f64..=100.0), 1..=25),
    ) {
        let ranks: Vec<i64> = (1..=rank_count as i64).collect();
        let allocator = RateAllocator::new(ranks.clone());
        let mut rates = allocator.even_split();

        for (target_idx, value) in edits {
            let target = ranks[target_idx % rank_count];
            let edit = allocator.apply(&rates, target, value).unwrap();

            for (_, rate) in edit.rates.iter() {
                prop_assert!(rate >= -EPS, "negative rate {}", rate);
            }
            prop_assert!(edit.rates.total() <= 100.0 + EPS);
            prop_assert_eq!(edit.rates.ranks(), ranks.clone());

            if !allocator.is_last(target) || rank_count == 1 {
                prop_assert!((edit.rates.total() - 100.0).abs() <= EPS);
            }

            rates = edit.rates;
        }
    }

    #[test]
    fn non_last_edit_leaves_lower_ranks_alone(
        rank_count in 2usize..=6,
        target_idx in 0usize..=4,
        value in 0.0f64..=100.0,
    ) {
        let ranks: Vec<i64> = (1..=rank_count as i64).map(|r| r * 10).collect();
        let allocator = RateAllocator::new(ranks.clone());
        let rates = allocator.even_split();

        let position = target_idx % (rank_count - 1);
        let target = ranks[position];
        let edit = allocator.apply(&rates, target, value).unwrap();

        for rank in &ranks[..position] {
            prop_assert_eq!(edit.rates.get(*rank), rates.get(*rank));
        }

        // Higher ranks share the remainder equally
        let higher: Vec<f64> = ranks[position + 1..].iter().map(|r| edit.rates.get(*r)).collect();
        for share in &higher {
            prop_assert!((share - higher[0]).abs() <= EPS);
        }
    }

    #[test]
    fn last_rank_is_clamped_to_what_is_left(
        lower in prop::collection::vec(0.0f64..=40.0, 1..=4),
        value in 0.0f64..=100.0,
    ) {
        let lower_total: f64 = lower.iter().sum();
        prop_assume!(lower_total <= 100.0);

        let mut rates = RankRates::new();
        for (idx, rate) in lower.iter().enumerate() {
            rates.set(idx as i64 + 1, *rate);
        }
        let last = lower.len() as i64 + 1;
        let allocator = RateAllocator::new(1..=last);

        let edit = allocator.apply(&rates, last, value).unwrap();
        let expected = value.min(100.0 - lower_total);

        prop_assert!((edit.rates.get(last) - expected).abs() <= EPS);
        prop_assert!((edit.remaining - (100.0 - lower_total - expected)).abs() <= EPS);
        for idx in 0..lower.len() {
            prop_assert_eq!(edit.rates.get(idx as i64 + 1), lower[idx]);
        }
    }
}

#[test]
fn committed_draft_round_trips_through_validation() {
    let allocator = RateAllocator::new([3, 1, 2, 2]);
    let edit = allocator.apply(&allocator.even_split(), 1, 50.0).unwrap();

    assert_eq!(allocator.ranks(), &[1, 2, 3]);
    assert!(edit.rates.validate_commit().is_ok());
}
