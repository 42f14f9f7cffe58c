// 🎚️ Rate Allocator - Rank-ascending cascade
// Keeps the per-rank percentages of a party at exactly 100% while the user
// moves one rank's slider at a time.
//
// Policy for an edit of rank R to value V:
//   R is not the highest rank → R = V, every higher rank gets an equal share
//                               of (100 - sum of ranks <= R)
//   R is the highest rank     → R = V, clamped so the total never exceeds 100
//
// Every edit is a pure transition: (RankRates, edit) -> RateEdit.
// The caller owns the current state and threads it through.

use crate::error::{SettleError, SettleResult};
use crate::numeric::{
    ensure_rank, ensure_rate, is_full_allocation, Rank, FULL_ALLOCATION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// RANK RATES
// ============================================================================

/// Percentage per rank, iterated in ascending numeric rank order.
///
/// Serializes as a JSON object keyed by rank: `{"1": 60.0, "2": 40.0}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankRates(BTreeMap<Rank, f64>);

impl RankRates {
    pub fn new() -> Self {
        RankRates(BTreeMap::new())
    }

    /// Rate for a rank; ranks without an entry read as 0
    pub fn get(&self, rank: Rank) -> f64 {
        self.0.get(&rank).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.0.contains_key(&rank)
    }

    pub fn set(&mut self, rank: Rank, rate: f64) {
        self.0.insert(rank, rate);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rank, f64)> + '_ {
        self.0.iter().map(|(rank, rate)| (*rank, *rate))
    }

    pub fn ranks(&self) -> Vec<Rank> {
        self.0.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all rates
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Sum of the rates of every rank <= `rank`
    pub fn total_through(&self, rank: Rank) -> f64 {
        self.0.range(..=rank).map(|(_, rate)| rate).sum()
    }

    /// Check a complete rate set before it replaces the persisted one.
    ///
    /// Rejects empty sets, non-positive ranks, rates outside [0, 100] and
    /// totals that are not 100%.
    pub fn validate_commit(&self) -> SettleResult<()> {
        if self.is_empty() {
            return Err(SettleError::invalid("rank rate set is empty"));
        }

        self.validate_entries()?;

        let total = self.total();
        if !is_full_allocation(total) {
            return Err(SettleError::RateTotalMismatch { total });
        }

        Ok(())
    }
}

impl RankRates {
    /// Every rank positive, every rate finite and within [0, 100]
    pub fn validate_entries(&self) -> SettleResult<()> {
        for (rank, rate) in self.iter() {
            ensure_rank(rank)?;
            ensure_rate(rank, rate)?;
            if rate > FULL_ALLOCATION {
                return Err(SettleError::invalid(format!(
                    "rate for rank {} exceeds 100%, got {}",
                    rank, rate
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(Rank, f64)> for RankRates {
    fn from_iter<I: IntoIterator<Item = (Rank, f64)>>(iter: I) -> Self {
        RankRates(iter.into_iter().collect())
    }
}

impl From<BTreeMap<Rank, f64>> for RankRates {
    fn from(map: BTreeMap<Rank, f64>) -> Self {
        RankRates(map)
    }
}

// ============================================================================
// RATE EDIT (result of one slider move)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEdit {
    /// Full mapping after the edit
    pub rates: RankRates,

    /// 100 minus the sum of every rank at or below the edited one.
    /// Display only.
    pub remaining: f64,
}

// ============================================================================
// RATE ALLOCATOR
// ============================================================================

pub struct RateAllocator {
    /// Distinct ranks of the party's participants, ascending
    ranks: Vec<Rank>,
}

impl RateAllocator {
    /// Build an allocator for a set of ranks (sorted and deduplicated here)
    pub fn new(ranks: impl IntoIterator<Item = Rank>) -> Self {
        let mut ranks: Vec<Rank> = ranks.into_iter().collect();
        ranks.sort_unstable();
        ranks.dedup();
        RateAllocator { ranks }
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn is_last(&self, rank: Rank) -> bool {
        self.ranks.last() == Some(&rank)
    }

    /// 100% split evenly across all ranks (starting point for a new party)
    pub fn even_split(&self) -> RankRates {
        if self.ranks.is_empty() {
            return RankRates::new();
        }
        let share = FULL_ALLOCATION / self.ranks.len() as f64;
        self.ranks.iter().map(|rank| (*rank, share)).collect()
    }

    /// Apply one edit: set `target` to `value` and cascade the remainder.
    ///
    /// Example:
    /// ```
    /// use rank_split::{RateAllocator, RankRates};
    ///
    /// let allocator = RateAllocator::new([1, 2, 3]);
    /// let rates: RankRates = [(1, 33.0), (2, 33.0), (3, 34.0)].into_iter().collect();
    ///
    /// let edit = allocator.apply(&rates, 1, 50.0).unwrap();
    /// assert_eq!(edit.rates.get(2), 25.0);
    /// assert_eq!(edit.rates.get(3), 25.0);
    /// assert_eq!(edit.remaining, 50.0);
    /// ```
    pub fn apply(&self, rates: &RankRates, target: Rank, value: f64) -> SettleResult<RateEdit> {
        rates.validate_entries()?;

        // Party without participants: nothing to redistribute
        if self.ranks.is_empty() {
            return Ok(RateEdit {
                rates: rates.clone(),
                remaining: FULL_ALLOCATION - rates.total(),
            });
        }

        ensure_rate(target, value)?;

        let position = self.ranks.binary_search(&target).map_err(|_| {
            SettleError::invalid(format!(
                "rank {} is not among the party ranks {:?}",
                target, self.ranks
            ))
        })?;

        // Only the party's ranks survive an edit; stale ranks would break the total
        let mut next: RankRates = self
            .ranks
            .iter()
            .map(|rank| (*rank, rates.get(*rank)))
            .collect();

        if self.ranks.len() == 1 {
            next.set(target, FULL_ALLOCATION);
            return Ok(RateEdit {
                rates: next,
                remaining: 0.0,
            });
        }

        let lower_total = match position {
            0 => 0.0,
            _ => next.total_through(self.ranks[position - 1]),
        };

        let remaining = if position + 1 < self.ranks.len() {
            // Higher ranks must not go negative
            let value = value.min((FULL_ALLOCATION - lower_total).max(0.0));
            next.set(target, value);

            let remaining = FULL_ALLOCATION - (lower_total + value);
            let higher = &self.ranks[position + 1..];
            let share = remaining / higher.len() as f64;
            for rank in higher {
                next.set(*rank, share);
            }
            remaining
        } else {
            // Last rank: every other rank is below it
            let others = lower_total;
            let value = if value + others > FULL_ALLOCATION {
                (FULL_ALLOCATION - others).max(0.0)
            } else {
                value
            };
            next.set(target, value);
            FULL_ALLOCATION - (others + value)
        };

        Ok(RateEdit {
            rates: next,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(pairs: &[(Rank, f64)]) -> RankRates {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_edit_first_rank_splits_remainder() {
        let allocator = RateAllocator::new([1, 2, 3]);
        let edit = allocator
            .apply(&rates(&[(1, 33.0), (2, 33.0), (3, 34.0)]), 1, 50.0)
            .unwrap();

        assert_eq!(edit.rates, rates(&[(1, 50.0), (2, 25.0), (3, 25.0)]));
        assert_eq!(edit.remaining, 50.0);
    }

    #[test]
    fn test_edit_middle_rank_keeps_lower_ranks() {
        let allocator = RateAllocator::new([1, 2, 3]);
        let edit = allocator
            .apply(&rates(&[(1, 20.0), (2, 40.0), (3, 40.0)]), 2, 50.0)
            .unwrap();

        assert_eq!(edit.rates, rates(&[(1, 20.0), (2, 50.0), (3, 30.0)]));
        assert_eq!(edit.remaining, 30.0);
    }

    #[test]
    fn test_edit_overwrites_higher_ranks() {
        let allocator = RateAllocator::new([1, 2, 3, 4]);
        let edit = allocator
            .apply(&rates(&[(1, 10.0), (2, 10.0), (3, 70.0), (4, 10.0)]), 1, 40.0)
            .unwrap();

        assert_eq!(edit.rates.get(2), 20.0);
        assert_eq!(edit.rates.get(3), 20.0);
        assert_eq!(edit.rates.get(4), 20.0);
        assert!((edit.rates.total() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_last_rank_clamped() {
        let allocator = RateAllocator::new([1, 2]);
        let edit = allocator.apply(&rates(&[(1, 70.0), (2, 30.0)]), 2, 50.0).unwrap();

        assert_eq!(edit.rates, rates(&[(1, 70.0), (2, 30.0)]));
        assert_eq!(edit.remaining, 0.0);
    }

    #[test]
    fn test_last_rank_lowered_leaves_gap() {
        let allocator = RateAllocator::new([1, 2]);
        let edit = allocator.apply(&rates(&[(1, 70.0), (2, 30.0)]), 2, 10.0).unwrap();

        assert_eq!(edit.rates, rates(&[(1, 70.0), (2, 10.0)]));
        assert_eq!(edit.remaining, 20.0);
    }

    #[test]
    fn test_non_last_rank_clamped_to_available() {
        let allocator = RateAllocator::new([1, 2, 3]);
        let edit = allocator
            .apply(&rates(&[(1, 60.0), (2, 20.0), (3, 20.0)]), 2, 80.0)
            .unwrap();

        assert_eq!(edit.rates, rates(&[(1, 60.0), (2, 40.0), (3, 0.0)]));
        assert_eq!(edit.remaining, 0.0);
    }

    #[test]
    fn test_single_rank_pinned_to_full() {
        let allocator = RateAllocator::new([2]);
        let edit = allocator.apply(&RankRates::new(), 2, 30.0).unwrap();

        assert_eq!(edit.rates, rates(&[(2, 100.0)]));
        assert_eq!(edit.remaining, 0.0);
    }

    #[test]
    fn test_empty_ranks_is_noop() {
        let allocator = RateAllocator::new(Vec::new());
        let input = rates(&[(1, 40.0)]);
        let edit = allocator.apply(&input, 5, 10.0).unwrap();

        assert_eq!(edit.rates, input);
        assert_eq!(edit.remaining, 60.0);
    }

    #[test]
    fn test_partially_populated_rates() {
        let allocator = RateAllocator::new([3, 1, 2]);
        let edit = allocator.apply(&RankRates::new(), 2, 30.0).unwrap();

        // Rank 1 had no entry and reads as 0
        assert_eq!(edit.rates, rates(&[(1, 0.0), (2, 30.0), (3, 70.0)]));
        assert_eq!(edit.remaining, 70.0);
    }

    #[test]
    fn test_stale_ranks_dropped() {
        let allocator = RateAllocator::new([1, 2]);
        let edit = allocator
            .apply(&rates(&[(1, 50.0), (2, 30.0), (9, 20.0)]), 1, 50.0)
            .unwrap();

        assert!(!edit.rates.contains(9));
        assert_eq!(edit.rates, rates(&[(1, 50.0), (2, 50.0)]));
    }

    #[test]
    fn test_invalid_edits_rejected() {
        let allocator = RateAllocator::new([1, 2]);
        let current = rates(&[(1, 50.0), (2, 50.0)]);

        assert!(matches!(
            allocator.apply(&current, 3, 10.0),
            Err(SettleError::InvalidInput(_))
        ));
        assert!(allocator.apply(&current, 1, -1.0).is_err());
        assert!(allocator.apply(&current, 1, f64::NAN).is_err());
        assert!(allocator.apply(&current, 1, f64::INFINITY).is_err());
    }

    #[test]
    fn test_out_of_range_current_rates_rejected() {
        let pair = RateAllocator::new([1, 2]);
        assert!(matches!(
            pair.apply(&rates(&[(1, 150.0), (2, 0.0)]), 2, 10.0),
            Err(SettleError::InvalidInput(_))
        ));

        let triple = RateAllocator::new([1, 2, 3]);
        assert!(matches!(
            triple.apply(&rates(&[(1, -50.0), (2, 0.0), (3, 0.0)]), 2, 10.0),
            Err(SettleError::InvalidInput(_))
        ));
        assert!(triple
            .apply(&rates(&[(1, f64::NAN)]), 1, 10.0)
            .is_err());
        assert!(triple.apply(&rates(&[(0, 10.0)]), 1, 10.0).is_err());
    }

    #[test]
    fn test_even_split() {
        let allocator = RateAllocator::new([1, 2, 2, 4]);
        let split = allocator.even_split();

        assert_eq!(allocator.ranks(), &[1, 2, 4]);
        assert_eq!(split.len(), 3);
        assert!(split.validate_commit().is_ok());
        assert!(RateAllocator::new(Vec::new()).even_split().is_empty());
    }

    #[test]
    fn test_validate_commit() {
        assert!(rates(&[(1, 60.0), (2, 40.0)]).validate_commit().is_ok());

        assert!(matches!(
            rates(&[(1, 60.0), (2, 30.0)]).validate_commit(),
            Err(SettleError::RateTotalMismatch { .. })
        ));
        assert!(RankRates::new().validate_commit().is_err());
        assert!(rates(&[(0, 100.0)]).validate_commit().is_err());
        assert!(rates(&[(1, 120.0), (2, -20.0)]).validate_commit().is_err());
        assert!(rates(&[(1, f64::NAN)]).validate_commit().is_err());
    }

    #[test]
    fn test_total_through() {
        let current = rates(&[(1, 10.0), (3, 30.0), (5, 60.0)]);
        assert_eq!(current.total_through(3), 40.0);
        assert_eq!(current.total_through(4), 40.0);
        assert_eq!(current.total_through(0), 0.0);
        assert_eq!(current.total(), 100.0);
    }

    #[test]
    fn test_json_keys_are_ranks() {
        let current = rates(&[(2, 40.0), (1, 60.0)]);
        let json = serde_json::to_string(&current).unwrap();
        assert_eq!(json, r#"{"1":60.0,"2":40.0}"#);

        let parsed: RankRates = serde_json::from_str(r#"{"1": 60, "2": 40.5}"#).unwrap();
        assert_eq!(parsed.get(2), 40.5);
    }
}
