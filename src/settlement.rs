// ⚖️ Settlement Calculator - Rank-weighted split of a party's expenses
//
// Formula per participant:
//   rank_total       = total_amount * rate / total_rate
//   amount_per_person = rank_total / participants_in_rank
//   amount_to_pay    = round(amount_per_person)
//   balance          = round(paid_amount - amount_per_person)
//
// amount_to_pay and balance are rounded independently, so
// paid_amount - amount_to_pay may differ from balance by one unit.

use crate::error::{SettleError, SettleResult};
use crate::numeric::{
    ensure_amount, ensure_rate, is_full_allocation, round_half_up, Amount, Rank,
};
use crate::rates::RankRates;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

// ============================================================================
// RATE POLICY
// ============================================================================

/// What to do when the persisted rates do not add up to 100%
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePolicy {
    /// Rescale every rate by its share of the actual total
    #[default]
    Tolerant,

    /// Reject the settlement with RateTotalMismatch
    Strict,
}

impl RatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatePolicy::Tolerant => "tolerant",
            RatePolicy::Strict => "strict",
        }
    }
}

impl fmt::Display for RatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatePolicy {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tolerant" => Ok(RatePolicy::Tolerant),
            "strict" => Ok(RatePolicy::Strict),
            other => Err(SettleError::invalid(format!(
                "unknown rate policy '{}' (expected 'tolerant' or 'strict')",
                other
            ))),
        }
    }
}

// ============================================================================
// INPUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseEntry {
    pub amount: Amount,
    pub payer_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    pub id: i64,
    pub name: String,
    pub rank: Rank,
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRow {
    pub member_id: i64,
    pub name: String,
    pub rank: Rank,
    pub amount_to_pay: Amount,
    pub paid_amount: Amount,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// One row per participant, in participant order
    pub rows: Vec<SettlementRow>,

    pub total_amount: Amount,
    pub total_rate: f64,

    /// No usable rates (total rate is zero): nobody owes anything
    pub degenerate: bool,

    /// Rates did not add up to 100% and were rescaled
    pub normalized: bool,

    /// Paid by payers that are not participants of the party
    pub unattributed_paid: Amount,
}

impl SettlementReport {
    pub fn total_to_pay(&self) -> Amount {
        self.rows
            .iter()
            .fold(0, |sum: Amount, row| sum.saturating_add(row.amount_to_pay))
    }

    pub fn total_paid(&self) -> Amount {
        self.rows
            .iter()
            .fold(0, |sum: Amount, row| sum.saturating_add(row.paid_amount))
    }

    pub fn row_for(&self, member_id: i64) -> Option<&SettlementRow> {
        self.rows.iter().find(|row| row.member_id == member_id)
    }
}

// ============================================================================
// SETTLEMENT CALCULATOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementCalculator {
    pub policy: RatePolicy,
}

impl SettlementCalculator {
    pub fn new() -> Self {
        SettlementCalculator {
            policy: RatePolicy::default(),
        }
    }

    pub fn with_policy(policy: RatePolicy) -> Self {
        SettlementCalculator { policy }
    }

    /// Compute the settlement of one party.
    ///
    /// Example:
    /// ```
    /// use rank_split::{ExpenseEntry, ParticipantEntry, RankRates, SettlementCalculator};
    ///
    /// let participants = vec![
    ///     ParticipantEntry { id: 1, name: "Aoki".into(), rank: 1 },
    ///     ParticipantEntry { id: 2, name: "Baba".into(), rank: 1 },
    ///     ParticipantEntry { id: 3, name: "Chiba".into(), rank: 2 },
    /// ];
    /// let expenses = vec![ExpenseEntry { amount: 9000, payer_id: 3 }];
    /// let rates: RankRates = [(1, 60.0), (2, 40.0)].into_iter().collect();
    ///
    /// let report = SettlementCalculator::new()
    ///     .calculate(&expenses, &participants, &rates)
    ///     .unwrap();
    /// let to_pay: Vec<i64> = report.rows.iter().map(|r| r.amount_to_pay).collect();
    /// assert_eq!(to_pay, vec![2700, 2700, 3600]);
    /// ```
    pub fn calculate(
        &self,
        expenses: &[ExpenseEntry],
        participants: &[ParticipantEntry],
        rates: &RankRates,
    ) -> SettleResult<SettlementReport> {
        // Validate everything before any division
        for expense in expenses {
            ensure_amount(expense.amount)?;
        }
        for (rank, rate) in rates.iter() {
            ensure_rate(rank, rate)?;
        }

        let total_amount: Amount = expenses
            .iter()
            .try_fold(0, |sum: Amount, e| sum.checked_add(e.amount))
            .ok_or_else(|| SettleError::invalid("total expense amount is too large"))?;

        let mut rank_counts: BTreeMap<Rank, usize> = BTreeMap::new();
        for participant in participants {
            *rank_counts.entry(participant.rank).or_insert(0) += 1;
        }

        let total_rate = rates.total();
        let degenerate = total_rate == 0.0;
        let normalized = !degenerate && !is_full_allocation(total_rate);

        if normalized {
            match self.policy {
                RatePolicy::Strict => {
                    return Err(SettleError::RateTotalMismatch { total: total_rate });
                }
                RatePolicy::Tolerant => {
                    warn!(total_rate, "rank rates do not add up to 100%, rescaling");
                }
            }
        }

        let rank_totals: BTreeMap<Rank, f64> = if degenerate {
            BTreeMap::new()
        } else {
            rates
                .iter()
                .map(|(rank, rate)| (rank, total_amount as f64 * (rate / total_rate)))
                .collect()
        };

        let mut paid_by: HashMap<i64, Amount> = HashMap::new();
        for expense in expenses {
            // Never exceeds total_amount
            let paid = paid_by.entry(expense.payer_id).or_insert(0);
            *paid = paid.saturating_add(expense.amount);
        }

        let participant_ids: HashSet<i64> = participants.iter().map(|p| p.id).collect();
        let unattributed_paid: Amount = paid_by
            .iter()
            .filter(|(payer_id, _)| !participant_ids.contains(payer_id))
            .map(|(_, amount)| amount)
            .sum();

        let rows: Vec<SettlementRow> = participants
            .iter()
            .map(|participant| {
                let amount_per_person = match (
                    rank_totals.get(&participant.rank),
                    rank_counts.get(&participant.rank),
                ) {
                    (Some(rank_total), Some(count)) if *count > 0 => rank_total / *count as f64,
                    _ => 0.0,
                };

                let paid_amount = paid_by.get(&participant.id).copied().unwrap_or(0);

                SettlementRow {
                    member_id: participant.id,
                    name: participant.name.clone(),
                    rank: participant.rank,
                    amount_to_pay: round_half_up(amount_per_person),
                    paid_amount,
                    balance: round_half_up(paid_amount as f64 - amount_per_person),
                }
            })
            .collect();

        debug!(
            participants = rows.len(),
            total_amount,
            total_rate,
            degenerate,
            "settlement calculated"
        );

        Ok(SettlementReport {
            rows,
            total_amount,
            total_rate,
            degenerate,
            normalized,
            unattributed_paid,
        })
    }
}
