//! Pro-rata splitting of value across lender positions
//!
//! Every share is rounded down. The dust left by rounding goes to the
//! position with the largest weight (lowest lender id on ties), so the shares
//! always sum to exactly the amount being split.

use std::collections::BTreeMap;

use agentlend_types::{Amount, LenderId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LiquidityPosition;

/// How lender interest is shared out at settlement time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestDistribution {
    /// Proportional to each position's balance at settlement
    #[default]
    FlatProportional,
    /// Proportional to balance multiplied by seconds since deposit
    TimeWeighted,
}

impl InterestDistribution {
    fn weight(&self, position: &LiquidityPosition, at: DateTime<Utc>) -> u128 {
        let amount = position.amount.value() as u128;
        match self {
            Self::FlatProportional => amount,
            Self::TimeWeighted => {
                let age = (at - position.deposit_timestamp).num_seconds().max(1) as u128;
                amount.saturating_mul(age)
            }
        }
    }

    /// Weight of every funded position
    pub fn weights(
        &self,
        positions: &BTreeMap<LenderId, LiquidityPosition>,
        at: DateTime<Utc>,
    ) -> Vec<(LenderId, u128)> {
        positions
            .values()
            .filter(|p| !p.amount.is_zero())
            .map(|p| (p.lender_id.clone(), self.weight(p, at)))
            .collect()
    }
}

/// Split `pot` by `weights`; an all-zero weight set gets nothing
pub fn split_by_weight(pot: Amount, weights: &[(LenderId, u128)]) -> Result<Vec<(LenderId, Amount)>> {
    let total: u128 = weights.iter().fold(0u128, |acc, (_, w)| acc.saturating_add(*w));
    if total == 0 || pot.is_zero() {
        return Ok(Vec::new());
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut assigned = Amount::zero();
    for (lender, weight) in weights {
        let share = pot.mul_div_floor(*weight, total)?;
        assigned = assigned.checked_add(share)?;
        shares.push((lender.clone(), share));
    }

    let dust = pot.checked_sub(assigned)?;
    if !dust.is_zero() {
        let largest = weights
            .iter()
            .enumerate()
            .max_by(|(_, (la, wa)), (_, (lb, wb))| wa.cmp(wb).then(lb.cmp(la)))
            .map(|(i, _)| i);
        if let Some(i) = largest {
            shares[i].1 = shares[i].1.checked_add(dust)?;
        }
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenders(n: usize) -> Vec<LenderId> {
        let mut ids: Vec<LenderId> = (0..n).map(|_| LenderId::new()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_split_sixty_forty() {
        let ids = lenders(2);
        let weights = vec![(ids[0].clone(), 600), (ids[1].clone(), 400)];
        let shares = split_by_weight(Amount::new(49_500_000), &weights).unwrap();
        assert_eq!(shares[0].1, Amount::new(29_700_000));
        assert_eq!(shares[1].1, Amount::new(19_800_000));
    }

    #[test]
    fn test_dust_goes_to_largest_weight() {
        let ids = lenders(3);
        let weights = vec![
            (ids[0].clone(), 1),
            (ids[1].clone(), 1),
            (ids[2].clone(), 2),
        ];
        let shares = split_by_weight(Amount::new(5), &weights).unwrap();
        // floor shares are 1, 1, 2 and the leftover unit lands on the weight-2 lender
        assert_eq!(shares[2].1, Amount::new(3));
        let total: Amount = shares.iter().map(|(_, a)| *a).sum();
        assert_eq!(total, Amount::new(5));
    }

    #[test]
    fn test_dust_tie_goes_to_lowest_lender_id() {
        let ids = lenders(2);
        let weights = vec![(ids[0].clone(), 1), (ids[1].clone(), 1)];
        let shares = split_by_weight(Amount::new(3), &weights).unwrap();
        assert_eq!(shares[0].1, Amount::new(2));
        assert_eq!(shares[1].1, Amount::new(1));
    }

    #[test]
    fn test_zero_weights_get_nothing() {
        let ids = lenders(1);
        let shares = split_by_weight(Amount::new(10), &[(ids[0].clone(), 0)]).unwrap();
        assert!(shares.is_empty());
    }
}
