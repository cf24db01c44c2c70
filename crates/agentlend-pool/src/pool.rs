//! AgentPool - liquidity ledger for one agent

use std::collections::BTreeMap;

use agentlend_types::{
    AgentId, Amount, BasisPoints, LenderId, LendingError, PoolAccountingSnapshot, PoolId, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{split_by_weight, InterestDistribution};

const INV_BALANCED: &str = "available_liquidity + total_loaned == total_liquidity";
const INV_POSITIONS: &str = "sum(position.amount) == total_liquidity";
const INV_LOANED: &str = "total_loaned covers settled principal";

/// A lender's stake in one pool
///
/// Kept after a full withdrawal so history survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPosition {
    pub pool_id: PoolId,
    pub lender_id: LenderId,
    /// Current claim on the pool, earnings included
    pub amount: Amount,
    /// Interest credited to date
    pub earned: Amount,
    /// Default losses written off to date
    pub realized_loss: Amount,
    /// Amount-weighted deposit time
    pub deposit_timestamp: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// How a repayment's interest was split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentSplit {
    pub platform_fee: Amount,
    pub lender_interest: Amount,
    pub credits: Vec<(LenderId, Amount)>,
}

/// What a default did to the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultSettlement {
    pub collateral_recovered: Amount,
    /// Principal not covered by collateral, written off lender positions
    pub realized_loss: Amount,
    /// Collateral in excess of principal, credited to lender positions
    pub surplus: Amount,
}

/// Per-agent liquidity pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPool {
    pub agent_id: AgentId,
    pub total_liquidity: Amount,
    pub available_liquidity: Amount,
    pub total_loaned: Amount,
    pub total_earned: Amount,
    pub total_recovered: Amount,
    pub total_losses: Amount,
    pub lender_count: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    positions: BTreeMap<LenderId, LiquidityPosition>,
}

impl AgentPool {
    pub fn new(agent_id: AgentId, at: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            total_liquidity: Amount::zero(),
            available_liquidity: Amount::zero(),
            total_loaned: Amount::zero(),
            total_earned: Amount::zero(),
            total_recovered: Amount::zero(),
            total_losses: Amount::zero(),
            lender_count: 0,
            is_active: true,
            created_at: at,
            last_updated: at,
            positions: BTreeMap::new(),
        }
    }

    pub fn pool_id(&self) -> &PoolId {
        &self.agent_id
    }

    pub fn position(&self, lender_id: &LenderId) -> Option<&LiquidityPosition> {
        self.positions.get(lender_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &LiquidityPosition> {
        self.positions.values()
    }

    pub fn snapshot(&self) -> PoolAccountingSnapshot {
        PoolAccountingSnapshot {
            total_liquidity: self.total_liquidity,
            available_liquidity: self.available_liquidity,
            total_loaned: self.total_loaned,
        }
    }

    pub fn positions_total(&self) -> Amount {
        self.positions.values().map(|p| p.amount).sum()
    }

    /// Verify both pool invariants
    pub fn check_invariants(&self) -> Result<()> {
        self.check_balanced()?;
        let positions = self.positions_total();
        if positions != self.total_liquidity {
            return Err(self.violation(INV_POSITIONS, self.total_liquidity, positions));
        }
        Ok(())
    }

    /// Verify `available + loaned == total`
    pub fn check_balanced(&self) -> Result<()> {
        let observed = Amount(
            self.available_liquidity
                .value()
                .saturating_add(self.total_loaned.value()),
        );
        if observed != self.total_liquidity {
            return Err(self.violation(INV_BALANCED, self.total_liquidity, observed));
        }
        Ok(())
    }

    fn violation(&self, invariant: &str, expected: Amount, observed: Amount) -> LendingError {
        LendingError::IntegrityViolation {
            pool_id: self.agent_id.to_string(),
            invariant: invariant.to_string(),
            expected,
            observed,
        }
    }

    fn refresh_lender_count(&mut self) {
        self.lender_count = self.positions.values().filter(|p| !p.amount.is_zero()).count() as u32;
    }

    /// Add `amount` from `lender_id`, opening a position on first supply
    pub fn supply(&mut self, lender_id: &LenderId, amount: Amount, at: DateTime<Utc>) -> Result<&LiquidityPosition> {
        if amount.is_zero() {
            return Err(LendingError::invalid_amount("amount", "supply must be greater than zero"));
        }
        let total_liquidity = self.total_liquidity.checked_add(amount)?;
        let available_liquidity = self.available_liquidity.checked_add(amount)?;

        let pool_id = self.agent_id.clone();
        let position = self
            .positions
            .entry(lender_id.clone())
            .or_insert_with(|| LiquidityPosition {
                pool_id,
                lender_id: lender_id.clone(),
                amount: Amount::zero(),
                earned: Amount::zero(),
                realized_loss: Amount::zero(),
                deposit_timestamp: at,
                last_updated: at,
            });

        let new_amount = position.amount.checked_add(amount)?;
        position.deposit_timestamp = weighted_timestamp(
            position.deposit_timestamp,
            position.amount,
            at,
            amount,
        );
        position.amount = new_amount;
        position.last_updated = at;

        self.total_liquidity = total_liquidity;
        self.available_liquidity = available_liquidity;
        self.last_updated = at;
        self.refresh_lender_count();
        Ok(&self.positions[lender_id])
    }

    /// Return `amount` to `lender_id`, bounded by its position and by what the
    /// pool has not lent out
    pub fn withdraw(&mut self, lender_id: &LenderId, amount: Amount, at: DateTime<Utc>) -> Result<&LiquidityPosition> {
        if amount.is_zero() {
            return Err(LendingError::invalid_amount("amount", "withdrawal must be greater than zero"));
        }
        let position_amount = self
            .positions
            .get(lender_id)
            .map(|p| p.amount)
            .ok_or_else(|| LendingError::PositionNotFound {
                pool_id: self.agent_id.to_string(),
                lender_id: lender_id.to_string(),
            })?;

        let withdrawable = position_amount.min(self.available_liquidity);
        if amount > withdrawable {
            return Err(LendingError::InsufficientAvailable {
                requested: amount,
                available: withdrawable,
            });
        }

        self.total_liquidity = self.total_liquidity.checked_sub(amount)?;
        self.available_liquidity = self.available_liquidity.checked_sub(amount)?;
        if let Some(position) = self.positions.get_mut(lender_id) {
            position.amount = position.amount.checked_sub(amount)?;
            position.last_updated = at;
        }
        self.last_updated = at;
        self.refresh_lender_count();
        Ok(&self.positions[lender_id])
    }

    /// Move `amount` from available to loaned
    pub fn reserve_for_loan(&mut self, amount: Amount, at: DateTime<Utc>) -> Result<()> {
        if amount > self.available_liquidity {
            return Err(LendingError::InsufficientAvailable {
                requested: amount,
                available: self.available_liquidity,
            });
        }
        self.available_liquidity = self.available_liquidity.checked_sub(amount)?;
        self.total_loaned = self.total_loaned.checked_add(amount)?;
        self.last_updated = at;
        Ok(())
    }

    /// Undo a reservation that never turned into a disbursement
    pub fn release_reservation(&mut self, amount: Amount, at: DateTime<Utc>) -> Result<()> {
        self.total_loaned = self
            .total_loaned
            .checked_sub(amount)
            .map_err(|_| self.violation(INV_LOANED, amount, self.total_loaned))?;
        self.available_liquidity = self.available_liquidity.checked_add(amount)?;
        self.last_updated = at;
        Ok(())
    }

    /// Settle a repaid loan: return principal, keep the platform fee out of
    /// the interest and credit the rest to lenders
    pub fn settle_repayment(
        &mut self,
        principal: Amount,
        interest: Amount,
        platform_fee_bps: BasisPoints,
        distribution: InterestDistribution,
        at: DateTime<Utc>,
    ) -> Result<RepaymentSplit> {
        let platform_fee = interest.apply_bps(platform_fee_bps)?;
        let lender_interest = interest.checked_sub(platform_fee)?;

        self.total_loaned = self
            .total_loaned
            .checked_sub(principal)
            .map_err(|_| self.violation(INV_LOANED, principal, self.total_loaned))?;
        self.available_liquidity = self
            .available_liquidity
            .checked_add(principal)?
            .checked_add(lender_interest)?;
        self.total_liquidity = self.total_liquidity.checked_add(lender_interest)?;
        self.total_earned = self.total_earned.checked_add(lender_interest)?;

        let credits = self.credit_positions(lender_interest, distribution, at)?;
        self.last_updated = at;
        Ok(RepaymentSplit {
            platform_fee,
            lender_interest,
            credits,
        })
    }

    /// Settle a defaulted loan: the seized collateral comes back as available
    /// liquidity, any uncovered principal is a realized loss
    pub fn settle_default(
        &mut self,
        principal: Amount,
        collateral_seized: Amount,
        at: DateTime<Utc>,
    ) -> Result<DefaultSettlement> {
        self.total_loaned = self
            .total_loaned
            .checked_sub(principal)
            .map_err(|_| self.violation(INV_LOANED, principal, self.total_loaned))?;
        self.available_liquidity = self.available_liquidity.checked_add(collateral_seized)?;
        self.total_recovered = self.total_recovered.checked_add(collateral_seized)?;

        let realized_loss = principal.saturating_sub(collateral_seized);
        let surplus = collateral_seized.saturating_sub(principal);

        if !realized_loss.is_zero() {
            self.total_liquidity = self.total_liquidity.checked_sub(realized_loss)?;
            self.total_losses = self.total_losses.checked_add(realized_loss)?;
            self.write_down_positions(realized_loss, at)?;
        }
        if !surplus.is_zero() {
            self.total_liquidity = self.total_liquidity.checked_add(surplus)?;
            self.total_earned = self.total_earned.checked_add(surplus)?;
            self.credit_positions(surplus, InterestDistribution::FlatProportional, at)?;
        }

        self.last_updated = at;
        self.refresh_lender_count();
        Ok(DefaultSettlement {
            collateral_recovered: collateral_seized,
            realized_loss,
            surplus,
        })
    }

    /// Recompute loaned/available from the principal the loan book says is
    /// outstanding; total liquidity is re-derived from lender positions
    ///
    /// Applying it twice gives the same state as applying it once.
    pub fn reset_accounting(
        &mut self,
        outstanding: Amount,
        at: DateTime<Utc>,
    ) -> Result<(PoolAccountingSnapshot, PoolAccountingSnapshot)> {
        let before = self.snapshot();
        let total = self.positions_total();
        let available = total
            .checked_sub(outstanding)
            .map_err(|_| self.violation("outstanding principal <= sum(position.amount)", total, outstanding))?;

        self.total_liquidity = total;
        self.total_loaned = outstanding;
        self.available_liquidity = available;
        self.last_updated = at;
        self.refresh_lender_count();
        Ok((before, self.snapshot()))
    }

    fn credit_positions(
        &mut self,
        pot: Amount,
        distribution: InterestDistribution,
        at: DateTime<Utc>,
    ) -> Result<Vec<(LenderId, Amount)>> {
        if pot.is_zero() {
            return Ok(Vec::new());
        }
        let weights = distribution.weights(&self.positions, at);
        let credits = split_by_weight(pot, &weights)?;
        if credits.is_empty() {
            return Err(self.violation("funded positions to credit", pot, Amount::zero()));
        }
        for (lender_id, share) in &credits {
            if let Some(position) = self.positions.get_mut(lender_id) {
                position.amount = position.amount.checked_add(*share)?;
                position.earned = position.earned.checked_add(*share)?;
                position.last_updated = at;
            }
        }
        Ok(credits)
    }

    fn write_down_positions(&mut self, loss: Amount, at: DateTime<Utc>) -> Result<()> {
        let weights = InterestDistribution::FlatProportional.weights(&self.positions, at);
        let shares = split_by_weight(loss, &weights)?;

        let mut remaining = loss;
        for (lender_id, share) in &shares {
            if let Some(position) = self.positions.get_mut(lender_id) {
                let taken = (*share).min(position.amount);
                position.amount = position.amount.checked_sub(taken)?;
                position.realized_loss = position.realized_loss.checked_add(taken)?;
                position.last_updated = at;
                remaining = remaining.checked_sub(taken)?;
            }
        }

        // Rounding dust a small position could not absorb goes to the largest
        while !remaining.is_zero() {
            let largest = self
                .positions
                .values()
                .filter(|p| !p.amount.is_zero())
                .max_by_key(|p| p.amount)
                .map(|p| p.lender_id.clone());
            let Some(lender_id) = largest else {
                return Err(self.violation(
                    "positions absorb realized loss",
                    loss,
                    loss.saturating_sub(remaining),
                ));
            };
            if let Some(position) = self.positions.get_mut(&lender_id) {
                let taken = remaining.min(position.amount);
                position.amount = position.amount.checked_sub(taken)?;
                position.realized_loss = position.realized_loss.checked_add(taken)?;
                remaining = remaining.checked_sub(taken)?;
            }
        }
        Ok(())
    }
}

/// Amount-weighted average of two instants, to the second
fn weighted_timestamp(
    current: DateTime<Utc>,
    current_amount: Amount,
    incoming: DateTime<Utc>,
    incoming_amount: Amount,
) -> DateTime<Utc> {
    let total = current_amount.value() as i128 + incoming_amount.value() as i128;
    if current_amount.is_zero() || total == 0 {
        return incoming;
    }
    let secs = (current.timestamp() as i128 * current_amount.value() as i128
        + incoming.timestamp() as i128 * incoming_amount.value() as i128)
        / total;
    DateTime::from_timestamp(secs as i64, 0).unwrap_or(incoming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn funded_pool(supplies: &[(LenderId, Amount)]) -> AgentPool {
        let mut pool = AgentPool::new(AgentId::new(), Utc::now());
        for (lender, amount) in supplies {
            pool.supply(lender, *amount, Utc::now()).unwrap();
        }
        pool
    }

    fn two_lenders() -> (LenderId, LenderId) {
        let mut ids = [LenderId::new(), LenderId::new()];
        ids.sort();
        let [a, b] = ids;
        (a, b)
    }

    #[test]
    fn test_supply_upserts_position() {
        let lender = LenderId::new();
        let mut pool = funded_pool(&[(lender.clone(), Amount::units(100))]);
        pool.supply(&lender, Amount::units(50), Utc::now()).unwrap();

        assert_eq!(pool.position(&lender).unwrap().amount, Amount::units(150));
        assert_eq!(pool.total_liquidity, Amount::units(150));
        assert_eq!(pool.available_liquidity, Amount::units(150));
        assert_eq!(pool.lender_count, 1);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_zero_supply_rejected() {
        let mut pool = AgentPool::new(AgentId::new(), Utc::now());
        let result = pool.supply(&LenderId::new(), Amount::zero(), Utc::now());
        assert!(matches!(result, Err(LendingError::InvalidAmount { .. })));
    }

    #[test]
    fn test_withdraw_bounded_by_available() {
        let lender = LenderId::new();
        let mut pool = funded_pool(&[(lender.clone(), Amount::units(1_000))]);
        pool.reserve_for_loan(Amount::units(700), Utc::now()).unwrap();

        let result = pool.withdraw(&lender, Amount::units(301), Utc::now());
        assert!(matches!(
            result,
            Err(LendingError::InsufficientAvailable { available, .. }) if available == Amount::units(300)
        ));

        pool.withdraw(&lender, Amount::units(300), Utc::now()).unwrap();
        assert_eq!(pool.available_liquidity, Amount::zero());
        assert_eq!(pool.total_liquidity, Amount::units(700));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_withdraw_bounded_by_position() {
        let (a, b) = two_lenders();
        let mut pool = funded_pool(&[(a.clone(), Amount::units(100)), (b, Amount::units(900))]);
        let result = pool.withdraw(&a, Amount::units(101), Utc::now());
        assert!(matches!(result, Err(LendingError::InsufficientAvailable { .. })));
    }

    #[test]
    fn test_full_withdrawal_keeps_position() {
        let lender = LenderId::new();
        let mut pool = funded_pool(&[(lender.clone(), Amount::units(10))]);
        pool.withdraw(&lender, Amount::units(10), Utc::now()).unwrap();

        assert_eq!(pool.position(&lender).unwrap().amount, Amount::zero());
        assert_eq!(pool.lender_count, 0);
    }

    #[test]
    fn test_withdraw_unknown_lender() {
        let mut pool = funded_pool(&[(LenderId::new(), Amount::units(10))]);
        let result = pool.withdraw(&LenderId::new(), Amount::units(1), Utc::now());
        assert!(matches!(result, Err(LendingError::PositionNotFound { .. })));
    }

    #[test]
    fn test_reserve_boundary() {
        let mut pool = funded_pool(&[(LenderId::new(), Amount::units(2_000))]);
        let too_much = Amount(Amount::units(2_000).value() + 1);
        assert!(matches!(
            pool.reserve_for_loan(too_much, Utc::now()),
            Err(LendingError::InsufficientAvailable { .. })
        ));
        pool.reserve_for_loan(Amount::units(2_000), Utc::now()).unwrap();
        assert_eq!(pool.total_loaned, Amount::units(2_000));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_repayment_split_sixty_forty() {
        let (a, b) = two_lenders();
        let mut pool = funded_pool(&[(a.clone(), Amount::units(600)), (b.clone(), Amount::units(400))]);
        pool.reserve_for_loan(Amount::units(500), Utc::now()).unwrap();

        let split = pool
            .settle_repayment(
                Amount::units(500),
                Amount::units(50),
                BasisPoints(100),
                InterestDistribution::FlatProportional,
                Utc::now(),
            )
            .unwrap();

        assert_eq!(split.platform_fee, Amount::new(500_000));
        assert_eq!(split.lender_interest, Amount::new(49_500_000));
        assert_eq!(pool.position(&a).unwrap().earned, Amount::new(29_700_000));
        assert_eq!(pool.position(&b).unwrap().earned, Amount::new(19_800_000));
        assert_eq!(pool.total_loaned, Amount::zero());
        assert_eq!(pool.available_liquidity, Amount::new(1_049_500_000));
        assert_eq!(pool.total_earned, Amount::new(49_500_000));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_time_weighted_favours_older_deposit() {
        let (a, b) = two_lenders();
        let start = Utc::now() - Duration::days(30);
        let mut pool = AgentPool::new(AgentId::new(), start);
        pool.supply(&a, Amount::units(500), start).unwrap();
        pool.supply(&b, Amount::units(500), start + Duration::days(20)).unwrap();
        pool.reserve_for_loan(Amount::units(100), start).unwrap();

        let now = start + Duration::days(30);
        pool.settle_repayment(
            Amount::units(100),
            Amount::units(40),
            BasisPoints::ZERO,
            InterestDistribution::TimeWeighted,
            now,
        )
        .unwrap();

        // a held for 30 days, b for 10: a 3:1 split
        assert_eq!(pool.position(&a).unwrap().earned, Amount::units(30));
        assert_eq!(pool.position(&b).unwrap().earned, Amount::units(10));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_default_realizes_uncovered_principal() {
        let (a, b) = two_lenders();
        let mut pool = funded_pool(&[(a.clone(), Amount::units(1_200)), (b.clone(), Amount::units(800))]);
        pool.reserve_for_loan(Amount::units(1_000), Utc::now()).unwrap();

        let settlement = pool
            .settle_default(Amount::units(1_000), Amount::units(500), Utc::now())
            .unwrap();

        assert_eq!(settlement.realized_loss, Amount::units(500));
        assert_eq!(pool.total_loaned, Amount::zero());
        // collateral comes back, but not the pre-loan level of 2000
        assert_eq!(pool.available_liquidity, Amount::units(1_500));
        assert_eq!(pool.total_liquidity, Amount::units(1_500));
        assert_eq!(pool.position(&a).unwrap().amount, Amount::units(900));
        assert_eq!(pool.position(&b).unwrap().amount, Amount::units(600));
        assert_eq!(pool.position(&a).unwrap().realized_loss, Amount::units(300));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_settle_more_than_loaned_is_integrity_error() {
        let mut pool = funded_pool(&[(LenderId::new(), Amount::units(10))]);
        let result = pool.settle_repayment(
            Amount::units(1),
            Amount::zero(),
            BasisPoints::ZERO,
            InterestDistribution::FlatProportional,
            Utc::now(),
        );
        assert!(matches!(result, Err(LendingError::IntegrityViolation { .. })));
    }

    #[test]
    fn test_reset_accounting_is_idempotent() {
        let mut pool = funded_pool(&[(LenderId::new(), Amount::units(1_000))]);
        pool.reserve_for_loan(Amount::units(400), Utc::now()).unwrap();
        // drift: loaned overstated
        pool.total_loaned = Amount::units(450);
        assert!(pool.check_balanced().is_err());

        let (before, after) = pool.reset_accounting(Amount::units(400), Utc::now()).unwrap();
        assert_eq!(before.total_loaned, Amount::units(450));
        assert_eq!(after.total_loaned, Amount::units(400));
        assert_eq!(after.available_liquidity, Amount::units(600));
        pool.check_invariants().unwrap();

        let once = pool.clone();
        let (_, again) = pool.reset_accounting(Amount::units(400), Utc::now()).unwrap();
        assert_eq!(again, after);
        assert_eq!(pool.snapshot(), once.snapshot());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Supply(usize, u64),
        Withdraw(usize, u64),
        Borrow(u64),
        Repay(u64, u64),
        Default(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 1u64..1_000_000).prop_map(|(l, a)| Op::Supply(l, a)),
            (0usize..3, 1u64..1_000_000).prop_map(|(l, a)| Op::Withdraw(l, a)),
            (1u64..1_000_000).prop_map(Op::Borrow),
            (0u64..100, 0u64..50_000).prop_map(|(i, f)| Op::Repay(i, f)),
            (0u64..150).prop_map(Op::Default),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_across_operations(ops in proptest::collection::vec(op(), 1..60)) {
            let lenders = [LenderId::new(), LenderId::new(), LenderId::new()];
            let mut pool = AgentPool::new(AgentId::new(), Utc::now());
            let mut open: Vec<Amount> = Vec::new();

            for op in ops {
                let now = Utc::now();
                match op {
                    Op::Supply(l, a) => { let _ = pool.supply(&lenders[l], Amount(a), now); }
                    Op::Withdraw(l, a) => { let _ = pool.withdraw(&lenders[l], Amount(a), now); }
                    Op::Borrow(a) => {
                        if pool.reserve_for_loan(Amount(a), now).is_ok() {
                            open.push(Amount(a));
                        }
                    }
                    Op::Repay(interest_pct, fee_bps) => {
                        if let Some(principal) = open.pop() {
                            let interest = principal.apply_percent(interest_pct as u32).unwrap();
                            pool.settle_repayment(
                                principal,
                                interest,
                                BasisPoints((fee_bps % 10_001) as u32),
                                InterestDistribution::FlatProportional,
                                now,
                            ).unwrap();
                        }
                    }
                    Op::Default(collateral_pct) => {
                        if let Some(principal) = open.pop() {
                            let collateral = principal.apply_percent(collateral_pct as u32).unwrap();
                            pool.settle_default(principal, collateral, now).unwrap();
                        }
                    }
                }
                prop_assert!(pool.check_invariants().is_ok(), "{:?}", pool.check_invariants());
                let outstanding: Amount = open.iter().copied().sum();
                prop_assert_eq!(pool.total_loaned, outstanding);
            }
        }
    }
}
