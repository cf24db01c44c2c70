//! Read-only loan pricing

use agentlend_loans::full_term_interest;
use agentlend_types::{AgentId, Amount, BasisPoints, LendingError, Result, Tier};
use serde::{Deserialize, Serialize};

use crate::MarketState;

/// What a loan request would be offered right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanQuote {
    pub agent_id: AgentId,
    pub score: u32,
    pub tier: Tier,
    pub principal: Amount,
    pub duration_days: u32,
    pub credit_limit: Amount,
    /// Principal already committed on REQUESTED and ACTIVE loans
    pub outstanding_principal: Amount,
    /// Credit limit left before this request
    pub credit_headroom: Amount,
    pub available_liquidity: Amount,
    pub interest_rate_bps: BasisPoints,
    pub collateral_percent: u32,
    pub collateral_amount: Amount,
    /// Interest if held for the whole term
    pub projected_interest: Amount,
    pub open_loans: u32,
    /// Would pass the credit, liquidity and loan-count checks
    pub within_limits: bool,
    pub auto_approve_eligible: bool,
}

impl MarketState {
    pub fn quote(&self, agent_id: &AgentId, principal: Amount, duration_days: u32) -> Result<LoanQuote> {
        self.ensure_registered(agent_id)?;
        if principal.is_zero() {
            return Err(LendingError::invalid_amount("principal", "must be greater than zero"));
        }
        self.config.check_duration(duration_days)?;

        let score = self.reputation.get_score(agent_id)?;
        let pool = self.pools.get(agent_id)?;
        let terms = self.policy.terms(score);
        let open_loans = self.loans.open_loan_count(agent_id);
        let outstanding_principal = self.loans.borrower_exposure(agent_id)?;
        let credit_headroom = terms.credit_limit.saturating_sub(outstanding_principal);

        let within_limits = pool.is_active
            && principal <= credit_headroom
            && principal <= pool.available_liquidity
            && open_loans < self.config.max_active_loans_per_agent;

        Ok(LoanQuote {
            agent_id: agent_id.clone(),
            score,
            tier: terms.tier,
            principal,
            duration_days,
            credit_limit: terms.credit_limit,
            outstanding_principal,
            credit_headroom,
            available_liquidity: pool.available_liquidity,
            interest_rate_bps: terms.interest_rate_bps,
            collateral_percent: terms.collateral_percent,
            collateral_amount: terms.collateral_for(principal)?,
            projected_interest: full_term_interest(principal, terms.interest_rate_bps, duration_days)?,
            open_loans,
            within_limits,
            auto_approve_eligible: within_limits && self.auto_approve_eligible(score, principal),
        })
    }

    pub fn auto_approve_eligible(&self, score: u32, principal: Amount) -> bool {
        self.config.auto_approve_enabled
            && score >= self.config.min_reputation_for_auto_approve
            && principal <= self.config.max_auto_approve_amount
    }
}
