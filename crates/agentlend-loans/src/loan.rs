//! Loan record and lifecycle transitions

use std::fmt;

use agentlend_types::{AgentId, Amount, BasisPoints, LendingError, LoanId, PoolId, Result, SECONDS_PER_DAY};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Longest term a loan may run
pub const MAX_LOAN_DURATION_DAYS: u32 = 36_500;

/// Lifecycle state of a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanState {
    /// Collateral locked and liquidity reserved, awaiting approval
    Requested,
    /// Principal disbursed to the borrower
    Active,
    Repaid,
    Defaulted,
    /// Withdrawn before approval
    Cancelled,
}

impl LoanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Repaid | Self::Defaulted | Self::Cancelled)
    }

    /// Still holds reserved pool liquidity
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Requested | Self::Active)
    }

    pub fn can_transition_to(&self, next: LoanState) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Active)
                | (Self::Requested, Self::Cancelled)
                | (Self::Active, Self::Repaid)
                | (Self::Active, Self::Defaulted)
        )
    }
}

impl fmt::Display for LoanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "REQUESTED",
            Self::Active => "ACTIVE",
            Self::Repaid => "REPAID",
            Self::Defaulted => "DEFAULTED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Priced terms of a new loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub borrower_id: AgentId,
    pub pool_id: PoolId,
    pub principal: Amount,
    pub collateral_amount: Amount,
    pub interest_rate_bps: BasisPoints,
    pub duration_days: u32,
    pub auto_approved: bool,
}

/// A loan drawn from an agent pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: LoanId,
    pub borrower_id: AgentId,
    pub pool_id: PoolId,
    pub principal: Amount,
    pub collateral_amount: Amount,
    /// Rate fixed at request time
    pub interest_rate_bps: BasisPoints,
    pub duration_days: u32,
    pub requested_at: DateTime<Utc>,
    /// Set on activation
    pub start_time: Option<DateTime<Utc>>,
    /// `start_time + duration_days`
    pub end_time: Option<DateTime<Utc>>,
    pub state: LoanState,
    pub auto_approved: bool,
    pub interest_paid: Amount,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn requested(request: LoanRequest, at: DateTime<Utc>) -> Self {
        Self {
            loan_id: LoanId::new(),
            borrower_id: request.borrower_id,
            pool_id: request.pool_id,
            principal: request.principal,
            collateral_amount: request.collateral_amount,
            interest_rate_bps: request.interest_rate_bps,
            duration_days: request.duration_days,
            requested_at: at,
            start_time: None,
            end_time: None,
            state: LoanState::Requested,
            auto_approved: request.auto_approved,
            interest_paid: Amount::zero(),
            settled_at: None,
        }
    }

    pub fn term_seconds(&self) -> u64 {
        self.duration_days as u64 * SECONDS_PER_DAY
    }

    /// Past its end time; a REQUESTED loan never is
    pub fn is_overdue(&self, at: DateTime<Utc>) -> bool {
        matches!(self.end_time, Some(end) if at > end)
    }

    /// Repayment at `at` counts as on time
    pub fn is_on_time(&self, at: DateTime<Utc>) -> bool {
        !self.is_overdue(at)
    }

    fn transition(&mut self, next: LoanState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(LendingError::InvalidState {
                loan_id: self.loan_id.to_string(),
                expected: expected_source(next).to_string(),
                actual: self.state.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// REQUESTED -> ACTIVE; the term starts now
    pub fn activate(&mut self, at: DateTime<Utc>) -> Result<()> {
        let end_time = Duration::try_days(i64::from(self.duration_days))
            .and_then(|term| at.checked_add_signed(term))
            .ok_or(LendingError::InvalidDuration {
                requested_days: self.duration_days,
                min_days: 1,
                max_days: MAX_LOAN_DURATION_DAYS,
            })?;
        self.transition(LoanState::Active)?;
        self.start_time = Some(at);
        self.end_time = Some(end_time);
        Ok(())
    }

    /// ACTIVE -> REPAID
    pub fn mark_repaid(&mut self, interest: Amount, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanState::Repaid)?;
        self.interest_paid = interest;
        self.settled_at = Some(at);
        Ok(())
    }

    /// ACTIVE -> DEFAULTED, only once the term has run out
    pub fn mark_defaulted(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.state == LoanState::Active && !self.is_overdue(at) {
            return Err(LendingError::LoanNotMatured {
                loan_id: self.loan_id.to_string(),
                end_time: self.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                now: at.to_rfc3339(),
            });
        }
        self.transition(LoanState::Defaulted)?;
        self.settled_at = Some(at);
        Ok(())
    }

    /// REQUESTED -> CANCELLED
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanState::Cancelled)?;
        self.settled_at = Some(at);
        Ok(())
    }
}

fn expected_source(next: LoanState) -> LoanState {
    match next {
        LoanState::Active | LoanState::Cancelled | LoanState::Requested => LoanState::Requested,
        LoanState::Repaid | LoanState::Defaulted => LoanState::Active,
    }
}
