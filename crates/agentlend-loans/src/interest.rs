//! Interest pricing

use agentlend_types::{Amount, BasisPoints, Result, BPS_DENOMINATOR, DAYS_PER_YEAR, SECONDS_PER_DAY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Loan;

const SECONDS_PER_YEAR: u128 = DAYS_PER_YEAR as u128 * SECONDS_PER_DAY as u128;

/// How much of the term a repayment is charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestAccrual {
    /// Seconds actually elapsed since disbursement, capped at the term
    #[default]
    Elapsed,
    /// Always the full scheduled term
    FullTerm,
}

impl InterestAccrual {
    /// Interest owed on `loan` if it is repaid at `at`
    ///
    /// Late repayment is never charged beyond the scheduled term.
    pub fn interest_due(&self, loan: &Loan, at: DateTime<Utc>) -> Result<Amount> {
        let term = loan.term_seconds();
        let seconds = match self {
            Self::FullTerm => term,
            Self::Elapsed => {
                let start = loan.start_time.unwrap_or(at);
                ((at - start).num_seconds().max(0) as u64).min(term)
            }
        };
        simple_interest(loan.principal, loan.interest_rate_bps, seconds)
    }
}

/// `principal * rate_bps * seconds / (10000 * 365 days)`, rounded down
pub fn simple_interest(principal: Amount, rate: BasisPoints, seconds: u64) -> Result<Amount> {
    let numerator = rate.value() as u128 * seconds as u128;
    principal.mul_div_floor(numerator, BPS_DENOMINATOR as u128 * SECONDS_PER_YEAR)
}

/// Interest for a whole term of `duration_days`
pub fn full_term_interest(principal: Amount, rate: BasisPoints, duration_days: u32) -> Result<Amount> {
    simple_interest(principal, rate, duration_days as u64 * SECONDS_PER_DAY)
}
