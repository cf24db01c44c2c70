//! LoanLedger - every loan, indexed by borrower and pool

use std::collections::HashMap;

use agentlend_types::{AgentId, Amount, LendingError, LoanId, PoolId, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::{Loan, LoanRequest, LoanState, MAX_LOAN_DURATION_DAYS};

/// Loan records keyed by id
///
/// `staged_*` methods return the next version of a loan without storing it;
/// [`LoanLedger::commit`] writes it back.
#[derive(Debug, Clone, Default)]
pub struct LoanLedger {
    loans: HashMap<LoanId, Loan>,
    by_borrower: HashMap<AgentId, Vec<LoanId>>,
    by_pool: HashMap<PoolId, Vec<LoanId>>,
}

impl LoanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, loan_id: &LoanId) -> Result<&Loan> {
        self.loans.get(loan_id).ok_or_else(|| LendingError::LoanNotFound {
            loan_id: loan_id.to_string(),
        })
    }

    pub fn loans_for_borrower(&self, borrower_id: &AgentId) -> impl Iterator<Item = &Loan> {
        self.by_borrower
            .get(borrower_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.loans.get(id))
    }

    pub fn loans_for_pool(&self, pool_id: &PoolId) -> impl Iterator<Item = &Loan> {
        self.by_pool
            .get(pool_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.loans.get(id))
    }

    /// Borrower's loans in `state`
    pub fn count_in_state(&self, borrower_id: &AgentId, state: LoanState) -> u32 {
        self.loans_for_borrower(borrower_id)
            .filter(|l| l.state == state)
            .count() as u32
    }

    /// Borrower's REQUESTED plus ACTIVE loans
    pub fn open_loan_count(&self, borrower_id: &AgentId) -> u32 {
        self.loans_for_borrower(borrower_id)
            .filter(|l| l.state.is_open())
            .count() as u32
    }

    /// Principal the borrower owes or has pending, across REQUESTED and ACTIVE loans
    pub fn borrower_exposure(&self, borrower_id: &AgentId) -> Result<Amount> {
        self.loans_for_borrower(borrower_id)
            .filter(|l| l.state.is_open())
            .try_fold(Amount::zero(), |acc, l| acc.checked_add(l.principal))
    }

    /// Principal of every REQUESTED or ACTIVE loan drawn on `pool_id`
    pub fn outstanding_principal(&self, pool_id: &PoolId) -> Result<Amount> {
        self.loans_for_pool(pool_id)
            .filter(|l| l.state.is_open())
            .try_fold(Amount::zero(), |acc, l| acc.checked_add(l.principal))
    }

    /// Principal reserved by loans still awaiting approval
    pub fn requested_principal(&self, pool_id: &PoolId) -> Result<Amount> {
        self.loans_for_pool(pool_id)
            .filter(|l| l.state == LoanState::Requested)
            .try_fold(Amount::zero(), |acc, l| acc.checked_add(l.principal))
    }

    pub fn staged_request(&self, request: LoanRequest, at: DateTime<Utc>) -> Result<Loan> {
        if request.principal.is_zero() {
            return Err(LendingError::invalid_amount("principal", "must be greater than zero"));
        }
        if request.duration_days == 0 || request.duration_days > MAX_LOAN_DURATION_DAYS {
            return Err(LendingError::InvalidDuration {
                requested_days: request.duration_days,
                min_days: 1,
                max_days: MAX_LOAN_DURATION_DAYS,
            });
        }
        Ok(Loan::requested(request, at))
    }

    pub fn staged_activate(&self, loan_id: &LoanId, at: DateTime<Utc>) -> Result<Loan> {
        let mut loan = self.get(loan_id)?.clone();
        loan.activate(at)?;
        Ok(loan)
    }

    pub fn staged_repay(&self, loan_id: &LoanId, interest: Amount, at: DateTime<Utc>) -> Result<Loan> {
        let mut loan = self.get(loan_id)?.clone();
        loan.mark_repaid(interest, at)?;
        Ok(loan)
    }

    pub fn staged_default(&self, loan_id: &LoanId, at: DateTime<Utc>) -> Result<Loan> {
        let mut loan = self.get(loan_id)?.clone();
        loan.mark_defaulted(at)?;
        Ok(loan)
    }

    pub fn staged_cancel(&self, loan_id: &LoanId, at: DateTime<Utc>) -> Result<Loan> {
        let mut loan = self.get(loan_id)?.clone();
        loan.cancel(at)?;
        Ok(loan)
    }

    /// Store a loan version, indexing it on first insert
    pub fn commit(&mut self, loan: Loan) {
        if !self.loans.contains_key(&loan.loan_id) {
            self.by_borrower
                .entry(loan.borrower_id.clone())
                .or_default()
                .push(loan.loan_id.clone());
            self.by_pool
                .entry(loan.pool_id.clone())
                .or_default()
                .push(loan.loan_id.clone());
        }
        info!(loan = %loan.loan_id, borrower = %loan.borrower_id, state = %loan.state, "Loan committed");
        self.loans.insert(loan.loan_id.clone(), loan);
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlend_types::BasisPoints;
    use chrono::Duration;

    fn request_for(agent: &AgentId, units: u64) -> LoanRequest {
        LoanRequest {
            borrower_id: agent.clone(),
            pool_id: agent.clone(),
            principal: Amount::units(units),
            collateral_amount: Amount::zero(),
            interest_rate_bps: BasisPoints(500),
            duration_days: 10,
            auto_approved: false,
        }
    }

    #[test]
    fn test_staged_request_not_stored() {
        let ledger = LoanLedger::new();
        let agent = AgentId::new();
        let loan = ledger.staged_request(request_for(&agent, 10), Utc::now()).unwrap();
        assert!(ledger.get(&loan.loan_id).is_err());
        assert_eq!(ledger.open_loan_count(&agent), 0);
    }

    #[test]
    fn test_zero_principal_and_duration_rejected() {
        let ledger = LoanLedger::new();
        let agent = AgentId::new();
        assert!(matches!(
            ledger.staged_request(request_for(&agent, 0), Utc::now()),
            Err(LendingError::InvalidAmount { .. })
        ));

        let mut request = request_for(&agent, 1);
        request.duration_days = 0;
        assert!(matches!(
            ledger.staged_request(request, Utc::now()),
            Err(LendingError::InvalidDuration { .. })
        ));

        let mut request = request_for(&agent, 1);
        request.duration_days = MAX_LOAN_DURATION_DAYS + 1;
        assert!(matches!(
            ledger.staged_request(request, Utc::now()),
            Err(LendingError::InvalidDuration { max_days: MAX_LOAN_DURATION_DAYS, .. })
        ));
    }

    #[test]
    fn test_outstanding_principal_tracks_open_loans() {
        let mut ledger = LoanLedger::new();
        let agent = AgentId::new();
        let now = Utc::now();

        let first = ledger.staged_request(request_for(&agent, 100), now).unwrap();
        let second = ledger.staged_request(request_for(&agent, 40), now).unwrap();
        ledger.commit(first.clone());
        ledger.commit(second.clone());
        assert_eq!(ledger.outstanding_principal(&agent).unwrap(), Amount::units(140));
        assert_eq!(ledger.requested_principal(&agent).unwrap(), Amount::units(140));

        ledger.commit(ledger.staged_activate(&first.loan_id, now).unwrap());
        assert_eq!(ledger.requested_principal(&agent).unwrap(), Amount::units(40));
        assert_eq!(ledger.count_in_state(&agent, LoanState::Active), 1);

        ledger.commit(ledger.staged_cancel(&second.loan_id, now).unwrap());
        ledger.commit(
            ledger
                .staged_repay(&first.loan_id, Amount::units(1), now + Duration::days(1))
                .unwrap(),
        );
        assert_eq!(ledger.outstanding_principal(&agent).unwrap(), Amount::zero());
        assert_eq!(ledger.open_loan_count(&agent), 0);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_borrower_exposure_counts_only_own_open_loans() {
        let mut ledger = LoanLedger::new();
        let agent = AgentId::new();
        let other = AgentId::new();
        let now = Utc::now();

        let active = ledger.staged_request(request_for(&agent, 300), now).unwrap();
        ledger.commit(active.clone());
        ledger.commit(ledger.staged_activate(&active.loan_id, now).unwrap());
        ledger.commit(ledger.staged_request(request_for(&agent, 200), now).unwrap());
        let cancelled = ledger.staged_request(request_for(&agent, 1_000), now).unwrap();
        ledger.commit(cancelled.clone());
        ledger.commit(ledger.staged_cancel(&cancelled.loan_id, now).unwrap());
        ledger.commit(ledger.staged_request(request_for(&other, 50), now).unwrap());

        assert_eq!(ledger.borrower_exposure(&agent).unwrap(), Amount::units(500));
        assert_eq!(ledger.borrower_exposure(&other).unwrap(), Amount::units(50));
        assert_eq!(ledger.borrower_exposure(&AgentId::new()).unwrap(), Amount::zero());
    }

    #[test]
    fn test_terminal_loan_is_frozen() {
        let mut ledger = LoanLedger::new();
        let agent = AgentId::new();
        let now = Utc::now();
        let loan = ledger.staged_request(request_for(&agent, 5), now).unwrap();
        let loan_id = loan.loan_id.clone();
        ledger.commit(loan);
        ledger.commit(ledger.staged_activate(&loan_id, now).unwrap());
        ledger.commit(ledger.staged_default(&loan_id, now + Duration::days(11)).unwrap());

        for result in [
            ledger.staged_activate(&loan_id, now),
            ledger.staged_repay(&loan_id, Amount::zero(), now),
            ledger.staged_cancel(&loan_id, now),
        ] {
            assert!(matches!(result, Err(LendingError::InvalidState { .. })));
        }
    }

    #[test]
    fn test_unknown_loan() {
        let ledger = LoanLedger::new();
        assert!(matches!(
            ledger.staged_activate(&LoanId::new(), Utc::now()),
            Err(LendingError::LoanNotFound { .. })
        ));
    }
}
