//! Loan lifecycle engine
//!
//! [`LendingEngine`] is the lifecycle surface (request, approve, repay,
//! liquidate, cancel and the two aggregate views). [`MarketplaceCoordinator`]
//! is the in-memory implementation.

use agentlend_ledger::{AccountRef, EntryReason, LedgerBatch};
use agentlend_loans::{Loan, LoanRequest, LoanState};
use agentlend_pool::{AgentPool, DefaultSettlement};
use agentlend_reputation::ScoreChange;
use agentlend_types::{
    AgentId, Amount, LendingError, LendingEvent, LoanId, Outcome, PoolId, Principal, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coordinator::reputation_changed;
use crate::{MarketState, MarketplaceCoordinator, Role};

/// What a repayment settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentReceipt {
    pub loan: Loan,
    pub interest: Amount,
    pub platform_fee: Amount,
    pub lender_interest: Amount,
    pub on_time: bool,
    pub score_change: ScoreChange,
}

/// What a liquidation settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultReceipt {
    pub loan: Loan,
    pub settlement: DefaultSettlement,
    pub score_change: ScoreChange,
}

/// Loan lifecycle operations
#[async_trait]
pub trait LendingEngine: Send + Sync {
    /// Price, collateralize and reserve a loan; auto-approved loans are
    /// disbursed in the same call
    async fn request_loan(
        &self,
        caller: &Principal,
        agent_id: &AgentId,
        amount: Amount,
        duration_days: u32,
    ) -> Result<Outcome<Loan>>;

    /// REQUESTED -> ACTIVE by an approver; disburses the principal
    async fn approve_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<Loan>>;

    /// ACTIVE -> REPAID; collects principal plus interest, releases collateral
    async fn repay_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<RepaymentReceipt>>;

    /// ACTIVE -> DEFAULTED once the end time has passed; seizes collateral
    async fn liquidate_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<DefaultReceipt>>;

    /// REQUESTED -> CANCELLED; releases the reservation and the collateral
    async fn cancel_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<Loan>>;

    async fn get_agent_pool(&self, pool_id: &PoolId) -> Result<AgentPool>;

    async fn get_loan(&self, loan_id: &LoanId) -> Result<Loan>;
}

#[async_trait]
impl LendingEngine for MarketplaceCoordinator {
    async fn request_loan(
        &self,
        caller: &Principal,
        agent_id: &AgentId,
        amount: Amount,
        duration_days: u32,
    ) -> Result<Outcome<Loan>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();

        // Validate
        state.ensure_not_paused("request loan")?;
        state.access.require_agent(caller, agent_id, "request loan")?;
        state.ensure_registered(agent_id)?;
        if amount.is_zero() {
            return Err(LendingError::invalid_amount("amount", "must be greater than zero"));
        }
        state.config.check_duration(duration_days)?;

        let score = state.reputation.get_score(agent_id)?;
        let mut pool = state.checked_pool(agent_id)?;
        MarketState::ensure_pool_active(&pool)?;

        let terms = state.policy.terms(score);
        let outstanding = state.loans.borrower_exposure(agent_id)?;
        if outstanding.checked_add(amount)? > terms.credit_limit {
            return Err(LendingError::CreditLimitExceeded {
                requested: amount,
                outstanding,
                limit: terms.credit_limit,
            });
        }
        if amount > pool.available_liquidity {
            return Err(LendingError::InsufficientAvailable {
                requested: amount,
                available: pool.available_liquidity,
            });
        }
        let open = state.loans.open_loan_count(agent_id);
        let max = state.config.max_active_loans_per_agent;
        if open >= max {
            return Err(LendingError::TooManyActiveLoans {
                agent_id: agent_id.to_string(),
                open,
                max,
            });
        }

        let collateral = terms.collateral_for(amount)?;
        let auto_approved = state.auto_approve_eligible(score, amount);
        debug!(
            agent = %agent_id,
            score,
            tier = %terms.tier,
            rate = %terms.interest_rate_bps,
            collateral = %collateral,
            auto_approved,
            "Loan priced"
        );

        let mut loan = state.loans.staged_request(
            LoanRequest {
                borrower_id: agent_id.clone(),
                pool_id: agent_id.clone(),
                principal: amount,
                collateral_amount: collateral,
                interest_rate_bps: terms.interest_rate_bps,
                duration_days,
                auto_approved,
            },
            now,
        )?;

        // Pull collateral, reserve, flip state, disburse
        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::Agent(agent_id.clone()),
            AccountRef::PoolCollateral(agent_id.clone()),
            collateral,
            EntryReason::CollateralLock {
                loan_id: loan.loan_id.clone(),
            },
        );
        pool.reserve_for_loan(amount, now)?;

        let mut borrower = None;
        if auto_approved {
            loan.activate(now)?;
            batch.push(
                AccountRef::PoolReserve(agent_id.clone()),
                AccountRef::Agent(agent_id.clone()),
                amount,
                EntryReason::Disbursement {
                    loan_id: loan.loan_id.clone(),
                },
            );
            borrower = Some(state.reputation.staged_borrow(agent_id, amount, now)?);
        }

        // Commit
        state.ledger.commit(&batch, now)?;
        state.pools.commit(pool);
        state.loans.commit(loan.clone());
        if let Some(record) = borrower {
            state.reputation.commit(record);
        }

        let mut events = vec![LendingEvent::LoanRequested {
            loan_id: loan.loan_id.clone(),
            borrower_id: agent_id.clone(),
            pool_id: agent_id.clone(),
            principal: amount,
            collateral,
            interest_rate_bps: loan.interest_rate_bps,
            duration_days,
            auto_approved,
            timestamp: now,
        }];
        if let (Some(start_time), Some(end_time)) = (loan.start_time, loan.end_time) {
            events.push(LendingEvent::LoanApproved {
                loan_id: loan.loan_id.clone(),
                borrower_id: agent_id.clone(),
                pool_id: agent_id.clone(),
                principal: amount,
                approved_by: None,
                start_time,
                end_time,
                timestamp: now,
            });
        }
        state.publish(&events);
        info!(
            loan = %loan.loan_id,
            agent = %agent_id,
            amount = %amount,
            state = %loan.state,
            "Loan requested"
        );
        Ok(Outcome::new(loan, events))
    }

    async fn approve_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<Loan>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();

        state.ensure_not_paused("approve loan")?;
        state.access.require_role(caller, Role::Approver, "approve loan")?;

        let loan = state.loans.staged_activate(loan_id, now)?;
        let pool = state.checked_pool(&loan.pool_id)?;
        MarketState::ensure_pool_active(&pool)?;

        let active = state.loans.count_in_state(&loan.borrower_id, LoanState::Active);
        let max = state.config.max_active_loans_per_agent;
        if active >= max {
            return Err(LendingError::TooManyActiveLoans {
                agent_id: loan.borrower_id.to_string(),
                open: active,
                max,
            });
        }

        // The reservation was made at request time
        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::PoolReserve(loan.pool_id.clone()),
            AccountRef::Agent(loan.borrower_id.clone()),
            loan.principal,
            EntryReason::Disbursement {
                loan_id: loan.loan_id.clone(),
            },
        );
        let borrower = state
            .reputation
            .staged_borrow(&loan.borrower_id, loan.principal, now)?;

        state.ledger.commit(&batch, now)?;
        state.loans.commit(loan.clone());
        state.reputation.commit(borrower);

        let (start_time, end_time) = (loan.start_time.unwrap_or(now), loan.end_time.unwrap_or(now));
        let events = vec![LendingEvent::LoanApproved {
            loan_id: loan.loan_id.clone(),
            borrower_id: loan.borrower_id.clone(),
            pool_id: loan.pool_id.clone(),
            principal: loan.principal,
            approved_by: Some(caller.clone()),
            start_time,
            end_time,
            timestamp: now,
        }];
        state.publish(&events);
        info!(loan = %loan.loan_id, approver = %caller, amount = %loan.principal, "Loan approved");
        Ok(Outcome::new(loan, events))
    }

    async fn repay_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<RepaymentReceipt>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();

        let current = state.loans.get(loan_id)?.clone();
        state.access.require_agent(caller, &current.borrower_id, "repay loan")?;

        let interest = state.config.interest_accrual.interest_due(&current, now)?;
        let loan = state.loans.staged_repay(loan_id, interest, now)?;
        let on_time = current.is_on_time(now);

        let mut pool = state.checked_pool(&loan.pool_id)?;
        let split = pool.settle_repayment(
            loan.principal,
            interest,
            state.config.platform_fee_bps,
            state.config.interest_distribution,
            now,
        )?;
        let amount_due = loan.principal.checked_add(interest)?;

        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::Agent(loan.borrower_id.clone()),
            AccountRef::PoolReserve(loan.pool_id.clone()),
            amount_due,
            EntryReason::Repayment {
                loan_id: loan.loan_id.clone(),
            },
        );
        batch.push(
            AccountRef::PoolReserve(loan.pool_id.clone()),
            AccountRef::Treasury,
            split.platform_fee,
            EntryReason::PlatformFee {
                loan_id: loan.loan_id.clone(),
            },
        );
        batch.push(
            AccountRef::PoolCollateral(loan.pool_id.clone()),
            AccountRef::Agent(loan.borrower_id.clone()),
            loan.collateral_amount,
            EntryReason::CollateralRelease {
                loan_id: loan.loan_id.clone(),
            },
        );
        let (record, score_change) =
            state
                .reputation
                .staged_repayment(&loan.borrower_id, amount_due, on_time, now)?;

        state.ledger.commit(&batch, now)?;
        state.pools.commit(pool);
        state.loans.commit(loan.clone());
        state.reputation.commit(record);

        let events = vec![
            LendingEvent::LoanRepaid {
                loan_id: loan.loan_id.clone(),
                borrower_id: loan.borrower_id.clone(),
                pool_id: loan.pool_id.clone(),
                principal: loan.principal,
                interest,
                platform_fee: split.platform_fee,
                lender_interest: split.lender_interest,
                collateral_released: loan.collateral_amount,
                on_time,
                timestamp: now,
            },
            reputation_changed(&loan.borrower_id, &score_change, now),
        ];
        state.publish(&events);
        info!(
            loan = %loan.loan_id,
            interest = %interest,
            fee = %split.platform_fee,
            on_time,
            score = score_change.new_score,
            "Loan repaid"
        );

        let receipt = RepaymentReceipt {
            loan,
            interest,
            platform_fee: split.platform_fee,
            lender_interest: split.lender_interest,
            on_time,
            score_change,
        };
        Ok(Outcome::new(receipt, events))
    }

    /// Open to any caller once the term has run out
    async fn liquidate_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<DefaultReceipt>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();

        let loan = state.loans.staged_default(loan_id, now)?;
        let mut pool = state.checked_pool(&loan.pool_id)?;
        let settlement = pool.settle_default(loan.principal, loan.collateral_amount, now)?;

        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::PoolCollateral(loan.pool_id.clone()),
            AccountRef::PoolReserve(loan.pool_id.clone()),
            loan.collateral_amount,
            EntryReason::CollateralSeizure {
                loan_id: loan.loan_id.clone(),
            },
        );
        let (record, score_change) = state.reputation.staged_default(&loan.borrower_id, now)?;

        state.ledger.commit(&batch, now)?;
        state.pools.commit(pool);
        state.loans.commit(loan.clone());
        state.reputation.commit(record);

        let events = vec![
            LendingEvent::LoanDefaulted {
                loan_id: loan.loan_id.clone(),
                borrower_id: loan.borrower_id.clone(),
                pool_id: loan.pool_id.clone(),
                principal: loan.principal,
                collateral_seized: loan.collateral_amount,
                realized_loss: settlement.realized_loss,
                liquidated_by: caller.clone(),
                timestamp: now,
            },
            reputation_changed(&loan.borrower_id, &score_change, now),
        ];
        state.publish(&events);
        warn!(
            loan = %loan.loan_id,
            borrower = %loan.borrower_id,
            collateral = %loan.collateral_amount,
            loss = %settlement.realized_loss,
            "Loan defaulted"
        );

        let receipt = DefaultReceipt {
            loan,
            settlement,
            score_change,
        };
        Ok(Outcome::new(receipt, events))
    }

    async fn cancel_loan(&self, caller: &Principal, loan_id: &LoanId) -> Result<Outcome<Loan>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();

        let current = state.loans.get(loan_id)?;
        let borrower_side = caller.is_agent(&current.borrower_id)
            || state.access.has_role(caller, Role::TrustedCaller);
        if !borrower_side {
            state.access.require_role(caller, Role::Approver, "cancel loan")?;
        }

        let loan = state.loans.staged_cancel(loan_id, now)?;
        let mut pool = state.checked_pool(&loan.pool_id)?;
        pool.release_reservation(loan.principal, now)?;

        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::PoolCollateral(loan.pool_id.clone()),
            AccountRef::Agent(loan.borrower_id.clone()),
            loan.collateral_amount,
            EntryReason::CollateralRelease {
                loan_id: loan.loan_id.clone(),
            },
        );

        state.ledger.commit(&batch, now)?;
        state.pools.commit(pool);
        state.loans.commit(loan.clone());

        let events = vec![LendingEvent::LoanCancelled {
            loan_id: loan.loan_id.clone(),
            borrower_id: loan.borrower_id.clone(),
            pool_id: loan.pool_id.clone(),
            principal: loan.principal,
            collateral_returned: loan.collateral_amount,
            cancelled_by: caller.clone(),
            timestamp: now,
        }];
        state.publish(&events);
        info!(loan = %loan.loan_id, by = %caller, "Loan cancelled");
        Ok(Outcome::new(loan, events))
    }

    async fn get_agent_pool(&self, pool_id: &PoolId) -> Result<AgentPool> {
        let state = self.state.read().await;
        state.pools.get(pool_id).cloned()
    }

    async fn get_loan(&self, loan_id: &LoanId) -> Result<Loan> {
        let state = self.state.read().await;
        state.loans.get(loan_id).cloned()
    }
}
