//! MarketplaceCoordinator - the single sequencing point of the engine
//!
//! Every mutating entry point takes the write lock for its whole duration and
//! never awaits anything else while holding it. Within the lock an entry point
//! validates, stages every change on copies (pool, loan, reputation record,
//! ledger batch), commits the ledger batch (the last fallible step), then
//! writes the staged copies back and journals the events. A failure anywhere
//! before the ledger commit leaves no trace.

use std::sync::Arc;

use agentlend_ledger::{AccountRef, EntryReason, LedgerBatch, LedgerEntry};
use agentlend_loans::Loan;
use agentlend_pool::{AgentPool, LiquidityPosition};
use agentlend_reputation::{ReputationRecord, ScoreChange};
use agentlend_types::{
    AgentId, Amount, BasisPoints, Clock, EventRecord, LenderId, LendingError, LendingEvent, LoanId,
    Outcome, ParameterChange, PoolId, Principal, Result, SystemClock, MAX_SCORE,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{IntegrityReport, LoanQuote, MarketState, ProtocolConfig, Role};

/// Coordinates reputation, policy, pools, loans and custody
#[derive(Clone)]
pub struct MarketplaceCoordinator {
    pub(crate) state: Arc<RwLock<MarketState>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl MarketplaceCoordinator {
    pub fn new(owner: Principal, config: ProtocolConfig) -> Result<Self> {
        Self::with_clock(owner, config, Arc::new(SystemClock))
    }

    pub fn with_clock(owner: Principal, config: ProtocolConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let state = MarketState::new(owner, config)?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            clock,
        })
    }

    // ========================================================================
    // Agents and reputation
    // ========================================================================

    pub async fn register_agent(&self, caller: &Principal, agent_id: &AgentId) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_agent(caller, agent_id, "register agent")?;
        if state.agents.contains_key(agent_id) {
            return Err(LendingError::AlreadyRegistered {
                agent_id: agent_id.to_string(),
            });
        }

        state.agents.insert(agent_id.clone(), now);
        let events = vec![LendingEvent::AgentRegistered {
            agent_id: agent_id.clone(),
            timestamp: now,
        }];
        state.publish(&events);
        info!(agent = %agent_id, "Agent registered");
        Ok(Outcome::new((), events))
    }

    pub async fn initialize_reputation(
        &self,
        caller: &Principal,
        agent_id: &AgentId,
    ) -> Result<Outcome<ReputationRecord>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_agent(caller, agent_id, "initialize reputation")?;
        state.ensure_registered(agent_id)?;

        let record = state.reputation.staged_initialize(agent_id, now)?;
        state.reputation.commit(record.clone());

        let events = vec![LendingEvent::ReputationInitialized {
            agent_id: agent_id.clone(),
            score: record.score,
            tier: record.tier(),
            timestamp: now,
        }];
        state.publish(&events);
        info!(agent = %agent_id, score = record.score, tier = %record.tier(), "Reputation initialized");
        Ok(Outcome::new(record, events))
    }

    // ========================================================================
    // Pools and liquidity
    // ========================================================================

    pub async fn create_pool(&self, caller: &Principal, agent_id: &AgentId) -> Result<Outcome<AgentPool>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.ensure_not_paused("create pool")?;
        state.access.require_agent(caller, agent_id, "create pool")?;
        state.ensure_registered(agent_id)?;

        let pool = state.pools.staged_create(agent_id, now)?;
        state.pools.commit(pool.clone());

        let events = vec![LendingEvent::PoolCreated {
            pool_id: agent_id.clone(),
            timestamp: now,
        }];
        state.publish(&events);
        info!(pool = %agent_id, "Pool created");
        Ok(Outcome::new(pool, events))
    }

    /// Move `amount` from the lender's wallet into the pool
    pub async fn supply_liquidity(
        &self,
        caller: &Principal,
        pool_id: &PoolId,
        lender_id: &LenderId,
        amount: Amount,
    ) -> Result<Outcome<LiquidityPosition>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();
        state.ensure_not_paused("supply liquidity")?;
        state.access.require_lender(caller, lender_id, "supply liquidity")?;

        let mut pool = state.checked_pool(pool_id)?;
        MarketState::ensure_pool_active(&pool)?;
        let position = pool.supply(lender_id, amount, now)?.clone();

        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::Lender(lender_id.clone()),
            AccountRef::PoolReserve(pool_id.clone()),
            amount,
            EntryReason::LiquiditySupply {
                pool_id: pool_id.clone(),
            },
        );
        state.ledger.commit(&batch, now)?;

        let total_liquidity = pool.total_liquidity;
        state.pools.commit(pool);

        let events = vec![LendingEvent::LiquiditySupplied {
            pool_id: pool_id.clone(),
            lender_id: lender_id.clone(),
            amount,
            position_amount: position.amount,
            total_liquidity,
            timestamp: now,
        }];
        state.publish(&events);
        info!(pool = %pool_id, lender = %lender_id, amount = %amount, "Liquidity supplied");
        Ok(Outcome::new(position, events))
    }

    /// Return up to `min(position, available)` to the lender's wallet
    ///
    /// Stays open while the protocol is paused or the pool is frozen.
    pub async fn withdraw_liquidity(
        &self,
        caller: &Principal,
        pool_id: &PoolId,
        lender_id: &LenderId,
        amount: Amount,
    ) -> Result<Outcome<LiquidityPosition>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();
        state.access.require_lender(caller, lender_id, "withdraw liquidity")?;

        let mut pool = state.checked_pool(pool_id)?;
        let position = pool.withdraw(lender_id, amount, now)?.clone();

        let mut batch = LedgerBatch::new();
        batch.push(
            AccountRef::PoolReserve(pool_id.clone()),
            AccountRef::Lender(lender_id.clone()),
            amount,
            EntryReason::LiquidityWithdrawal {
                pool_id: pool_id.clone(),
            },
        );
        state.ledger.commit(&batch, now)?;

        let total_liquidity = pool.total_liquidity;
        state.pools.commit(pool);

        let events = vec![LendingEvent::LiquidityWithdrawn {
            pool_id: pool_id.clone(),
            lender_id: lender_id.clone(),
            amount,
            position_amount: position.amount,
            total_liquidity,
            timestamp: now,
        }];
        state.publish(&events);
        info!(pool = %pool_id, lender = %lender_id, amount = %amount, "Liquidity withdrawn");
        Ok(Outcome::new(position, events))
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Recompute a pool's loaned/available split from the loan book
    ///
    /// Idempotent. Operators and the owner only.
    pub async fn reset_pool_accounting(&self, caller: &Principal, pool_id: &PoolId) -> Result<Outcome<AgentPool>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = self.clock.now();
        state.access.require_role(caller, Role::Operator, "reset pool accounting")?;

        let outstanding = state.loans.outstanding_principal(pool_id)?;
        let mut pool = state.pools.staged(pool_id)?;
        let (before, after) = pool.reset_accounting(outstanding, now)?;
        state.pools.commit(pool.clone());

        let events = vec![LendingEvent::PoolAccountingReset {
            pool_id: pool_id.clone(),
            operator: caller.clone(),
            before,
            after,
            timestamp: now,
        }];
        state.publish(&events);
        warn!(
            pool = %pool_id,
            operator = %caller,
            loaned_before = %before.total_loaned,
            loaned_after = %after.total_loaned,
            available_before = %before.available_liquidity,
            available_after = %after.available_liquidity,
            "Pool accounting reset"
        );
        Ok(Outcome::new(pool, events))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub async fn set_trusted_caller(&self, caller: &Principal, principal: Principal, trusted: bool) -> Result<Outcome<()>> {
        self.set_role(caller, principal, Role::TrustedCaller, trusted).await
    }

    pub async fn set_approver(&self, caller: &Principal, principal: Principal, enabled: bool) -> Result<Outcome<()>> {
        self.set_role(caller, principal, Role::Approver, enabled).await
    }

    pub async fn set_operator(&self, caller: &Principal, principal: Principal, enabled: bool) -> Result<Outcome<()>> {
        self.set_role(caller, principal, Role::Operator, enabled).await
    }

    async fn set_role(&self, caller: &Principal, principal: Principal, role: Role, enabled: bool) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "change roles")?;
        state.access.set_role(principal.clone(), role, enabled);

        let change = match role {
            Role::TrustedCaller => ParameterChange::TrustedCaller { principal, trusted: enabled },
            Role::Approver => ParameterChange::Approver { principal, enabled },
            Role::Operator => ParameterChange::Operator { principal, enabled },
        };
        Ok(parameters_updated(&mut state, caller, change, now))
    }

    /// Freeze or unfreeze new lending activity on a pool
    pub async fn authorize_pool(&self, caller: &Principal, pool_id: &PoolId, active: bool) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "authorize pool")?;

        let mut pool = state.pools.staged(pool_id)?;
        pool.is_active = active;
        pool.last_updated = now;
        state.pools.commit(pool);

        let change = ParameterChange::PoolAuthorization {
            pool_id: pool_id.clone(),
            active,
        };
        Ok(parameters_updated(&mut state, caller, change, now))
    }

    pub async fn set_auto_approve_parameters(
        &self,
        caller: &Principal,
        enabled: bool,
        min_reputation: u32,
        max_amount: Amount,
    ) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "set auto-approve parameters")?;
        if min_reputation > MAX_SCORE {
            return Err(LendingError::invalid_config(
                "min_reputation_for_auto_approve",
                format!("{} exceeds {}", min_reputation, MAX_SCORE),
            ));
        }

        state.config.auto_approve_enabled = enabled;
        state.config.min_reputation_for_auto_approve = min_reputation;
        state.config.max_auto_approve_amount = max_amount;

        let change = ParameterChange::AutoApprove {
            enabled,
            min_reputation,
            max_amount,
        };
        Ok(parameters_updated(&mut state, caller, change, now))
    }

    pub async fn set_platform_fee(&self, caller: &Principal, fee_bps: BasisPoints) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "set platform fee")?;
        if !fee_bps.is_fraction() {
            return Err(LendingError::invalid_config(
                "platform_fee_bps",
                format!("{} exceeds 100%", fee_bps),
            ));
        }

        state.config.platform_fee_bps = fee_bps;
        Ok(parameters_updated(&mut state, caller, ParameterChange::PlatformFee { fee_bps }, now))
    }

    pub async fn set_max_active_loans(&self, caller: &Principal, max_per_agent: u32) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "set max active loans")?;
        if max_per_agent == 0 {
            return Err(LendingError::invalid_config(
                "max_active_loans_per_agent",
                "must allow at least one loan",
            ));
        }

        state.config.max_active_loans_per_agent = max_per_agent;
        Ok(parameters_updated(
            &mut state,
            caller,
            ParameterChange::MaxActiveLoans { max_per_agent },
            now,
        ))
    }

    /// Halt pool creation, supply, loan requests and approvals
    pub async fn pause(&self, caller: &Principal) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "pause")?;
        state.paused = true;

        let events = vec![LendingEvent::ProtocolPaused {
            by: caller.clone(),
            timestamp: now,
        }];
        state.publish(&events);
        warn!(by = %caller, "Protocol paused");
        Ok(Outcome::new((), events))
    }

    pub async fn unpause(&self, caller: &Principal) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_owner(caller, "unpause")?;
        state.paused = false;

        let events = vec![LendingEvent::ProtocolUnpaused {
            by: caller.clone(),
            timestamp: now,
        }];
        state.publish(&events);
        info!(by = %caller, "Protocol unpaused");
        Ok(Outcome::new((), events))
    }

    // ========================================================================
    // Custody
    // ========================================================================

    /// Transfer value in to an agent or lender wallet; returns the new balance
    pub async fn deposit_funds(&self, caller: &Principal, account: AccountRef, amount: Amount) -> Result<Amount> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_account_holder(caller, &account, "deposit funds")?;
        let balance = state.ledger.deposit(account.clone(), amount, now)?;
        info!(account = %account, amount = %amount, balance = %balance, "Funds deposited");
        Ok(balance)
    }

    /// Transfer value out of an agent or lender wallet; returns the new balance
    pub async fn withdraw_funds(&self, caller: &Principal, account: AccountRef, amount: Amount) -> Result<Amount> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state.access.require_account_holder(caller, &account, "withdraw funds")?;
        let balance = state.ledger.withdraw(account.clone(), amount, now)?;
        info!(account = %account, amount = %amount, balance = %balance, "Funds withdrawn");
        Ok(balance)
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn get_position(&self, pool_id: &PoolId, lender_id: &LenderId) -> Result<LiquidityPosition> {
        let state = self.state.read().await;
        state
            .pools
            .get(pool_id)?
            .position(lender_id)
            .cloned()
            .ok_or_else(|| LendingError::PositionNotFound {
                pool_id: pool_id.to_string(),
                lender_id: lender_id.to_string(),
            })
    }

    pub async fn loans_for_borrower(&self, borrower_id: &AgentId) -> Vec<Loan> {
        let state = self.state.read().await;
        state.loans.loans_for_borrower(borrower_id).cloned().collect()
    }

    pub async fn get_reputation(&self, agent_id: &AgentId) -> Result<ReputationRecord> {
        let state = self.state.read().await;
        state.reputation.get(agent_id).cloned()
    }

    pub async fn quote_loan(&self, agent_id: &AgentId, principal: Amount, duration_days: u32) -> Result<LoanQuote> {
        let state = self.state.read().await;
        state.quote(agent_id, principal, duration_days)
    }

    pub async fn audit_pool(&self, pool_id: &PoolId) -> Result<IntegrityReport> {
        let state = self.state.read().await;
        let report = state.audit_pool(pool_id, self.clock.now());
        if let Err(e) = &report {
            warn!(pool = %pool_id, error = %e, "Pool audit failed");
        }
        report
    }

    pub async fn balance(&self, account: &AccountRef) -> Amount {
        self.state.read().await.ledger.balance(account)
    }

    /// Custody entries that reference a loan, in posting order
    pub async fn loan_entries(&self, loan_id: &LoanId) -> Vec<LedgerEntry> {
        self.state.read().await.ledger.loan_entries(loan_id)
    }

    pub async fn events_since(&self, sequence: u64) -> Vec<EventRecord> {
        self.state.read().await.events_since(sequence)
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }

    pub async fn config(&self) -> ProtocolConfig {
        self.state.read().await.config.clone()
    }
}

pub(crate) fn reputation_changed(agent_id: &AgentId, change: &ScoreChange, at: DateTime<Utc>) -> LendingEvent {
    LendingEvent::ReputationChanged {
        agent_id: agent_id.clone(),
        old_score: change.old_score,
        new_score: change.new_score,
        old_tier: change.old_tier,
        new_tier: change.new_tier,
        reason: change.reason,
        timestamp: at,
    }
}

fn parameters_updated(
    state: &mut MarketState,
    caller: &Principal,
    change: ParameterChange,
    at: DateTime<Utc>,
) -> Outcome<()> {
    info!(by = %caller, change = ?change, "Parameters updated");
    let events = vec![LendingEvent::ParametersUpdated {
        changed_by: caller.clone(),
        change,
        timestamp: at,
    }];
    state.publish(&events);
    Outcome::new((), events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LendingEngine;
    use agentlend_types::{ErrorCategory, ManualClock, OperatorId};

    struct Fixture {
        market: MarketplaceCoordinator,
        clock: ManualClock,
        owner: Principal,
        agent: AgentId,
        borrower: Principal,
        lender: LenderId,
    }

    /// Registered agent with a 2000-unit pool and 600 units in its wallet
    async fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let owner = Principal::operator(OperatorId::new());
        let market = MarketplaceCoordinator::with_clock(
            owner.clone(),
            ProtocolConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap();

        let agent = AgentId::new();
        let borrower = Principal::agent(agent.clone());
        market.register_agent(&borrower, &agent).await.unwrap();
        market.initialize_reputation(&borrower, &agent).await.unwrap();
        market.create_pool(&borrower, &agent).await.unwrap();

        let lender = LenderId::new();
        let lender_p = Principal::lender(lender.clone());
        market
            .deposit_funds(&lender_p, AccountRef::Lender(lender.clone()), Amount::units(2_000))
            .await
            .unwrap();
        market
            .supply_liquidity(&lender_p, &agent, &lender, Amount::units(2_000))
            .await
            .unwrap();
        market
            .deposit_funds(&borrower, AccountRef::Agent(agent.clone()), Amount::units(600))
            .await
            .unwrap();

        Fixture {
            market,
            clock,
            owner,
            agent,
            borrower,
            lender,
        }
    }

    #[tokio::test]
    async fn test_register_twice() {
        let f = fixture().await;
        let result = f.market.register_agent(&f.borrower, &f.agent).await;
        assert!(matches!(result, Err(LendingError::AlreadyRegistered { .. })));
    }

    #[tokio::test]
    async fn test_reset_repairs_drift_and_is_idempotent() {
        let f = fixture().await;
        f.market
            .request_loan(&f.borrower, &f.agent, Amount::units(1_000), 30)
            .await
            .unwrap();

        // Inject drift: loaned overstated by 50 units
        {
            let mut state = f.market.state.write().await;
            let mut pool = state.pools.staged(&f.agent).unwrap();
            pool.total_loaned = Amount::units(1_050);
            state.pools.commit(pool);
        }

        let lender_p = Principal::lender(f.lender.clone());
        let blocked = f
            .market
            .withdraw_liquidity(&lender_p, &f.agent, &f.lender, Amount::units(1))
            .await
            .unwrap_err();
        assert_eq!(blocked.category(), ErrorCategory::Integrity);
        assert!(f.market.audit_pool(&f.agent).await.is_err());

        let denied = f.market.reset_pool_accounting(&f.borrower, &f.agent).await;
        assert!(matches!(denied, Err(LendingError::Unauthorized { .. })));

        let operator = Principal::operator(OperatorId::new());
        f.market.set_operator(&f.owner, operator.clone(), true).await.unwrap();
        let first = f.market.reset_pool_accounting(&operator, &f.agent).await.unwrap();
        match &first.events[0] {
            LendingEvent::PoolAccountingReset { before, after, .. } => {
                assert_eq!(before.total_loaned, Amount::units(1_050));
                assert_eq!(after.total_loaned, Amount::units(1_000));
                assert_eq!(after.available_liquidity, Amount::units(1_000));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let second = f.market.reset_pool_accounting(&operator, &f.agent).await.unwrap();
        assert_eq!(second.value.snapshot(), first.value.snapshot());

        let report = f.market.audit_pool(&f.agent).await.unwrap();
        assert_eq!(report.outstanding_principal, Amount::units(1_000));
        f.market
            .withdraw_liquidity(&lender_p, &f.agent, &f.lender, Amount::units(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pause_blocks_new_credit_only() {
        let f = fixture().await;
        let loan = f
            .market
            .request_loan(&f.borrower, &f.agent, Amount::units(100), 7)
            .await
            .unwrap()
            .value;

        assert!(f.market.pause(&f.borrower).await.is_err());
        f.market.pause(&f.owner).await.unwrap();
        assert!(f.market.is_paused().await);

        let result = f
            .market
            .request_loan(&f.borrower, &f.agent, Amount::units(100), 7)
            .await;
        assert!(matches!(result, Err(LendingError::ProtocolPaused { .. })));

        f.clock.advance_days(1);
        let repaid = f.market.repay_loan(&f.borrower, &loan.loan_id).await.unwrap();
        assert_eq!(repaid.value.loan.state, agentlend_loans::LoanState::Repaid);

        f.market.unpause(&f.owner).await.unwrap();
        f.market
            .request_loan(&f.borrower, &f.agent, Amount::units(100), 7)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_admin_requires_owner() {
        let f = fixture().await;
        let stranger = Principal::operator(OperatorId::new());

        assert!(f.market.set_platform_fee(&stranger, BasisPoints(50)).await.is_err());
        assert!(f.market.set_max_active_loans(&stranger, 3).await.is_err());
        assert!(f.market.authorize_pool(&stranger, &f.agent, false).await.is_err());

        assert!(matches!(
            f.market.set_platform_fee(&f.owner, BasisPoints(10_001)).await,
            Err(LendingError::InvalidConfig { .. })
        ));
        f.market.set_platform_fee(&f.owner, BasisPoints(250)).await.unwrap();
        assert_eq!(f.market.config().await.platform_fee_bps, BasisPoints(250));
    }

    #[tokio::test]
    async fn test_frozen_pool_rejects_requests() {
        let f = fixture().await;
        f.market.authorize_pool(&f.owner, &f.agent, false).await.unwrap();

        let result = f
            .market
            .request_loan(&f.borrower, &f.agent, Amount::units(100), 7)
            .await;
        assert!(matches!(result, Err(LendingError::PoolInactive { .. })));

        let lender_p = Principal::lender(f.lender.clone());
        f.market
            .withdraw_liquidity(&lender_p, &f.agent, &f.lender, Amount::units(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_journal_follows_calls() {
        let f = fixture().await;
        let setup: Vec<&str> = f
            .market
            .events_since(0)
            .await
            .iter()
            .map(|r| r.event.kind())
            .collect();
        assert_eq!(
            setup,
            vec!["AgentRegistered", "ReputationInitialized", "PoolCreated", "LiquiditySupplied"]
        );

        let outcome = f
            .market
            .request_loan(&f.borrower, &f.agent, Amount::units(100), 7)
            .await
            .unwrap();
        assert_eq!(outcome.event_kinds(), vec!["LoanRequested", "LoanApproved"]);

        let tail = f.market.events_since(4).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 5);
    }

    #[tokio::test]
    async fn test_custody_only_by_holder() {
        let f = fixture().await;
        let lender_p = Principal::lender(f.lender.clone());
        let result = f
            .market
            .withdraw_funds(&lender_p, AccountRef::Agent(f.agent.clone()), Amount::units(1))
            .await;
        assert!(matches!(result, Err(LendingError::Unauthorized { .. })));

        let result = f
            .market
            .withdraw_funds(&f.borrower, AccountRef::Agent(f.agent.clone()), Amount::units(601))
            .await;
        assert!(matches!(result, Err(LendingError::InsufficientBalance { .. })));
    }
}
