//! MarketState - every store the coordinator sequences

use std::collections::{HashMap, VecDeque};

use agentlend_ledger::{AccountRef, ValueLedger};
use agentlend_loans::LoanLedger;
use agentlend_policy::CreditPolicyEngine;
use agentlend_pool::{AgentPool, PoolBook};
use agentlend_reputation::ReputationStore;
use agentlend_types::{
    AgentId, Amount, EventRecord, LendingError, LendingEvent, PoolAccountingSnapshot, PoolId,
    Principal, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AccessControl, ProtocolConfig};

/// Result of a successful pool audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub pool_id: PoolId,
    pub accounting: PoolAccountingSnapshot,
    /// Principal of REQUESTED and ACTIVE loans on the pool
    pub outstanding_principal: Amount,
    pub positions_total: Amount,
    /// Custody balance of the pool reserve account
    pub reserve_balance: Amount,
    pub collateral_balance: Amount,
    pub checked_at: DateTime<Utc>,
}

/// All engine state, owned in one place
#[derive(Debug)]
pub struct MarketState {
    pub(crate) config: ProtocolConfig,
    pub(crate) access: AccessControl,
    pub(crate) paused: bool,
    pub(crate) agents: HashMap<AgentId, DateTime<Utc>>,
    pub(crate) reputation: ReputationStore,
    pub(crate) policy: CreditPolicyEngine,
    pub(crate) pools: PoolBook,
    pub(crate) loans: LoanLedger,
    pub(crate) ledger: ValueLedger,
    journal: VecDeque<EventRecord>,
    last_sequence: u64,
}

impl MarketState {
    pub fn new(owner: Principal, config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reputation: ReputationStore::new(config.reputation),
            policy: CreditPolicyEngine::new(config.tiers.clone())?,
            config,
            access: AccessControl::new(owner),
            paused: false,
            agents: HashMap::new(),
            pools: PoolBook::new(),
            loans: LoanLedger::new(),
            ledger: ValueLedger::new(),
            journal: VecDeque::new(),
            last_sequence: 0,
        })
    }

    pub fn ensure_not_paused(&self, operation: &str) -> Result<()> {
        if self.paused {
            return Err(LendingError::ProtocolPaused {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    pub fn ensure_registered(&self, agent_id: &AgentId) -> Result<()> {
        if !self.agents.contains_key(agent_id) {
            return Err(LendingError::NotRegistered {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(())
    }

    /// Working copy of a pool whose accounting still balances
    pub fn checked_pool(&self, pool_id: &PoolId) -> Result<AgentPool> {
        let pool = self.pools.staged(pool_id)?;
        if let Err(e) = pool.check_balanced() {
            warn!(pool = %pool_id, error = %e, "Pool accounting drift, refusing mutation");
            return Err(e);
        }
        Ok(pool)
    }

    pub fn ensure_pool_active(pool: &AgentPool) -> Result<()> {
        if !pool.is_active {
            return Err(LendingError::PoolInactive {
                pool_id: pool.agent_id.to_string(),
            });
        }
        Ok(())
    }

    /// Compare a pool's counters with the loan book and custody balances
    pub fn audit_pool(&self, pool_id: &PoolId, at: DateTime<Utc>) -> Result<IntegrityReport> {
        let pool = self.pools.get(pool_id)?;
        pool.check_invariants()?;

        let violation = |invariant: &str, expected: Amount, observed: Amount| LendingError::IntegrityViolation {
            pool_id: pool_id.to_string(),
            invariant: invariant.to_string(),
            expected,
            observed,
        };

        let outstanding = self.loans.outstanding_principal(pool_id)?;
        if pool.total_loaned != outstanding {
            return Err(violation(
                "total_loaned == outstanding loan principal",
                outstanding,
                pool.total_loaned,
            ));
        }

        let reserve_balance = self.ledger.balance(&AccountRef::PoolReserve(pool_id.clone()));
        let expected_reserve = pool
            .available_liquidity
            .checked_add(self.loans.requested_principal(pool_id)?)?;
        if reserve_balance != expected_reserve {
            return Err(violation(
                "reserve balance == available_liquidity + requested principal",
                expected_reserve,
                reserve_balance,
            ));
        }

        Ok(IntegrityReport {
            pool_id: pool_id.clone(),
            accounting: pool.snapshot(),
            outstanding_principal: outstanding,
            positions_total: pool.positions_total(),
            reserve_balance,
            collateral_balance: self.ledger.balance(&AccountRef::PoolCollateral(pool_id.clone())),
            checked_at: at,
        })
    }

    /// Append events to the journal, numbering them from 1
    ///
    /// Only the newest `journal_retention` records are kept. Delivery layers
    /// are expected to poll [`MarketState::events_since`] often enough to see
    /// every record before it ages out; sequence numbers never restart.
    pub fn publish(&mut self, events: &[LendingEvent]) {
        for event in events {
            self.last_sequence += 1;
            self.journal.push_back(EventRecord {
                sequence: self.last_sequence,
                event: event.clone(),
            });
        }
        let excess = self.journal.len().saturating_sub(self.config.journal_retention);
        if excess > 0 {
            self.journal.drain(..excess);
            debug!(dropped = excess, last_sequence = self.last_sequence, "Journal trimmed");
        }
    }

    /// Retained journal records with a sequence number above `sequence`
    pub fn events_since(&self, sequence: u64) -> Vec<EventRecord> {
        self.journal
            .iter()
            .skip_while(|record| record.sequence <= sequence)
            .cloned()
            .collect()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlend_types::OperatorId;

    fn state() -> MarketState {
        MarketState::new(Principal::operator(OperatorId::new()), ProtocolConfig::default()).unwrap()
    }

    #[test]
    fn test_journal_sequence() {
        let mut state = state();
        let events: Vec<LendingEvent> = (0..3)
            .map(|_| LendingEvent::AgentRegistered {
                agent_id: AgentId::new(),
                timestamp: Utc::now(),
            })
            .collect();
        state.publish(&events);

        assert_eq!(state.last_sequence(), 3);
        let tail = state.events_since(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 2);
        assert!(state.events_since(10).is_empty());
    }

    #[test]
    fn test_journal_keeps_newest_records() {
        let config = ProtocolConfig {
            journal_retention: 2,
            ..Default::default()
        };
        let mut state = MarketState::new(Principal::operator(OperatorId::new()), config).unwrap();
        let events: Vec<LendingEvent> = (0..5)
            .map(|_| LendingEvent::AgentRegistered {
                agent_id: AgentId::new(),
                timestamp: Utc::now(),
            })
            .collect();
        state.publish(&events[..3]);
        state.publish(&events[3..]);

        assert_eq!(state.last_sequence(), 5);
        let all: Vec<u64> = state.events_since(0).iter().map(|r| r.sequence).collect();
        assert_eq!(all, vec![4, 5]);
        assert_eq!(state.events_since(4).len(), 1);
        assert!(state.events_since(5).is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ProtocolConfig {
            max_active_loans_per_agent: 0,
            ..Default::default()
        };
        assert!(MarketState::new(Principal::operator(OperatorId::new()), config).is_err());
    }

    #[test]
    fn test_paused_and_registration_guards() {
        let mut state = state();
        state.paused = true;
        assert!(matches!(
            state.ensure_not_paused("request_loan"),
            Err(LendingError::ProtocolPaused { .. })
        ));
        assert!(matches!(
            state.ensure_registered(&AgentId::new()),
            Err(LendingError::NotRegistered { .. })
        ));
    }
}
