//! Structured event records
//!
//! Every mutating operation returns the events it produced. Delivery to
//! notification consumers is not the engine's concern; these records are the
//! complete contract.

use crate::{AgentId, Amount, BasisPoints, LenderId, LoanId, PoolId, Principal, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a reputation score moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReputationChangeReason {
    OnTimeRepayment,
    LateRepayment,
    Default,
}

/// Pool counters captured for before/after records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccountingSnapshot {
    pub total_liquidity: Amount,
    pub available_liquidity: Amount,
    pub total_loaned: Amount,
}

/// An administrative parameter change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "parameter")]
pub enum ParameterChange {
    AutoApprove {
        enabled: bool,
        min_reputation: u32,
        max_amount: Amount,
    },
    PlatformFee {
        fee_bps: BasisPoints,
    },
    MaxActiveLoans {
        max_per_agent: u32,
    },
    TrustedCaller {
        principal: Principal,
        trusted: bool,
    },
    Approver {
        principal: Principal,
        enabled: bool,
    },
    Operator {
        principal: Principal,
        enabled: bool,
    },
    PoolAuthorization {
        pool_id: PoolId,
        active: bool,
    },
}

/// Events emitted by the lending engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LendingEvent {
    AgentRegistered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    ReputationInitialized {
        agent_id: AgentId,
        score: u32,
        tier: Tier,
        timestamp: DateTime<Utc>,
    },

    ReputationChanged {
        agent_id: AgentId,
        old_score: u32,
        new_score: u32,
        old_tier: Tier,
        new_tier: Tier,
        reason: ReputationChangeReason,
        timestamp: DateTime<Utc>,
    },

    PoolCreated {
        pool_id: PoolId,
        timestamp: DateTime<Utc>,
    },

    LiquiditySupplied {
        pool_id: PoolId,
        lender_id: LenderId,
        amount: Amount,
        position_amount: Amount,
        total_liquidity: Amount,
        timestamp: DateTime<Utc>,
    },

    LiquidityWithdrawn {
        pool_id: PoolId,
        lender_id: LenderId,
        amount: Amount,
        position_amount: Amount,
        total_liquidity: Amount,
        timestamp: DateTime<Utc>,
    },

    LoanRequested {
        loan_id: LoanId,
        borrower_id: AgentId,
        pool_id: PoolId,
        principal: Amount,
        collateral: Amount,
        interest_rate_bps: BasisPoints,
        duration_days: u32,
        auto_approved: bool,
        timestamp: DateTime<Utc>,
    },

    LoanApproved {
        loan_id: LoanId,
        borrower_id: AgentId,
        pool_id: PoolId,
        principal: Amount,
        /// `None` when the loan was auto-approved
        approved_by: Option<Principal>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    LoanRepaid {
        loan_id: LoanId,
        borrower_id: AgentId,
        pool_id: PoolId,
        principal: Amount,
        interest: Amount,
        platform_fee: Amount,
        lender_interest: Amount,
        collateral_released: Amount,
        on_time: bool,
        timestamp: DateTime<Utc>,
    },

    LoanDefaulted {
        loan_id: LoanId,
        borrower_id: AgentId,
        pool_id: PoolId,
        principal: Amount,
        collateral_seized: Amount,
        realized_loss: Amount,
        liquidated_by: Principal,
        timestamp: DateTime<Utc>,
    },

    LoanCancelled {
        loan_id: LoanId,
        borrower_id: AgentId,
        pool_id: PoolId,
        principal: Amount,
        collateral_returned: Amount,
        cancelled_by: Principal,
        timestamp: DateTime<Utc>,
    },

    PoolAccountingReset {
        pool_id: PoolId,
        operator: Principal,
        before: PoolAccountingSnapshot,
        after: PoolAccountingSnapshot,
        timestamp: DateTime<Utc>,
    },

    ParametersUpdated {
        changed_by: Principal,
        change: ParameterChange,
        timestamp: DateTime<Utc>,
    },

    ProtocolPaused {
        by: Principal,
        timestamp: DateTime<Utc>,
    },

    ProtocolUnpaused {
        by: Principal,
        timestamp: DateTime<Utc>,
    },
}

impl LendingEvent {
    /// Stable name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentRegistered { .. } => "AgentRegistered",
            Self::ReputationInitialized { .. } => "ReputationInitialized",
            Self::ReputationChanged { .. } => "ReputationChanged",
            Self::PoolCreated { .. } => "PoolCreated",
            Self::LiquiditySupplied { .. } => "LiquiditySupplied",
            Self::LiquidityWithdrawn { .. } => "LiquidityWithdrawn",
            Self::LoanRequested { .. } => "LoanRequested",
            Self::LoanApproved { .. } => "LoanApproved",
            Self::LoanRepaid { .. } => "LoanRepaid",
            Self::LoanDefaulted { .. } => "LoanDefaulted",
            Self::LoanCancelled { .. } => "LoanCancelled",
            Self::PoolAccountingReset { .. } => "PoolAccountingReset",
            Self::ParametersUpdated { .. } => "ParametersUpdated",
            Self::ProtocolPaused { .. } => "ProtocolPaused",
            Self::ProtocolUnpaused { .. } => "ProtocolUnpaused",
        }
    }
}

/// An event with its position in the engine's journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub event: LendingEvent,
}

/// Result of a committed mutating call: its value and the events it emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<LendingEvent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, events: Vec<LendingEvent>) -> Self {
        Self { value, events }
    }

    /// Kinds of the emitted events, in emission order
    pub fn event_kinds(&self) -> Vec<&'static str> {
        self.events.iter().map(LendingEvent::kind).collect()
    }
}
