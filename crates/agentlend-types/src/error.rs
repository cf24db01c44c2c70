//! Error types for agentlend
//!
//! Every failure is explicit and carries the expected and observed values, so
//! tooling outside the engine can render a precise cause. Nothing here is ever
//! retried internally.

use crate::Amount;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for agentlend operations
pub type Result<T> = std::result::Result<T, LendingError>;

/// The five failure classes every error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed input: zero amount, zero duration, unknown agent
    Validation,
    /// Exceeds credit limit, pool liquidity, balance or the concurrent-loan cap
    Capacity,
    /// Operation not valid for the entity's current state
    State,
    /// Caller lacks the required role
    Authorization,
    /// A ledger invariant was observed violated
    Integrity,
}

/// agentlend error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    // ========================================================================
    // Validation Errors
    // ========================================================================

    #[error("Invalid amount for {field}: {reason}")]
    InvalidAmount { field: String, reason: String },

    #[error("Invalid duration: {requested_days} days (allowed {min_days}..={max_days})")]
    InvalidDuration {
        requested_days: u32,
        min_days: u32,
        max_days: u32,
    },

    #[error("Agent {agent_id} is not registered")]
    NotRegistered { agent_id: String },

    #[error("No reputation record for agent {agent_id}")]
    ReputationNotFound { agent_id: String },

    #[error("Pool {pool_id} not found")]
    PoolNotFound { pool_id: String },

    #[error("Loan {loan_id} not found")]
    LoanNotFound { loan_id: String },

    #[error("Lender {lender_id} has no position in pool {pool_id}")]
    PositionNotFound { pool_id: String, lender_id: String },

    #[error("Amount overflow: {left} + {right}")]
    AmountOverflow { left: u64, right: u64 },

    #[error("Amount underflow: {minuend} - {subtrahend}")]
    AmountUnderflow { minuend: u64, subtrahend: u64 },

    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Malformed {kind} id {input:?}: {reason}")]
    InvalidId {
        kind: &'static str,
        input: String,
        reason: String,
    },

    // ========================================================================
    // State Errors
    // ========================================================================

    #[error("Agent {agent_id} is already registered")]
    AlreadyRegistered { agent_id: String },

    #[error("Reputation for agent {agent_id} is already initialized")]
    AlreadyInitialized { agent_id: String },

    #[error("Pool {pool_id} already exists")]
    PoolExists { pool_id: String },

    #[error("Pool {pool_id} is not active for lending")]
    PoolInactive { pool_id: String },

    #[error("Loan {loan_id} is {actual}, expected {expected}")]
    InvalidState {
        loan_id: String,
        expected: String,
        actual: String,
    },

    #[error("Loan {loan_id} is not past its end time {end_time} (now {now})")]
    LoanNotMatured {
        loan_id: String,
        end_time: String,
        now: String,
    },

    #[error("Protocol is paused; {operation} rejected")]
    ProtocolPaused { operation: String },

    // ========================================================================
    // Capacity Errors
    // ========================================================================

    #[error("Requested {requested} on top of {outstanding} outstanding exceeds credit limit {limit}")]
    CreditLimitExceeded {
        requested: Amount,
        outstanding: Amount,
        limit: Amount,
    },

    #[error("Requested {requested} exceeds available {available}")]
    InsufficientAvailable { requested: Amount, available: Amount },

    #[error("Agent {agent_id} has {open} open loans (max {max})")]
    TooManyActiveLoans { agent_id: String, open: u32, max: u32 },

    #[error("Account {account} holds {available}, needs {requested}")]
    InsufficientBalance {
        account: String,
        requested: Amount,
        available: Amount,
    },

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: String, action: String },

    // ========================================================================
    // Integrity Errors
    // ========================================================================

    #[error("Integrity violation in pool {pool_id}: {invariant} expected {expected}, observed {observed}")]
    IntegrityViolation {
        pool_id: String,
        invariant: String,
        expected: Amount,
        observed: Amount,
    },
}

impl LendingError {
    pub fn invalid_amount(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unauthorized(caller: impl ToString, action: impl Into<String>) -> Self {
        Self::Unauthorized {
            caller: caller.to_string(),
            action: action.into(),
        }
    }

    /// Taxonomy class of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidAmount { .. }
            | Self::InvalidDuration { .. }
            | Self::NotRegistered { .. }
            | Self::ReputationNotFound { .. }
            | Self::PoolNotFound { .. }
            | Self::LoanNotFound { .. }
            | Self::PositionNotFound { .. }
            | Self::AmountOverflow { .. }
            | Self::AmountUnderflow { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidId { .. } => ErrorCategory::Validation,
            Self::AlreadyRegistered { .. }
            | Self::AlreadyInitialized { .. }
            | Self::PoolExists { .. }
            | Self::PoolInactive { .. }
            | Self::InvalidState { .. }
            | Self::LoanNotMatured { .. }
            | Self::ProtocolPaused { .. } => ErrorCategory::State,
            Self::CreditLimitExceeded { .. }
            | Self::InsufficientAvailable { .. }
            | Self::TooManyActiveLoans { .. }
            | Self::InsufficientBalance { .. } => ErrorCategory::Capacity,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::IntegrityViolation { .. } => ErrorCategory::Integrity,
        }
    }

    /// Errors are never retried by the engine; a caller may resubmit after
    /// changing the conditions that caused the failure.
    pub fn is_retriable(&self) -> bool {
        false
    }

    /// Get an error code for external tooling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InvalidDuration { .. } => "INVALID_DURATION",
            Self::NotRegistered { .. } => "NOT_REGISTERED",
            Self::ReputationNotFound { .. } => "REPUTATION_NOT_FOUND",
            Self::PoolNotFound { .. } => "POOL_NOT_FOUND",
            Self::LoanNotFound { .. } => "LOAN_NOT_FOUND",
            Self::PositionNotFound { .. } => "POSITION_NOT_FOUND",
            Self::AmountOverflow { .. } => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow { .. } => "AMOUNT_UNDERFLOW",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::InvalidId { .. } => "INVALID_ID",
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::AlreadyInitialized { .. } => "ALREADY_INITIALIZED",
            Self::PoolExists { .. } => "POOL_EXISTS",
            Self::PoolInactive { .. } => "POOL_INACTIVE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::LoanNotMatured { .. } => "LOAN_NOT_MATURED",
            Self::ProtocolPaused { .. } => "PROTOCOL_PAUSED",
            Self::CreditLimitExceeded { .. } => "CREDIT_LIMIT_EXCEEDED",
            Self::InsufficientAvailable { .. } => "INSUFFICIENT_AVAILABLE",
            Self::TooManyActiveLoans { .. } => "TOO_MANY_ACTIVE_LOANS",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
        }
    }
}
