//! agentlend Marketplace - the credit engine's coordinator
//!
//! Ties the components together behind one sequencing point:
//! - Reputation (`agentlend-reputation`) prices credit through the tier
//!   table (`agentlend-policy`)
//! - Lenders fund per-agent pools (`agentlend-pool`)
//! - Loans (`agentlend-loans`) reserve, disburse and settle pool liquidity
//! - Value moves only through the custody ledger (`agentlend-ledger`)
//!
//! Every mutating call is all-or-nothing and returns the structured events it
//! emitted; the same events are kept in an ordered journal.

pub mod access;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod quote;
pub mod state;

pub use access::*;
pub use config::*;
pub use coordinator::*;
pub use engine::*;
pub use quote::*;
pub use state::*;

pub use agentlend_ledger::{AccountRef, EntryReason, LedgerEntry};
pub use agentlend_loans::{InterestAccrual, Loan, LoanState, MAX_LOAN_DURATION_DAYS};
pub use agentlend_pool::{AgentPool, InterestDistribution, LiquidityPosition};
pub use agentlend_reputation::ReputationRecord;
