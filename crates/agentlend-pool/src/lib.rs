//! agentlend Pool - the per-agent liquidity ledger
//!
//! Each borrowing agent has one pool, funded by any number of lenders.
//!
//! # Invariants
//!
//! 1. `available_liquidity + total_loaned == total_liquidity`
//! 2. `sum(position.amount) == total_liquidity`
//!
//! Lender earnings compound into the position, so interest credited to
//! lenders raises both `total_liquidity` and `available_liquidity`. A default
//! returns the seized collateral to `available_liquidity`; the uncovered part of
//! the principal is written off lender positions as a realized loss.

pub mod distribution;
pub mod pool;
pub mod book;

pub use distribution::*;
pub use pool::*;
pub use book::*;
