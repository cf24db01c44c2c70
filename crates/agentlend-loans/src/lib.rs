//! agentlend Loans - loan records and their lifecycle
//!
//! ```text
//! REQUESTED ──approve──▶ ACTIVE ──repay──────▶ REPAID
//!     │                    └────liquidate──▶ DEFAULTED
//!     └──cancel──▶ CANCELLED
//! ```
//!
//! Transitions only move forward. REPAID, DEFAULTED and CANCELLED are
//! terminal and the record is immutable afterwards.

pub mod interest;
pub mod loan;
pub mod ledger;

pub use interest::*;
pub use loan::*;
pub use ledger::*;
