//! agentlend Types - Canonical domain types for reputation-weighted lending
//!
//! This crate contains the foundational types shared by every agentlend crate,
//! with zero dependencies on the others:
//!
//! - Identity types (AgentId, LenderId, LoanId, OperatorId, Principal)
//! - Reputation `Tier` thresholds
//! - Fixed-point `Amount` and `BasisPoints` arithmetic (integer only, floor rounding)
//! - The `Clock` abstraction the engine reads time from
//! - The canonical error taxonomy
//! - Structured event records emitted by mutating operations
//!
//! # Arithmetic Rules
//!
//! 1. No floating point anywhere in value or rate computation
//! 2. Every split (fee, interest, pro-rata share) rounds down
//! 3. Intermediate products are computed in `u128`

pub mod identity;
pub mod amount;
pub mod tier;
pub mod clock;
pub mod error;
pub mod event;

pub use identity::*;
pub use amount::*;
pub use tier::*;
pub use clock::*;
pub use error::*;
pub use event::*;

/// Version of the agentlend types schema
pub const TYPES_VERSION: &str = "0.1.0";
