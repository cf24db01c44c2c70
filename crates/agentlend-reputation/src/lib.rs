//! agentlend Reputation - per-agent score and repayment history
//!
//! A record is created once per agent and only moves on settlement events:
//! an on-time repayment adds a bonus, a late repayment subtracts a small
//! penalty, a default subtracts a large one. Scores are clamped to
//! `0..=MAX_SCORE` and records are never deleted.

pub mod params;
pub mod store;

pub use params::*;
pub use store::*;

pub use agentlend_types::{Tier, MAX_SCORE};
