//! Identity types for agentlend
//!
//! All identity types are strongly typed wrappers around UUIDs so an agent id
//! can never be passed where a loan id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{LendingError, Result};

/// Declares a typed id: a UUID shown as `<prefix>_<uuid>`
///
/// Parsing accepts the bare UUID or the id's own prefix; a string carrying
/// another id's prefix is rejected, so a loan id never parses as an agent id.
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(input: &str) -> Result<Self> {
                let body = match input.split_once('_') {
                    Some((prefix, rest)) if prefix == $prefix => rest,
                    Some((prefix, _)) => {
                        return Err(LendingError::InvalidId {
                            kind: $prefix,
                            input: input.to_string(),
                            reason: format!("prefix {:?} belongs to another id", prefix),
                        })
                    }
                    None => input,
                };
                Uuid::parse_str(body).map(Self).map_err(|e| LendingError::InvalidId {
                    kind: $prefix,
                    input: input.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = LendingError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(AgentId, "agent", "Unique identifier for a borrowing agent");
define_id_type!(LenderId, "lender", "Unique identifier for a liquidity provider");
define_id_type!(LoanId, "loan", "Unique identifier for a loan");
define_id_type!(OperatorId, "op", "Unique identifier for a protocol operator");
define_id_type!(EntryId, "entry", "Unique identifier for a custody ledger entry");

/// Pools are created by, and keyed on, the agent they fund.
pub type PoolId = AgentId;

/// The party invoking an entry point
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Principal {
    /// A borrowing agent acting for itself
    Agent(AgentId),
    /// A lender acting for itself
    Lender(LenderId),
    /// An operator, owner, approver or relayer
    Operator(OperatorId),
}

impl Principal {
    pub fn agent(id: AgentId) -> Self {
        Self::Agent(id)
    }

    pub fn lender(id: LenderId) -> Self {
        Self::Lender(id)
    }

    pub fn operator(id: OperatorId) -> Self {
        Self::Operator(id)
    }

    /// True if this principal is the given agent itself
    pub fn is_agent(&self, agent: &AgentId) -> bool {
        matches!(self, Self::Agent(id) if id == agent)
    }

    /// True if this principal is the given lender itself
    pub fn is_lender(&self, lender: &LenderId) -> bool {
        matches!(self, Self::Lender(id) if id == lender)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{}", id),
            Self::Lender(id) => write!(f, "{}", id),
            Self::Operator(id) => write!(f, "{}", id),
        }
    }
}
