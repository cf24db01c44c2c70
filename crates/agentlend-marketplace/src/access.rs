//! Role-based access control
//!
//! A single owner administers the protocol. Trusted callers (relayers) may act
//! on behalf of any agent or lender; approvers approve and cancel loans;
//! operators run accounting recovery. The owner holds every role.

use std::collections::HashSet;

use agentlend_ledger::AccountRef;
use agentlend_types::{AgentId, LenderId, LendingError, Principal, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A grantable role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    TrustedCaller,
    Approver,
    Operator,
}

#[derive(Debug, Clone)]
pub struct AccessControl {
    owner: Principal,
    trusted_callers: HashSet<Principal>,
    approvers: HashSet<Principal>,
    operators: HashSet<Principal>,
}

impl AccessControl {
    pub fn new(owner: Principal) -> Self {
        Self {
            owner,
            trusted_callers: HashSet::new(),
            approvers: HashSet::new(),
            operators: HashSet::new(),
        }
    }

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    pub fn is_owner(&self, caller: &Principal) -> bool {
        caller == &self.owner
    }

    fn members(&self, role: Role) -> &HashSet<Principal> {
        match role {
            Role::TrustedCaller => &self.trusted_callers,
            Role::Approver => &self.approvers,
            Role::Operator => &self.operators,
        }
    }

    pub fn has_role(&self, caller: &Principal, role: Role) -> bool {
        self.is_owner(caller) || self.members(role).contains(caller)
    }

    /// Grant or revoke; returns whether membership changed
    pub fn set_role(&mut self, principal: Principal, role: Role, enabled: bool) -> bool {
        let members = match role {
            Role::TrustedCaller => &mut self.trusted_callers,
            Role::Approver => &mut self.approvers,
            Role::Operator => &mut self.operators,
        };
        if enabled {
            members.insert(principal)
        } else {
            members.remove(&principal)
        }
    }

    pub fn require_owner(&self, caller: &Principal, action: &str) -> Result<()> {
        if self.is_owner(caller) {
            return Ok(());
        }
        Err(denied(caller, action))
    }

    pub fn require_role(&self, caller: &Principal, role: Role, action: &str) -> Result<()> {
        if self.has_role(caller, role) {
            return Ok(());
        }
        Err(denied(caller, action))
    }

    /// The agent itself or a trusted caller
    pub fn require_agent(&self, caller: &Principal, agent_id: &AgentId, action: &str) -> Result<()> {
        if caller.is_agent(agent_id) || self.has_role(caller, Role::TrustedCaller) {
            return Ok(());
        }
        Err(denied(caller, action))
    }

    /// The lender itself or a trusted caller
    pub fn require_lender(&self, caller: &Principal, lender_id: &LenderId, action: &str) -> Result<()> {
        if caller.is_lender(lender_id) || self.has_role(caller, Role::TrustedCaller) {
            return Ok(());
        }
        Err(denied(caller, action))
    }

    /// Only wallet accounts move value in and out, and only by their holder
    pub fn require_account_holder(&self, caller: &Principal, account: &AccountRef, action: &str) -> Result<()> {
        match account {
            AccountRef::Agent(agent_id) => self.require_agent(caller, agent_id, action),
            AccountRef::Lender(lender_id) => self.require_lender(caller, lender_id, action),
            _ => Err(denied(caller, action)),
        }
    }
}

fn denied(caller: &Principal, action: &str) -> LendingError {
    warn!(caller = %caller, action, "Unauthorized call rejected");
    LendingError::unauthorized(caller, action)
}
