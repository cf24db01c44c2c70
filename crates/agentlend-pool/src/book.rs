//! PoolBook - registry of every agent pool

use std::collections::HashMap;

use agentlend_types::{LendingError, PoolId, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::AgentPool;

/// All pools, keyed by the agent that borrows from them
///
/// Mutations go through [`PoolBook::staged`] + [`PoolBook::commit`]: callers
/// work on a copy and only write it back once every other effect of the
/// operation has validated.
#[derive(Debug, Clone, Default)]
pub struct PoolBook {
    pools: HashMap<PoolId, AgentPool>,
}

impl PoolBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pool_id: &PoolId) -> bool {
        self.pools.contains_key(pool_id)
    }

    pub fn get(&self, pool_id: &PoolId) -> Result<&AgentPool> {
        self.pools.get(pool_id).ok_or_else(|| LendingError::PoolNotFound {
            pool_id: pool_id.to_string(),
        })
    }

    /// A fresh pool for `pool_id`, not yet stored
    pub fn staged_create(&self, pool_id: &PoolId, at: DateTime<Utc>) -> Result<AgentPool> {
        if self.contains(pool_id) {
            return Err(LendingError::PoolExists {
                pool_id: pool_id.to_string(),
            });
        }
        Ok(AgentPool::new(pool_id.clone(), at))
    }

    /// Working copy of an existing pool
    pub fn staged(&self, pool_id: &PoolId) -> Result<AgentPool> {
        self.get(pool_id).cloned()
    }

    /// Store a staged pool, replacing any previous version
    pub fn commit(&mut self, pool: AgentPool) {
        debug!(
            pool_id = %pool.agent_id,
            total = %pool.total_liquidity,
            available = %pool.available_liquidity,
            loaned = %pool.total_loaned,
            "Pool committed"
        );
        self.pools.insert(pool.agent_id.clone(), pool);
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentPool> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
