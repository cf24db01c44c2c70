//! ReputationStore - owns every agent's score and derived statistics

use std::collections::HashMap;

use agentlend_types::{
    AgentId, Amount, LendingError, ReputationChangeReason, Result, Tier, MAX_SCORE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ReputationParams;

/// An agent's reputation and repayment history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub agent_id: AgentId,
    pub score: u32,
    pub total_borrowed: Amount,
    pub total_repaid: Amount,
    /// Loans repaid (on time or late)
    pub loan_count: u32,
    pub default_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ReputationRecord {
    fn new(agent_id: AgentId, score: u32, at: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            score: score.min(MAX_SCORE),
            total_borrowed: Amount::zero(),
            total_repaid: Amount::zero(),
            loan_count: 0,
            default_count: 0,
            created_at: at,
            last_updated: at,
        }
    }

    pub fn tier(&self) -> Tier {
        Tier::from_score(self.score)
    }

    fn adjust(&mut self, delta: i64) {
        let next = (self.score as i64 + delta).clamp(0, MAX_SCORE as i64);
        self.score = next as u32;
    }
}

/// A score movement produced by a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub old_score: u32,
    pub new_score: u32,
    pub old_tier: Tier,
    pub new_tier: Tier,
    pub reason: ReputationChangeReason,
}

impl ScoreChange {
    fn between(before: &ReputationRecord, after: &ReputationRecord, reason: ReputationChangeReason) -> Self {
        Self {
            old_score: before.score,
            new_score: after.score,
            old_tier: before.tier(),
            new_tier: after.tier(),
            reason,
        }
    }

    pub fn delta(&self) -> i64 {
        self.new_score as i64 - self.old_score as i64
    }
}

/// Reputation records keyed by agent
///
/// Mutations come in two forms: `staged_*` methods compute the next record
/// without touching the store (for callers that must commit several
/// components together), and the `record_*` methods stage and commit in one go.
#[derive(Debug, Clone)]
pub struct ReputationStore {
    params: ReputationParams,
    records: HashMap<AgentId, ReputationRecord>,
}

impl ReputationStore {
    pub fn new(params: ReputationParams) -> Self {
        Self {
            params,
            records: HashMap::new(),
        }
    }

    pub fn params(&self) -> &ReputationParams {
        &self.params
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.records.contains_key(agent_id)
    }

    /// Create an agent's record at the configured starting score
    pub fn initialize(&mut self, agent_id: &AgentId, at: DateTime<Utc>) -> Result<ReputationRecord> {
        let record = self.staged_initialize(agent_id, at)?;
        self.commit(record.clone());
        info!(agent = %agent_id, score = record.score, tier = %record.tier(), "reputation initialized");
        Ok(record)
    }

    pub fn staged_initialize(&self, agent_id: &AgentId, at: DateTime<Utc>) -> Result<ReputationRecord> {
        if self.records.contains_key(agent_id) {
            return Err(LendingError::AlreadyInitialized {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(ReputationRecord::new(agent_id.clone(), self.params.initial_score, at))
    }

    pub fn get(&self, agent_id: &AgentId) -> Result<&ReputationRecord> {
        self.records
            .get(agent_id)
            .ok_or_else(|| LendingError::ReputationNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    pub fn get_score(&self, agent_id: &AgentId) -> Result<u32> {
        self.get(agent_id).map(|r| r.score)
    }

    pub fn get_tier(&self, agent_id: &AgentId) -> Result<Tier> {
        self.get(agent_id).map(ReputationRecord::tier)
    }

    /// Next record after a repayment of `amount`
    pub fn staged_repayment(
        &self,
        agent_id: &AgentId,
        amount: Amount,
        on_time: bool,
        at: DateTime<Utc>,
    ) -> Result<(ReputationRecord, ScoreChange)> {
        let before = self.get(agent_id)?;
        let mut next = before.clone();
        let reason = if on_time {
            next.adjust(self.params.on_time_bonus as i64);
            ReputationChangeReason::OnTimeRepayment
        } else {
            next.adjust(-(self.params.late_penalty as i64));
            ReputationChangeReason::LateRepayment
        };
        next.total_repaid = next.total_repaid.checked_add(amount)?;
        next.loan_count = next.loan_count.saturating_add(1);
        next.last_updated = at;
        let change = ScoreChange::between(before, &next, reason);
        Ok((next, change))
    }

    /// Next record after a default
    pub fn staged_default(&self, agent_id: &AgentId, at: DateTime<Utc>) -> Result<(ReputationRecord, ScoreChange)> {
        let before = self.get(agent_id)?;
        let mut next = before.clone();
        next.adjust(-(self.params.default_penalty as i64));
        next.default_count = next.default_count.saturating_add(1);
        next.last_updated = at;
        let change = ScoreChange::between(before, &next, ReputationChangeReason::Default);
        Ok((next, change))
    }

    /// Next record after `amount` is disbursed to the agent
    pub fn staged_borrow(&self, agent_id: &AgentId, amount: Amount, at: DateTime<Utc>) -> Result<ReputationRecord> {
        let mut next = self.get(agent_id)?.clone();
        next.total_borrowed = next.total_borrowed.checked_add(amount)?;
        next.last_updated = at;
        Ok(next)
    }

    pub fn record_repayment(
        &mut self,
        agent_id: &AgentId,
        amount: Amount,
        on_time: bool,
        at: DateTime<Utc>,
    ) -> Result<ScoreChange> {
        let (next, change) = self.staged_repayment(agent_id, amount, on_time, at)?;
        self.commit(next);
        info!(agent = %agent_id, from = change.old_score, to = change.new_score, on_time, "repayment recorded");
        Ok(change)
    }

    pub fn record_default(&mut self, agent_id: &AgentId, at: DateTime<Utc>) -> Result<ScoreChange> {
        let (next, change) = self.staged_default(agent_id, at)?;
        self.commit(next);
        info!(agent = %agent_id, from = change.old_score, to = change.new_score, "default recorded");
        Ok(change)
    }

    pub fn record_borrow(&mut self, agent_id: &AgentId, amount: Amount, at: DateTime<Utc>) -> Result<()> {
        let next = self.staged_borrow(agent_id, amount, at)?;
        self.commit(next);
        Ok(())
    }

    /// Store a staged record
    pub fn commit(&mut self, record: ReputationRecord) {
        self.records.insert(record.agent_id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ReputationStore {
    fn default() -> Self {
        Self::new(ReputationParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(agent: &AgentId) -> ReputationStore {
        let mut store = ReputationStore::default();
        store.initialize(agent, Utc::now()).unwrap();
        store
    }

    #[test]
    fn test_initialize_once() {
        let agent = AgentId::new();
        let mut store = store_with(&agent);

        assert_eq!(store.get_score(&agent).unwrap(), 500);
        assert_eq!(store.get_tier(&agent).unwrap(), Tier::MediumRisk);

        let again = store.initialize(&agent, Utc::now());
        assert!(matches!(again, Err(LendingError::AlreadyInitialized { .. })));
    }

    #[test]
    fn test_unknown_agent_is_not_found() {
        let store = ReputationStore::default();
        assert!(matches!(
            store.get_score(&AgentId::new()),
            Err(LendingError::ReputationNotFound { .. })
        ));
    }

    #[test]
    fn test_on_time_repayment_adds_bonus() {
        let agent = AgentId::new();
        let mut store = store_with(&agent);

        let change = store
            .record_repayment(&agent, Amount::units(1_000), true, Utc::now())
            .unwrap();
        assert_eq!(change.delta(), 20);
        assert_eq!(change.reason, ReputationChangeReason::OnTimeRepayment);

        let record = store.get(&agent).unwrap();
        assert_eq!(record.score, 520);
        assert_eq!(record.loan_count, 1);
        assert_eq!(record.total_repaid, Amount::units(1_000));
    }

    #[test]
    fn test_late_repayment_is_smaller_than_default() {
        let agent = AgentId::new();
        let mut store = store_with(&agent);

        let late = store
            .record_repayment(&agent, Amount::units(10), false, Utc::now())
            .unwrap();
        let default = store.record_default(&agent, Utc::now()).unwrap();

        assert_eq!(late.delta(), -10);
        assert_eq!(default.delta(), -100);
        assert_eq!(store.get(&agent).unwrap().default_count, 1);
        assert_eq!(store.get_score(&agent).unwrap(), 390);
        assert_eq!(default.new_tier, Tier::HighRisk);
    }

    #[test]
    fn test_score_clamps_at_both_ends() {
        let agent = AgentId::new();
        let mut store = ReputationStore::new(ReputationParams {
            initial_score: 990,
            on_time_bonus: 50,
            late_penalty: 10,
            default_penalty: 600,
        });
        store.initialize(&agent, Utc::now()).unwrap();

        store.record_repayment(&agent, Amount::units(1), true, Utc::now()).unwrap();
        assert_eq!(store.get_score(&agent).unwrap(), MAX_SCORE);

        store.record_default(&agent, Utc::now()).unwrap();
        store.record_default(&agent, Utc::now()).unwrap();
        assert_eq!(store.get_score(&agent).unwrap(), 0);
        assert_eq!(store.get_tier(&agent).unwrap(), Tier::Unrated);
    }

    #[test]
    fn test_staged_change_does_not_touch_store() {
        let agent = AgentId::new();
        let store = store_with(&agent);

        let (next, _) = store.staged_default(&agent, Utc::now()).unwrap();
        assert_eq!(next.score, 400);
        assert_eq!(store.get_score(&agent).unwrap(), 500);
    }

    #[test]
    fn test_borrow_tracking() {
        let agent = AgentId::new();
        let mut store = store_with(&agent);
        store.record_borrow(&agent, Amount::units(250), Utc::now()).unwrap();
        store.record_borrow(&agent, Amount::units(250), Utc::now()).unwrap();
        assert_eq!(store.get(&agent).unwrap().total_borrowed, Amount::units(500));
    }

    #[test]
    fn test_record_serializes() {
        let agent = AgentId::new();
        let store = store_with(&agent);
        let json = serde_json::to_value(store.get(&agent).unwrap()).unwrap();
        assert_eq!(json["score"], 500);
    }
}
