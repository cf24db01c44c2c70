//! Protocol parameters
//!
//! Loaded from defaults, from `AGENTLEND_*` environment variables (after
//! reading a `.env` file if one is present) or from a JSON document.

use agentlend_loans::{InterestAccrual, MAX_LOAN_DURATION_DAYS};
use agentlend_policy::TierTable;
use agentlend_pool::InterestDistribution;
use agentlend_reputation::ReputationParams;
use agentlend_types::{Amount, BasisPoints, LendingError, Result, MAX_SCORE};
use serde::{Deserialize, Serialize};

/// Tunable parameters of the lending engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Share of interest kept by the platform
    pub platform_fee_bps: BasisPoints,
    pub auto_approve_enabled: bool,
    pub max_auto_approve_amount: Amount,
    pub min_reputation_for_auto_approve: u32,
    /// Cap on a borrower's open (REQUESTED + ACTIVE) loans
    pub max_active_loans_per_agent: u32,
    pub min_duration_days: u32,
    pub max_duration_days: u32,
    pub interest_accrual: InterestAccrual,
    pub interest_distribution: InterestDistribution,
    pub reputation: ReputationParams,
    pub tiers: TierTable,
    /// Most recent events kept in the journal; older ones are dropped
    pub journal_retention: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: BasisPoints(100),
            auto_approve_enabled: true,
            max_auto_approve_amount: Amount::units(1_000),
            min_reputation_for_auto_approve: 500,
            max_active_loans_per_agent: 10,
            min_duration_days: 1,
            max_duration_days: 365,
            interest_accrual: InterestAccrual::default(),
            interest_distribution: InterestDistribution::default(),
            reputation: ReputationParams::default(),
            tiers: TierTable::default(),
            journal_retention: 10_000,
        }
    }
}

impl ProtocolConfig {
    /// Defaults overridden by `AGENTLEND_*` variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "AGENTLEND_PLATFORM_FEE_BPS")? {
            config.platform_fee_bps = BasisPoints(v);
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_AUTO_APPROVE_ENABLED")? {
            config.auto_approve_enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_MAX_AUTO_APPROVE_AMOUNT")? {
            config.max_auto_approve_amount = Amount(v);
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_MIN_REPUTATION_FOR_AUTO_APPROVE")? {
            config.min_reputation_for_auto_approve = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_MAX_ACTIVE_LOANS_PER_AGENT")? {
            config.max_active_loans_per_agent = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_MIN_DURATION_DAYS")? {
            config.min_duration_days = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_MAX_DURATION_DAYS")? {
            config.max_duration_days = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENTLEND_JOURNAL_RETENTION")? {
            config.journal_retention = v;
        }
        if let Some(raw) = lookup("AGENTLEND_INTEREST_ACCRUAL") {
            config.interest_accrual = parse_enum("AGENTLEND_INTEREST_ACCRUAL", &raw)?;
        }
        if let Some(raw) = lookup("AGENTLEND_INTEREST_DISTRIBUTION") {
            config.interest_distribution = parse_enum("AGENTLEND_INTEREST_DISTRIBUTION", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LendingError::invalid_config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.platform_fee_bps > BasisPoints::MAX {
            return Err(LendingError::invalid_config(
                "platform_fee_bps",
                format!("{} exceeds 100%", self.platform_fee_bps),
            ));
        }
        if self.min_reputation_for_auto_approve > MAX_SCORE {
            return Err(LendingError::invalid_config(
                "min_reputation_for_auto_approve",
                format!("{} exceeds {}", self.min_reputation_for_auto_approve, MAX_SCORE),
            ));
        }
        if self.max_active_loans_per_agent == 0 {
            return Err(LendingError::invalid_config(
                "max_active_loans_per_agent",
                "must allow at least one loan",
            ));
        }
        if self.min_duration_days == 0 || self.min_duration_days > self.max_duration_days {
            return Err(LendingError::invalid_config(
                "duration_days",
                format!(
                    "need 1 <= min ({}) <= max ({})",
                    self.min_duration_days, self.max_duration_days
                ),
            ));
        }
        if self.journal_retention == 0 {
            return Err(LendingError::invalid_config(
                "journal_retention",
                "must keep at least one event",
            ));
        }
        if self.max_duration_days > MAX_LOAN_DURATION_DAYS {
            return Err(LendingError::invalid_config(
                "max_duration_days",
                format!("{} exceeds {}", self.max_duration_days, MAX_LOAN_DURATION_DAYS),
            ));
        }
        self.reputation.validate()?;
        self.tiers.validate()?;
        Ok(())
    }

    /// Reject durations outside the configured window
    pub fn check_duration(&self, duration_days: u32) -> Result<()> {
        if duration_days < self.min_duration_days || duration_days > self.max_duration_days {
            return Err(LendingError::InvalidDuration {
                requested_days: duration_days,
                min_days: self.min_duration_days,
                max_days: self.max_duration_days,
            });
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| LendingError::invalid_config(key, format!("{:?}: {}", raw, e))),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase()))
        .map_err(|e| LendingError::invalid_config(key, e.to_string()))
}
