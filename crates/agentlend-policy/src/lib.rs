//! agentlend Policy - credit terms as a pure function of reputation
//!
//! The engine maps a score to a tier and reads that tier's row from a table:
//! credit limit (non-decreasing across tiers), interest rate and collateral
//! requirement (both non-increasing, collateral reaching 0% at the top).
//! Integer arithmetic only, so two implementations agree bit for bit.

use agentlend_types::{Amount, BasisPoints, LendingError, Result, Tier};
use serde::{Deserialize, Serialize};

/// Credit terms granted to one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTerms {
    pub credit_limit: Amount,
    pub interest_rate_bps: BasisPoints,
    /// Whole percent of principal locked as collateral
    pub collateral_percent: u32,
}

/// One row per tier, lowest tier first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    pub unrated: TierTerms,
    pub high_risk: TierTerms,
    pub medium_risk: TierTerms,
    pub low_risk: TierTerms,
    pub excellent: TierTerms,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            unrated: TierTerms {
                credit_limit: Amount::zero(),
                interest_rate_bps: BasisPoints(3_000),
                collateral_percent: 100,
            },
            high_risk: TierTerms {
                credit_limit: Amount::units(1_000),
                interest_rate_bps: BasisPoints(2_000),
                collateral_percent: 75,
            },
            medium_risk: TierTerms {
                credit_limit: Amount::units(5_000),
                interest_rate_bps: BasisPoints(1_000),
                collateral_percent: 50,
            },
            low_risk: TierTerms {
                credit_limit: Amount::units(20_000),
                interest_rate_bps: BasisPoints(700),
                collateral_percent: 25,
            },
            excellent: TierTerms {
                credit_limit: Amount::units(50_000),
                interest_rate_bps: BasisPoints(500),
                collateral_percent: 0,
            },
        }
    }
}

impl TierTable {
    pub fn terms(&self, tier: Tier) -> &TierTerms {
        match tier {
            Tier::Unrated => &self.unrated,
            Tier::HighRisk => &self.high_risk,
            Tier::MediumRisk => &self.medium_risk,
            Tier::LowRisk => &self.low_risk,
            Tier::Excellent => &self.excellent,
        }
    }

    fn rows(&self) -> [(Tier, &TierTerms); 5] {
        Tier::ALL.map(|tier| (tier, self.terms(tier)))
    }

    /// Reject tables that break the monotonic shape
    pub fn validate(&self) -> Result<()> {
        let rows = self.rows();
        for (tier, terms) in rows.iter() {
            if terms.collateral_percent > 100 {
                return Err(LendingError::invalid_config(
                    format!("tiers.{}.collateral_percent", tier),
                    format!("{} exceeds 100", terms.collateral_percent),
                ));
            }
        }
        for pair in rows.windows(2) {
            let (lower_tier, lower) = pair[0];
            let (upper_tier, upper) = pair[1];
            if upper.credit_limit < lower.credit_limit {
                return Err(LendingError::invalid_config(
                    format!("tiers.{}.credit_limit", upper_tier),
                    format!("must not be below {} limit {}", lower_tier, lower.credit_limit),
                ));
            }
            if upper.interest_rate_bps > lower.interest_rate_bps {
                return Err(LendingError::invalid_config(
                    format!("tiers.{}.interest_rate_bps", upper_tier),
                    format!("must not exceed {} rate {}", lower_tier, lower.interest_rate_bps),
                ));
            }
            if upper.collateral_percent > lower.collateral_percent {
                return Err(LendingError::invalid_config(
                    format!("tiers.{}.collateral_percent", upper_tier),
                    format!("must not exceed {} collateral {}%", lower_tier, lower.collateral_percent),
                ));
            }
        }
        if self.excellent.collateral_percent != 0 {
            return Err(LendingError::invalid_config(
                "tiers.EXCELLENT.collateral_percent",
                "top tier must require no collateral",
            ));
        }
        Ok(())
    }
}

/// Everything the policy says about one score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTerms {
    pub score: u32,
    pub tier: Tier,
    pub credit_limit: Amount,
    pub interest_rate_bps: BasisPoints,
    pub collateral_percent: u32,
}

impl CreditTerms {
    /// Collateral owed for borrowing `principal`, rounded down
    pub fn collateral_for(&self, principal: Amount) -> Result<Amount> {
        principal.apply_percent(self.collateral_percent)
    }
}

/// Side-effect-free pricing of credit from reputation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPolicyEngine {
    table: TierTable,
}

impl CreditPolicyEngine {
    pub fn new(table: TierTable) -> Result<Self> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    pub fn credit_limit(&self, score: u32) -> Amount {
        self.table.terms(Tier::from_score(score)).credit_limit
    }

    pub fn interest_rate_bps(&self, score: u32) -> BasisPoints {
        self.table.terms(Tier::from_score(score)).interest_rate_bps
    }

    pub fn collateral_percent(&self, score: u32) -> u32 {
        self.table.terms(Tier::from_score(score)).collateral_percent
    }

    pub fn terms(&self, score: u32) -> CreditTerms {
        let tier = Tier::from_score(score);
        let row = self.table.terms(tier);
        CreditTerms {
            score,
            tier,
            credit_limit: row.credit_limit,
            interest_rate_bps: row.interest_rate_bps,
            collateral_percent: row.collateral_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlend_types::MAX_SCORE;
    use proptest::prelude::*;

    #[test]
    fn test_medium_risk_terms() {
        let engine = CreditPolicyEngine::default();
        let terms = engine.terms(500);
        assert_eq!(terms.tier, Tier::MediumRisk);
        assert_eq!(terms.credit_limit, Amount::units(5_000));
        assert_eq!(terms.interest_rate_bps, BasisPoints(1_000));
        assert_eq!(terms.collateral_percent, 50);
        assert_eq!(terms.collateral_for(Amount::units(1_000)).unwrap(), Amount::units(500));
    }

    #[test]
    fn test_top_tier_needs_no_collateral() {
        let engine = CreditPolicyEngine::default();
        assert_eq!(engine.collateral_percent(MAX_SCORE), 0);
        assert_eq!(engine.credit_limit(150), Amount::zero());
    }

    #[test]
    fn test_default_table_is_valid() {
        assert!(TierTable::default().validate().is_ok());
    }

    #[test]
    fn test_non_monotonic_table_rejected() {
        let mut table = TierTable::default();
        table.low_risk.interest_rate_bps = BasisPoints(5_000);
        assert!(matches!(
            CreditPolicyEngine::new(table),
            Err(LendingError::InvalidConfig { .. })
        ));

        let mut table = TierTable::default();
        table.excellent.collateral_percent = 10;
        table.low_risk.collateral_percent = 10;
        assert!(CreditPolicyEngine::new(table).is_err());
    }

    #[test]
    fn test_table_round_trips_through_json() {
        let json = serde_json::to_string(&TierTable::default()).unwrap();
        let back: TierTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TierTable::default());
    }

    proptest! {
        #[test]
        fn terms_are_monotonic_in_score(a in 0u32..=MAX_SCORE, b in 0u32..=MAX_SCORE) {
            let engine = CreditPolicyEngine::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(engine.credit_limit(lo) <= engine.credit_limit(hi));
            prop_assert!(engine.interest_rate_bps(lo) >= engine.interest_rate_bps(hi));
            prop_assert!(engine.collateral_percent(lo) >= engine.collateral_percent(hi));
        }
    }
}
