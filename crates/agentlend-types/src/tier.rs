//! Reputation tiers
//!
//! A tier is a pure function of score. The thresholds are fixed; what each tier
//! is worth in credit terms lives in the policy crate's tier table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest attainable reputation score
pub const MAX_SCORE: u32 = 1_000;

/// Discrete reputation bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// score < 200
    Unrated,
    /// 200..=399
    HighRisk,
    /// 400..=599
    MediumRisk,
    /// 600..=799
    LowRisk,
    /// >= 800
    Excellent,
}

impl Tier {
    /// All tiers, lowest first
    pub const ALL: [Tier; 5] = [
        Tier::Unrated,
        Tier::HighRisk,
        Tier::MediumRisk,
        Tier::LowRisk,
        Tier::Excellent,
    ];

    pub fn from_score(score: u32) -> Self {
        match score {
            0..=199 => Tier::Unrated,
            200..=399 => Tier::HighRisk,
            400..=599 => Tier::MediumRisk,
            600..=799 => Tier::LowRisk,
            _ => Tier::Excellent,
        }
    }

    /// Lowest score that falls in this tier
    pub fn min_score(&self) -> u32 {
        match self {
            Tier::Unrated => 0,
            Tier::HighRisk => 200,
            Tier::MediumRisk => 400,
            Tier::LowRisk => 600,
            Tier::Excellent => 800,
        }
    }

    /// Position in `Tier::ALL`
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Unrated => "UNRATED",
            Tier::HighRisk => "HIGH_RISK",
            Tier::MediumRisk => "MEDIUM_RISK",
            Tier::LowRisk => "LOW_RISK",
            Tier::Excellent => "EXCELLENT",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(Tier::from_score(0), Tier::Unrated);
        assert_eq!(Tier::from_score(199), Tier::Unrated);
        assert_eq!(Tier::from_score(200), Tier::HighRisk);
        assert_eq!(Tier::from_score(399), Tier::HighRisk);
        assert_eq!(Tier::from_score(400), Tier::MediumRisk);
        assert_eq!(Tier::from_score(599), Tier::MediumRisk);
        assert_eq!(Tier::from_score(600), Tier::LowRisk);
        assert_eq!(Tier::from_score(799), Tier::LowRisk);
        assert_eq!(Tier::from_score(800), Tier::Excellent);
        assert_eq!(Tier::from_score(MAX_SCORE), Tier::Excellent);
    }

    #[test]
    fn test_min_score_round_trips_through_from_score() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_score(tier.min_score()), tier);
        }
    }
}
