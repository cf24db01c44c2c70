//! Scoring parameters

use agentlend_types::{LendingError, Result, MAX_SCORE};
use serde::{Deserialize, Serialize};

/// How scores start and move
///
/// The late-repayment penalty and the default penalty are separate knobs;
/// nothing assumes they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationParams {
    /// Score given to a freshly initialized agent
    pub initial_score: u32,
    /// Added on a repayment at or before the loan's end time
    pub on_time_bonus: u32,
    /// Subtracted on a repayment after the loan's end time
    pub late_penalty: u32,
    /// Subtracted when a loan is liquidated
    pub default_penalty: u32,
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self {
            initial_score: 500,
            on_time_bonus: 20,
            late_penalty: 10,
            default_penalty: 100,
        }
    }
}

impl ReputationParams {
    pub fn validate(&self) -> Result<()> {
        if self.initial_score > MAX_SCORE {
            return Err(LendingError::invalid_config(
                "reputation.initial_score",
                format!("{} exceeds {}", self.initial_score, MAX_SCORE),
            ));
        }
        for (field, value) in [
            ("reputation.on_time_bonus", self.on_time_bonus),
            ("reputation.late_penalty", self.late_penalty),
            ("reputation.default_penalty", self.default_penalty),
        ] {
            if value > MAX_SCORE {
                return Err(LendingError::invalid_config(
                    field,
                    format!("{} exceeds {}", value, MAX_SCORE),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ReputationParams::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_initial_score_rejected() {
        let params = ReputationParams {
            initial_score: 1_001,
            ..ReputationParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(LendingError::InvalidConfig { .. })
        ));
    }
}
