use serde::{Deserialize, Serialize};
use std::fmt;

/// Label for a score on the 1..=10 scale. Pure function of the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskBand {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=2 => RiskBand::Minimal,
            3..=4 => RiskBand::Low,
            5..=6 => RiskBand::Moderate,
            7..=8 => RiskBand::High,
            _ => RiskBand::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskBand::Minimal => "MINIMAL",
            RiskBand::Low => "LOW",
            RiskBand::Moderate => "MODERATE",
            RiskBand::High => "HIGH",
            RiskBand::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Suggested governance action for a combined score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approve,
    ApproveWithCaution,
    Delay,
    Reject,
}

impl Recommendation {
    pub fn from_score(score: u8) -> Self {
        match score {
            8.. => Recommendation::Reject,
            6..=7 => Recommendation::Delay,
            3..=5 => Recommendation::ApproveWithCaution,
            _ => Recommendation::Approve,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::Approve => "APPROVE",
            Recommendation::ApproveWithCaution => "APPROVE WITH CAUTION",
            Recommendation::Delay => "DELAY",
            Recommendation::Reject => "REJECT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_steps() {
        assert_eq!(RiskBand::from_score(1), RiskBand::Minimal);
        assert_eq!(RiskBand::from_score(2), RiskBand::Minimal);
        assert_eq!(RiskBand::from_score(3), RiskBand::Low);
        assert_eq!(RiskBand::from_score(4), RiskBand::Low);
        assert_eq!(RiskBand::from_score(6), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(8), RiskBand::High);
        assert_eq!(RiskBand::from_score(10), RiskBand::Critical);
    }

    #[test]
    fn test_band_is_monotonic() {
        for score in 1..10u8 {
            assert!(RiskBand::from_score(score) <= RiskBand::from_score(score + 1));
            assert_eq!(RiskBand::from_score(score), RiskBand::from_score(score));
        }
    }

    #[test]
    fn test_recommendation_thresholds() {
        assert_eq!(Recommendation::from_score(1), Recommendation::Approve);
        assert_eq!(Recommendation::from_score(3), Recommendation::ApproveWithCaution);
        assert_eq!(Recommendation::from_score(6), Recommendation::Delay);
        assert_eq!(Recommendation::from_score(8).label(), "REJECT");
    }
}
