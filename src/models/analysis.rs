//! Agent analysis models
//!
//! Risk scores live on a closed 1..=10 scale. 1 is the floor even when an
//! agent has nothing to analyze yet; a score of 0 is never produced.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

/// Round and clamp a raw agent score onto the 1..=10 scale
pub fn clamp_score(raw: f64) -> u8 {
    if !raw.is_finite() {
        return MIN_SCORE;
    }
    raw.round().clamp(MIN_SCORE as f64, MAX_SCORE as f64) as u8
}

/// The analysis agents the scoring oracle knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    WhaleWatch,
    Economic,
    Explainer,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Explainer, AgentKind::WhaleWatch, AgentKind::Economic];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::WhaleWatch => "whale_watch",
            AgentKind::Economic => "economic",
            AgentKind::Explainer => "explainer",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which agents an analysis request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSelector {
    All,
    Only(AgentKind),
}

impl AgentSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentSelector::All => "all",
            AgentSelector::Only(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FlagSeverity {
    /// Lenient parse for agent output. Informational flags count as LOW.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => FlagSeverity::Critical,
            "HIGH" => FlagSeverity::High,
            "MEDIUM" => FlagSeverity::Medium,
            _ => FlagSeverity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub severity: FlagSeverity,
    pub message: String,
    /// Agent-specific flag type, e.g. `SYBIL_SUSPECTED`
    pub kind: Option<String>,
}

/// One agent's risk assessment of a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub agent: AgentKind,
    pub score: u8,
    pub flags: Vec<RiskFlag>,
    pub explanation: String,
}

impl AgentScore {
    pub fn new(agent: AgentKind, raw_score: f64) -> Self {
        Self {
            agent,
            score: clamp_score(raw_score),
            flags: Vec::new(),
            explanation: String::new(),
        }
    }

    pub fn with_flag(mut self, severity: FlagSeverity, message: impl Into<String>) -> Self {
        self.flags.push(RiskFlag {
            severity,
            message: message.into(),
            kind: None,
        });
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    /// Highest flag severity raised by this agent, if any
    pub fn worst_flag(&self) -> Option<FlagSeverity> {
        self.flags.iter().map(|f| f.severity).max()
    }
}

/// Everything one scoring oracle call returned for a poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub poll_id: String,
    pub scores: Vec<AgentScore>,
    /// Plain-language explanation from the explainer agent
    pub explanation: Option<String>,
    /// Combined score as computed by the oracle. Informational only.
    pub combined_hint: Option<f64>,
}
