//! Scoring Oracle Client
//!
//! Requests agent risk assessments for a poll from `POST {backend}/api/analyze`.
//! Each risk-scoring agent (whale watch, economic) becomes one `AgentScore`.
//! The explainer only produces text and never contributes a score.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::http::{OracleHttpClient, endpoint};
use crate::models::{AgentKind, AgentScore, AgentSelector, AnalysisReport, FlagSeverity, RiskFlag};

/// Anything that can score a poll
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn analyze(&self, poll_id: &str, agents: AgentSelector) -> Result<AnalysisReport>;
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    poll_id: &'a str,
    agent_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    results: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AgentOutput {
    risk_score: Option<f64>,
    #[serde(default)]
    flags: Vec<RawFlag>,
    explanation: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFlag {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ConsensusOutput {
    combined_risk_score: Option<f64>,
}

pub struct HttpScoringOracle {
    http: OracleHttpClient,
    base_url: String,
}

impl HttpScoringOracle {
    pub fn new(http: OracleHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ScoringOracle for HttpScoringOracle {
    async fn analyze(&self, poll_id: &str, agents: AgentSelector) -> Result<AnalysisReport> {
        let url = endpoint(&self.base_url, "/api/analyze");
        let request = AnalyzeRequest {
            poll_id,
            agent_type: agents.as_str(),
        };

        let response: AnalyzeResponse = self
            .http
            .post_json(&url, &request)
            .await
            .with_context(|| format!("Analysis request failed for poll {}", poll_id))?;

        if response.success == Some(false) {
            return Err(anyhow::anyhow!("Scoring oracle reported failure for poll {}", poll_id));
        }

        let report = report_from_results(poll_id, response.results);
        debug!(
            poll_id = %poll_id,
            agents_scored = report.scores.len(),
            "Received agent analysis"
        );
        Ok(report)
    }
}

fn report_from_results(
    poll_id: &str,
    mut results: HashMap<String, serde_json::Value>,
) -> AnalysisReport {
    let mut report = AnalysisReport {
        poll_id: poll_id.to_string(),
        ..Default::default()
    };

    for kind in AgentKind::ALL {
        let Some(raw) = results.remove(kind.as_str()) else {
            continue;
        };

        let output: AgentOutput = match serde_json::from_value(raw) {
            Ok(output) => output,
            Err(e) => {
                warn!(poll_id = %poll_id, agent = %kind, "Malformed agent output: {}", e);
                continue;
            }
        };

        let text = output.explanation.or(output.summary).unwrap_or_default();

        if kind == AgentKind::Explainer {
            if !text.is_empty() {
                report.explanation = Some(text);
            }
            continue;
        }

        let Some(raw_score) = output.risk_score else {
            debug!(poll_id = %poll_id, agent = %kind, "Agent returned no risk score");
            continue;
        };

        let mut score = AgentScore::new(kind, raw_score).with_explanation(text);
        score.flags = output
            .flags
            .into_iter()
            .map(|f| RiskFlag {
                severity: FlagSeverity::parse(&f.severity),
                message: f.message,
                kind: f.kind,
            })
            .collect();
        report.scores.push(score);
    }

    if let Some(raw) = results.remove("consensus")
        && let Ok(consensus) = serde_json::from_value::<ConsensusOutput>(raw)
    {
        report.combined_hint = consensus.combined_risk_score;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn results(value: serde_json::Value) -> HashMap<String, serde_json::Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_report_from_full_analysis() {
        let report = report_from_results(
            "p1",
            results(json!({
                "explainer": {"agent_type": "explainer", "explanation": "Raises rewards by 2%."},
                "whale_watch": {
                    "risk_score": 8,
                    "flags": [
                        {"type": "WHALE_DOMINATION", "severity": "CRITICAL", "message": "one wallet holds 60%"},
                        {"type": "NOTE", "severity": "INFO", "message": "low turnout"}
                    ],
                    "explanation": "Concentrated voting power."
                },
                "economic": {"risk_score": 3, "flags": [], "summary": "Sustainable."},
                "consensus": {"combined_risk_score": 5.5, "agents_analyzed": 2}
            })),
        );

        assert_eq!(report.explanation.as_deref(), Some("Raises rewards by 2%."));
        assert_eq!(report.scores.len(), 2);
        assert_eq!(report.combined_hint, Some(5.5));

        let whale = &report.scores[0];
        assert_eq!(whale.agent, AgentKind::WhaleWatch);
        assert_eq!(whale.score, 8);
        assert_eq!(whale.worst_flag(), Some(FlagSeverity::Critical));
        assert_eq!(whale.flags[1].severity, FlagSeverity::Low);
        assert_eq!(whale.flags[0].kind.as_deref(), Some("WHALE_DOMINATION"));

        assert_eq!(report.scores[1].explanation, "Sustainable.");
    }

    #[test]
    fn test_agent_without_score_is_skipped() {
        let report = report_from_results(
            "p1",
            results(json!({
                "whale_watch": {"explanation": "poll not found"},
                "economic": {"risk_score": 0}
            })),
        );

        assert_eq!(report.scores.len(), 1);
        assert_eq!(report.scores[0].agent, AgentKind::Economic);
        assert_eq!(report.scores[0].score, 1);
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(AnalyzeRequest {
            poll_id: "p1",
            agent_type: AgentSelector::Only(AgentKind::WhaleWatch).as_str(),
        })
        .unwrap();
        assert_eq!(body, json!({"poll_id": "p1", "agent_type": "whale_watch"}));
    }
}
