//! Narrative builder worker: weaves validated hypotheses, evidence,
//! syntheses and the valuation into the decision-ready report.

use std::sync::Arc;

use async_trait::async_trait;

use research_core::agents::NarrativeRequest;
use research_core::report::FinalReport;
use research_core::trace::WorkerKind;

use crate::error::{AgentError, AgentResult};
use crate::provider::{extract_json, CompletionRequest, LlmProvider};
use crate::{Worker, WorkerOutput};

const SYSTEM_PROMPT: &str = "\
You are writing an institutional-grade equity research report. Weave the \
validated hypotheses, evidence, dialectical syntheses and the deterministic \
valuation into a narrative. Every major claim must reference evidence ids in \
its section's evidence_refs. The valuation section carries fair value, \
current price, methodology, and exactly three scenarios (bull, base, bear) \
with probabilities summing to 1.0. The recommendation (BUY, HOLD, SELL) must \
be consistent with the fair-value gap. Disclose limitations honestly. \
Respond with JSON only, matching the final report schema.";

/// Minimum share of sections that must carry evidence references.
const MIN_EVIDENCE_COVERAGE: f64 = 0.8;

pub struct NarrativeAgent {
    provider: Arc<dyn LlmProvider>,
}

impl NarrativeAgent {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Worker for NarrativeAgent {
    type Input = NarrativeRequest;
    type Output = FinalReport;

    fn kind(&self) -> WorkerKind {
        WorkerKind::Narrative
    }

    async fn call(&self, input: &Self::Input) -> AgentResult<WorkerOutput<Self::Output>> {
        let user = serde_json::to_string(input)
            .map_err(|e| AgentError::SchemaViolation(e.to_string()))?;
        let response = self
            .provider
            .complete(&CompletionRequest {
                worker: self.kind(),
                system: SYSTEM_PROMPT.to_string(),
                user,
            })
            .await?;

        let value = extract_json(&response.text)?;
        let report: FinalReport = serde_json::from_value(value)
            .map_err(|e| AgentError::SchemaViolation(format!("final report: {e}")))?;
        validate_report(&report)?;
        Ok(WorkerOutput {
            value: report,
            cost_usd: response.cost_usd,
        })
    }
}

/// Structural floor enforced at the worker boundary; the full grading
/// pipeline applies the institutional rubric afterwards.
pub fn validate_report(report: &FinalReport) -> AgentResult<()> {
    if !report.valuation.probabilities_sum_ok() {
        let total: f64 = report
            .valuation
            .scenarios
            .iter()
            .map(|s| s.probability)
            .sum();
        return Err(AgentError::SchemaViolation(format!(
            "valuation scenario probabilities sum to {total}"
        )));
    }
    if !report.sections.is_empty() && report.evidence_coverage() < MIN_EVIDENCE_COVERAGE {
        return Err(AgentError::SchemaViolation(format!(
            "only {:.0}% of sections carry evidence references",
            report.evidence_coverage() * 100.0
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn report_json() -> serde_json::Value {
        json!({
            "executive_summary": "Margins are inflecting ahead of guidance; we see 18% upside.",
            "investment_thesis": "Mix shift toward the datacenter segment drives durable margin expansion.",
            "financial_analysis": "Revenue compounding at 9% with operating margin reaching 25% by year five.",
            "valuation": {
                "fair_value": 118.0,
                "current_price": 100.0,
                "scenarios": [
                    {"name": "bull", "probability": 0.30, "fair_value": 140.0, "conditions": "mix shift sustains"},
                    {"name": "base", "probability": 0.50, "fair_value": 118.0, "conditions": "partial sustain"},
                    {"name": "bear", "probability": 0.20, "fair_value": 85.0, "conditions": "cost reversal"}
                ],
                "methodology": "Five-year FCFF DCF with stable-growth terminal value"
            },
            "bull_bear_analysis": "Bulls point to reported inflection; bears to guided caution.",
            "risks": "Guidance conservatism may prove structural; pricing pressure in legacy.",
            "recommendation": {
                "action": "BUY",
                "conviction": "MEDIUM",
                "timeframe": "12-18 months",
                "entry_conditions": ["hold below 105"],
                "exit_conditions": ["margin trend breaks two quarters"]
            },
            "sections": [
                {"title": "Margin trajectory", "content": "...", "evidence_refs": ["ev_001", "ev_002"]},
                {"title": "Segment economics", "content": "...", "evidence_refs": ["ev_003"]},
                {"title": "Competitive position", "content": "...", "evidence_refs": ["ev_004"]},
                {"title": "Limitations", "content": "One hypothesis remained uncertain.", "evidence_refs": ["ev_001"]}
            ]
        })
    }

    #[test]
    fn accepts_well_formed_report() {
        let report: FinalReport = serde_json::from_value(report_json()).unwrap();
        validate_report(&report).unwrap();
    }

    #[test]
    fn rejects_probability_drift() {
        let mut value = report_json();
        value["valuation"]["scenarios"][1]["probability"] = json!(0.6);
        let report: FinalReport = serde_json::from_value(value).unwrap();
        assert!(validate_report(&report).is_err());
    }

    #[test]
    fn rejects_thin_evidence_coverage() {
        let mut value = report_json();
        for section in value["sections"].as_array_mut().unwrap() {
            section["evidence_refs"] = json!([]);
        }
        let report: FinalReport = serde_json::from_value(value).unwrap();
        assert!(validate_report(&report).is_err());
    }
}
