//! Dialectical synthesis worker: builds the strongest bull and bear cases
//! from accumulated evidence, resolves the tension, and re-scores confidence.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use research_core::agents::SynthesisRequest;
use research_core::trace::WorkerKind;
use research_core::types::{ScenarioKind, SynthesisRecord};

use crate::error::{AgentError, AgentResult};
use crate::provider::{extract_json, CompletionRequest, LlmProvider};
use crate::{Worker, WorkerOutput};

const SYSTEM_PROMPT: &str = "\
You are the devil's advocate in an institutional investment committee. Build \
the strongest bull case and the strongest bear case for the hypothesis, each \
argument citing evidence ids from the supplied set. Then synthesize: at \
least three non-obvious insights, a tension resolution, a confidence \
rationale, and an updated confidence in [0,1]. Close with exactly three \
scenarios (bull, base, bear) whose probabilities sum to 1.0. Respond with \
JSON only, matching the synthesis record schema.";

pub struct SynthesisAgent {
    provider: Arc<dyn LlmProvider>,
}

impl SynthesisAgent {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Worker for SynthesisAgent {
    type Input = SynthesisRequest;
    type Output = SynthesisRecord;

    fn kind(&self) -> WorkerKind {
        WorkerKind::Synthesis
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
        let record: SynthesisRecord = serde_json::from_value(value)
            .map_err(|e| AgentError::SchemaViolation(format!("synthesis record: {e}")))?;
        validate_record(&record, input)?;
        Ok(WorkerOutput {
            value: record,
            cost_usd: response.cost_usd,
        })
    }
}

/// Enforce the synthesis contract.
pub fn validate_record(record: &SynthesisRecord, request: &SynthesisRequest) -> AgentResult<()> {
    if record.hypothesis_id != request.hypothesis.id {
        return Err(AgentError::SchemaViolation(format!(
            "synthesis for {} but {} was requested",
            record.hypothesis_id, request.hypothesis.id
        )));
    }
    if record.synthesis.insights.len() < 3 {
        return Err(AgentError::SchemaViolation(format!(
            "expected >= 3 insights, got {}",
            record.synthesis.insights.len()
        )));
    }
    if !(0.0..=1.0).contains(&record.synthesis.updated_confidence) {
        return Err(AgentError::SchemaViolation(format!(
            "updated_confidence {} outside [0,1]",
            record.synthesis.updated_confidence
        )));
    }

    if record.scenarios.len() != 3 {
        return Err(AgentError::SchemaViolation(format!(
            "expected exactly 3 scenarios, got {}",
            record.scenarios.len()
        )));
    }
    for kind in [ScenarioKind::Bull, ScenarioKind::Base, ScenarioKind::Bear] {
        if !record.scenarios.iter().any(|s| s.name == kind) {
            return Err(AgentError::SchemaViolation(format!(
                "missing {kind:?} scenario"
            )));
        }
    }
    if !record.probabilities_sum_ok() {
        let total: f64 = record.scenarios.iter().map(|s| s.probability).sum();
        return Err(AgentError::SchemaViolation(format!(
            "scenario probabilities sum to {total}, expected 1.0 +/- 0.01"
        )));
    }

    let evidence_ids: HashSet<&str> = request
        .accumulated_evidence
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    for case in [&record.bull_case, &record.bear_case] {
        if case.arguments.is_empty() {
            return Err(AgentError::SchemaViolation(
                "bull and bear cases need at least one argument".to_string(),
            ));
        }
        for argument in &case.arguments {
            if argument.evidence_ids.is_empty() {
                return Err(AgentError::SchemaViolation(format!(
                    "argument '{}' cites no evidence",
                    argument.argument
                )));
            }
            for id in &argument.evidence_ids {
                if !evidence_ids.contains(id.as_str()) {
                    return Err(AgentError::SchemaViolation(format!(
                        "argument cites unknown evidence id {id}"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FixtureProvider;
    use research_core::types::{
        EvidenceItem, Hypothesis, Impact, ImpactDirection, SourceType,
    };
    use serde_json::json;

    fn hypothesis() -> Hypothesis {
        Hypothesis {
            id: "h1".into(),
            title: "Margin inflection".into(),
            thesis: "Margins expand 300bps. Mix shift drives it.".into(),
            evidence_needed: vec![],
            impact: Impact::High,
            impact_rank: 1,
            confidence: 0.62,
            confidence_trajectory: vec![0.5, 0.62],
            uncertain: false,
        }
    }

    fn evidence(id: &str) -> EvidenceItem {
        EvidenceItem {
            id: id.into(),
            claim: "claim".into(),
            source_type: SourceType::TenK,
            source_reference: "ref".into(),
            quote: "quote".into(),
            confidence: 0.8,
            impact_direction: ImpactDirection::Positive,
            contradicts: vec![],
        }
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            hypothesis: hypothesis(),
            accumulated_evidence: vec![evidence("ev_001"), evidence("ev_002")],
            prior_synthesis: None,
            iteration: 3,
            confidence_trajectory: vec![0.5, 0.62],
        }
    }

    fn record_json() -> serde_json::Value {
        json!({
            "hypothesis_id": "h1",
            "checkpoint_iteration": 3,
            "bull_case": {
                "arguments": [
                    {"argument": "Reported margins already inflecting", "evidence_ids": ["ev_001"]},
                    {"argument": "Mix shift is structural", "evidence_ids": ["ev_002"]},
                    {"argument": "Competitors ceding share", "evidence_ids": ["ev_001"]}
                ],
                "strength": "strong",
                "confidence": 0.7
            },
            "bear_case": {
                "arguments": [
                    {"argument": "Guidance contradicts the trend", "evidence_ids": ["ev_002"]},
                    {"argument": "One-off cost timing flatters Q2", "evidence_ids": ["ev_001"]},
                    {"argument": "Pricing pressure re-emerging", "evidence_ids": ["ev_002"]}
                ],
                "strength": "moderate",
                "confidence": 0.45
            },
            "synthesis": {
                "insights": [
                    "Guidance conservatism is consistent with prior beats",
                    "Margin mix is driven by a segment the street does not model",
                    "Bear case depends on a cost reversal with no filing support"
                ],
                "tension_resolution": "Reported trend outweighs guided caution",
                "confidence_rationale": "Two independent filings confirm the inflection",
                "updated_confidence": 0.72
            },
            "scenarios": [
                {"name": "bull", "probability": 0.35, "conditions": "mix shift sustains"},
                {"name": "base", "probability": 0.45, "conditions": "partial sustain"},
                {"name": "bear", "probability": 0.20, "conditions": "cost reversal"}
            ]
        })
    }

    #[tokio::test]
    async fn parses_and_validates_record() {
        let provider = Arc::new(FixtureProvider::new());
        provider.push_json(WorkerKind::Synthesis, &record_json());

        let agent = SynthesisAgent::new(provider);
        let record = agent.call(&request()).await.unwrap().value;
        assert_eq!(record.synthesis.updated_confidence, 0.72);
    }

    #[test]
    fn rejects_bad_probability_sum() {
        let mut value = record_json();
        value["scenarios"][0]["probability"] = json!(0.5);
        let record: SynthesisRecord = serde_json::from_value(value).unwrap();
        assert!(validate_record(&record, &request()).is_err());
    }

    #[test]
    fn rejects_uncited_argument() {
        let mut value = record_json();
        value["bull_case"]["arguments"][0]["evidence_ids"] = json!([]);
        let record: SynthesisRecord = serde_json::from_value(value).unwrap();
        assert!(validate_record(&record, &request()).is_err());
    }

    #[test]
    fn rejects_unknown_evidence_citation() {
        let mut value = record_json();
        value["bull_case"]["arguments"][0]["evidence_ids"] = json!(["ev_404"]);
        let record: SynthesisRecord = serde_json::from_value(value).unwrap();
        assert!(validate_record(&record, &request()).is_err());
    }

    #[test]
    fn rejects_too_few_insights() {
        let mut value = record_json();
        value["synthesis"]["insights"] = json!(["only one"]);
        let record: SynthesisRecord = serde_json::from_value(value).unwrap();
        assert!(validate_record(&record, &request()).is_err());
    }

    #[test]
    fn rejects_missing_scenario_kind() {
        let mut value = record_json();
        value["scenarios"][2]["name"] = json!("base");
        let record: SynthesisRecord = serde_json::from_value(value).unwrap();
        assert!(validate_record(&record, &request()).is_err());
    }
}
