//! Deep research worker: extracts attributable evidence items from supplied
//! sources for one hypothesis. Returned evidence ids are provisional; the
//! orchestrator's allocator assigns the final sequence.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use research_core::agents::{ResearchFindings, ResearchRequest};
use research_core::trace::WorkerKind;

use crate::error::{AgentError, AgentResult};
use crate::provider::{extract_json, CompletionRequest, LlmProvider};
use crate::{Worker, WorkerOutput};

const SYSTEM_PROMPT: &str = "\
You are a forensic equity research associate. Extract attributable evidence \
for or against the given hypothesis from the supplied sources only. Every \
item needs a direct quote, a source reference, a confidence in [0,1] and an \
impact direction (+, -, unclear). Cross-reference new items against prior \
evidence and record contradictions. Respond with JSON only: \
{\"hypothesis_id\", \"evidence_items\": [...], \"sources_processed\", \
\"source_diversity\", \"contradictions\": [...]}.";

pub struct ResearchAgent {
    provider: Arc<dyn LlmProvider>,
}

impl ResearchAgent {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Worker for ResearchAgent {
    type Input = ResearchRequest;
    type Output = ResearchFindings;

    fn kind(&self) -> WorkerKind {
        WorkerKind::Research
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
        let findings: ResearchFindings = serde_json::from_value(value)
            .map_err(|e| AgentError::SchemaViolation(format!("research findings: {e}")))?;
        validate_findings(&findings, input)?;
        Ok(WorkerOutput {
            value: findings,
            cost_usd: response.cost_usd,
        })
    }
}

/// Enforce the research contract: matching hypothesis, confidences in range,
/// unique provisional ids, contradiction references resolvable against the
/// returned or prior set.
pub fn validate_findings(
    findings: &ResearchFindings,
    request: &ResearchRequest,
) -> AgentResult<()> {
    if findings.hypothesis_id != request.hypothesis.id {
        return Err(AgentError::SchemaViolation(format!(
            "findings for {} but {} was requested",
            findings.hypothesis_id, request.hypothesis.id
        )));
    }

    let mut known: HashSet<&str> = request
        .prior_evidence
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    for item in &findings.evidence_items {
        if !known.insert(item.id.as_str()) {
            return Err(AgentError::SchemaViolation(format!(
                "duplicate evidence id {}",
                item.id
            )));
        }
    }

    for item in &findings.evidence_items {
        if !(0.0..=1.0).contains(&item.confidence) {
            return Err(AgentError::SchemaViolation(format!(
                "evidence {} confidence {} outside [0,1]",
                item.id, item.confidence
            )));
        }
        for target in &item.contradicts {
            if !known.contains(target.as_str()) {
                return Err(AgentError::SchemaViolation(format!(
                    "evidence {} contradicts unknown id {target}",
                    item.id
                )));
            }
        }
    }

    for contradiction in &findings.contradictions {
        for id in [&contradiction.evidence_a, &contradiction.evidence_b] {
            if !known.contains(id.as_str()) {
                return Err(AgentError::SchemaViolation(format!(
                    "contradiction references unknown id {id}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FixtureProvider;
    use research_core::types::{Hypothesis, Impact};
    use serde_json::json;

    fn hypothesis() -> Hypothesis {
        Hypothesis {
            id: "h1".into(),
            title: "Margin inflection".into(),
            thesis: "Margins expand 300bps. Mix shift drives it.".into(),
            evidence_needed: vec!["segment data".into()],
            impact: Impact::High,
            impact_rank: 1,
            confidence: 0.5,
            confidence_trajectory: vec![],
            uncertain: false,
        }
    }

    fn request() -> ResearchRequest {
        ResearchRequest {
            hypothesis: hypothesis(),
            prior_evidence: vec![],
            sources: vec![],
        }
    }

    fn findings_json() -> serde_json::Value {
        json!({
            "hypothesis_id": "h1",
            "evidence_items": [
                {
                    "id": "r1",
                    "claim": "Gross margin rose 180bps YoY",
                    "source_type": "10-Q",
                    "source_reference": "Q2 FY26 10-Q p.12",
                    "quote": "gross margin of 44.1%, up from 42.3%",
                    "confidence": 0.85,
                    "impact_direction": "+",
                    "contradicts": []
                },
                {
                    "id": "r2",
                    "claim": "Management guided margins flat",
                    "source_type": "transcript",
                    "source_reference": "Q2 FY26 earnings call",
                    "quote": "we expect margins roughly flat",
                    "confidence": 0.7,
                    "impact_direction": "-",
                    "contradicts": ["r1"]
                }
            ],
            "sources_processed": 2,
            "source_diversity": 2,
            "contradictions": [
                {"evidence_a": "r1", "evidence_b": "r2", "nature": "guidance vs reported"}
            ]
        })
    }

    #[tokio::test]
    async fn parses_and_validates_findings() {
        let provider = Arc::new(FixtureProvider::new());
        provider.push_json(WorkerKind::Research, &findings_json());

        let agent = ResearchAgent::new(provider);
        let findings = agent.call(&request()).await.unwrap().value;
        assert_eq!(findings.evidence_items.len(), 2);
        assert_eq!(findings.contradictions.len(), 1);
    }

    #[test]
    fn rejects_mismatched_hypothesis() {
        let mut value = findings_json();
        value["hypothesis_id"] = json!("h9");
        let findings: ResearchFindings = serde_json::from_value(value).unwrap();
        assert!(validate_findings(&findings, &request()).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut value = findings_json();
        value["evidence_items"][0]["confidence"] = json!(1.2);
        let findings: ResearchFindings = serde_json::from_value(value).unwrap();
        assert!(validate_findings(&findings, &request()).is_err());
    }

    #[test]
    fn rejects_unresolvable_contradiction_reference() {
        let mut value = findings_json();
        value["evidence_items"][1]["contradicts"] = json!(["ghost"]);
        let findings: ResearchFindings = serde_json::from_value(value).unwrap();
        assert!(validate_findings(&findings, &request()).is_err());
    }
}
