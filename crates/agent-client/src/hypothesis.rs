//! Hypothesis generation worker: turns company context and research gaps
//! into at least five falsifiable, quantified investment hypotheses.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use research_core::agents::{HypothesisBatch, HypothesisRequest};
use research_core::trace::WorkerKind;

use crate::error::{AgentError, AgentResult};
use crate::provider::{extract_json, CompletionRequest, LlmProvider};
use crate::{Worker, WorkerOutput};

const SYSTEM_PROMPT: &str = "\
You are an institutional equity research analyst generating testable \
investment hypotheses. Each hypothesis must be falsifiable, specific to the \
company, and carry a quantified thesis (a number, percentage, or timeframe). \
Respond with JSON only: {\"hypotheses\": [{\"id\", \"title\", \"thesis\", \
\"evidence_needed\", \"impact\"}]}. Titles are at most 15 words. The thesis \
is exactly two sentences. impact is one of HIGH, MEDIUM, LOW. Generate at \
least 5 hypotheses and never repeat a previous title.";

pub struct HypothesisAgent {
    provider: Arc<dyn LlmProvider>,
}

impl HypothesisAgent {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Worker for HypothesisAgent {
    type Input = HypothesisRequest;
    type Output = HypothesisBatch;

    fn kind(&self) -> WorkerKind {
        WorkerKind::Hypothesis
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
        let batch: HypothesisBatch = serde_json::from_value(value)
            .map_err(|e| AgentError::SchemaViolation(format!("hypothesis batch: {e}")))?;
        validate_batch(&batch, &input.previous_hypothesis_titles)?;
        Ok(WorkerOutput {
            value: batch,
            cost_usd: response.cost_usd,
        })
    }
}

/// Enforce the generator contract: at least five hypotheses, unique ids,
/// bounded titles, quantified two-sentence theses, no recycled titles.
pub fn validate_batch(
    batch: &HypothesisBatch,
    previous_titles: &[String],
) -> AgentResult<()> {
    if batch.hypotheses.len() < 5 {
        return Err(AgentError::SchemaViolation(format!(
            "expected >= 5 hypotheses, got {}",
            batch.hypotheses.len()
        )));
    }

    let mut ids = HashSet::new();
    let previous: HashSet<String> = previous_titles
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    for draft in &batch.hypotheses {
        if !ids.insert(draft.id.clone()) {
            return Err(AgentError::SchemaViolation(format!(
                "duplicate hypothesis id {}",
                draft.id
            )));
        }
        let words = draft.title.split_whitespace().count();
        if words == 0 || words > 15 {
            return Err(AgentError::SchemaViolation(format!(
                "title '{}' has {words} words (limit 15)",
                draft.title
            )));
        }
        if previous.contains(&draft.title.to_lowercase()) {
            return Err(AgentError::SchemaViolation(format!(
                "title '{}' duplicates a previous hypothesis",
                draft.title
            )));
        }
        if !has_quantifier(&draft.thesis) {
            return Err(AgentError::SchemaViolation(format!(
                "thesis for {} lacks a concrete quantifier",
                draft.id
            )));
        }
        if sentence_count(&draft.thesis) < 2 {
            return Err(AgentError::SchemaViolation(format!(
                "thesis for {} is not two sentences",
                draft.id
            )));
        }
    }
    Ok(())
}

fn has_quantifier(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit()) || text.contains('%')
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}
