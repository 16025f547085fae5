//! Typed request/response payloads for the five worker agents. The workers
//! themselves are black-box language-model calls; these records are the
//! contract the orchestrator holds with each.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    EvidenceItem, Hypothesis, Impact, ImpactDirection, IterationCompressed, SourceType,
    SynthesisRecord,
};
use crate::valuation::ValuationResult;

/// Context retrieved from the memory layer and injected into prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedContext {
    pub prior_analyses: Vec<String>,
    pub personal_notes: Vec<String>,
    pub trusted_insights: Vec<String>,
}

impl EnrichedContext {
    pub fn is_empty(&self) -> bool {
        self.prior_analyses.is_empty()
            && self.personal_notes.is_empty()
            && self.trusted_insights.is_empty()
    }
}

// -- Hypothesis generator ----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisRequest {
    pub company: String,
    pub ticker: String,
    pub previous_hypothesis_titles: Vec<String>,
    pub research_gaps: Vec<String>,
    pub iteration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched_context: Option<EnrichedContext>,
}

/// A hypothesis as returned by the generator, before ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisDraft {
    pub id: String,
    pub title: String,
    pub thesis: String,
    pub evidence_needed: Vec<String>,
    pub impact: Impact,
}

impl HypothesisDraft {
    pub fn into_hypothesis(self) -> Hypothesis {
        Hypothesis {
            id: self.id,
            title: self.title,
            thesis: self.thesis,
            evidence_needed: self.evidence_needed,
            impact: self.impact,
            impact_rank: 0,
            confidence: 0.5,
            confidence_trajectory: Vec::new(),
            uncertain: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisBatch {
    pub hypotheses: Vec<HypothesisDraft>,
}

// -- Deep research -----------------------------------------------------------

/// One source descriptor handed to the research agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub title: String,
    pub source_type: SourceType,
    pub reference: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub hypothesis: Hypothesis,
    pub prior_evidence: Vec<EvidenceItem>,
    pub sources: Vec<SourceDocument>,
}

/// Evidence as returned by the research agent. Ids are provisional, local to
/// the response; the orchestrator's allocator assigns the final `ev_NNN` ids
/// and rewrites `contradicts` references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDraft {
    pub id: String,
    pub claim: String,
    pub source_type: SourceType,
    pub source_reference: String,
    pub quote: String,
    pub confidence: f64,
    pub impact_direction: ImpactDirection,
    #[serde(default)]
    pub contradicts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub evidence_a: String,
    pub evidence_b: String,
    pub nature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchFindings {
    pub hypothesis_id: String,
    pub evidence_items: Vec<EvidenceDraft>,
    pub sources_processed: usize,
    pub source_diversity: usize,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
}

// -- Dialectical synthesis ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub hypothesis: Hypothesis,
    pub accumulated_evidence: Vec<EvidenceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_synthesis: Option<SynthesisRecord>,
    pub iteration: u32,
    pub confidence_trajectory: Vec<f64>,
}

// -- Narrative builder -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub ticker: String,
    pub company: String,
    pub validated_hypotheses: Vec<Hypothesis>,
    pub evidence: Vec<EvidenceItem>,
    pub synthesis_records: Vec<SynthesisRecord>,
    pub valuation_result: ValuationResult,
    pub current_price: f64,
    pub compressed_history: Vec<IterationCompressed>,
    /// Degradations to disclose in a limitations section.
    #[serde(default)]
    pub limitations: Vec<String>,
}

// -- Evaluator ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    Iteration,
    Final,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    pub dimensions: Vec<String>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub evaluation_type: EvaluationType,
    pub output: serde_json::Value,
    pub criteria: EvaluationCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall_score: f64,
    pub dimensions: BTreeMap<String, f64>,
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}
