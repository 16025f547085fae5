use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ResearchError;

/// Lifecycle status of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Running,
    Completed,
    Failed,
}

/// Impact tier of a hypothesis on the investment decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    High,
    Medium,
    Low,
}

/// A falsifiable investment claim tracked across iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub title: String,
    pub thesis: String,
    pub evidence_needed: Vec<String>,
    pub impact: Impact,
    /// Strict 1..N ordering: HIGH before MEDIUM before LOW, ties by insertion order.
    pub impact_rank: usize,
    pub confidence: f64,
    pub confidence_trajectory: Vec<f64>,
    /// Set when repeated worker failures left this hypothesis under-researched.
    #[serde(default)]
    pub uncertain: bool,
}

impl Hypothesis {
    pub fn title_word_count(&self) -> usize {
        self.title.split_whitespace().count()
    }
}

/// Recompute `impact_rank` for the full hypothesis set: HIGH before MEDIUM
/// before LOW, insertion order within a tier. Stable sort preserves ties.
pub fn assign_impact_ranks(hypotheses: &mut [Hypothesis]) {
    let mut order: Vec<usize> = (0..hypotheses.len()).collect();
    order.sort_by_key(|&i| hypotheses[i].impact);
    for (rank, idx) in order.into_iter().enumerate() {
        hypotheses[idx].impact_rank = rank + 1;
    }
}

/// Document category an evidence item was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
    #[serde(rename = "8-K")]
    EightK,
    #[serde(rename = "transcript")]
    Transcript,
    #[serde(rename = "news")]
    News,
    #[serde(rename = "analyst")]
    Analyst,
    #[serde(rename = "prior_knowledge")]
    PriorKnowledge,
    #[serde(rename = "other")]
    Other,
}

/// Direction an evidence item pushes the hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactDirection {
    #[serde(rename = "+")]
    Positive,
    #[serde(rename = "-")]
    Negative,
    #[serde(rename = "unclear")]
    Unclear,
}

/// One attributable claim extracted from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub claim: String,
    pub source_type: SourceType,
    pub source_reference: String,
    pub quote: String,
    pub confidence: f64,
    pub impact_direction: ImpactDirection,
    /// Symmetric contradiction graph; cycles are legal.
    #[serde(default)]
    pub contradicts: Vec<String>,
}

/// Append-only evidence, grouped per hypothesis. Items never mutate after
/// insertion; ids are unique across the whole analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceBundle {
    items: BTreeMap<String, Vec<EvidenceItem>>,
}

impl EvidenceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one item under a hypothesis. Duplicate ids raise.
    pub fn append(&mut self, hypothesis_id: &str, item: EvidenceItem) -> Result<(), ResearchError> {
        if self.contains_id(&item.id) {
            return Err(ResearchError::State(format!(
                "duplicate evidence id {}",
                item.id
            )));
        }
        self.items
            .entry(hypothesis_id.to_string())
            .or_default()
            .push(item);
        Ok(())
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.items.values().flatten().any(|item| item.id == id)
    }

    pub fn for_hypothesis(&self, hypothesis_id: &str) -> &[EvidenceItem] {
        self.items
            .get(hypothesis_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_items(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.values().flatten()
    }

    pub fn all_ids(&self) -> BTreeSet<String> {
        self.all_items().map(|item| item.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct source types gathered for one hypothesis (research quality floor).
    pub fn source_diversity(&self, hypothesis_id: &str) -> usize {
        self.for_hypothesis(hypothesis_id)
            .iter()
            .map(|item| item.source_type)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Every `contradicts` reference must point at an existing item.
    /// The graph may contain cycles; only existence is checked.
    pub fn check_contradiction_refs(&self) -> Result<(), ResearchError> {
        let ids = self.all_ids();
        for item in self.all_items() {
            for target in &item.contradicts {
                if !ids.contains(target) {
                    return Err(ResearchError::State(format!(
                        "evidence {} contradicts unknown id {}",
                        item.id, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Ids of items involved in a contradiction edge with no counter-evidence
    /// resolution recorded yet. Feeds refinement.
    pub fn unresolved_contradictions(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut seen = BTreeSet::new();
        for item in self.all_items() {
            for target in &item.contradicts {
                let key = if item.id < *target {
                    (item.id.clone(), target.clone())
                } else {
                    (target.clone(), item.id.clone())
                };
                if seen.insert(key.clone()) {
                    pairs.push(key);
                }
            }
        }
        pairs
    }
}

/// Qualitative strength of a bull or bear case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStrength {
    Strong,
    Moderate,
    Weak,
}

/// One argument inside a bull or bear case, tied to supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseArgument {
    pub argument: String,
    pub evidence_ids: Vec<String>,
}

/// One side of the dialectic: 3-5 evidence-cited arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialecticalCase {
    pub arguments: Vec<CaseArgument>,
    pub strength: CaseStrength,
    pub confidence: f64,
}

/// The resolution of bull vs bear tension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisBody {
    pub insights: Vec<String>,
    pub tension_resolution: String,
    pub confidence_rationale: String,
    pub updated_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    Bull,
    Base,
    Bear,
}

/// One of the three probability-weighted cases produced at a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: ScenarioKind,
    pub probability: f64,
    pub conditions: String,
}

/// Tolerance for the scenario probability law.
pub const SCENARIO_PROBABILITY_TOLERANCE: f64 = 0.01;

pub fn scenario_probabilities_sum_ok(probabilities: impl Iterator<Item = f64>) -> bool {
    (probabilities.sum::<f64>() - 1.0).abs() <= SCENARIO_PROBABILITY_TOLERANCE
}

/// Output of one checkpoint synthesis on one hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub hypothesis_id: String,
    pub checkpoint_iteration: u32,
    pub bull_case: DialecticalCase,
    pub bear_case: DialecticalCase,
    pub synthesis: SynthesisBody,
    pub scenarios: Vec<Scenario>,
}

impl SynthesisRecord {
    pub fn probabilities_sum_ok(&self) -> bool {
        scenario_probabilities_sum_ok(self.scenarios.iter().map(|s| s.probability))
    }
}

/// State captured at the end of one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub duration_s: f64,
    pub hypotheses_generated: usize,
    pub hypotheses_validated: usize,
    pub confidence: f64,
    pub quality_score: f64,
    pub cost_usd: f64,
    /// Evidence produced this iteration.
    pub evidence_ids: Vec<String>,
    /// Hypotheses synthesized this iteration (empty off-checkpoint).
    pub synthesized_hypotheses: Vec<String>,
}

/// L1: full-resolution snapshot of one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationDetail {
    pub record: IterationRecord,
    pub hypotheses: Vec<Hypothesis>,
    pub evidence: Vec<EvidenceItem>,
    pub syntheses: Vec<SynthesisRecord>,
}

/// L2: titles, top insights and scores only; full-text bodies dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationCompressed {
    pub iteration: u32,
    pub hypothesis_titles: Vec<String>,
    pub top_insights: Vec<String>,
    pub synthesis_summaries: Vec<String>,
    pub confidence: f64,
    pub quality_score: f64,
}

/// L3: iteration number, final confidence, breakthrough insights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub confidence: f64,
    pub breakthrough_insights: Vec<String>,
}

const L1_WINDOW: usize = 3;
const L2_WINDOW: usize = 7;
const TOP_INSIGHTS: usize = 3;

/// Three-resolution iteration history. L1 holds the most recent three
/// iterations in full, L2 the next seven compressed, L3 everything older as
/// one-line summaries. Raw per-iteration files persisted by the state store
/// remain the full-fidelity copy; this structure is the working view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisHistory {
    pub recent: Vec<IterationDetail>,
    pub compressed: Vec<IterationCompressed>,
    pub archive: Vec<IterationSummary>,
}

impl AnalysisHistory {
    /// Append the latest iteration and cascade older entries across the
    /// L1/L2 and L2/L3 boundaries.
    pub fn push(&mut self, detail: IterationDetail) {
        self.recent.push(detail);
        while self.recent.len() > L1_WINDOW {
            let oldest = self.recent.remove(0);
            self.compressed.push(compress_iteration(&oldest));
        }
        while self.compressed.len() > L2_WINDOW {
            let oldest = self.compressed.remove(0);
            self.archive.push(summarize_iteration(&oldest));
        }
    }

    pub fn latest(&self) -> Option<&IterationDetail> {
        self.recent.last()
    }

    pub fn len(&self) -> usize {
        self.recent.len() + self.compressed.len() + self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact rendering handed to the narrative builder.
    pub fn compressed_view(&self) -> Vec<IterationCompressed> {
        let mut view: Vec<IterationCompressed> = self
            .archive
            .iter()
            .map(|s| IterationCompressed {
                iteration: s.iteration,
                hypothesis_titles: Vec::new(),
                top_insights: s.breakthrough_insights.clone(),
                synthesis_summaries: Vec::new(),
                confidence: s.confidence,
                quality_score: 0.0,
            })
            .collect();
        view.extend(self.compressed.iter().cloned());
        view.extend(self.recent.iter().map(compress_iteration));
        view
    }
}

/// L1 -> L2: keep titles, top insights, synthesis one-liners, scores.
pub fn compress_iteration(detail: &IterationDetail) -> IterationCompressed {
    let mut insights: Vec<String> = detail
        .syntheses
        .iter()
        .flat_map(|s| s.synthesis.insights.iter().cloned())
        .collect();
    insights.truncate(TOP_INSIGHTS);

    IterationCompressed {
        iteration: detail.record.iteration,
        hypothesis_titles: detail.hypotheses.iter().map(|h| h.title.clone()).collect(),
        top_insights: insights,
        synthesis_summaries: detail
            .syntheses
            .iter()
            .map(|s| {
                format!(
                    "{}: {} (confidence {:.2})",
                    s.hypothesis_id, s.synthesis.tension_resolution, s.synthesis.updated_confidence
                )
            })
            .collect(),
        confidence: detail.record.confidence,
        quality_score: detail.record.quality_score,
    }
}

/// L2 -> L3: iteration number, confidence, up to three breakthrough insights.
pub fn summarize_iteration(compressed: &IterationCompressed) -> IterationSummary {
    let mut insights = compressed.top_insights.clone();
    insights.truncate(TOP_INSIGHTS);
    IterationSummary {
        iteration: compressed.iteration,
        confidence: compressed.confidence,
        breakthrough_insights: insights,
    }
}

/// Persisted root state of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    pub analysis_id: String,
    pub ticker: String,
    pub company_name: String,
    pub started_at: DateTime<Utc>,
    pub status: AnalysisStatus,
    pub config: EngineConfig,
    pub current_iteration: u32,
    pub overall_confidence: f64,
    pub cumulative_cost_usd: f64,
    pub hypotheses: Vec<Hypothesis>,
    pub history: AnalysisHistory,
    /// Gaps carried into the next iteration's hypothesis step.
    #[serde(default)]
    pub research_gaps: Vec<String>,
    /// Per-iteration quality scores, for the plateau stop criterion.
    #[serde(default)]
    pub quality_scores: Vec<f64>,
}

impl AnalysisState {
    pub fn new(analysis_id: String, ticker: String, company_name: String, config: EngineConfig) -> Self {
        Self {
            analysis_id,
            ticker,
            company_name,
            started_at: Utc::now(),
            status: AnalysisStatus::Running,
            config,
            current_iteration: 0,
            overall_confidence: 0.0,
            cumulative_cost_usd: 0.0,
            hypotheses: Vec::new(),
            history: AnalysisHistory::default(),
            research_gaps: Vec::new(),
            quality_scores: Vec::new(),
        }
    }

    pub fn hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }

    pub fn hypothesis_mut(&mut self, id: &str) -> Option<&mut Hypothesis> {
        self.hypotheses.iter_mut().find(|h| h.id == id)
    }

    pub fn all_titles(&self) -> Vec<String> {
        self.hypotheses.iter().map(|h| h.title.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypothesis(id: &str, impact: Impact, confidence: f64) -> Hypothesis {
        Hypothesis {
            id: id.to_string(),
            title: format!("Hypothesis {id}"),
            thesis: "Test thesis. Two sentences with 10% growth.".to_string(),
            evidence_needed: vec!["filings".into(), "guidance".into(), "pricing".into()],
            impact,
            impact_rank: 0,
            confidence,
            confidence_trajectory: vec![confidence],
            uncertain: false,
        }
    }

    fn evidence(id: &str, contradicts: Vec<&str>) -> EvidenceItem {
        EvidenceItem {
            id: id.to_string(),
            claim: "Revenue grew 12% YoY".to_string(),
            source_type: SourceType::TenK,
            source_reference: "FY2025 10-K p.41".to_string(),
            quote: "Total revenue increased 12%".to_string(),
            confidence: 0.8,
            impact_direction: ImpactDirection::Positive,
            contradicts: contradicts.into_iter().map(String::from).collect(),
        }
    }

    fn detail(n: u32) -> IterationDetail {
        IterationDetail {
            record: IterationRecord {
                iteration: n,
                duration_s: 10.0,
                hypotheses_generated: 5,
                hypotheses_validated: 2,
                confidence: 0.5 + n as f64 * 0.01,
                quality_score: 0.7,
                cost_usd: 0.5,
                evidence_ids: vec![],
                synthesized_hypotheses: vec![],
            },
            hypotheses: vec![hypothesis("h1", Impact::High, 0.6)],
            evidence: vec![],
            syntheses: vec![],
        }
    }

    #[test]
    fn impact_ranks_order_high_before_medium_before_low() {
        let mut hs = vec![
            hypothesis("h1", Impact::Medium, 0.5),
            hypothesis("h2", Impact::High, 0.5),
            hypothesis("h3", Impact::Low, 0.5),
            hypothesis("h4", Impact::High, 0.5),
        ];
        assign_impact_ranks(&mut hs);
        // h2 and h4 are HIGH: insertion order breaks the tie.
        assert_eq!(hs[1].impact_rank, 1); // h2
        assert_eq!(hs[3].impact_rank, 2); // h4
        assert_eq!(hs[0].impact_rank, 3); // h1 MEDIUM
        assert_eq!(hs[2].impact_rank, 4); // h3 LOW
    }

    #[test]
    fn bundle_rejects_duplicate_ids() {
        let mut bundle = EvidenceBundle::new();
        bundle.append("h1", evidence("ev_001", vec![])).unwrap();
        let err = bundle.append("h2", evidence("ev_001", vec![]));
        assert!(err.is_err());
    }

    #[test]
    fn contradiction_refs_must_resolve_and_cycles_are_legal() {
        let mut bundle = EvidenceBundle::new();
        bundle.append("h1", evidence("ev_001", vec!["ev_002"])).unwrap();
        bundle.append("h1", evidence("ev_002", vec!["ev_001"])).unwrap();
        bundle.check_contradiction_refs().unwrap();

        bundle.append("h1", evidence("ev_003", vec!["ev_999"])).unwrap();
        assert!(bundle.check_contradiction_refs().is_err());
    }

    #[test]
    fn history_cascades_across_layer_boundaries() {
        let mut history = AnalysisHistory::default();
        for n in 1..=12 {
            history.push(detail(n));
        }
        // 12 iterations: 3 full, 7 compressed, 2 archived.
        assert_eq!(history.recent.len(), 3);
        assert_eq!(history.compressed.len(), 7);
        assert_eq!(history.archive.len(), 2);
        assert_eq!(history.recent[0].record.iteration, 10);
        assert_eq!(history.compressed[0].iteration, 3);
        assert_eq!(history.archive[0].iteration, 1);
    }

    #[test]
    fn compression_only_drops_information() {
        let d = detail(5);
        let compressed = compress_iteration(&d);
        assert_eq!(compressed.hypothesis_titles.len(), d.hypotheses.len());
        assert!(compressed.top_insights.len() <= 3);
        let summary = summarize_iteration(&compressed);
        assert!(summary.breakthrough_insights.len() <= compressed.top_insights.len().max(3));
        assert_eq!(summary.iteration, 5);
    }

    #[test]
    fn scenario_probability_law() {
        assert!(scenario_probabilities_sum_ok([0.25, 0.5, 0.25].into_iter()));
        assert!(scenario_probabilities_sum_ok([0.25, 0.505, 0.25].into_iter()));
        assert!(!scenario_probabilities_sum_ok([0.3, 0.5, 0.3].into_iter()));
    }

    #[test]
    fn source_type_wire_format() {
        let json = serde_json::to_string(&SourceType::TenK).unwrap();
        assert_eq!(json, "\"10-K\"");
        let dir = serde_json::to_string(&ImpactDirection::Positive).unwrap();
        assert_eq!(dir, "\"+\"");
    }
}
