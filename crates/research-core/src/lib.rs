pub mod agents;
pub mod config;
pub mod error;
pub mod report;
pub mod trace;
pub mod types;
pub mod valuation;

pub use agents::{
    Contradiction, EnrichedContext, Evaluation, EvaluationCriteria, EvaluationRequest,
    EvaluationType, EvidenceDraft, HypothesisBatch, HypothesisDraft, HypothesisRequest,
    NarrativeRequest, ResearchFindings, ResearchRequest, SourceDocument, SynthesisRequest,
};
pub use config::EngineConfig;
pub use error::ResearchError;
pub use report::{
    Action, Conviction, FinalReport, Recommendation, ReportSection, ValuationScenario,
    ValuationSection,
};
pub use trace::{TraceEvent, TraceKind, WorkerKind};
pub use types::{
    AnalysisHistory, AnalysisState, AnalysisStatus, CaseArgument, CaseStrength, DialecticalCase,
    EvidenceBundle, EvidenceItem, Hypothesis, Impact, ImpactDirection, IterationCompressed,
    IterationDetail, IterationRecord, IterationSummary, Scenario, ScenarioKind, SourceType,
    SynthesisBody, SynthesisRecord, assign_impact_ranks,
};
pub use valuation::{ValuationInputs, ValuationResult, ValuationSeries};
