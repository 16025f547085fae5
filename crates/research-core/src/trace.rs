use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five worker kinds the orchestrator dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Hypothesis,
    Research,
    Synthesis,
    Narrative,
    Evaluator,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Hypothesis => "hypothesis",
            WorkerKind::Research => "research",
            WorkerKind::Synthesis => "synthesis",
            WorkerKind::Narrative => "narrative",
            WorkerKind::Evaluator => "evaluator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Planning,
    AgentCall,
    ToolCall,
    Evaluation,
    Checkpoint,
    Error,
}

/// Append-only trace record. The trace stream is the source of truth for
/// cost accounting and post-run debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub analysis_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: TraceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub details: serde_json::Value,
}

impl TraceEvent {
    pub fn new(analysis_id: &str, kind: TraceKind, details: serde_json::Value) -> Self {
        Self {
            analysis_id: analysis_id.to_string(),
            timestamp: Utc::now(),
            kind,
            agent: None,
            inputs_hash: None,
            outputs_hash: None,
            duration_s: None,
            cost_usd: None,
            details,
        }
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = Some(duration_s);
        self
    }

    pub fn with_hashes(mut self, inputs: Option<String>, outputs: Option<String>) -> Self {
        self.inputs_hash = inputs;
        self.outputs_hash = outputs;
        self
    }
}
