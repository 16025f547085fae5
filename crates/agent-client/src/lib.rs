pub mod breaker;
pub mod error;
pub mod evaluator;
pub mod hypothesis;
pub mod narrative;
pub mod provider;
pub mod research;
pub mod retry;
pub mod synthesis;

pub use breaker::{BreakerTable, CircuitBreaker};
pub use error::{AgentError, AgentResult};
pub use evaluator::EvaluatorAgent;
pub use hypothesis::HypothesisAgent;
pub use narrative::NarrativeAgent;
pub use provider::{
    CompletionRequest, CompletionResponse, FixtureProvider, HttpLlmProvider, LlmProvider,
};
pub use research::ResearchAgent;
pub use retry::{with_retry, RetryPolicy};
pub use synthesis::SynthesisAgent;

use async_trait::async_trait;
use research_core::trace::WorkerKind;
use serde::Serialize;

/// A worker's validated output plus the cost of the underlying call, so the
/// trace stream can account for spend per invocation.
#[derive(Debug, Clone)]
pub struct WorkerOutput<T> {
    pub value: T,
    pub cost_usd: f64,
}

/// Common capability set shared by all five workers: a typed call, a kind
/// tag, and a retry policy. The orchestrator holds workers behind this trait
/// so recorded-fixture backends can swap in for tests.
#[async_trait]
pub trait Worker: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send;

    fn kind(&self) -> WorkerKind;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    async fn call(&self, input: &Self::Input) -> AgentResult<WorkerOutput<Self::Output>>;
}
