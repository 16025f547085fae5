use thiserror::Error;

/// Engine-level error taxonomy. Transient worker failures are retried by the
/// caller; schema violations and circuit-open short-circuits degrade the
/// affected hypothesis without aborting the analysis. Only `Fatal` terminates.
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("Worker {worker} call failed: {message}")]
    WorkerCallFailed { worker: String, message: String },

    #[error("Worker {worker} timed out after {seconds}s")]
    WorkerTimeout { worker: String, seconds: u64 },

    #[error("Worker {worker} schema violation: {message}")]
    SchemaViolation { worker: String, message: String },

    #[error("Circuit open for worker {worker}")]
    CircuitOpen { worker: String },

    #[error("Budget exhausted: projected ${projected:.2} exceeds ${budget:.2}")]
    BudgetExhausted { projected: f64, budget: f64 },

    #[error("External data fetch failed: {0}")]
    DataFetch(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl ResearchError {
    /// Transient errors are eligible for retry; everything else is structural.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResearchError::WorkerCallFailed { .. } | ResearchError::WorkerTimeout { .. }
        )
    }
}
