use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("No fixture recorded for {0}")]
    FixtureExhausted(String),
}

impl AgentError {
    /// Transient failures are retried; schema violations and open circuits
    /// are structural and fail the record immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::RequestFailed(_) | AgentError::Timeout(_))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout(0)
        } else {
            AgentError::RequestFailed(err.to_string())
        }
    }
}
