//! Worker-call glue: circuit breaker, per-call timeout, retry with backoff,
//! and start/end trace events around every invocation.

use std::time::{Duration, Instant};

use agent_client::{with_retry, AgentError, BreakerTable, Worker, WorkerOutput};
use research_core::error::ResearchError;
use research_core::trace::{TraceEvent, TraceKind, WorkerKind};
use serde_json::json;
use state_store::{content_hash, TraceWriter};

pub fn map_agent_error(kind: WorkerKind, err: AgentError) -> ResearchError {
    let worker = kind.as_str().to_string();
    match err {
        AgentError::Timeout(seconds) => ResearchError::WorkerTimeout { worker, seconds },
        AgentError::SchemaViolation(message) => ResearchError::SchemaViolation { worker, message },
        AgentError::CircuitOpen(_) => ResearchError::CircuitOpen { worker },
        AgentError::RequestFailed(message) | AgentError::FixtureExhausted(message) => {
            ResearchError::WorkerCallFailed { worker, message }
        }
    }
}

/// One guarded worker invocation. Produces at least two trace events (start,
/// end) or a start plus an error event.
pub async fn call_worker<W>(
    worker: &W,
    input: &W::Input,
    analysis_id: &str,
    timeout_secs: u64,
    breakers: &BreakerTable,
    trace: &TraceWriter,
) -> Result<WorkerOutput<W::Output>, ResearchError>
where
    W: Worker + ?Sized,
{
    let kind = worker.kind();
    let breaker = breakers.for_worker(kind);
    if breaker.try_acquire(kind.as_str()).is_err() {
        trace
            .append(
                &TraceEvent::new(
                    analysis_id,
                    TraceKind::Error,
                    json!({"reason": "circuit_open"}),
                )
                .with_agent(kind.as_str()),
            )
            .map_err(|e| ResearchError::State(e.to_string()))?;
        return Err(ResearchError::CircuitOpen {
            worker: kind.as_str().to_string(),
        });
    }

    let inputs_hash = content_hash(input);
    trace
        .append(
            &TraceEvent::new(analysis_id, TraceKind::AgentCall, json!({"phase": "start"}))
                .with_agent(kind.as_str())
                .with_hashes(Some(inputs_hash.clone()), None),
        )
        .map_err(|e| ResearchError::State(e.to_string()))?;

    let started = Instant::now();
    let result = with_retry(worker.retry_policy(), kind.as_str(), || async {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), worker.call(input)).await {
            Ok(inner) => inner,
            Err(_) => Err(AgentError::Timeout(timeout_secs)),
        }
    })
    .await;
    let duration = started.elapsed().as_secs_f64();

    match result {
        Ok(output) => {
            breaker.record_success();
            let outputs_hash = content_hash(&output.value);
            trace
                .append(
                    &TraceEvent::new(analysis_id, TraceKind::AgentCall, json!({"phase": "end"}))
                        .with_agent(kind.as_str())
                        .with_hashes(Some(inputs_hash), Some(outputs_hash))
                        .with_duration(duration)
                        .with_cost(output.cost_usd),
                )
                .map_err(|e| ResearchError::State(e.to_string()))?;
            Ok(output)
        }
        Err(err) => {
            breaker.record_failure();
            trace
                .append(
                    &TraceEvent::new(
                        analysis_id,
                        TraceKind::Error,
                        json!({"error": err.to_string()}),
                    )
                    .with_agent(kind.as_str())
                    .with_duration(duration),
                )
                .map_err(|e| ResearchError::State(e.to_string()))?;
            Err(map_agent_error(kind, err))
        }
    }
}
