//! Per-worker-kind circuit breaker. Opens after three consecutive failures,
//! blocks calls for a cool-off interval, then admits one probe (half-open).
//! The table is a per-analysis singleton torn down with the analysis.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use research_core::trace::WorkerKind;

use crate::error::{AgentError, AgentResult};

#[derive(Debug)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cool_off: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_off: Duration) -> Self {
        Self {
            failure_threshold,
            cool_off,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Admit or reject a call. An open breaker past its cool-off transitions
    /// to half-open and admits exactly one probe.
    pub fn try_acquire(&self, worker: &str) -> AgentResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { since } => {
                if since.elapsed() >= self.cool_off {
                    *state = BreakerState::HalfOpen;
                    tracing::info!("circuit for {worker} half-open, admitting probe");
                    Ok(())
                } else {
                    Err(AgentError::CircuitOpen(worker.to_string()))
                }
            }
            BreakerState::HalfOpen => Err(AgentError::CircuitOpen(worker.to_string())),
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let failures = match &*state {
            BreakerState::Closed {
                consecutive_failures,
            } => consecutive_failures + 1,
            // A failed probe re-opens immediately.
            BreakerState::HalfOpen | BreakerState::Open { .. } => self.failure_threshold,
        };
        if failures >= self.failure_threshold {
            *state = BreakerState::Open {
                since: Instant::now(),
            };
        } else {
            *state = BreakerState::Closed {
                consecutive_failures: failures,
            };
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            &*self.state.lock().unwrap_or_else(|e| e.into_inner()),
            BreakerState::Open { .. }
        )
    }
}

/// One breaker per worker kind, created lazily.
pub struct BreakerTable {
    breakers: DashMap<WorkerKind, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    cool_off: Duration,
}

impl BreakerTable {
    pub fn new(failure_threshold: u32, cool_off: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            cool_off,
        }
    }

    pub fn for_worker(&self, kind: WorkerKind) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(kind)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(self.failure_threshold, self.cool_off))
            })
            .clone()
    }
}

impl Default for BreakerTable {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(120))
    }
}
