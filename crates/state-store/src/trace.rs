//! Append-only reasoning trace. One newline-delimited JSON stream per
//! analysis plus a derived per-agent stream; single writer per analysis.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};

use research_core::trace::TraceEvent;

use crate::store::StateError;

/// Short content hash for inputs/outputs attribution in trace events.
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&body);
    hex::encode(&digest[..8])
}

pub struct TraceWriter {
    logs_dir: PathBuf,
    /// Running cost sum; the budget governor reads this instead of re-parsing
    /// the stream.
    cost_usd: Mutex<f64>,
}

impl TraceWriter {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let logs_dir = logs_dir.into();
        fs::create_dir_all(&logs_dir)?;
        Ok(Self {
            logs_dir,
            cost_usd: Mutex::new(0.0),
        })
    }

    /// Recover the cost meter from an existing trace (resume path).
    pub fn resume(logs_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let writer = Self::new(logs_dir)?;
        let full = writer.logs_dir.join("full_trace.jsonl");
        if full.exists() {
            let mut recovered = 0.0;
            for line in fs::read_to_string(&full)?.lines() {
                if let Ok(event) = serde_json::from_str::<TraceEvent>(line) {
                    recovered += event.cost_usd.unwrap_or(0.0);
                }
            }
            *writer.cost_usd.lock().unwrap_or_else(|e| e.into_inner()) = recovered;
        }
        Ok(writer)
    }

    pub fn append(&self, event: &TraceEvent) -> Result<(), StateError> {
        let line = serde_json::to_string(event)?;
        self.append_line(&self.logs_dir.join("full_trace.jsonl"), &line)?;
        if let Some(agent) = &event.agent {
            self.append_line(
                &self.logs_dir.join(format!("agent_{agent}.jsonl")),
                &line,
            )?;
        }
        if let Some(cost) = event.cost_usd {
            *self.cost_usd.lock().unwrap_or_else(|e| e.into_inner()) += cost;
        }
        Ok(())
    }

    fn append_line(&self, path: &PathBuf, line: &str) -> Result<(), StateError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    pub fn total_cost(&self) -> f64 {
        *self.cost_usd.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::trace::TraceKind;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(kind: TraceKind, agent: Option<&str>, cost: Option<f64>) -> TraceEvent {
        let mut e = TraceEvent::new("a1", kind, json!({"note": "test"}));
        if let Some(a) = agent {
            e = e.with_agent(a);
        }
        if let Some(c) = cost {
            e = e.with_cost(c);
        }
        e
    }

    #[test]
    fn events_append_as_jsonl() {
        let dir = tempdir().unwrap();
        let writer = TraceWriter::new(dir.path().join("logs")).unwrap();

        writer.append(&event(TraceKind::Planning, None, None)).unwrap();
        writer
            .append(&event(TraceKind::AgentCall, Some("research"), Some(0.25)))
            .unwrap();

        let body = fs::read_to_string(dir.path().join("logs/full_trace.jsonl")).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let parsed: TraceEvent = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.analysis_id, "a1");
        }

        // Agent-scoped derived stream.
        let agent_body =
            fs::read_to_string(dir.path().join("logs/agent_research.jsonl")).unwrap();
        assert_eq!(agent_body.lines().count(), 1);
    }

    #[test]
    fn cost_accumulates_and_survives_resume() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        {
            let writer = TraceWriter::new(&logs).unwrap();
            writer
                .append(&event(TraceKind::AgentCall, Some("research"), Some(0.30)))
                .unwrap();
            writer
                .append(&event(TraceKind::ToolCall, None, Some(0.05)))
                .unwrap();
            assert!((writer.total_cost() - 0.35).abs() < 1e-12);
        }
        let resumed = TraceWriter::resume(&logs).unwrap();
        assert!((resumed.total_cost() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(&json!({"x": 1}));
        let b = content_hash(&json!({"x": 1}));
        let c = content_hash(&json!({"x": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
