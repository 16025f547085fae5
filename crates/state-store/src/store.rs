//! Per-analysis persisted state. Layout:
//!
//! ```text
//! <work_dir>/memory/<analysis_id>/
//!   analysis_state.json
//!   iteration_01.json ...
//!   validated_hypotheses.json
//!   evidence_bundle.json
//!   final_report.json
//! ```
//!
//! Every write is atomic (temp file in the same directory, then rename) and
//! every file is newline-terminated JSON. Raw iteration files are write-once;
//! the hierarchical history inside `analysis_state.json` is the working view
//! and is always reconstructible from the raw files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use research_core::report::FinalReport;
use research_core::types::{
    AnalysisHistory, AnalysisState, EvidenceBundle, Hypothesis, IterationDetail,
};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt state: {0}")]
    Corrupt(String),
}

pub struct StateStore {
    work_dir: PathBuf,
}

impl StateStore {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn memory_dir(&self, analysis_id: &str) -> PathBuf {
        self.work_dir.join("memory").join(analysis_id)
    }

    pub fn logs_dir(&self, analysis_id: &str) -> PathBuf {
        self.work_dir.join("logs").join(analysis_id)
    }

    /// Create the per-analysis directories.
    pub fn init_analysis(&self, analysis_id: &str) -> Result<(), StateError> {
        fs::create_dir_all(self.memory_dir(analysis_id))?;
        fs::create_dir_all(self.logs_dir(analysis_id))?;
        Ok(())
    }

    pub fn save_analysis_state(&self, state: &AnalysisState) -> Result<(), StateError> {
        let path = self.memory_dir(&state.analysis_id).join("analysis_state.json");
        atomic_write_json(&path, state)
    }

    pub fn load_analysis_state(&self, analysis_id: &str) -> Result<Option<AnalysisState>, StateError> {
        load_json(&self.memory_dir(analysis_id).join("analysis_state.json"))
    }

    fn iteration_path(&self, analysis_id: &str, iteration: u32) -> PathBuf {
        self.memory_dir(analysis_id)
            .join(format!("iteration_{iteration:02}.json"))
    }

    /// Persist the full-resolution snapshot for one iteration. Raw iteration
    /// files are never rewritten: resume must see exactly what was recorded.
    pub fn save_iteration(
        &self,
        analysis_id: &str,
        detail: &IterationDetail,
    ) -> Result<(), StateError> {
        let path = self.iteration_path(analysis_id, detail.record.iteration);
        if path.exists() {
            return Err(StateError::Corrupt(format!(
                "iteration {} already persisted",
                detail.record.iteration
            )));
        }
        atomic_write_json(&path, detail)
    }

    pub fn load_iteration(
        &self,
        analysis_id: &str,
        iteration: u32,
    ) -> Result<Option<IterationDetail>, StateError> {
        load_json(&self.iteration_path(analysis_id, iteration))
    }

    /// Highest iteration index present on disk; 0 when none. Resume starts
    /// at the next index.
    pub fn highest_iteration(&self, analysis_id: &str) -> Result<u32, StateError> {
        let dir = self.memory_dir(analysis_id);
        if !dir.exists() {
            return Ok(0);
        }
        let mut highest = 0;
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name
                .strip_prefix("iteration_")
                .and_then(|s| s.strip_suffix(".json"))
            {
                if let Ok(n) = rest.parse::<u32>() {
                    highest = highest.max(n);
                }
            }
        }
        Ok(highest)
    }

    /// Replay every raw iteration file through the three-layer cascade.
    /// Reconstructs the working history exactly, including L1 content that
    /// compression dropped from older snapshots.
    pub fn rebuild_history(&self, analysis_id: &str) -> Result<AnalysisHistory, StateError> {
        let highest = self.highest_iteration(analysis_id)?;
        let mut history = AnalysisHistory::default();
        for n in 1..=highest {
            let detail = self.load_iteration(analysis_id, n)?.ok_or_else(|| {
                StateError::Corrupt(format!("missing iteration file {n} of {highest}"))
            })?;
            history.push(detail);
        }
        Ok(history)
    }

    pub fn save_validated_hypotheses(
        &self,
        analysis_id: &str,
        hypotheses: &[Hypothesis],
    ) -> Result<(), StateError> {
        let path = self.memory_dir(analysis_id).join("validated_hypotheses.json");
        atomic_write_json(&path, &hypotheses)
    }

    pub fn load_validated_hypotheses(
        &self,
        analysis_id: &str,
    ) -> Result<Option<Vec<Hypothesis>>, StateError> {
        load_json(&self.memory_dir(analysis_id).join("validated_hypotheses.json"))
    }

    pub fn save_evidence_bundle(
        &self,
        analysis_id: &str,
        bundle: &EvidenceBundle,
    ) -> Result<(), StateError> {
        let path = self.memory_dir(analysis_id).join("evidence_bundle.json");
        atomic_write_json(&path, bundle)
    }

    pub fn load_evidence_bundle(
        &self,
        analysis_id: &str,
    ) -> Result<Option<EvidenceBundle>, StateError> {
        load_json(&self.memory_dir(analysis_id).join("evidence_bundle.json"))
    }

    pub fn save_final_report(
        &self,
        analysis_id: &str,
        report: &FinalReport,
    ) -> Result<(), StateError> {
        let path = self.memory_dir(analysis_id).join("final_report.json");
        atomic_write_json(&path, report)
    }

    pub fn load_final_report(&self, analysis_id: &str) -> Result<Option<FinalReport>, StateError> {
        load_json(&self.memory_dir(analysis_id).join("final_report.json"))
    }
}

/// Write-temp-then-rename in the target directory, newline-terminated.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let parent = path
        .parent()
        .ok_or_else(|| StateError::Corrupt(format!("no parent dir for {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    if !path.exists() {
        return Ok(None);
    }
    let body = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::config::EngineConfig;
    use research_core::types::{Impact, IterationRecord};
    use tempfile::tempdir;

    fn state(id: &str) -> AnalysisState {
        AnalysisState::new(
            id.to_string(),
            "ACME".to_string(),
            "Acme Corp".to_string(),
            EngineConfig::default(),
        )
    }

    fn detail(n: u32) -> IterationDetail {
        IterationDetail {
            record: IterationRecord {
                iteration: n,
                duration_s: 12.5,
                hypotheses_generated: 5,
                hypotheses_validated: 3,
                confidence: 0.6,
                quality_score: 0.7,
                cost_usd: 0.42,
                evidence_ids: vec![format!("ev_{n:03}")],
                synthesized_hypotheses: vec![],
            },
            hypotheses: vec![],
            evidence: vec![],
            syntheses: vec![],
        }
    }

    #[test]
    fn analysis_state_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init_analysis("a1").unwrap();

        let mut s = state("a1");
        s.hypotheses.push(research_core::types::Hypothesis {
            id: "h1".into(),
            title: "Cloud margin inflection".into(),
            thesis: "Margins expand 300bps by FY27. Mix shift drives it.".into(),
            evidence_needed: vec!["segment data".into()],
            impact: Impact::High,
            impact_rank: 1,
            confidence: 0.62,
            confidence_trajectory: vec![0.5, 0.62],
            uncertain: false,
        });
        store.save_analysis_state(&s).unwrap();

        let loaded = store.load_analysis_state("a1").unwrap().unwrap();
        assert_eq!(loaded.analysis_id, s.analysis_id);
        assert_eq!(loaded.hypotheses.len(), 1);
        assert_eq!(loaded.hypotheses[0].confidence_trajectory, vec![0.5, 0.62]);
    }

    #[test]
    fn files_are_newline_terminated() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init_analysis("a1").unwrap();
        store.save_analysis_state(&state("a1")).unwrap();

        let body =
            fs::read(store.memory_dir("a1").join("analysis_state.json")).unwrap();
        assert_eq!(body.last(), Some(&b'\n'));
    }

    #[test]
    fn iteration_files_are_write_once() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init_analysis("a1").unwrap();

        store.save_iteration("a1", &detail(1)).unwrap();
        assert!(store.save_iteration("a1", &detail(1)).is_err());
    }

    #[test]
    fn highest_iteration_finds_resume_point() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init_analysis("a1").unwrap();
        assert_eq!(store.highest_iteration("a1").unwrap(), 0);

        for n in 1..=5 {
            store.save_iteration("a1", &detail(n)).unwrap();
        }
        assert_eq!(store.highest_iteration("a1").unwrap(), 5);
    }

    #[test]
    fn history_rebuilds_from_raw_files() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init_analysis("a1").unwrap();

        let mut expected = AnalysisHistory::default();
        for n in 1..=12 {
            store.save_iteration("a1", &detail(n)).unwrap();
            expected.push(detail(n));
        }

        let rebuilt = store.rebuild_history("a1").unwrap();
        assert_eq!(rebuilt.recent.len(), expected.recent.len());
        assert_eq!(rebuilt.compressed.len(), expected.compressed.len());
        assert_eq!(rebuilt.archive.len(), expected.archive.len());
        assert_eq!(
            rebuilt.recent.last().unwrap().record.iteration,
            expected.recent.last().unwrap().record.iteration
        );
    }

    #[test]
    fn missing_files_load_as_none() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_analysis_state("nope").unwrap().is_none());
        assert!(store.load_final_report("nope").unwrap().is_none());
    }
}
