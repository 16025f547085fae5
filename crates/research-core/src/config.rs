use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ResearchError;

/// Engine configuration. Defaults are the balanced profile; `quality_first`
/// and `cost_optimized` are two configurations of the same engine, differing
/// only in checkpoints, synthesis breadth and iteration bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Iteration indices at which dialectical synthesis is permitted.
    pub checkpoints: Vec<u32>,
    /// Only hypotheses with impact_rank <= this are synthesized.
    pub top_k_for_synthesis: usize,
    /// Minimum confidence for a hypothesis to enter synthesis.
    pub min_synthesis_confidence: f64,
    /// Early-stop once aggregate confidence reaches this.
    pub confidence_stop: f64,
    pub max_iterations: u32,
    /// Confidence-based early stop requires at least this many iterations.
    pub min_iterations: u32,
    /// A hypothesis whose confidence moved less than this since the last
    /// checkpoint is flagged as a research gap.
    pub min_confidence_delta: f64,
    /// MEDIUM-impact hypotheses below this confidence stay in the research set.
    pub refinement_threshold: f64,
    /// Concurrent deep-research calls per iteration (K).
    pub research_parallelism: usize,
    /// Symmetric band around current price inside which the action must be HOLD.
    pub hold_band: f64,
    /// Per-worker-call timeout.
    pub worker_timeout_secs: u64,
    /// Soft wall-clock bound for a whole analysis; on exceed the
    /// orchestrator enters early finalization.
    pub wall_clock_secs: Option<u64>,
    /// Soft budget; the governor degrades configuration when the projection exceeds it.
    pub budget_usd: Option<f64>,
    /// Consecutive iterations with quality delta below this fraction trigger a stop.
    pub quality_plateau_delta: f64,
    pub quality_plateau_window: u32,
    /// Under strict validation a recommendation inconsistent with the
    /// valuation triggers one regeneration.
    pub strict_validation: bool,
    pub work_dir: PathBuf,
    pub memory_store_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoints: vec![3, 6, 9, 12],
            top_k_for_synthesis: 2,
            min_synthesis_confidence: 0.60,
            confidence_stop: 0.85,
            max_iterations: 15,
            min_iterations: 3,
            min_confidence_delta: 0.05,
            refinement_threshold: 0.70,
            research_parallelism: 3,
            hold_band: 0.05,
            worker_timeout_secs: 600,
            wall_clock_secs: None,
            budget_usd: None,
            quality_plateau_delta: 0.05,
            quality_plateau_window: 3,
            strict_validation: false,
            work_dir: PathBuf::from("./data"),
            memory_store_dir: None,
        }
    }
}

impl EngineConfig {
    /// Quality-first: more iterations before an early stop, higher confidence bar.
    pub fn quality_first() -> Self {
        Self {
            confidence_stop: 0.90,
            min_iterations: 10,
            strict_validation: true,
            ..Self::default()
        }
    }

    /// Cost-optimized: fewer checkpoints, narrower synthesis, shorter runs.
    pub fn cost_optimized() -> Self {
        Self {
            checkpoints: vec![3, 6],
            top_k_for_synthesis: 1,
            max_iterations: 8,
            research_parallelism: 2,
            ..Self::default()
        }
    }

    /// Read overrides from the environment on top of the defaults.
    pub fn from_env() -> Result<Self, ResearchError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("ANALYSIS_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("MEMORY_STORE_DIR") {
            config.memory_store_dir = Some(PathBuf::from(dir));
        }
        if let Ok(v) = env::var("MAX_ITERATIONS") {
            config.max_iterations = parse(&v, "MAX_ITERATIONS")?;
        }
        if let Ok(v) = env::var("CONFIDENCE_STOP") {
            config.confidence_stop = parse(&v, "CONFIDENCE_STOP")?;
        }
        if let Ok(v) = env::var("RESEARCH_PARALLELISM") {
            config.research_parallelism = parse(&v, "RESEARCH_PARALLELISM")?;
        }
        if let Ok(v) = env::var("ANALYSIS_BUDGET_USD") {
            config.budget_usd = Some(parse(&v, "ANALYSIS_BUDGET_USD")?);
        }
        if let Ok(v) = env::var("WORKER_TIMEOUT_SECS") {
            config.worker_timeout_secs = parse(&v, "WORKER_TIMEOUT_SECS")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.confidence_stop <= 0.0 || self.confidence_stop > 1.0 {
            return Err(ResearchError::InvalidInputs(format!(
                "confidence_stop must be in (0, 1], got {}",
                self.confidence_stop
            )));
        }
        if self.max_iterations == 0 {
            return Err(ResearchError::InvalidInputs(
                "max_iterations must be >= 1".to_string(),
            ));
        }
        if self.min_iterations > self.max_iterations {
            return Err(ResearchError::InvalidInputs(format!(
                "min_iterations {} exceeds max_iterations {}",
                self.min_iterations, self.max_iterations
            )));
        }
        if self.research_parallelism == 0 {
            return Err(ResearchError::InvalidInputs(
                "research_parallelism must be >= 1".to_string(),
            ));
        }
        if !(0.0..=0.5).contains(&self.hold_band) {
            return Err(ResearchError::InvalidInputs(format!(
                "hold_band must be in [0, 0.5], got {}",
                self.hold_band
            )));
        }
        Ok(())
    }

    pub fn is_checkpoint(&self, iteration: u32) -> bool {
        self.checkpoints.contains(&iteration)
    }
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, ResearchError> {
    value
        .parse()
        .map_err(|_| ResearchError::InvalidInputs(format!("cannot parse {name}={value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_validates() {
        EngineConfig::default().validate().unwrap();
        EngineConfig::quality_first().validate().unwrap();
        EngineConfig::cost_optimized().validate().unwrap();
    }

    #[test]
    fn profiles_differ_where_expected() {
        let quality = EngineConfig::quality_first();
        assert_eq!(quality.confidence_stop, 0.90);
        assert_eq!(quality.min_iterations, 10);

        let cost = EngineConfig::cost_optimized();
        assert_eq!(cost.checkpoints, vec![3, 6]);
        assert_eq!(cost.top_k_for_synthesis, 1);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = EngineConfig::default();
        config.confidence_stop = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.min_iterations = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn checkpoint_membership() {
        let config = EngineConfig::default();
        assert!(config.is_checkpoint(3));
        assert!(config.is_checkpoint(12));
        assert!(!config.is_checkpoint(4));
    }
}
