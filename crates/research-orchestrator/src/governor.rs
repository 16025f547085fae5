//! Budget governor. Watches cumulative spend through the trace cost meter,
//! projects spend-to-completion linearly, and degrades the configuration one
//! level at a time when the projection exceeds the budget. It never touches
//! worker output.

use research_core::config::EngineConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum GovernorDecision {
    Continue,
    Degraded { level: u8, action: String },
    Exhausted,
}

pub struct CostGovernor {
    budget_usd: Option<f64>,
    level: u8,
}

impl CostGovernor {
    pub fn new(budget_usd: Option<f64>) -> Self {
        Self {
            budget_usd,
            level: 0,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Called at the end of iteration `n`. Projection: current cost scaled
    /// to the configured iteration ceiling.
    pub fn review(
        &mut self,
        current_cost: f64,
        iteration: u32,
        config: &mut EngineConfig,
    ) -> GovernorDecision {
        let Some(budget) = self.budget_usd else {
            return GovernorDecision::Continue;
        };
        if current_cost >= budget {
            return GovernorDecision::Exhausted;
        }
        let projected = current_cost * (config.max_iterations as f64 / iteration.max(1) as f64);
        if projected <= budget {
            return GovernorDecision::Continue;
        }

        self.level += 1;
        let action = match self.level {
            1 => {
                let keep = config.checkpoints.len().div_ceil(2);
                config.checkpoints.truncate(keep);
                config.top_k_for_synthesis = 1;
                "halved checkpoints, synthesis top-k reduced to 1".to_string()
            }
            2 => {
                config.research_parallelism = 1;
                "research serialized (K=1)".to_string()
            }
            _ => {
                let lowered = (config.max_iterations * 2 / 3)
                    .max(config.min_iterations)
                    .max(iteration);
                config.max_iterations = lowered;
                format!("iteration ceiling lowered to {lowered}")
            }
        };
        tracing::warn!(
            "budget governor degraded to level {}: {action} (cost ${current_cost:.2}, projected ${projected:.2}, budget ${budget:.2})",
            self.level
        );
        GovernorDecision::Degraded {
            level: self.level,
            action,
        }
    }
}
