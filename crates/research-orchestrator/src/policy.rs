//! Pure scheduling policy: the checkpoint-synthesis predicate and the stop
//! criteria. Kept free of I/O so the invariants are directly testable.

use serde::{Deserialize, Serialize};

use research_core::config::EngineConfig;
use research_core::types::{AnalysisState, Hypothesis};

/// A hypothesis is synthesized at iteration `n` iff `n` is a checkpoint, the
/// hypothesis ranks inside the synthesis top-k, and its confidence has
/// cleared the synthesis floor. All three conditions, nothing else.
pub fn should_synthesize(n: u32, hypothesis: &Hypothesis, config: &EngineConfig) -> bool {
    config.is_checkpoint(n)
        && hypothesis.impact_rank <= config.top_k_for_synthesis
        && hypothesis.confidence >= config.min_synthesis_confidence
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ConfidenceReached,
    MaxIterations,
    QualityPlateau,
    BudgetExhausted,
    AllHypothesesConfident,
    WallClockExceeded,
}

/// Evaluate the stop criteria after an iteration has been persisted.
/// Confidence-based early stops require `min_iterations` to have run.
pub fn check_stop(state: &AnalysisState, synthesis_count: usize) -> Option<StopReason> {
    let config = &state.config;
    let n = state.current_iteration;

    if n >= config.max_iterations {
        return Some(StopReason::MaxIterations);
    }

    if n >= config.min_iterations {
        if state.overall_confidence >= config.confidence_stop {
            return Some(StopReason::ConfidenceReached);
        }
        if synthesis_count > 0
            && !state.hypotheses.is_empty()
            && state
                .hypotheses
                .iter()
                .all(|h| h.confidence >= config.confidence_stop)
        {
            return Some(StopReason::AllHypothesesConfident);
        }
    }

    // Quality plateau: N successive deltas all below the relative threshold.
    let window = config.quality_plateau_window as usize;
    let scores = &state.quality_scores;
    if window > 0 && scores.len() > window {
        let tail = &scores[scores.len() - window - 1..];
        let plateaued = tail.windows(2).all(|pair| {
            let base = pair[0].abs().max(1e-9);
            ((pair[1] - pair[0]).abs() / base) < config.quality_plateau_delta
        });
        if plateaued {
            return Some(StopReason::QualityPlateau);
        }
    }

    None
}

/// Overall confidence: impact-weighted mean (HIGH 3x, MEDIUM 2x, LOW 1x)
/// over hypotheses that have actually been researched. Hypotheses with no
/// evidence yet sit at their prior and would otherwise drown the signal.
pub fn aggregate_confidence(
    hypotheses: &[Hypothesis],
    bundle: &research_core::types::EvidenceBundle,
) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for h in hypotheses {
        if bundle.for_hypothesis(&h.id).is_empty() {
            continue;
        }
        let w = match h.impact {
            research_core::types::Impact::High => 3.0,
            research_core::types::Impact::Medium => 2.0,
            research_core::types::Impact::Low => 1.0,
        };
        weighted += h.confidence * w;
        total += w;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Post-research confidence signal from the evidence balance: positive items
/// push above 0.5, negative below, weighted by item confidence.
pub fn evidence_confidence(items: &[research_core::types::EvidenceItem]) -> f64 {
    use research_core::types::ImpactDirection;
    if items.is_empty() {
        return 0.5;
    }
    let net: f64 = items
        .iter()
        .map(|item| match item.impact_direction {
            ImpactDirection::Positive => item.confidence,
            ImpactDirection::Negative => -item.confidence,
            ImpactDirection::Unclear => 0.0,
        })
        .sum();
    (0.5 + 0.5 * net / items.len() as f64).clamp(0.05, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::types::Impact;

    fn hypothesis(rank: usize, confidence: f64) -> Hypothesis {
        Hypothesis {
            id: format!("h{rank}"),
            title: format!("Hypothesis {rank}"),
            thesis: "Thesis with 10% upside. Two sentences.".into(),
            evidence_needed: vec![],
            impact: Impact::High,
            impact_rank: rank,
            confidence,
            confidence_trajectory: vec![],
            uncertain: false,
        }
    }

    fn state_with(confidences: &[f64], iteration: u32) -> AnalysisState {
        let mut state = AnalysisState::new(
            "a1".into(),
            "ACME".into(),
            "Acme Corp".into(),
            EngineConfig::default(),
        );
        state.current_iteration = iteration;
        state.hypotheses = confidences
            .iter()
            .enumerate()
            .map(|(i, &c)| hypothesis(i + 1, c))
            .collect();
        state.overall_confidence =
            confidences.iter().sum::<f64>() / confidences.len().max(1) as f64;
        state
    }

    /// The predicate holds exactly when all three conditions hold.
    #[test]
    fn synthesize_iff_checkpoint_rank_and_confidence() {
        let config = EngineConfig::default();
        for n in 1..=15u32 {
            for rank in 1..=4usize {
                for &confidence in &[0.3, 0.59, 0.60, 0.75, 0.95] {
                    let h = hypothesis(rank, confidence);
                    let expected = config.checkpoints.contains(&n)
                        && rank <= config.top_k_for_synthesis
                        && confidence >= config.min_synthesis_confidence;
                    assert_eq!(
                        should_synthesize(n, &h, &config),
                        expected,
                        "n={n} rank={rank} confidence={confidence}"
                    );
                }
            }
        }
    }

    /// Checkpoints {3,6,9,12}, ranks 1/2/3 at 0.7/0.62/0.75: ranks 1 and 2
    /// synthesize at every checkpoint, rank 3 never does.
    #[test]
    fn checkpoint_policy_scenario() {
        let config = EngineConfig {
            max_iterations: 12,
            ..EngineConfig::default()
        };
        let hs = [
            hypothesis(1, 0.70),
            hypothesis(2, 0.62),
            hypothesis(3, 0.75),
        ];
        for n in 1..=12u32 {
            let selected: Vec<usize> = hs
                .iter()
                .filter(|h| should_synthesize(n, h, &config))
                .map(|h| h.impact_rank)
                .collect();
            if [3, 6, 9, 12].contains(&n) {
                assert_eq!(selected, vec![1, 2], "iteration {n}");
            } else {
                assert!(selected.is_empty(), "iteration {n}");
            }
        }
    }

    #[test]
    fn confidence_stop_respects_min_iterations() {
        let mut state = state_with(&[0.9, 0.9], 2);
        state.config.min_iterations = 3;
        assert_eq!(check_stop(&state, 1), None);

        state.current_iteration = 4;
        state.overall_confidence = 0.87;
        assert_eq!(check_stop(&state, 1), Some(StopReason::ConfidenceReached));
    }

    #[test]
    fn max_iterations_always_stops() {
        let mut state = state_with(&[0.2], 15);
        state.overall_confidence = 0.2;
        assert_eq!(check_stop(&state, 0), Some(StopReason::MaxIterations));
    }

    #[test]
    fn quality_plateau_stops_after_three_flat_deltas() {
        let mut state = state_with(&[0.5], 6);
        state.overall_confidence = 0.5;
        state.quality_scores = vec![0.50, 0.70, 0.71, 0.715, 0.72];
        assert_eq!(check_stop(&state, 1), Some(StopReason::QualityPlateau));

        // A jump in the window resets the plateau.
        state.quality_scores = vec![0.50, 0.70, 0.71, 0.80, 0.81];
        assert_eq!(check_stop(&state, 1), None);
    }

    #[test]
    fn all_hypotheses_confident_requires_a_synthesis() {
        let mut state = state_with(&[0.86, 0.88], 5);
        // Aggregate is above stop too, so pin it below to isolate the branch.
        state.overall_confidence = 0.80;
        state.config.confidence_stop = 0.85;
        assert_eq!(check_stop(&state, 0), None);
        assert_eq!(
            check_stop(&state, 2),
            Some(StopReason::AllHypothesesConfident)
        );
    }

    #[test]
    fn aggregate_ignores_unresearched_hypotheses() {
        use research_core::types::{EvidenceBundle, EvidenceItem, ImpactDirection, SourceType};
        let mut bundle = EvidenceBundle::new();
        bundle
            .append(
                "h1",
                EvidenceItem {
                    id: "ev_001".into(),
                    claim: "c".into(),
                    source_type: SourceType::TenK,
                    source_reference: "r".into(),
                    quote: "q".into(),
                    confidence: 0.8,
                    impact_direction: ImpactDirection::Positive,
                    contradicts: vec![],
                },
            )
            .unwrap();

        let researched = hypothesis(1, 0.9);
        let untouched = hypothesis(2, 0.1); // id h2, no evidence
        let agg = aggregate_confidence(&[researched, untouched], &bundle);
        assert!((agg - 0.9).abs() < 1e-9);
    }

    #[test]
    fn evidence_balance_moves_confidence() {
        use research_core::types::{EvidenceItem, ImpactDirection, SourceType};
        let item = |dir: ImpactDirection, conf: f64| EvidenceItem {
            id: "e".into(),
            claim: "c".into(),
            source_type: SourceType::News,
            source_reference: "r".into(),
            quote: "q".into(),
            confidence: conf,
            impact_direction: dir,
            contradicts: vec![],
        };
        assert_eq!(evidence_confidence(&[]), 0.5);
        let bullish = vec![
            item(ImpactDirection::Positive, 0.9),
            item(ImpactDirection::Positive, 0.8),
        ];
        assert!(evidence_confidence(&bullish) > 0.7);
        let mixed = vec![
            item(ImpactDirection::Positive, 0.8),
            item(ImpactDirection::Negative, 0.8),
        ];
        assert!((evidence_confidence(&mixed) - 0.5).abs() < 1e-9);
    }
}
