//! Layer 3: fast heuristic checks on top of the structure results: scenario
//! sanity, text-length floors, and valuation-vs-recommendation consistency.

use research_core::report::{Action, FinalReport};
use research_core::types::ScenarioKind;

use crate::structure::{Finding, Severity};

/// Widest plausible ratio between adjacent scenario fair values.
const MAX_SCENARIO_SPREAD: f64 = 4.0;
/// Minimum characters for the prose sections.
const MIN_SECTION_LEN: usize = 40;

pub fn heuristic_validate(report: &FinalReport, hold_band: f64) -> Vec<Finding> {
    let mut findings = Vec::new();

    // Scenario sanity: bear < base < bull on fair value, spreads plausible.
    if let (Some(bull), Some(base), Some(bear)) = (
        report.valuation.scenario(ScenarioKind::Bull),
        report.valuation.scenario(ScenarioKind::Base),
        report.valuation.scenario(ScenarioKind::Bear),
    ) {
        if !(bear.fair_value < base.fair_value && base.fair_value < bull.fair_value) {
            findings.push(Finding {
                severity: Severity::High,
                message: format!(
                    "scenario ordering violated: bear {} / base {} / bull {}",
                    bear.fair_value, base.fair_value, bull.fair_value
                ),
            });
        }
        if bear.fair_value > 0.0 && bull.fair_value / bear.fair_value > MAX_SCENARIO_SPREAD {
            findings.push(Finding {
                severity: Severity::Warning,
                message: format!(
                    "bull/bear spread {:.1}x exceeds plausible range",
                    bull.fair_value / bear.fair_value
                ),
            });
        }
    }

    // Text-length floors.
    for (name, text) in [
        ("executive_summary", &report.executive_summary),
        ("investment_thesis", &report.investment_thesis),
        ("financial_analysis", &report.financial_analysis),
        ("risks", &report.risks),
    ] {
        if text.trim().len() < MIN_SECTION_LEN {
            findings.push(Finding {
                severity: Severity::Warning,
                message: format!("{name} below minimum length"),
            });
        }
    }

    // Recommendation must sit on the right side of the HOLD band.
    let implied = Action::implied(
        report.valuation.fair_value,
        report.valuation.current_price,
        hold_band,
    );
    if implied != report.recommendation.action {
        findings.push(Finding {
            severity: Severity::High,
            message: format!(
                "recommendation {:?} inconsistent with fair value {} vs price {} (implies {:?})",
                report.recommendation.action,
                report.valuation.fair_value,
                report.valuation.current_price,
                implied
            ),
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::report;

    #[test]
    fn consistent_report_is_clean() {
        assert!(heuristic_validate(&report(), 0.05).is_empty());
    }

    #[test]
    fn flags_scenario_misordering() {
        let mut r = report();
        r.valuation.scenarios[2].fair_value = 150.0; // bear above bull
        let findings = heuristic_validate(&r, 0.05);
        assert!(findings
            .iter()
            .any(|f| f.message.contains("scenario ordering")));
    }

    #[test]
    fn flags_implausible_spread() {
        let mut r = report();
        r.valuation.scenarios[0].fair_value = 500.0;
        let findings = heuristic_validate(&r, 0.05);
        assert!(findings.iter().any(|f| f.message.contains("spread")));
    }

    #[test]
    fn flags_inconsistent_recommendation() {
        // Fair value 80 vs price 100 implies SELL; report says BUY.
        let mut r = report();
        r.valuation.fair_value = 80.0;
        for s in &mut r.valuation.scenarios {
            s.fair_value *= 0.6;
        }
        let findings = heuristic_validate(&r, 0.05);
        assert!(findings
            .iter()
            .any(|f| f.message.contains("inconsistent") && f.severity == Severity::High));
    }

    #[test]
    fn flags_thin_sections() {
        let mut r = report();
        r.risks = "thin".into();
        let findings = heuristic_validate(&r, 0.05);
        assert!(findings.iter().any(|f| f.message.contains("risks")));
    }
}
