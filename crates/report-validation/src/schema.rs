//! Layer 1: sub-millisecond field and range checks.

use research_core::report::FinalReport;
use research_core::types::ScenarioKind;

/// Hard schema errors. An empty vec means the report may proceed to
/// structure validation.
pub fn schema_validate(report: &FinalReport) -> Vec<String> {
    let mut errors = Vec::new();

    if report.valuation.current_price < 0.0 {
        errors.push(format!(
            "current_price {} is negative",
            report.valuation.current_price
        ));
    }
    if report.valuation.fair_value < 0.0 {
        errors.push(format!(
            "fair_value {} is negative",
            report.valuation.fair_value
        ));
    }
    for scenario in &report.valuation.scenarios {
        if !(0.0..=1.0).contains(&scenario.probability) {
            errors.push(format!(
                "{:?} scenario probability {} outside [0,1]",
                scenario.name, scenario.probability
            ));
        }
        if scenario.fair_value < 0.0 {
            errors.push(format!(
                "{:?} scenario fair value {} is negative",
                scenario.name, scenario.fair_value
            ));
        }
    }
    if !report.valuation.scenarios.is_empty() {
        if report.valuation.scenarios.len() != 3 {
            errors.push(format!(
                "expected exactly 3 scenarios, got {}",
                report.valuation.scenarios.len()
            ));
        }
        if !report.valuation.probabilities_sum_ok() {
            let total: f64 = report
                .valuation
                .scenarios
                .iter()
                .map(|s| s.probability)
                .sum();
            errors.push(format!("scenario probabilities sum to {total:.4}"));
        }
        for kind in [ScenarioKind::Bull, ScenarioKind::Base, ScenarioKind::Bear] {
            if report.valuation.scenario(kind).is_none() {
                errors.push(format!("missing {kind:?} scenario"));
            }
        }
    }

    errors
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use research_core::report::{
        Action, Conviction, FinalReport, Recommendation, ValuationScenario, ValuationSection,
    };

    pub(crate) fn report() -> FinalReport {
        FinalReport {
            executive_summary: "Margins inflecting; 18% upside to fair value.".into(),
            investment_thesis: "Mix shift drives durable margin expansion over three years.".into(),
            financial_analysis: "Revenue compounds 9% with margins reaching 25%.".into(),
            valuation: ValuationSection {
                fair_value: 118.0,
                current_price: 100.0,
                scenarios: vec![
                    ValuationScenario {
                        name: ScenarioKind::Bull,
                        probability: 0.30,
                        fair_value: 140.0,
                        conditions: "mix shift sustains".into(),
                    },
                    ValuationScenario {
                        name: ScenarioKind::Base,
                        probability: 0.50,
                        fair_value: 118.0,
                        conditions: "partial sustain".into(),
                    },
                    ValuationScenario {
                        name: ScenarioKind::Bear,
                        probability: 0.20,
                        fair_value: 85.0,
                        conditions: "cost reversal".into(),
                    },
                ],
                methodology: "Five-year FCFF DCF with stable-growth terminal value".into(),
            },
            bull_bear_analysis: "Bulls cite the reported inflection; bears guided caution.".into(),
            risks: "Guidance conservatism may be structural.".into(),
            recommendation: Recommendation {
                action: Action::Buy,
                conviction: Conviction::Medium,
                timeframe: "12-18 months".into(),
                entry_conditions: vec!["hold below 105".into()],
                exit_conditions: vec!["margin trend breaks".into()],
            },
            sections: vec![],
        }
    }

    #[test]
    fn clean_report_passes() {
        assert!(schema_validate(&report()).is_empty());
    }

    #[test]
    fn catches_probability_drift() {
        let mut r = report();
        r.valuation.scenarios[0].probability = 0.5;
        assert!(!schema_validate(&r).is_empty());
    }

    #[test]
    fn catches_negative_prices() {
        let mut r = report();
        r.valuation.current_price = -1.0;
        assert_eq!(schema_validate(&r).len(), 1);
    }

    #[test]
    fn catches_wrong_scenario_count() {
        let mut r = report();
        r.valuation.scenarios.pop();
        assert!(!schema_validate(&r).is_empty());
    }
}
