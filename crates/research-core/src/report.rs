use serde::{Deserialize, Serialize};

use crate::types::{ScenarioKind, scenario_probabilities_sum_ok};

/// Recommendation action, consistent with the fair-value gap modulo the HOLD band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Hold,
    Sell,
}

impl Action {
    /// The action implied by fair value vs current price under a symmetric
    /// HOLD band (default 5%).
    pub fn implied(fair_value: f64, current_price: f64, hold_band: f64) -> Self {
        if fair_value > current_price * (1.0 + hold_band) {
            Action::Buy
        } else if fair_value < current_price * (1.0 - hold_band) {
            Action::Sell
        } else {
            Action::Hold
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conviction {
    High,
    Medium,
    Low,
}

/// One probability-weighted valuation case inside the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationScenario {
    pub name: ScenarioKind,
    pub probability: f64,
    pub fair_value: f64,
    pub conditions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSection {
    pub fair_value: f64,
    pub current_price: f64,
    pub scenarios: Vec<ValuationScenario>,
    pub methodology: String,
}

impl ValuationSection {
    pub fn probabilities_sum_ok(&self) -> bool {
        scenario_probabilities_sum_ok(self.scenarios.iter().map(|s| s.probability))
    }

    pub fn scenario(&self, kind: ScenarioKind) -> Option<&ValuationScenario> {
        self.scenarios.iter().find(|s| s.name == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub conviction: Conviction,
    pub timeframe: String,
    pub entry_conditions: Vec<String>,
    pub exit_conditions: Vec<String>,
}

/// Titled narrative block with evidence attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

/// The decision-ready narrative emission. Top-level keys are fixed; the
/// validation pipeline grades structure and consistency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub executive_summary: String,
    pub investment_thesis: String,
    pub financial_analysis: String,
    pub valuation: ValuationSection,
    pub bull_bear_analysis: String,
    pub risks: String,
    pub recommendation: Recommendation,
    pub sections: Vec<ReportSection>,
}

impl FinalReport {
    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case(title))
    }

    /// Share of sections carrying at least one evidence reference.
    pub fn evidence_coverage(&self) -> f64 {
        if self.sections.is_empty() {
            return 0.0;
        }
        let cited = self
            .sections
            .iter()
            .filter(|s| !s.evidence_refs.is_empty())
            .count();
        cited as f64 / self.sections.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_action_respects_hold_band() {
        assert_eq!(Action::implied(120.0, 100.0, 0.05), Action::Buy);
        assert_eq!(Action::implied(80.0, 100.0, 0.05), Action::Sell);
        assert_eq!(Action::implied(103.0, 100.0, 0.05), Action::Hold);
        assert_eq!(Action::implied(97.0, 100.0, 0.05), Action::Hold);
        // Boundary values stay inside the band.
        assert_eq!(Action::implied(105.0, 100.0, 0.05), Action::Hold);
    }

    #[test]
    fn action_wire_format_is_uppercase() {
        assert_eq!(serde_json::to_string(&Action::Buy).unwrap(), "\"BUY\"");
        assert_eq!(
            serde_json::from_str::<Action>("\"SELL\"").unwrap(),
            Action::Sell
        );
    }
}
