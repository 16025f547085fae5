//! Layer 2: required-section checks with severity-weighted deductions.
//! Missing CRITICAL caps the final letter grade at B; each HIGH subtracts
//! 3-5 points; each warning subtracts 1.

use serde::{Deserialize, Serialize};

use research_core::report::FinalReport;

use crate::grade::LetterGrade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureReport {
    pub findings: Vec<Finding>,
    /// Points to subtract from the 100-point rubric.
    pub deduction: f64,
    /// Present when a CRITICAL element is missing.
    pub grade_cap: Option<LetterGrade>,
}

impl StructureReport {
    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }
}

const HIGH_DEDUCTION: f64 = 4.0;
const WARNING_DEDUCTION: f64 = 1.0;

pub fn structure_validate(report: &FinalReport) -> StructureReport {
    let mut findings = Vec::new();

    // CRITICAL: the valuation scenarios must be present.
    if report.valuation.scenarios.is_empty() {
        findings.push(Finding {
            severity: Severity::Critical,
            message: "valuation scenarios missing".to_string(),
        });
    }

    // HIGH: methodology disclosure, fair value, entry/exit conditions.
    if report.valuation.methodology.trim().is_empty() {
        findings.push(Finding {
            severity: Severity::High,
            message: "valuation methodology not disclosed".to_string(),
        });
    }
    if report.valuation.fair_value <= 0.0 {
        findings.push(Finding {
            severity: Severity::High,
            message: "fair value missing or non-positive".to_string(),
        });
    }
    if report.recommendation.entry_conditions.is_empty() {
        findings.push(Finding {
            severity: Severity::High,
            message: "entry conditions missing".to_string(),
        });
    }
    if report.recommendation.exit_conditions.is_empty() {
        findings.push(Finding {
            severity: Severity::High,
            message: "exit conditions missing".to_string(),
        });
    }

    // MEDIUM (warnings): explicit bull/bear section, named recommendation.
    if report.bull_bear_analysis.trim().is_empty() {
        findings.push(Finding {
            severity: Severity::Warning,
            message: "bull/bear analysis section empty".to_string(),
        });
    }
    if report.recommendation.timeframe.trim().is_empty() {
        findings.push(Finding {
            severity: Severity::Warning,
            message: "recommendation has no timeframe".to_string(),
        });
    }
    if report.executive_summary.trim().is_empty() {
        findings.push(Finding {
            severity: Severity::Warning,
            message: "executive summary empty".to_string(),
        });
    }

    let deduction = findings
        .iter()
        .map(|f| match f.severity {
            Severity::Critical => 0.0, // handled via the grade cap
            Severity::High => HIGH_DEDUCTION,
            Severity::Warning => WARNING_DEDUCTION,
        })
        .sum();

    let grade_cap = findings
        .iter()
        .any(|f| f.severity == Severity::Critical)
        .then_some(LetterGrade::B);

    StructureReport {
        findings,
        deduction,
        grade_cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::report;

    #[test]
    fn complete_report_has_no_findings() {
        let result = structure_validate(&report());
        assert!(result.findings.is_empty());
        assert_eq!(result.deduction, 0.0);
        assert!(result.grade_cap.is_none());
    }

    #[test]
    fn missing_scenarios_is_critical_and_caps_grade() {
        let mut r = report();
        r.valuation.scenarios.clear();
        let result = structure_validate(&r);
        assert!(result.has_critical());
        assert_eq!(result.grade_cap, Some(LetterGrade::B));
    }

    #[test]
    fn high_findings_deduct_points() {
        let mut r = report();
        r.valuation.methodology = String::new();
        r.recommendation.exit_conditions.clear();
        let result = structure_validate(&r);
        assert_eq!(result.deduction, 8.0);
        assert!(result.grade_cap.is_none());
    }

    #[test]
    fn warnings_deduct_one_point_each() {
        let mut r = report();
        r.bull_bear_analysis = String::new();
        r.recommendation.timeframe = String::new();
        let result = structure_validate(&r);
        assert_eq!(result.deduction, 2.0);
    }
}
