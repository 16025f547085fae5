//! Layer 4: the authoritative full-LM grading. Runs the evaluator worker in
//! `final` mode over the six-dimension rubric, folds in the structural
//! deductions and the CRITICAL grade cap, and emits the letter grade.

use std::sync::Arc;

use serde_json::json;

use agent_client::{AgentError, Worker};
use research_core::agents::{
    Evaluation, EvaluationCriteria, EvaluationRequest, EvaluationType,
};
use research_core::report::FinalReport;

use crate::grade::LetterGrade;
use crate::heuristic::heuristic_validate;
use crate::schema::schema_validate;
use crate::structure::{structure_validate, Finding, StructureReport};

const RUBRIC_DIMENSIONS: [&str; 6] = [
    "decision_readiness",
    "data_quality",
    "investment_thesis",
    "financial_analysis",
    "risk_assessment",
    "presentation",
];

/// Score below which the full evaluation fails outright.
const PASS_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub schema_errors: Vec<String>,
    pub structure: StructureReport,
    pub heuristic_findings: Vec<Finding>,
    pub evaluation: Evaluation,
    pub points: f64,
    pub grade: LetterGrade,
    pub passed: bool,
    /// Cost of the layer-4 evaluator call, for trace accounting.
    pub cost_usd: f64,
}

type EvaluatorWorker =
    Arc<dyn Worker<Input = EvaluationRequest, Output = Evaluation> + Send + Sync>;

pub struct FullValidator {
    evaluator: EvaluatorWorker,
    hold_band: f64,
}

impl FullValidator {
    pub fn new(evaluator: EvaluatorWorker, hold_band: f64) -> Self {
        Self {
            evaluator,
            hold_band,
        }
    }

    /// Run all four layers. Layers 1-3 never short-circuit layer 4: the full
    /// evaluation is always required and authoritative, but pre-check
    /// findings deduct points and CRITICAL findings cap the grade at B.
    pub async fn validate(&self, report: &FinalReport) -> Result<ValidationOutcome, AgentError> {
        let schema_errors = schema_validate(report);
        let structure = structure_validate(report);
        let heuristic_findings = heuristic_validate(report, self.hold_band);

        let output = self
            .evaluator
            .call(&EvaluationRequest {
                evaluation_type: EvaluationType::Final,
                output: json!({
                    "report": report,
                    "schema_errors": schema_errors,
                    "structure_findings": structure.findings,
                    "heuristic_findings": heuristic_findings,
                }),
                criteria: EvaluationCriteria {
                    dimensions: RUBRIC_DIMENSIONS.iter().map(|d| d.to_string()).collect(),
                    threshold: PASS_THRESHOLD,
                },
            })
            .await?;
        let evaluation = output.value;

        let mut points = evaluation.overall_score * 100.0;
        points -= structure.deduction;
        points -= heuristic_findings
            .iter()
            .map(|f| match f.severity {
                crate::structure::Severity::Critical => 0.0,
                crate::structure::Severity::High => 4.0,
                crate::structure::Severity::Warning => 1.0,
            })
            .sum::<f64>();
        points -= schema_errors.len() as f64;
        points = points.clamp(0.0, 100.0);

        let mut grade = LetterGrade::from_points(points);
        if let Some(cap) = structure.grade_cap {
            grade = grade.min(cap);
        }

        let passed = !structure.has_critical() && schema_errors.is_empty() && evaluation.passed;

        if !passed {
            tracing::warn!(
                "report failed validation: grade {grade}, {} schema errors, critical={}",
                schema_errors.len(),
                structure.has_critical()
            );
        }

        Ok(ValidationOutcome {
            schema_errors,
            structure,
            heuristic_findings,
            evaluation,
            points,
            grade,
            passed,
            cost_usd: output.cost_usd,
        })
    }
}
