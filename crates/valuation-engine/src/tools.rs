//! Stateless tool server exposing the DCF kernel over a JSON request/response
//! protocol. Each request carries `tool_name` and a single `input` object; no
//! request carries implicit context.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use research_core::valuation::ValuationInputs;

use crate::dcf::{calculate_dcf, ValuationError};

#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

/// Either `{ output: ... }` or `{ error: { kind, message } }`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Output { output: Value },
    Error { error: ToolError },
}

impl ToolResponse {
    fn invalid_inputs(message: String) -> Self {
        ToolResponse::Error {
            error: ToolError {
                kind: "invalid_inputs".to_string(),
                message,
            },
        }
    }

    fn invalid_request(message: String) -> Self {
        ToolResponse::Error {
            error: ToolError {
                kind: "invalid_request".to_string(),
                message,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResponse::Error { .. })
    }
}

/// Scan points for the sensitivity tool, per variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensitivityGrid {
    #[serde(default)]
    pub stable_growth: Vec<f64>,
    #[serde(default)]
    pub stable_margin: Vec<f64>,
    #[serde(default)]
    pub wacc: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub value: f64,
    pub vps: f64,
    pub pct_change: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub base_vps: f64,
    pub sensitivities: SensitivitySeries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivitySeries {
    pub stable_growth: Vec<SensitivityPoint>,
    pub stable_margin: Vec<SensitivityPoint>,
    pub wacc: Vec<SensitivityPoint>,
}

/// Dispatches the three valuation tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolServer;

impl ToolServer {
    pub fn new() -> Self {
        ToolServer
    }

    pub fn handle(&self, request: &ToolRequest) -> ToolResponse {
        match request.tool_name.as_str() {
            "calculate_dcf" => self.calculate_dcf(&request.input),
            "get_series" => self.get_series(&request.input),
            "sensitivity_analysis" => self.sensitivity_analysis(&request.input),
            other => ToolResponse::Error {
                error: ToolError {
                    kind: "unknown_tool".to_string(),
                    message: format!("unknown tool {other}"),
                },
            },
        }
    }

    fn parse_inputs(&self, input: &Value) -> Result<ValuationInputs, ToolResponse> {
        serde_json::from_value(input.clone())
            .map_err(|e| ToolResponse::invalid_request(format!("cannot parse inputs: {e}")))
    }

    fn calculate_dcf(&self, input: &Value) -> ToolResponse {
        let inputs = match self.parse_inputs(input) {
            Ok(i) => i,
            Err(resp) => return resp,
        };
        match calculate_dcf(&inputs) {
            Ok(result) => ToolResponse::Output {
                output: json!({
                    "value_per_share": result.value_per_share,
                    "equity_value": result.equity_value,
                    "pv_explicit": result.pv_explicit,
                    "pv_terminal": result.pv_terminal,
                    "metadata": {
                        "horizon": inputs.horizon(),
                        "terminal_value": result.terminal_value,
                        "terminal_wacc": inputs.wacc.last(),
                        "stable_growth": inputs.stable_growth,
                    },
                }),
            },
            Err(ValuationError::InvalidInputs(message)) => ToolResponse::invalid_inputs(message),
        }
    }

    fn get_series(&self, input: &Value) -> ToolResponse {
        let inputs = match self.parse_inputs(input) {
            Ok(i) => i,
            Err(resp) => return resp,
        };
        match calculate_dcf(&inputs) {
            Ok(result) => {
                let series = &result.series;
                ToolResponse::Output {
                    output: json!({
                        "years": series.years,
                        "revenue": series.revenue,
                        "ebit": series.ebit,
                        "nopat": series.nopat,
                        "reinvestment": series.reinvestment,
                        "fcff": series.fcff,
                        "discount_factors": series.discount_factors,
                        "pv_operating": series.pv_operating,
                    }),
                }
            }
            Err(ValuationError::InvalidInputs(message)) => ToolResponse::invalid_inputs(message),
        }
    }

    fn sensitivity_analysis(&self, input: &Value) -> ToolResponse {
        #[derive(Deserialize)]
        struct SensitivityInput {
            inputs: ValuationInputs,
            grid: SensitivityGrid,
        }

        let parsed: SensitivityInput = match serde_json::from_value(input.clone()) {
            Ok(p) => p,
            Err(e) => return ToolResponse::invalid_request(format!("cannot parse request: {e}")),
        };

        let base = match calculate_dcf(&parsed.inputs) {
            Ok(r) => r,
            Err(ValuationError::InvalidInputs(message)) => {
                return ToolResponse::invalid_inputs(message)
            }
        };

        match run_sensitivity(&parsed.inputs, &parsed.grid, base.value_per_share) {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(output) => ToolResponse::Output { output },
                Err(e) => ToolResponse::invalid_request(e.to_string()),
            },
            Err(ValuationError::InvalidInputs(message)) => ToolResponse::invalid_inputs(message),
        }
    }
}

/// Re-price the base case at each scan point. Scan points that violate the
/// kernel's input invariants (e.g. stable growth at or above WACC) are
/// dropped from the scan rather than failing the whole report.
pub fn run_sensitivity(
    inputs: &ValuationInputs,
    grid: &SensitivityGrid,
    base_vps: f64,
) -> Result<SensitivityReport, ValuationError> {
    let point = |vps: f64, value: f64| SensitivityPoint {
        value,
        vps,
        pct_change: if base_vps != 0.0 {
            (vps - base_vps) / base_vps * 100.0
        } else {
            0.0
        },
    };

    let mut stable_growth = Vec::new();
    for &g in &grid.stable_growth {
        let mut scan = inputs.clone();
        scan.stable_growth = g;
        if let Ok(result) = calculate_dcf(&scan) {
            stable_growth.push(point(result.value_per_share, g));
        } else {
            tracing::debug!("sensitivity scan dropped stable_growth={g}");
        }
    }

    let mut stable_margin = Vec::new();
    for &m in &grid.stable_margin {
        let mut scan = inputs.clone();
        scan.stable_margin = m;
        if let Ok(result) = calculate_dcf(&scan) {
            stable_margin.push(point(result.value_per_share, m));
        }
    }

    let mut wacc = Vec::new();
    for &w in &grid.wacc {
        let mut scan = inputs.clone();
        scan.wacc = vec![w; inputs.horizon()];
        if let Ok(result) = calculate_dcf(&scan) {
            wacc.push(point(result.value_per_share, w));
        }
    }

    Ok(SensitivityReport {
        base_vps,
        sensitivities: SensitivitySeries {
            stable_growth,
            stable_margin,
            wacc,
        },
    })
}
