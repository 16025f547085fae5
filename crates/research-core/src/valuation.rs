use serde::{Deserialize, Serialize};

/// Structured DCF input. All per-year vectors share one length: the explicit
/// forecast horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationInputs {
    pub base_revenue: f64,
    pub growth: Vec<f64>,
    pub operating_margin: Vec<f64>,
    pub sales_to_capital: Vec<f64>,
    pub wacc: Vec<f64>,
    pub stable_growth: f64,
    pub stable_margin: f64,
    pub tax_rate: f64,
    pub net_debt: f64,
    pub cash: f64,
    pub shares_outstanding: f64,
}

impl ValuationInputs {
    pub fn horizon(&self) -> usize {
        self.growth.len()
    }
}

/// Year-by-year audit series behind a valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationSeries {
    pub years: Vec<u32>,
    pub revenue: Vec<f64>,
    pub ebit: Vec<f64>,
    pub nopat: Vec<f64>,
    pub reinvestment: Vec<f64>,
    pub fcff: Vec<f64>,
    pub discount_factors: Vec<f64>,
    pub pv_operating: f64,
}

/// Deterministic DCF output: identical inputs yield identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub value_per_share: f64,
    pub equity_value: f64,
    pub pv_explicit: f64,
    pub pv_terminal: f64,
    pub terminal_value: f64,
    pub series: ValuationSeries,
}
