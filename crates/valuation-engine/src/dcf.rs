//! Deterministic DCF kernel. Pure f64 arithmetic over structured inputs; no
//! I/O, no clock reads, no language-model involvement. Identical inputs yield
//! byte-identical outputs.

use research_core::valuation::{ValuationInputs, ValuationResult, ValuationSeries};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValuationError {
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),
}

fn validate(inputs: &ValuationInputs) -> Result<(), ValuationError> {
    let horizon = inputs.growth.len();
    if horizon == 0 {
        return Err(ValuationError::InvalidInputs(
            "empty forecast horizon".to_string(),
        ));
    }
    if inputs.operating_margin.len() != horizon
        || inputs.sales_to_capital.len() != horizon
        || inputs.wacc.len() != horizon
    {
        return Err(ValuationError::InvalidInputs(format!(
            "vector length mismatch: growth={}, margin={}, sales_to_capital={}, wacc={}",
            horizon,
            inputs.operating_margin.len(),
            inputs.sales_to_capital.len(),
            inputs.wacc.len()
        )));
    }

    let scalars = [
        inputs.base_revenue,
        inputs.stable_growth,
        inputs.stable_margin,
        inputs.tax_rate,
        inputs.net_debt,
        inputs.cash,
        inputs.shares_outstanding,
    ];
    let all_values = inputs
        .growth
        .iter()
        .chain(&inputs.operating_margin)
        .chain(&inputs.sales_to_capital)
        .chain(&inputs.wacc)
        .chain(&scalars);
    for v in all_values {
        if !v.is_finite() {
            return Err(ValuationError::InvalidInputs(
                "non-finite value in inputs".to_string(),
            ));
        }
    }

    if inputs.shares_outstanding <= 0.0 {
        return Err(ValuationError::InvalidInputs(format!(
            "shares outstanding must be > 0, got {}",
            inputs.shares_outstanding
        )));
    }
    if inputs.sales_to_capital.iter().any(|&s| s <= 0.0) {
        return Err(ValuationError::InvalidInputs(
            "sales-to-capital entries must be > 0".to_string(),
        ));
    }
    let min_wacc = inputs.wacc.iter().cloned().fold(f64::INFINITY, f64::min);
    if inputs.stable_growth >= min_wacc {
        return Err(ValuationError::InvalidInputs(format!(
            "stable growth {} must be below min WACC {}",
            inputs.stable_growth, min_wacc
        )));
    }
    Ok(())
}

/// Compute value per share and the full audit series.
///
/// Revenue compounds the base through the growth vector; EBIT applies the
/// per-year margin; reinvestment charges revenue deltas at the per-year
/// sales-to-capital ratio; FCFF discounts at the cumulative per-year WACC.
/// The terminal year grows final revenue once at stable growth, applies the
/// stable margin, reinvests at the final sales-to-capital ratio and
/// capitalizes at (terminal WACC - stable growth).
pub fn calculate_dcf(inputs: &ValuationInputs) -> Result<ValuationResult, ValuationError> {
    validate(inputs)?;
    let horizon = inputs.horizon();

    let mut revenue = Vec::with_capacity(horizon);
    let mut ebit = Vec::with_capacity(horizon);
    let mut nopat = Vec::with_capacity(horizon);
    let mut reinvestment = Vec::with_capacity(horizon);
    let mut fcff = Vec::with_capacity(horizon);
    let mut discount_factors = Vec::with_capacity(horizon);

    let mut prior_revenue = inputs.base_revenue;
    let mut cumulative_discount = 1.0;
    let mut pv_explicit = 0.0;

    for t in 0..horizon {
        let rev = prior_revenue * (1.0 + inputs.growth[t]);
        let op = rev * inputs.operating_margin[t];
        let after_tax = op * (1.0 - inputs.tax_rate);
        let reinv = (rev - prior_revenue) / inputs.sales_to_capital[t];
        let cash_flow = after_tax - reinv;
        cumulative_discount /= 1.0 + inputs.wacc[t];

        pv_explicit += cash_flow * cumulative_discount;

        revenue.push(rev);
        ebit.push(op);
        nopat.push(after_tax);
        reinvestment.push(reinv);
        fcff.push(cash_flow);
        discount_factors.push(cumulative_discount);
        prior_revenue = rev;
    }

    // Terminal year at stable growth and stable margin.
    let final_revenue = revenue[horizon - 1];
    let terminal_revenue = final_revenue * (1.0 + inputs.stable_growth);
    let terminal_nopat = terminal_revenue * inputs.stable_margin * (1.0 - inputs.tax_rate);
    let terminal_reinvestment =
        (terminal_revenue - final_revenue) / inputs.sales_to_capital[horizon - 1];
    let terminal_fcff = terminal_nopat - terminal_reinvestment;
    let terminal_wacc = inputs.wacc[horizon - 1];
    let terminal_value = terminal_fcff / (terminal_wacc - inputs.stable_growth);
    let pv_terminal = terminal_value * discount_factors[horizon - 1];

    let equity_value = pv_explicit + pv_terminal - inputs.net_debt + inputs.cash;
    let value_per_share = equity_value / inputs.shares_outstanding;

    Ok(ValuationResult {
        value_per_share,
        equity_value,
        pv_explicit,
        pv_terminal,
        terminal_value,
        series: ValuationSeries {
            years: (1..=horizon as u32).collect(),
            revenue,
            ebit,
            nopat,
            reinvestment,
            fcff,
            discount_factors,
            pv_operating: pv_explicit + pv_terminal,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> ValuationInputs {
        ValuationInputs {
            base_revenue: 1000.0,
            growth: vec![0.10, 0.10, 0.08, 0.08, 0.05],
            operating_margin: vec![0.20, 0.22, 0.23, 0.24, 0.25],
            sales_to_capital: vec![2.0, 2.0, 2.0, 2.0, 2.0],
            wacc: vec![0.10, 0.10, 0.10, 0.10, 0.10],
            stable_growth: 0.02,
            stable_margin: 0.25,
            tax_rate: 0.25,
            net_debt: 0.0,
            cash: 0.0,
            shares_outstanding: 100.0,
        }
    }

    #[test]
    fn dcf_is_deterministic() {
        let first = calculate_dcf(&base_inputs()).unwrap();
        let second = calculate_dcf(&base_inputs()).unwrap();
        assert!(first.value_per_share.is_finite());
        assert!(first.value_per_share > 0.0);
        // Bit-identical, not approximately equal.
        assert_eq!(
            first.value_per_share.to_bits(),
            second.value_per_share.to_bits()
        );
        assert_eq!(first, second);
    }

    #[test]
    fn revenue_compounds_through_growth_vector() {
        let result = calculate_dcf(&base_inputs()).unwrap();
        assert!((result.series.revenue[0] - 1100.0).abs() < 1e-9);
        assert!((result.series.revenue[1] - 1210.0).abs() < 1e-9);
        // FCFF = NOPAT - reinvestment, year 1: 1100*0.20*0.75 - 100/2 = 115.
        assert!((result.series.fcff[0] - 115.0).abs() < 1e-9);
    }

    #[test]
    fn pv_explicit_reconstructs_from_series() {
        let result = calculate_dcf(&base_inputs()).unwrap();
        let reconstructed: f64 = result
            .series
            .fcff
            .iter()
            .zip(&result.series.discount_factors)
            .map(|(cf, d)| cf * d)
            .sum();
        let relative = ((reconstructed - result.pv_explicit) / result.pv_explicit).abs();
        assert!(relative < 1e-9);
    }

    #[test]
    fn equity_bridge_applies_debt_and_cash() {
        let mut inputs = base_inputs();
        inputs.net_debt = 200.0;
        inputs.cash = 50.0;
        let levered = calculate_dcf(&inputs).unwrap();
        let unlevered = calculate_dcf(&base_inputs()).unwrap();
        assert!((unlevered.equity_value - levered.equity_value - 150.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_shape_mismatch() {
        let mut inputs = base_inputs();
        inputs.wacc.pop();
        assert!(matches!(
            calculate_dcf(&inputs),
            Err(ValuationError::InvalidInputs(_))
        ));
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut inputs = base_inputs();
        inputs.growth[2] = f64::NAN;
        assert!(calculate_dcf(&inputs).is_err());
    }

    #[test]
    fn rejects_non_positive_shares() {
        let mut inputs = base_inputs();
        inputs.shares_outstanding = 0.0;
        assert!(calculate_dcf(&inputs).is_err());
    }

    #[test]
    fn rejects_stable_growth_at_or_above_min_wacc() {
        let mut inputs = base_inputs();
        inputs.stable_growth = 0.10;
        assert!(calculate_dcf(&inputs).is_err());
        inputs.stable_growth = 0.12;
        assert!(calculate_dcf(&inputs).is_err());
    }

    #[test]
    fn higher_stable_growth_raises_value() {
        let low = calculate_dcf(&base_inputs()).unwrap();
        let mut inputs = base_inputs();
        inputs.stable_growth = 0.03;
        let high = calculate_dcf(&inputs).unwrap();
        assert!(high.value_per_share > low.value_per_share);
    }
}
