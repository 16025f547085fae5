//! Assembles DCF inputs from hypothesis-derived assumptions with explicit
//! provenance. All arithmetic is deterministic; the language models never do
//! valuation math.

use research_core::types::{EvidenceBundle, Hypothesis, Impact};
use research_core::valuation::ValuationInputs;

use crate::data::CompanySnapshot;
use crate::policy::evidence_confidence;

const HORIZON: usize = 5;
const BASE_GROWTH_START: f64 = 0.08;
const BASE_GROWTH_END: f64 = 0.04;
const BASE_MARGIN_START: f64 = 0.18;
const BASE_MARGIN_END: f64 = 0.22;
const SALES_TO_CAPITAL: f64 = 2.5;
const WACC: f64 = 0.09;
const STABLE_GROWTH: f64 = 0.025;
const TAX_RATE: f64 = 0.25;
/// Widest evidence-driven adjustment to growth and margin endpoints.
const MAX_TILT_BPS: f64 = 0.03;

#[derive(Debug, Clone)]
pub struct AssembledValuation {
    pub inputs: ValuationInputs,
    /// One line per assumption naming what drove it.
    pub provenance: Vec<String>,
}

/// Net evidence tilt in [-1, 1] across HIGH-impact hypotheses: how far the
/// accumulated evidence pushes the base assumptions.
fn evidence_tilt(hypotheses: &[Hypothesis], bundle: &EvidenceBundle) -> (f64, Vec<String>) {
    let mut tilts = Vec::new();
    let mut drivers = Vec::new();
    for h in hypotheses.iter().filter(|h| h.impact == Impact::High) {
        let items = bundle.for_hypothesis(&h.id);
        if items.is_empty() {
            continue;
        }
        let signal = (evidence_confidence(items) - 0.5) * 2.0;
        tilts.push(signal);
        drivers.push(format!(
            "{} ({} items, signal {:+.2})",
            h.id,
            items.len(),
            signal
        ));
    }
    if tilts.is_empty() {
        return (0.0, drivers);
    }
    let tilt = tilts.iter().sum::<f64>() / tilts.len() as f64;
    (tilt.clamp(-1.0, 1.0), drivers)
}

pub fn assemble_valuation_inputs(
    snapshot: &CompanySnapshot,
    hypotheses: &[Hypothesis],
    bundle: &EvidenceBundle,
) -> AssembledValuation {
    let (tilt, drivers) = evidence_tilt(hypotheses, bundle);
    let adjustment = tilt * MAX_TILT_BPS;

    let mut growth = Vec::with_capacity(HORIZON);
    let mut operating_margin = Vec::with_capacity(HORIZON);
    for t in 0..HORIZON {
        let frac = t as f64 / (HORIZON - 1) as f64;
        growth.push(BASE_GROWTH_START + (BASE_GROWTH_END - BASE_GROWTH_START) * frac + adjustment);
        operating_margin
            .push(BASE_MARGIN_START + (BASE_MARGIN_END - BASE_MARGIN_START) * frac + adjustment);
    }
    let stable_margin = *operating_margin.last().unwrap_or(&BASE_MARGIN_END);

    let inputs = ValuationInputs {
        base_revenue: snapshot.base_revenue,
        growth,
        operating_margin,
        sales_to_capital: vec![SALES_TO_CAPITAL; HORIZON],
        wacc: vec![WACC; HORIZON],
        stable_growth: STABLE_GROWTH,
        stable_margin,
        tax_rate: TAX_RATE,
        net_debt: snapshot.net_debt,
        cash: snapshot.cash,
        shares_outstanding: snapshot.shares_outstanding,
    };

    let mut provenance = vec![
        format!(
            "base revenue {} and balance sheet from company snapshot",
            snapshot.base_revenue
        ),
        format!(
            "growth {:.3}..{:.3} and margin {:.3}..{:.3}: base fade adjusted {:+.4} by evidence tilt {:+.2}",
            inputs.growth[0],
            inputs.growth[HORIZON - 1],
            inputs.operating_margin[0],
            inputs.operating_margin[HORIZON - 1],
            adjustment,
            tilt
        ),
        format!(
            "sales-to-capital {SALES_TO_CAPITAL}, WACC {WACC}, stable growth {STABLE_GROWTH}, tax {TAX_RATE}: house defaults"
        ),
    ];
    if drivers.is_empty() {
        provenance.push("no researched HIGH-impact hypotheses; base fade unadjusted".to_string());
    } else {
        provenance.push(format!("tilt drivers: {}", drivers.join("; ")));
    }

    AssembledValuation { inputs, provenance }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::types::{EvidenceItem, ImpactDirection, SourceType};
    use valuation_engine::calculate_dcf;

    fn snapshot() -> CompanySnapshot {
        CompanySnapshot {
            name: "Acme Corp".into(),
            current_price: 100.0,
            base_revenue: 5000.0,
            net_debt: 400.0,
            cash: 250.0,
            shares_outstanding: 120.0,
        }
    }

    fn hypothesis(id: &str) -> Hypothesis {
        Hypothesis {
            id: id.into(),
            title: "t".into(),
            thesis: "10% growth. Two sentences.".into(),
            evidence_needed: vec![],
            impact: Impact::High,
            impact_rank: 1,
            confidence: 0.6,
            confidence_trajectory: vec![],
            uncertain: false,
        }
    }

    fn item(id: &str, dir: ImpactDirection) -> EvidenceItem {
        EvidenceItem {
            id: id.into(),
            claim: "c".into(),
            source_type: SourceType::TenK,
            source_reference: "r".into(),
            quote: "q".into(),
            confidence: 0.9,
            impact_direction: dir,
            contradicts: vec![],
        }
    }

    #[test]
    fn assembled_inputs_always_price() {
        let assembled =
            assemble_valuation_inputs(&snapshot(), &[], &EvidenceBundle::new());
        let result = calculate_dcf(&assembled.inputs).unwrap();
        assert!(result.value_per_share.is_finite());
        assert!(!assembled.provenance.is_empty());
    }

    #[test]
    fn bullish_evidence_raises_the_valuation() {
        let hs = vec![hypothesis("h1")];
        let mut bullish = EvidenceBundle::new();
        bullish
            .append("h1", item("ev_001", ImpactDirection::Positive))
            .unwrap();
        bullish
            .append("h1", item("ev_002", ImpactDirection::Positive))
            .unwrap();

        let base = assemble_valuation_inputs(&snapshot(), &[], &EvidenceBundle::new());
        let tilted = assemble_valuation_inputs(&snapshot(), &hs, &bullish);

        let base_vps = calculate_dcf(&base.inputs).unwrap().value_per_share;
        let tilted_vps = calculate_dcf(&tilted.inputs).unwrap().value_per_share;
        assert!(tilted_vps > base_vps);
    }

    #[test]
    fn assembly_is_deterministic() {
        let hs = vec![hypothesis("h1")];
        let mut bundle = EvidenceBundle::new();
        bundle
            .append("h1", item("ev_001", ImpactDirection::Negative))
            .unwrap();
        let a = assemble_valuation_inputs(&snapshot(), &hs, &bundle);
        let b = assemble_valuation_inputs(&snapshot(), &hs, &bundle);
        assert_eq!(a.inputs, b.inputs);
    }
}
