//! Report emitters: text, markdown, JSON and a minimal HTML shell.

use clap::ValueEnum;

use research_orchestrator::AnalysisOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Markdown,
    Html,
}

pub fn render(outcome: &AnalysisOutcome, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&outcome.report)? + "\n",
        OutputFormat::Text => render_text(outcome),
        OutputFormat::Markdown => render_markdown(outcome),
        OutputFormat::Html => render_html(outcome),
    })
}

fn render_text(outcome: &AnalysisOutcome) -> String {
    let report = &outcome.report;
    let mut out = String::new();
    out.push_str(&format!(
        "RECOMMENDATION: {:?} ({:?} conviction, {})\n",
        report.recommendation.action,
        report.recommendation.conviction,
        report.recommendation.timeframe
    ));
    out.push_str(&format!(
        "Fair value {:.2} vs price {:.2} | grade {} | {} iterations | ${:.2}\n\n",
        report.valuation.fair_value,
        report.valuation.current_price,
        outcome.validation.grade,
        outcome.iterations,
        outcome.total_cost_usd
    ));
    out.push_str(&format!("SUMMARY\n{}\n\n", report.executive_summary));
    out.push_str(&format!("THESIS\n{}\n\n", report.investment_thesis));
    out.push_str("SCENARIOS\n");
    for s in &report.valuation.scenarios {
        out.push_str(&format!(
            "  {:?}: {:.0}% -> {:.2} ({})\n",
            s.name,
            s.probability * 100.0,
            s.fair_value,
            s.conditions
        ));
    }
    out.push_str(&format!("\nRISKS\n{}\n", report.risks));
    for section in &report.sections {
        out.push_str(&format!("\n{}\n{}\n", section.title.to_uppercase(), section.content));
    }
    out
}

fn render_markdown(outcome: &AnalysisOutcome) -> String {
    let report = &outcome.report;
    let mut out = String::new();
    out.push_str(&format!(
        "# {:?} - conviction {:?}\n\n",
        report.recommendation.action, report.recommendation.conviction
    ));
    out.push_str(&format!(
        "**Fair value** {:.2} | **price** {:.2} | **grade** {}\n\n",
        report.valuation.fair_value, report.valuation.current_price, outcome.validation.grade
    ));
    out.push_str(&format!("## Executive summary\n\n{}\n\n", report.executive_summary));
    out.push_str(&format!("## Investment thesis\n\n{}\n\n", report.investment_thesis));
    out.push_str(&format!("## Financial analysis\n\n{}\n\n", report.financial_analysis));
    out.push_str("## Valuation\n\n");
    out.push_str(&format!("Methodology: {}\n\n", report.valuation.methodology));
    out.push_str("| Scenario | Probability | Fair value | Conditions |\n");
    out.push_str("|---|---|---|---|\n");
    for s in &report.valuation.scenarios {
        out.push_str(&format!(
            "| {:?} | {:.0}% | {:.2} | {} |\n",
            s.name,
            s.probability * 100.0,
            s.fair_value,
            s.conditions
        ));
    }
    out.push_str(&format!("\n## Bull vs bear\n\n{}\n\n", report.bull_bear_analysis));
    out.push_str(&format!("## Risks\n\n{}\n\n", report.risks));
    for section in &report.sections {
        out.push_str(&format!("## {}\n\n{}\n\n", section.title, section.content));
        if !section.evidence_refs.is_empty() {
            out.push_str(&format!("Evidence: {}\n\n", section.evidence_refs.join(", ")));
        }
    }
    out
}

fn render_html(outcome: &AnalysisOutcome) -> String {
    let report = &outcome.report;
    let mut body = String::new();
    body.push_str(&format!(
        "<h1>{:?} - {:?} conviction</h1>\n<p>Fair value {:.2} vs price {:.2} (grade {})</p>\n",
        report.recommendation.action,
        report.recommendation.conviction,
        report.valuation.fair_value,
        report.valuation.current_price,
        outcome.validation.grade
    ));
    body.push_str(&format!(
        "<h2>Executive summary</h2>\n<p>{}</p>\n",
        escape(&report.executive_summary)
    ));
    body.push_str(&format!(
        "<h2>Investment thesis</h2>\n<p>{}</p>\n",
        escape(&report.investment_thesis)
    ));
    body.push_str("<h2>Scenarios</h2>\n<ul>\n");
    for s in &report.valuation.scenarios {
        body.push_str(&format!(
            "<li>{:?}: {:.0}% at {:.2} - {}</li>\n",
            s.name,
            s.probability * 100.0,
            s.fair_value,
            escape(&s.conditions)
        ));
    }
    body.push_str("</ul>\n");
    body.push_str(&format!("<h2>Risks</h2>\n<p>{}</p>\n", escape(&report.risks)));
    for section in &report.sections {
        body.push_str(&format!(
            "<h2>{}</h2>\n<p>{}</p>\n",
            escape(&section.title),
            escape(&section.content)
        ));
    }
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Research report</title></head>\n<body>\n{body}</body></html>\n"
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
