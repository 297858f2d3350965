//! Plain-text reports for the terminal.

use std::fmt::Write;

use riskcast_core::analysis::ComparisonReport;
use riskcast_core::calibration::{HistoricalCalibrator, RecalibrationReport};
use riskcast_core::config::SimulationConfig;
use riskcast_core::model::{ImpactSummary, ImpactType, SimulationResult, SimulationWarning};
use riskcast_core::scenario::{MitigationAnalysis, TornadoEntry};

fn unit(impact: ImpactType) -> &'static str {
    match impact {
        ImpactType::Cost => "",
        ImpactType::Schedule => " days",
    }
}

fn write_summary(out: &mut String, summary: &ImpactSummary) {
    let u = unit(summary.impact);
    let _ = writeln!(out, "{}:", summary.impact);
    let _ = writeln!(
        out,
        "  mean {:.2}{u}  std dev {:.2}  CV {:.3}",
        summary.mean, summary.std_dev, summary.coefficient_of_variation
    );
    let _ = writeln!(out, "  range [{:.2}, {:.2}]", summary.min, summary.max);
    let percentiles: Vec<String> = summary
        .percentiles
        .pairs()
        .iter()
        .map(|(p, v)| format!("P{:.0} {v:.2}", p * 100.0))
        .collect();
    let _ = writeln!(out, "  {}", percentiles.join("  "));
    for ci in &summary.confidence_intervals {
        let _ = writeln!(
            out,
            "  {:.0}% interval [{:.2}, {:.2}]",
            ci.level * 100.0,
            ci.lower,
            ci.upper
        );
    }
}

/// Summary, contributors and warnings of one run
pub fn format_result(config: &SimulationConfig, result: &SimulationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} iterations, seed {}, {}",
        result.iteration_count,
        result.seed,
        if result.convergence_status {
            "converged"
        } else {
            "NOT converged"
        }
    );

    for impact in ImpactType::ALL {
        let Some(summary) = result.summary(impact) else {
            continue;
        };
        write_summary(&mut out, summary);
        let _ = writeln!(out, "  top contributors:");
        for c in result.contributions_for(impact) {
            let name = config.risk(c.risk_id).map_or("?", |r| r.name.as_str());
            let _ = writeln!(
                out,
                "    {:>2}. {} {name}  {:.1}% of variance",
                c.rank,
                c.risk_id,
                c.variance_share * 100.0
            );
        }
    }

    for warning in &result.warnings {
        match warning {
            SimulationWarning::NotConverged {
                impact,
                relative_change,
            } => {
                let _ = writeln!(
                    out,
                    "warning: {impact} mean still moving ({:.3}% over the last batches)",
                    relative_change * 100.0
                );
            }
            SimulationWarning::SamplesThinned { retained, total } => {
                let _ = writeln!(out, "note: kept {retained} of {total} iteration samples");
            }
        }
    }
    out
}

pub fn format_comparison(report: &ComparisonReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} comparison ({:?})", report.impact, report.test);
    let _ = writeln!(
        out,
        "  mean A {:.2}  mean B {:.2}  difference {:+.2}",
        report.mean_a, report.mean_b, report.mean_difference
    );
    let _ = writeln!(
        out,
        "  statistic {:.4}  p-value {:.4}  effect size {:.3}",
        report.statistic, report.p_value, report.effect_size
    );
    let _ = writeln!(
        out,
        "  {} at alpha = {}",
        if report.significant {
            "significant"
        } else {
            "not significant"
        },
        report.alpha
    );
    out
}

pub fn format_tornado(entries: &[TornadoEntry]) -> String {
    let mut out = String::new();
    let Some(first) = entries.first() else {
        return out;
    };
    let _ = writeln!(
        out,
        "{} sensitivity (base mean {:.2})",
        first.impact, first.base_mean
    );
    for entry in entries {
        let _ = writeln!(
            out,
            "  {:>2}. {:<32} swing {:>12.2}  [{:.2}, {:.2}]",
            entry.rank, entry.label, entry.swing, entry.low, entry.high
        );
    }
    out
}

pub fn format_mitigations(analyses: &[MitigationAnalysis]) -> String {
    let mut out = String::new();
    for (i, a) in analyses.iter().enumerate() {
        let roi = a
            .return_on_investment
            .map_or_else(|| "n/a".to_string(), |r| format!("{:.1}%", r * 100.0));
        let _ = writeln!(
            out,
            "{:>2}. {} (risk {}, {})",
            i + 1,
            a.strategy.name,
            a.strategy.risk_id,
            a.impact
        );
        let _ = writeln!(
            out,
            "    expected {:.2} -> {:.2}{}  benefit {:.2}  cost {:.2}  net {:+.2}  ROI {roi}",
            a.unmitigated_expected,
            a.mitigated_expected,
            unit(a.impact),
            a.expected_benefit,
            a.mitigation_cost,
            a.net_benefit
        );
    }
    out
}

pub fn format_recalibration(report: &RecalibrationReport, library: &HistoricalCalibrator) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} outcomes recorded", report.outcomes);
    for key in &report.updated {
        let Some(pattern) = library.patterns().find(|p| &p.key == key) else {
            continue;
        };
        let _ = writeln!(
            out,
            "  updated {key}: {} from {} outcomes (KS {:.3}, p {:.3})",
            pattern.fit.family.label(),
            pattern.sample_count,
            pattern.fit.ks_statistic,
            pattern.fit.p_value
        );
    }
    for skipped in &report.skipped {
        let _ = writeln!(
            out,
            "  skipped {} ({} outcomes): {}",
            skipped.key, skipped.sample_count, skipped.reason
        );
    }
    if let Some(mape) = library.overall_mape() {
        let _ = writeln!(out, "overall forecast MAPE {:.1}%", mape * 100.0);
    }
    out
}
