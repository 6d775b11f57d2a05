//! Plain-text rendering of run summaries and dry-run plans.

use chrono::{DateTime, Utc};
use meterlink_core::{ContractReport, DateRange, MeasureReport, RunReport, RunStatus, Watermark};
use meterlink_sync::PlannedMeasure;

// ── Public API ──

/// Print the run summary: totals, one block per contract, then skipped contracts.
pub fn print_summary(report: &RunReport) {
    for line in summary_lines(report) {
        println!("{line}");
    }
}

/// Print the dry-run plan of one contract.
pub fn print_plan(contract_id: &str, plans: &[PlannedMeasure]) {
    for line in plan_lines(contract_id, plans) {
        println!("{line}");
    }
}

pub fn summary_lines(report: &RunReport) -> Vec<String> {
    let status = match report.status {
        RunStatus::Running => "RUNNING",
        RunStatus::Finished => "FINISHED",
    };
    let mut lines = vec![
        format!("=== Run {} ({status}) ===", day_time(report.started_at)),
        format!(
            "contracts: {}  processed: {}  skipped: {}  failed: {}",
            report.num_contracts,
            report.results.len(),
            report.skipped.len(),
            report.failures().count()
        ),
    ];

    for contract in report.results.values() {
        lines.push(String::new());
        lines.extend(contract_lines(contract));
    }

    if !report.skipped.is_empty() {
        lines.push(String::new());
        lines.push("Skipped".to_string());
        for skipped in &report.skipped {
            lines.push(format!("  {:<16} {}", skipped.contract_id, skipped.reason));
        }
    }
    lines
}

pub fn plan_lines(contract_id: &str, plans: &[PlannedMeasure]) -> Vec<String> {
    let mut lines = vec![contract_id.to_string()];
    for planned in plans {
        let detail = match &planned.plan {
            None => "not eligible".to_string(),
            Some(plan) if plan.is_empty() => "up to date".to_string(),
            Some(plan) => {
                let mut parts = Vec::new();
                if let Some(range) = plan.backward {
                    parts.push(format!("backward {}", range_label(range)));
                }
                if let Some(range) = plan.forward {
                    parts.push(format!("forward {}", range_label(range)));
                }
                parts.join("  ")
            }
        };
        lines.push(format!(
            "  {:<9} {detail}  (watermark {})",
            planned.kind.as_str(),
            watermark_label(planned.prior)
        ));
    }
    lines
}

// ── Rendering helpers ──

fn contract_lines(contract: &ContractReport) -> Vec<String> {
    let publish = match &contract.publish {
        None => "not published".to_string(),
        Some(p) => match (&p.status, &p.error) {
            (_, Some(error)) => format!("publish {} failed: {error}", p.decision),
            (Some(status), None) => format!("publish {} ({status})", p.decision),
            (None, None) => format!("publish {}", p.decision),
        },
    };
    let mut lines = vec![format!("{}  {publish}", contract.contract_id)];
    for measure in &contract.measures {
        lines.push(measure_line(measure));
    }
    if let Some(failure) = &contract.failure {
        lines.push(format!("  FAILED: {failure}"));
    }
    lines
}

fn measure_line(measure: &MeasureReport) -> String {
    let kind = measure.kind.as_str();
    if !measure.eligible {
        return format!(
            "  {kind:<9} not eligible  watermark {}",
            watermark_label(measure.watermark)
        );
    }
    let fetched = measure.windows.len() - measure.failed_windows();
    let upload = match &measure.upload {
        None => "nothing to send".to_string(),
        Some(u) => match (&u.status, &u.error) {
            (_, Some(error)) => format!("{} measures, upload failed: {error}", u.measures),
            (Some(status), None) => format!("{} measures, upload {status}", u.measures),
            (None, None) => format!("{} measures", u.measures),
        },
    };
    format!(
        "  {kind:<9} windows {fetched}/{}  {upload}  watermark {}",
        measure.windows.len(),
        watermark_label(measure.watermark)
    )
}

fn day_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn day(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn range_label(range: DateRange) -> String {
    format!("{} .. {}", day(range.from), day(range.to))
}

fn watermark_label(watermark: Option<Watermark>) -> String {
    match watermark {
        Some(w) => format!("{} .. {}", day(w.min()), day(w.max())),
        None => "-".to_string(),
    }
}
