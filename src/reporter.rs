use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::ReportFormat;
use crate::error::Result;

/// Label counts for one cycle's predictions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleResult {
    pub analyzed: usize,
    pub label_counts: BTreeMap<String, usize>,
}

impl CycleResult {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut result = CycleResult::default();
        for label in labels {
            *result.label_counts.entry(label.into()).or_insert(0) += 1;
            result.analyzed += 1;
        }
        result
    }
}

/// What gets shown to the operator at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: DateTime<Local>,
    pub flows_analyzed: usize,
    pub benign_label: String,
    pub benign: usize,
    pub malicious: usize,
    pub labels: BTreeMap<String, usize>,
}

impl CycleReport {
    /// Everything that is not `benign_label` counts as malicious.
    pub fn summarize(
        cycle: u64,
        timestamp: DateTime<Local>,
        result: CycleResult,
        benign_label: &str,
    ) -> Self {
        let benign = result.label_counts.get(benign_label).copied().unwrap_or(0);
        CycleReport {
            cycle,
            timestamp,
            flows_analyzed: result.analyzed,
            benign_label: benign_label.to_string(),
            benign,
            malicious: result.analyzed - benign,
            labels: result.label_counts,
        }
    }

    pub fn has_valid_flows(&self) -> bool {
        self.flows_analyzed > 0
    }

    pub fn is_attack(&self) -> bool {
        self.malicious > 0
    }

    /// Labels by descending count, ties by name.
    pub fn breakdown(&self) -> Vec<(&str, usize)> {
        let mut rows: Vec<(&str, usize)> = self
            .labels
            .iter()
            .map(|(label, count)| (label.as_str(), *count))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

pub fn render(report: &CycleReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(report)),
        ReportFormat::Json => render_json(report),
    }
}

pub fn render_text(report: &CycleReport) -> String {
    if !report.has_valid_flows() {
        return "No valid flows for inference.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Flows analyzed: {}", report.flows_analyzed);
    let _ = write!(out, "Normal: {} | Suspicious: {}", report.benign, report.malicious);

    if report.is_attack() {
        let _ = write!(out, "\n\n\x1b[31m!!! WARNING: POTENTIAL ATTACK DETECTED !!!\x1b[0m");
        let width = report
            .labels
            .keys()
            .map(|label| label.len())
            .max()
            .unwrap_or(0);
        for (label, count) in report.breakdown() {
            let _ = write!(out, "\n  {:<width$}  {}", label, count, width = width);
        }
    }
    out
}

pub fn render_json(report: &CycleReport) -> Result<String> {
    Ok(serde_json::to_string(report)?)
}
