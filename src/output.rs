use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Summary,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Plain-text end-of-run summary.
pub fn render_summary(report: &RunReport) -> String {
    let mut lines = vec![
        "S-PLUS harvest summary".to_string(),
        format!(
            "fields: {} requested, {} validated, {} excluded",
            report.requested,
            report.validated,
            report.excluded.len()
        ),
        format!(
            "outcomes: {} succeeded, {} empty, {} failed",
            report.succeeded, report.empty, report.failed
        ),
    ];

    for item in &report.fields {
        let detail = match (&item.error, item.status.as_str()) {
            (Some(error), _) => format!("failed after {} attempts: {error}", item.attempts),
            (None, "empty") => "no objects".to_string(),
            (None, _) => format!("{} objects", item.rows),
        };
        lines.push(format!("  {} {}", item.field, detail));
    }
    for field in &report.excluded {
        lines.push(format!("  {field} excluded by validation"));
    }

    match &report.combined_path {
        Some(path) => lines.push(format!(
            "total objects: {} -> {path}",
            report.total_objects
        )),
        None => lines.push("total objects: 0 (no combined artifact written)".to_string()),
    }
    lines.push(format!("total time: {:.1} minutes", report.elapsed_secs / 60.0));
    lines.join("\n")
}
