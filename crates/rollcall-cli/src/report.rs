use crate::config::ReportFormat;
use anyhow::{Context, Result};
use rollcall_core::attendance::SUMMARY_LABEL;
use chrono::NaiveDateTime;
use rollcall_core::{aggregate, AttendanceReport, AttendanceRow, Roster, Schedule, SeenSet, Summary};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// `"<title> - dd-mm-YYYY HH-MM-SS.<ext>"`, stamped with the report time.
pub fn file_name(title: &str, report: &AttendanceReport, format: ReportFormat) -> String {
    format!(
        "{title} - {}.{}",
        report.generated_at.format("%d-%m-%Y %H-%M-%S"),
        format.extension()
    )
}

/// Write `report` into `dir` (created if missing). Fails rather than
/// overwrite an existing file.
pub fn write(dir: &Path, title: &str, report: &AttendanceReport, format: ReportFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating reports folder {}", dir.display()))?;
    let path = dir.join(file_name(title, report, format));
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("creating report {}", path.display()))?;

    let mut out = BufWriter::new(file);
    match format {
        ReportFormat::Csv => write_csv(&mut out, report)?,
        ReportFormat::Json => serde_json::to_writer_pretty(&mut out, &JsonReport::from(report))?,
    }
    out.flush()?;

    tracing::info!(path = %path.display(), rows = report.rows.len(), "report written");
    Ok(path)
}

/// Where and how a finished run's report is written.
pub struct ReportTarget<'a> {
    pub dir: &'a Path,
    pub title: &'a str,
    pub format: ReportFormat,
}

/// Turn the identities seen during a run into a written report.
///
/// Nothing is generated, and the reports folder is left untouched, when
/// nobody was recognized.
pub fn finish(
    seen: &SeenSet,
    roster: &Roster,
    schedule: &Schedule,
    now: NaiveDateTime,
    target: &ReportTarget<'_>,
) -> Result<Option<(AttendanceReport, PathBuf)>> {
    if seen.is_empty() {
        tracing::info!("no faces recognized; skipping report");
        return Ok(None);
    }
    let report = aggregate(seen, roster.identities(), schedule, now);
    let path = write(target.dir, target.title, &report, target.format)?;
    Ok(Some((report, path)))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header `Roll Number,Name,<period>`, one line per row, then the summary line.
pub fn write_csv(out: &mut impl Write, report: &AttendanceReport) -> std::io::Result<()> {
    writeln!(out, "Roll Number,Name,{}", csv_field(&report.period))?;
    for row in &report.rows {
        writeln!(
            out,
            "{},{},{}",
            csv_field(&row.roll),
            csv_field(&row.name),
            row.status
        )?;
    }
    writeln!(out, "{SUMMARY_LABEL},,{}", csv_field(&report.summary.to_string()))
}

#[derive(Serialize)]
struct JsonReport<'a> {
    period: &'a str,
    generated_at: String,
    rows: &'a [AttendanceRow],
    summary: &'a Summary,
    summary_text: String,
}

impl<'a> From<&'a AttendanceReport> for JsonReport<'a> {
    fn from(report: &'a AttendanceReport) -> Self {
        Self {
            period: &report.period,
            generated_at: report.generated_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            rows: &report.rows,
            summary: &report.summary,
            summary_text: report.summary.to_string(),
        }
    }
}
