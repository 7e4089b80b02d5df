//! Attendance aggregation: seen identities + roster → one report per period.

use crate::periods::Schedule;
use crate::roster::{EnrolledIdentity, SeenSet};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

/// Roll Number cell of the trailing summary row.
pub const SUMMARY_LABEL: &str = "Summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Present,
    Absent,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Present => "Present",
            Status::Absent => "Absent",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRow {
    pub roll: String,
    pub name: String,
    pub status: Status,
}

/// Head counts for one report. `present + absent == total` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

impl Summary {
    fn percent(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64 * 100.0
        }
    }

    pub fn present_percent(&self) -> f64 {
        Self::percent(self.present, self.total)
    }

    pub fn absent_percent(&self) -> f64 {
        Self::percent(self.absent, self.total)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Present: {} ({:.1}%), Absent: {} ({:.1}%)",
            self.present,
            self.present_percent(),
            self.absent,
            self.absent_percent()
        )
    }
}

/// One period's roster, sorted by roll, plus its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceReport {
    /// Period name; doubles as the status column header.
    pub period: String,
    pub generated_at: NaiveDateTime,
    pub rows: Vec<AttendanceRow>,
    pub summary: Summary,
}

/// Build the report for `now`.
///
/// Every identity gets exactly one row, Present iff its key is in `seen`.
/// Rows are ordered by roll identifier (lexicographic).
pub fn aggregate(
    seen: &SeenSet,
    identities: &[EnrolledIdentity],
    schedule: &Schedule,
    now: NaiveDateTime,
) -> AttendanceReport {
    let period = schedule.period_at(now.time()).to_string();

    let mut rows: Vec<AttendanceRow> = identities
        .iter()
        .map(|identity| AttendanceRow {
            roll: identity.key.roll.clone(),
            name: identity.key.name.clone(),
            status: if seen.contains(&identity.key) {
                Status::Present
            } else {
                Status::Absent
            },
        })
        .collect();
    rows.sort_by(|a, b| a.roll.cmp(&b.roll));

    let present = rows.iter().filter(|r| r.status == Status::Present).count();
    let absent = rows.len() - present;
    let summary = Summary {
        present,
        absent,
        total: present + absent,
    };

    tracing::info!(
        period = %period,
        present,
        absent,
        total = summary.total,
        "attendance aggregated"
    );

    AttendanceReport {
        period,
        generated_at: now,
        rows,
        summary,
    }
}
