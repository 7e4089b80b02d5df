//! Class period timetable.
//!
//! Maps wall-clock time to a named period. The default timetable is embedded
//! at compile time from `contrib/periods/default.toml`; a replacement file
//! with the same `[[period]]` layout can be loaded at runtime.

use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Compile-time embedded default timetable.
const DEFAULT_SCHEDULE: &str = include_str!("../../../contrib/periods/default.toml");

/// Period name used when no interval contains the current time.
pub const FALLBACK_PERIOD: &str = "Others";

static BUILTIN: OnceLock<Schedule> = OnceLock::new();

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("bad timetable TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read timetable {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("period '{name}': cannot parse time '{value}' (expected HH:MM or H:MM AM/PM)")]
    BadTime { name: String, value: String },
    #[error("period '{0}' must start before it ends")]
    EmptyInterval(String),
    #[error("periods '{0}' and '{1}' overlap")]
    Overlap(String, String),
}

#[derive(Debug, Deserialize)]
struct ScheduleFile {
    #[serde(default)]
    period: Vec<PeriodEntry>,
}

#[derive(Debug, Deserialize)]
struct PeriodEntry {
    name: String,
    start: String,
    end: String,
}

/// A named half-open interval `[start, end)` of the school day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Period {
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// An ordered, non-overlapping set of periods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    periods: Vec<Period>,
}

impl Schedule {
    /// The embedded default timetable.
    pub fn builtin() -> &'static Schedule {
        BUILTIN.get_or_init(|| match Schedule::from_toml(DEFAULT_SCHEDULE) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    fallback = FALLBACK_PERIOD,
                    "embedded timetable is invalid; every time maps to the fallback period"
                );
                Schedule { periods: Vec::new() }
            }
        })
    }

    pub fn from_toml(src: &str) -> Result<Self, ScheduleError> {
        let file: ScheduleFile = toml::from_str(src)?;
        let mut periods = file
            .period
            .into_iter()
            .map(|entry| {
                let start = parse_time(&entry.name, &entry.start)?;
                let end = parse_time(&entry.name, &entry.end)?;
                if start >= end {
                    return Err(ScheduleError::EmptyInterval(entry.name));
                }
                Ok(Period {
                    name: entry.name,
                    start,
                    end,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        periods.sort_by_key(|p| p.start);
        for pair in periods.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ScheduleError::Overlap(pair[0].name.clone(), pair[1].name.clone()));
            }
        }

        Ok(Self { periods })
    }

    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let src = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&src)
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    /// Name of the period containing `time`, or [`FALLBACK_PERIOD`].
    pub fn period_at(&self, time: NaiveTime) -> &str {
        self.periods
            .iter()
            .find(|p| p.contains(time))
            .map(|p| p.name.as_str())
            .unwrap_or(FALLBACK_PERIOD)
    }
}

fn parse_time(name: &str, value: &str) -> Result<NaiveTime, ScheduleError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%I:%M %p"))
        .map_err(|_| ScheduleError::BadTime {
            name: name.to_string(),
            value: value.to_string(),
        })
}
