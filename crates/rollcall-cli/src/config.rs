use anyhow::{Context, Result};
use rollcall_core::roster::DEFAULT_SEPARATOR;
use rollcall_core::{Metric, DEFAULT_TOLERANCE};
use rollcall_imaging::{GateConfig, QualityDecision};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How photos rejected by the quality gate are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Ask on the console; skip when stdin is not a terminal.
    Prompt,
    Retry,
    #[default]
    Skip,
    Abort,
}

impl FailureMode {
    /// The fixed answer for non-interactive modes.
    pub fn fixed_decision(self) -> Option<QualityDecision> {
        match self {
            FailureMode::Prompt => None,
            FailureMode::Retry => Some(QualityDecision::Retry),
            FailureMode::Skip => Some(QualityDecision::Skip),
            FailureMode::Abort => Some(QualityDecision::Abort),
        }
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(FailureMode::Prompt),
            other => other
                .parse::<QualityDecision>()
                .map(|d| match d {
                    QualityDecision::Retry => FailureMode::Retry,
                    QualityDecision::Skip => FailureMode::Skip,
                    QualityDecision::Abort => FailureMode::Abort,
                })
                .map_err(|_| format!("unknown quality failure mode '{other}' (expected prompt, retry, skip or abort)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{other}' (expected csv or json)")),
        }
    }
}

/// Runtime configuration.
///
/// Layered lowest to highest: compiled defaults, a TOML file, `ROLLCALL_*`
/// environment variables, then command-line flags (applied in `main`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One subfolder per enrolled person, named `<name><separator><roll>`.
    pub students_dir: PathBuf,
    /// Group photos to take attendance from.
    pub group_dir: PathBuf,
    /// Where report files are written.
    pub reports_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub report_title: String,
    pub report_format: ReportFormat,
    pub separator: char,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    pub metric: Metric,
    pub on_quality_failure: FailureMode,
    /// Upper bound on folder rescans triggered by `retry`.
    pub max_quality_retries: u32,
    /// Seconds an operator gets to look at a rejected photo before the prompt.
    pub preview_delay_secs: u64,
    /// Replaces the built-in period timetable.
    pub periods_file: Option<PathBuf>,
    /// Enables saving annotated photos for review.
    pub annotated_dir: Option<PathBuf>,
    pub gate: GateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            students_dir: PathBuf::from("students"),
            group_dir: PathBuf::from("group photo"),
            reports_dir: PathBuf::from("attendance_records"),
            model_dir: rollcall_core::default_model_dir(),
            report_title: "Attendance".to_string(),
            report_format: ReportFormat::default(),
            separator: DEFAULT_SEPARATOR,
            tolerance: DEFAULT_TOLERANCE,
            metric: Metric::default(),
            on_quality_failure: FailureMode::default(),
            max_quality_retries: 3,
            preview_delay_secs: 5,
            periods_file: None,
            annotated_dir: None,
            gate: GateConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` (or `ROLLCALL_CONFIG`), then
    /// `ROLLCALL_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&src).with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables resolved through `lookup`.
    /// Unparsable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = &lookup;
        if let Some(v) = lookup("ROLLCALL_STUDENTS_DIR") {
            self.students_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_GROUP_DIR") {
            self.group_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_REPORTS_DIR") {
            self.reports_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_REPORT_TITLE") {
            self.report_title = v;
        }
        if let Some(v) = lookup("ROLLCALL_PERIODS_FILE") {
            self.periods_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ROLLCALL_ANNOTATED_DIR") {
            self.annotated_dir = Some(PathBuf::from(v));
        }

        env_parse(lookup, "ROLLCALL_REPORT_FORMAT", &mut self.report_format);
        env_parse(lookup, "ROLLCALL_SEPARATOR", &mut self.separator);
        env_parse(lookup, "ROLLCALL_TOLERANCE", &mut self.tolerance);
        env_parse(lookup, "ROLLCALL_METRIC", &mut self.metric);
        env_parse(lookup, "ROLLCALL_ON_QUALITY_FAILURE", &mut self.on_quality_failure);
        env_parse(lookup, "ROLLCALL_MAX_QUALITY_RETRIES", &mut self.max_quality_retries);
        env_parse(lookup, "ROLLCALL_PREVIEW_DELAY_SECS", &mut self.preview_delay_secs);
        env_parse(lookup, "ROLLCALL_BLUR_THRESHOLD", &mut self.gate.blur_threshold);
        env_parse(lookup, "ROLLCALL_LOW_LIGHT_THRESHOLD", &mut self.gate.low_light_threshold);
        env_parse(lookup, "ROLLCALL_GAMMA", &mut self.gate.gamma);
        env_parse(lookup, "ROLLCALL_CLAHE_CLIP_LIMIT", &mut self.gate.clahe_clip_limit);
        env_parse(lookup, "ROLLCALL_CLAHE_TILES", &mut self.gate.clahe_tiles);
    }

    /// Pause before the quality prompt. Zero unless annotated photos are
    /// being saved, since otherwise there is nothing to look at.
    pub fn preview_delay(&self) -> Duration {
        match self.annotated_dir {
            Some(_) => Duration::from_secs(self.preview_delay_secs),
            None => Duration::ZERO,
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.tolerance, 0.5);
        assert_eq!(c.gate.blur_threshold, 100.0);
        assert_eq!(c.gate.low_light_threshold, 50.0);
        assert_eq!(c.on_quality_failure, FailureMode::Skip);
        assert_eq!(c.max_quality_retries, 3);
        assert_eq!(c.group_dir, PathBuf::from("group photo"));
        assert_eq!(c.separator, '_');
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c: Config = toml::from_str(
            r#"
            tolerance = 0.4
            metric = "euclidean"
            on_quality_failure = "abort"

            [gate]
            blur_threshold = 80.0
            "#,
        )
        .unwrap();
        assert_eq!(c.tolerance, 0.4);
        assert_eq!(c.metric, Metric::Euclidean);
        assert_eq!(c.on_quality_failure, FailureMode::Abort);
        assert_eq!(c.gate.blur_threshold, 80.0);
        assert_eq!(c.gate.gamma, 1.5);
        assert_eq!(c.reports_dir, PathBuf::from("attendance_records"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "report_format = \"json\"\nannotated_dir = \"review\"\n").unwrap();
        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.report_format, ReportFormat::Json);
        assert_eq!(c.annotated_dir, Some(PathBuf::from("review")));
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::from_file(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(env(&[
            ("ROLLCALL_TOLERANCE", "0.35"),
            ("ROLLCALL_BLUR_THRESHOLD", "120"),
            ("ROLLCALL_ON_QUALITY_FAILURE", "Prompt"),
            ("ROLLCALL_MODEL_DIR", "/opt/models"),
            ("ROLLCALL_METRIC", "l2"),
        ]));
        assert_eq!(c.tolerance, 0.35);
        assert_eq!(c.gate.blur_threshold, 120.0);
        assert_eq!(c.on_quality_failure, FailureMode::Prompt);
        assert_eq!(c.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(c.metric, Metric::Euclidean);
    }

    #[test]
    fn test_env_bad_value_ignored() {
        let mut c = Config::default();
        c.apply_env(env(&[("ROLLCALL_TOLERANCE", "close"), ("ROLLCALL_MAX_QUALITY_RETRIES", "-1")]));
        assert_eq!(c.tolerance, 0.5);
        assert_eq!(c.max_quality_retries, 3);
    }

    #[test]
    fn test_failure_mode_parse() {
        assert_eq!("skip".parse::<FailureMode>(), Ok(FailureMode::Skip));
        assert_eq!("RETRY".parse::<FailureMode>(), Ok(FailureMode::Retry));
        assert_eq!("prompt".parse::<FailureMode>(), Ok(FailureMode::Prompt));
        assert!("maybe".parse::<FailureMode>().is_err());
        assert_eq!(FailureMode::Abort.fixed_decision(), Some(QualityDecision::Abort));
        assert_eq!(FailureMode::Prompt.fixed_decision(), None);
    }

    #[test]
    fn test_preview_delay_only_with_annotations() {
        let mut c = Config::default();
        assert_eq!(c.preview_delay(), Duration::ZERO);
        c.annotated_dir = Some(PathBuf::from("review"));
        assert_eq!(c.preview_delay(), Duration::from_secs(5));
    }
}
