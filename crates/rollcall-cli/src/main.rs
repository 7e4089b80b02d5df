use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{FaceEncoder, NearestMatcher, Schedule};
use rollcall_imaging::{DirectoryPreview, FixedPolicy, NoPreview, Preview, QualityDecision, QualityGate, QualityPolicy};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod dataset;
mod engine;
mod prompt;
mod report;

use config::{Config, FailureMode, ReportFormat};

#[derive(Parser)]
#[command(name = "rollcall", about = "Take class attendance from group photos")]
struct Cli {
    /// TOML configuration file (also ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces in the group photos and write the attendance report
    Run(RunArgs),
    /// List enrolled identities and folders without a usable reference face
    Roster {
        /// Reference folder (one subfolder per person)
        #[arg(long)]
        students: Option<PathBuf>,
    },
    /// Show which class period a time falls in
    Period {
        /// Time of day as HH:MM (default: now)
        #[arg(long, value_parser = parse_clock)]
        at: Option<NaiveTime>,
    },
    /// Run one photo through the quality gate and print the assessment
    Check {
        photo: PathBuf,
    },
    /// Export face-detection training labels from the reference folders
    Dataset {
        /// Output folder; labels go to <out>/train
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        students: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Reference folder (one subfolder per person)
    #[arg(long)]
    students: Option<PathBuf>,
    /// Folder of group photos
    #[arg(long)]
    photos: Option<PathBuf>,
    /// Folder the report is written to
    #[arg(long)]
    reports: Option<PathBuf>,
    /// Maximum embedding distance for a match
    #[arg(long)]
    tolerance: Option<f32>,
    /// prompt, retry, skip or abort
    #[arg(long)]
    on_quality_failure: Option<FailureMode>,
    /// csv or json
    #[arg(long)]
    format: Option<ReportFormat>,
    /// Save annotated photos for review into this folder
    #[arg(long)]
    annotate: Option<PathBuf>,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.students {
            config.students_dir = v;
        }
        if let Some(v) = self.photos {
            config.group_dir = v;
        }
        if let Some(v) = self.reports {
            config.reports_dir = v;
        }
        if let Some(v) = self.tolerance {
            config.tolerance = v;
        }
        if let Some(v) = self.on_quality_failure {
            config.on_quality_failure = v;
        }
        if let Some(v) = self.format {
            config.report_format = v;
        }
        if let Some(v) = self.annotate {
            config.annotated_dir = Some(v);
        }
    }
}

fn parse_clock(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            run(&config)?;
        }
        Commands::Roster { students } => {
            if let Some(dir) = students {
                config.students_dir = dir;
            }
            list_roster(&config)?;
        }
        Commands::Period { at } => {
            let schedule = load_schedule(&config)?;
            let time = at.unwrap_or_else(|| Local::now().time());
            println!("{}", schedule.period_at(time));
        }
        Commands::Check { photo } => check(&config, &photo)?,
        Commands::Dataset { out, students } => {
            if let Some(dir) = students {
                config.students_dir = dir;
            }
            let mut encoder = load_encoder(&config)?;
            let settings = dataset::ExportSettings {
                clahe_tiles: config.gate.clahe_tiles,
                clahe_clip_limit: config.gate.clahe_clip_limit,
            };
            let summary = dataset::export(encoder.as_mut(), &config.students_dir, &out, settings)?;
            println!(
                "Exported {} images ({} faces, {} classes) to {}",
                summary.images_written,
                summary.faces_labelled,
                summary.classes,
                out.display()
            );
        }
    }

    Ok(())
}

fn load_schedule(config: &Config) -> Result<Schedule> {
    match &config.periods_file {
        Some(path) => {
            Schedule::load(path).with_context(|| format!("loading period timetable {}", path.display()))
        }
        None => Ok(Schedule::builtin().clone()),
    }
}

#[cfg(feature = "onnx")]
fn load_encoder(config: &Config) -> Result<Box<dyn FaceEncoder>> {
    let encoder = rollcall_core::OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    Ok(Box::new(encoder))
}

#[cfg(not(feature = "onnx"))]
fn load_encoder(_config: &Config) -> Result<Box<dyn FaceEncoder>> {
    anyhow::bail!("rollcall was built without the `onnx` feature; no face encoder is available")
}

fn quality_policy(config: &Config) -> Box<dyn QualityPolicy> {
    match config.on_quality_failure.fixed_decision() {
        Some(decision) => Box::new(FixedPolicy(decision)),
        None if std::io::stdin().is_terminal() => Box::new(prompt::ConsolePolicy::stdio(config.preview_delay())),
        None => {
            tracing::warn!("stdin is not a terminal; rejected photos will be skipped");
            Box::new(FixedPolicy(QualityDecision::Skip))
        }
    }
}

fn run(config: &Config) -> Result<()> {
    let schedule = load_schedule(config)?;
    let mut encoder = load_encoder(config)?;

    let roster = engine::load_roster(encoder.as_mut(), &config.students_dir, config.separator)?;
    if roster.is_empty() {
        tracing::warn!(dir = %config.students_dir.display(), "no usable reference faces; nobody can be recognized");
    }

    let gate = QualityGate::new(config.gate.clone());
    let matcher = NearestMatcher::new(config.metric);
    let settings = engine::RunSettings {
        gate: &gate,
        matcher: &matcher,
        tolerance: config.tolerance,
        max_quality_retries: config.max_quality_retries,
    };
    let mut policy = quality_policy(config);
    let mut preview: Box<dyn Preview> = match &config.annotated_dir {
        Some(dir) => Box::new(DirectoryPreview::new(dir)),
        None => Box::new(NoPreview),
    };

    let outcome = engine::recognize(
        encoder.as_mut(),
        &roster,
        &config.group_dir,
        &settings,
        policy.as_mut(),
        preview.as_mut(),
    )?;

    println!(
        "Processed {} photo(s): {} rejected, {} failed; {} face(s), {} unrecognized",
        outcome.photos_processed,
        outcome.photos_rejected,
        outcome.photos_failed,
        outcome.faces_detected,
        outcome.faces_unmatched
    );
    if outcome.aborted {
        println!("Run aborted after {} rescan(s).", outcome.retries);
    }

    let target = report::ReportTarget {
        dir: &config.reports_dir,
        title: &config.report_title,
        format: config.report_format,
    };
    match report::finish(&outcome.seen, &roster, &schedule, Local::now().naive_local(), &target)? {
        Some((report, path)) => {
            println!("{} ({})", report.summary, report.period);
            println!("Attendance saved to {}", path.display());
        }
        None => println!("No faces recognized; no attendance report generated."),
    }
    Ok(())
}

fn list_roster(config: &Config) -> Result<()> {
    let mut encoder = load_encoder(config)?;
    let roster = engine::load_roster(encoder.as_mut(), &config.students_dir, config.separator)?;

    let mut identities: Vec<_> = roster.identities().iter().collect();
    identities.sort_by(|a, b| a.key.roll.cmp(&b.key.roll));
    for identity in identities {
        println!(
            "{:<12} {:<24} {} reference(s)",
            identity.key.roll,
            identity.key.name,
            identity.embeddings.len()
        );
    }
    for key in roster.unusable() {
        println!("{:<12} {:<24} unusable: no reference face found", key.roll, key.name);
    }
    println!("{} enrolled, {} unusable", roster.len(), roster.unusable().len());
    Ok(())
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    photo: String,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    quality: &'a rollcall_imaging::QualityReport,
}

fn check(config: &Config, photo: &Path) -> Result<()> {
    let image = image::open(photo)
        .with_context(|| format!("opening {}", photo.display()))?
        .to_rgb8();
    let outcome = QualityGate::new(config.gate.clone()).assess(&image);
    let reason = match &outcome {
        rollcall_imaging::GateOutcome::Rejected { reason, .. } => Some(reason.to_string()),
        rollcall_imaging::GateOutcome::Accepted { .. } => None,
    };
    let output = CheckOutput {
        photo: photo.display().to_string(),
        accepted: reason.is_none(),
        reason,
        quality: outcome.report(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
