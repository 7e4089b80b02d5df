use image::RgbImage;
use rollcall_core::roster::parse_folder_name;
use rollcall_core::{
    normalize, EncodeError, EnrolledIdentity, FaceEncoder, MatchResult, Matcher, Observation, RawBox, Roster,
    SeenSet,
};
use rollcall_imaging::annotate::Annotation;
use rollcall_imaging::{GateOutcome, Preview, QualityDecision, QualityGate, QualityPolicy, Rejection};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PHOTO_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const RECOGNIZED_TITLE: &str = "Recognized Faces";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot read folder {path}: {source}")]
    Folder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `path` has a group-photo extension (case-insensitive).
pub fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PHOTO_EXTENSIONS.iter().any(|p| e.eq_ignore_ascii_case(p)))
        .unwrap_or(false)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EngineError::Folder {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}

/// Photo files in `dir`, sorted by file name.
pub fn list_photos(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    Ok(read_dir_sorted(dir)?
        .into_iter()
        .filter(|p| p.is_file() && is_photo(p))
        .collect())
}

/// Identity subfolders of `dir`, sorted by name.
pub fn list_identity_folders(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    Ok(read_dir_sorted(dir)?.into_iter().filter(|p| p.is_dir()).collect())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn open_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Build the roster from one subfolder per person.
///
/// Malformed folder names, unreadable images, images without a face and
/// duplicate roll identifiers are all warned about and skipped. The most
/// confident face of each reference image becomes one embedding.
pub fn load_roster<E>(encoder: &mut E, dir: &Path, separator: char) -> Result<Roster, EngineError>
where
    E: FaceEncoder + ?Sized,
{
    let mut roster = Roster::new();

    for folder in list_identity_folders(dir)? {
        let folder_name = display_name(&folder);
        let key = match parse_folder_name(&folder_name, separator) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(path = %folder.display(), error = %e, "skipping reference folder");
                continue;
            }
        };

        let mut embeddings = Vec::new();
        let images = match read_dir_sorted(&folder) {
            Ok(paths) => paths.into_iter().filter(|p| p.is_file()),
            Err(e) => {
                tracing::warn!(error = %e, "skipping reference folder");
                continue;
            }
        };
        for path in images {
            let image = match open_rgb(&path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference image");
                    continue;
                }
            };
            let faces = match encoder.encode(&image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping reference image");
                    continue;
                }
            };
            let best = faces
                .into_iter()
                .max_by(|a, b| a.bbox.confidence.total_cmp(&b.bbox.confidence));
            match best {
                Some(face) => embeddings.push(face.embedding),
                None => tracing::warn!(path = %path.display(), "no face found in reference image"),
            }
        }

        let count = embeddings.len();
        match roster.enroll(EnrolledIdentity {
            key: key.clone(),
            embeddings,
        }) {
            Ok(()) if count == 0 => {
                tracing::warn!(identity = %key, "no usable reference images; identity left off the roster")
            }
            Ok(()) => tracing::debug!(identity = %key, embeddings = count, "enrolled"),
            Err(e) => tracing::warn!(path = %folder.display(), error = %e, "skipping reference folder"),
        }
    }

    tracing::info!(
        identities = roster.len(),
        embeddings = roster.embedding_count(),
        unusable = roster.unusable().len(),
        "roster loaded"
    );
    Ok(roster)
}

/// Fixed parameters of one recognition run.
pub struct RunSettings<'a, M: Matcher> {
    pub gate: &'a QualityGate,
    pub matcher: &'a M,
    pub tolerance: f32,
    /// Folder rescans allowed after `Retry` before the run aborts.
    pub max_quality_retries: u32,
}

/// Accumulated result of folding every group photo of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub seen: SeenSet,
    pub photos_processed: usize,
    pub photos_rejected: usize,
    pub photos_failed: usize,
    pub faces_detected: usize,
    pub faces_unmatched: usize,
    pub retries: u32,
    pub aborted: bool,
}

impl RunOutcome {
    fn abort(mut self) -> Self {
        self.seen = SeenSet::new();
        self.aborted = true;
        self
    }
}

enum PhotoStep {
    Processed,
    Rejected(Rejection),
}

#[derive(Error, Debug)]
enum PhotoError {
    #[error("decode: {0}")]
    Decode(#[from] image::ImageError),
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
}

/// Take attendance from every photo in `photos_dir`, one at a time.
///
/// A photo that cannot be read or encoded is counted as failed and the run
/// continues. A photo rejected by the quality gate is handed to `policy`:
/// `Skip` moves on, `Abort` ends the run with nothing seen, and `Retry`
/// rescans the folder and starts over with a fresh seen set, up to
/// `max_quality_retries` times.
pub fn recognize<E, M>(
    encoder: &mut E,
    roster: &Roster,
    photos_dir: &Path,
    settings: &RunSettings<'_, M>,
    policy: &mut dyn QualityPolicy,
    preview: &mut dyn Preview,
) -> Result<RunOutcome, EngineError>
where
    E: FaceEncoder + ?Sized,
    M: Matcher,
{
    let mut retries = 0u32;

    'run: loop {
        let photos = list_photos(photos_dir)?;
        tracing::info!(count = photos.len(), dir = %photos_dir.display(), "processing group photos");

        let mut outcome = RunOutcome {
            retries,
            ..RunOutcome::default()
        };

        for path in &photos {
            let step = process_photo(&mut *encoder, roster, path, settings, &mut *preview, &mut outcome);
            let reason = match step {
                Ok(PhotoStep::Processed) => {
                    outcome.photos_processed += 1;
                    continue;
                }
                Ok(PhotoStep::Rejected(reason)) => reason,
                Err(e) => {
                    outcome.photos_failed += 1;
                    tracing::warn!(path = %path.display(), error = %e, "skipping photo");
                    continue;
                }
            };

            outcome.photos_rejected += 1;
            tracing::warn!(path = %path.display(), %reason, "photo rejected");

            match policy.on_quality_failure(&display_name(path), &reason) {
                QualityDecision::Skip => continue,
                QualityDecision::Abort => {
                    tracing::warn!("run aborted after quality rejection; nothing recorded");
                    return Ok(outcome.abort());
                }
                QualityDecision::Retry if retries < settings.max_quality_retries => {
                    retries += 1;
                    tracing::info!(attempt = retries, "rescanning group photos");
                    continue 'run;
                }
                QualityDecision::Retry => {
                    tracing::warn!(
                        max = settings.max_quality_retries,
                        "quality retries exhausted; aborting run"
                    );
                    return Ok(outcome.abort());
                }
            }
        }

        tracing::info!(
            processed = outcome.photos_processed,
            rejected = outcome.photos_rejected,
            failed = outcome.photos_failed,
            faces = outcome.faces_detected,
            unmatched = outcome.faces_unmatched,
            seen = outcome.seen.len(),
            "run complete"
        );
        return Ok(outcome);
    }
}

fn process_photo<E, M>(
    encoder: &mut E,
    roster: &Roster,
    path: &Path,
    settings: &RunSettings<'_, M>,
    preview: &mut dyn Preview,
    outcome: &mut RunOutcome,
) -> Result<PhotoStep, PhotoError>
where
    E: FaceEncoder + ?Sized,
    M: Matcher,
{
    let name = display_name(path);
    let original = open_rgb(path)?;

    let report_image = match settings.gate.assess(&original) {
        GateOutcome::Rejected { image, reason, report } => {
            tracing::debug!(photo = %name, focus = report.focus, brightness = report.brightness, "quality gate");
            if let Err(e) = preview.show(&name, &reason.to_string(), &image, &[]) {
                tracing::warn!(photo = %name, error = %e, "preview failed");
            }
            return Ok(PhotoStep::Rejected(reason));
        }
        GateOutcome::Accepted { image, report } => {
            tracing::debug!(photo = %name, focus = report.focus, brightness = report.brightness, "quality gate");
            image
        }
    };

    let faces = encoder.encode(&report_image)?;
    let (width, height) = report_image.dimensions();
    let mut annotations = Vec::with_capacity(faces.len());

    for face in faces {
        outcome.faces_detected += 1;
        let observation = Observation {
            bbox: normalize(RawBox::from_detection(&face.bbox), width, height),
            embedding: face.embedding,
            source: name.clone(),
        };

        let result = settings
            .matcher
            .compare(&observation.embedding, roster.identities(), settings.tolerance);
        match &result {
            MatchResult::Matched { identity, distance } => {
                let new = outcome.seen.record(&result);
                tracing::info!(photo = %observation.source, %identity, distance, new, "recognized");
            }
            MatchResult::Unmatched => {
                outcome.faces_unmatched += 1;
                tracing::debug!(photo = %observation.source, "face not recognized");
            }
        }
        annotations.push(Annotation::from_match(&result, observation.bbox));
    }

    if let Err(e) = preview.show(&name, RECOGNIZED_TITLE, &report_image, &annotations) {
        tracing::warn!(photo = %name, error = %e, "preview failed");
    }
    Ok(PhotoStep::Processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rollcall_core::{BoundingBox, DetectedFace, Embedding, IdentityKey, Metric, NearestMatcher};
    use rollcall_imaging::{GateConfig, NoPreview};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Hands out scripted faces, one entry per `encode` call, then none.
    struct FakeEncoder {
        script: VecDeque<Vec<Vec<f32>>>,
        calls: usize,
    }

    impl FakeEncoder {
        fn new(script: Vec<Vec<Vec<f32>>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
            }
        }
    }

    impl FaceEncoder for FakeEncoder {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncodeError> {
            Ok(self.encode(image)?.into_iter().map(|f| f.bbox).collect())
        }

        fn encode(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, EncodeError> {
            self.calls += 1;
            let vectors = self.script.pop_front().unwrap_or_default();
            Ok(vectors
                .into_iter()
                .enumerate()
                .map(|(i, values)| DetectedFace {
                    bbox: BoundingBox {
                        x: 2.0 + 10.0 * i as f32,
                        y: 2.0,
                        width: 8.0,
                        height: 8.0,
                        confidence: 0.9 - i as f32 * 0.1,
                        landmarks: None,
                    },
                    embedding: Embedding::new(values),
                })
                .collect())
        }
    }

    /// Sharp, bright photo that passes the quality gate.
    fn sharp_photo() -> RgbImage {
        RgbImage::from_fn(48, 48, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([200, 200, 200])
            } else {
                Rgb([80, 80, 80])
            }
        })
    }

    fn flat_photo() -> RgbImage {
        RgbImage::from_pixel(48, 48, Rgb([128, 128, 128]))
    }

    fn save(dir: &Path, name: &str, image: &RgbImage) {
        image.save(dir.join(name)).unwrap();
    }

    fn roster_of(entries: &[(&str, &str, Vec<f32>)]) -> Roster {
        let mut roster = Roster::new();
        for (name, roll, v) in entries {
            roster
                .enroll(EnrolledIdentity {
                    key: IdentityKey::new(*name, *roll),
                    embeddings: vec![Embedding::new(v.clone())],
                })
                .unwrap();
        }
        roster
    }

    fn asha() -> Vec<f32> {
        vec![1.0, 0.0]
    }

    fn bilal() -> Vec<f32> {
        vec![0.0, 1.0]
    }

    fn run(
        encoder: &mut FakeEncoder,
        roster: &Roster,
        dir: &Path,
        policy: &mut dyn QualityPolicy,
    ) -> RunOutcome {
        let gate = QualityGate::new(GateConfig::default());
        let matcher = NearestMatcher::new(Metric::Cosine);
        let settings = RunSettings {
            gate: &gate,
            matcher: &matcher,
            tolerance: 0.5,
            max_quality_retries: 2,
        };
        recognize(encoder, roster, dir, &settings, policy, &mut NoPreview).unwrap()
    }

    #[test]
    fn test_is_photo_case_insensitive() {
        assert!(is_photo(Path::new("a.JPG")));
        assert!(is_photo(Path::new("b.jpeg")));
        assert!(is_photo(Path::new("c.Png")));
        assert!(!is_photo(Path::new("d.gif")));
        assert!(!is_photo(Path::new("noext")));
    }

    #[test]
    fn test_list_photos_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a.PNG"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();
        let names: Vec<String> = list_photos(dir.path())
            .unwrap()
            .iter()
            .map(|p| display_name(p))
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg"]);
    }

    #[test]
    fn test_list_photos_missing_folder_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            list_photos(&dir.path().join("absent")),
            Err(EngineError::Folder { .. })
        ));
    }

    #[test]
    fn test_load_roster_skips_bad_inputs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for folder in ["Asha_07", "Bilal_03", "NoSeparator", "Chen_07", "Dana_09"] {
            std::fs::create_dir(root.join(folder)).unwrap();
        }
        save(&root.join("Asha_07"), "1.png", &sharp_photo());
        save(&root.join("Asha_07"), "2.png", &sharp_photo());
        std::fs::write(root.join("Asha_07/broken.jpg"), b"not an image").unwrap();
        save(&root.join("Bilal_03"), "1.png", &sharp_photo());
        save(&root.join("NoSeparator"), "1.png", &sharp_photo());
        save(&root.join("Chen_07"), "1.png", &sharp_photo());
        save(&root.join("Dana_09"), "1.png", &sharp_photo());

        // Asha/1, Asha/2, Bilal/1, Chen/1, Dana/1; broken.jpg never reaches the encoder.
        let mut encoder = FakeEncoder::new(vec![vec![asha()], vec![], vec![bilal()], vec![asha()], vec![]]);
        let roster = load_roster(&mut encoder, root, '_').unwrap();

        let keys: Vec<String> = roster.identities().iter().map(|i| i.key.to_string()).collect();
        assert_eq!(keys, vec!["Asha (07)", "Bilal (03)"]);
        assert_eq!(roster.identities()[0].embeddings.len(), 1);
        assert_eq!(roster.unusable(), &[IdentityKey::new("Dana", "09")]);
    }

    #[test]
    fn test_recognize_dedupes_across_photos() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), "1.jpg", &sharp_photo());
        save(dir.path(), "2.png", &sharp_photo());
        save(dir.path(), "3.png", &sharp_photo());

        let roster = roster_of(&[("Asha", "07", asha()), ("Bilal", "03", bilal())]);
        let mut encoder = FakeEncoder::new(vec![
            vec![vec![1.0, 0.05]],
            vec![asha()],
            vec![bilal(), vec![-1.0, 0.0]],
        ]);
        let mut policy = |_: &str, _: &Rejection| -> QualityDecision { panic!("no photo should be rejected") };
        let outcome = run(&mut encoder, &roster, dir.path(), &mut policy);

        assert_eq!(outcome.photos_processed, 3);
        assert_eq!(outcome.faces_detected, 4);
        assert_eq!(outcome.faces_unmatched, 1);
        assert_eq!(outcome.seen.len(), 2);
        assert!(outcome.seen.contains(&IdentityKey::new("Asha", "07")));
        assert!(outcome.seen.contains(&IdentityKey::new("Bilal", "03")));
        assert!(!outcome.aborted);
    }

    #[test]
    fn test_undecodable_photo_counted_and_run_continues() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("0.jpg"), b"garbage").unwrap();
        save(dir.path(), "1.png", &sharp_photo());

        let roster = roster_of(&[("Asha", "07", asha())]);
        let mut encoder = FakeEncoder::new(vec![vec![asha()]]);
        let outcome = run(&mut encoder, &roster, dir.path(), &mut rollcall_imaging::FixedPolicy(QualityDecision::Skip));

        assert_eq!(outcome.photos_failed, 1);
        assert_eq!(outcome.photos_processed, 1);
        assert_eq!(outcome.seen.len(), 1);
    }

    #[test]
    fn test_blurry_photo_skip_continues() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), "0.png", &flat_photo());
        save(dir.path(), "1.png", &sharp_photo());

        let roster = roster_of(&[("Asha", "07", asha())]);
        let mut encoder = FakeEncoder::new(vec![vec![asha()]]);
        let mut rejected = Vec::new();
        let mut policy = |photo: &str, reason: &Rejection| {
            rejected.push((photo.to_string(), reason.to_string()));
            QualityDecision::Skip
        };
        let outcome = run(&mut encoder, &roster, dir.path(), &mut policy);

        assert_eq!(outcome.photos_rejected, 1);
        assert_eq!(outcome.photos_processed, 1);
        assert_eq!(outcome.seen.len(), 1);
        assert_eq!(
            rejected,
            vec![("0.png".to_string(), "Image is too blurry for face detection.".to_string())]
        );
    }

    #[test]
    fn test_blurry_photo_abort_yields_empty_seen_set() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), "0.png", &sharp_photo());
        save(dir.path(), "1.png", &flat_photo());

        let roster = roster_of(&[("Asha", "07", asha())]);
        let mut encoder = FakeEncoder::new(vec![vec![asha()]]);
        let outcome = run(
            &mut encoder,
            &roster,
            dir.path(),
            &mut rollcall_imaging::FixedPolicy(QualityDecision::Abort),
        );

        assert!(outcome.aborted);
        assert!(outcome.seen.is_empty(), "abort must discard earlier recognitions");
        assert_eq!(outcome.photos_processed, 1);

        let reports = dir.path().join("attendance_records");
        let target = crate::report::ReportTarget {
            dir: &reports,
            title: "Attendance",
            format: crate::config::ReportFormat::Csv,
        };
        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 7)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap();
        let schedule = rollcall_core::Schedule::builtin();
        let written = crate::report::finish(&outcome.seen, &roster, schedule, now, &target).unwrap();
        assert!(written.is_none());
        assert!(!reports.exists());
    }

    #[test]
    fn test_retry_rescans_after_photo_replaced() {
        let dir = TempDir::new().unwrap();
        let photos = dir.path().to_path_buf();
        save(&photos, "0.png", &flat_photo());
        save(&photos, "1.png", &sharp_photo());

        let roster = roster_of(&[("Asha", "07", asha()), ("Bilal", "03", bilal())]);
        let mut encoder = FakeEncoder::new(vec![vec![asha()], vec![bilal()]]);
        let mut prompts = 0;
        let mut policy = |_: &str, _: &Rejection| {
            prompts += 1;
            // The operator swaps the blurry photo for a good one.
            save(&photos, "0.png", &sharp_photo());
            QualityDecision::Retry
        };
        let outcome = run(&mut encoder, &roster, &photos, &mut policy);

        assert_eq!(prompts, 1);
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.photos_rejected, 0, "counters restart with the rescan");
        assert_eq!(outcome.photos_processed, 2);
        assert_eq!(outcome.seen.len(), 2);
        assert!(!outcome.aborted);
    }

    #[test]
    fn test_retry_bounded() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), "0.png", &flat_photo());

        let roster = roster_of(&[("Asha", "07", asha())]);
        let mut encoder = FakeEncoder::new(vec![]);
        let mut prompts = 0;
        let mut policy = |_: &str, _: &Rejection| {
            prompts += 1;
            QualityDecision::Retry
        };
        let outcome = run(&mut encoder, &roster, dir.path(), &mut policy);

        // max_quality_retries = 2: initial pass plus two rescans.
        assert_eq!(prompts, 3);
        assert!(outcome.aborted);
        assert!(outcome.seen.is_empty());
        assert_eq!(encoder.calls, 0);
    }

    #[test]
    fn test_empty_folder_yields_empty_outcome() {
        let dir = TempDir::new().unwrap();
        let roster = roster_of(&[("Asha", "07", asha())]);
        let mut encoder = FakeEncoder::new(vec![]);
        let outcome = run(&mut encoder, &roster, dir.path(), &mut rollcall_imaging::FixedPolicy(QualityDecision::Skip));
        assert_eq!(outcome, RunOutcome::default());
    }
}
