use crate::engine::list_identity_folders;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use rollcall_core::{normalize, FaceEncoder, RawBox};
use rollcall_imaging::photo;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const TRAIN_WIDTH: u32 = 640;
pub const TRAIN_HEIGHT: u32 = 480;
pub const DATASET_CONFIG_FILE: &str = "custom_dataset.yaml";

/// Contrast parameters applied before detection.
#[derive(Debug, Clone, Copy)]
pub struct ExportSettings {
    pub clahe_tiles: u32,
    pub clahe_clip_limit: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub classes: usize,
    pub images_written: usize,
    pub faces_labelled: usize,
    pub images_skipped: usize,
}

/// Export detection training data from the reference folders.
///
/// Each identity folder becomes one class, numbered in sorted folder order.
/// Every readable image is resized, contrast-enhanced and run through the
/// detector; images with at least one face are written to `<out>/train`
/// next to a label file with one `class_id x_center y_center width height`
/// line per face.
pub fn export<E>(encoder: &mut E, students_dir: &Path, out_dir: &Path, settings: ExportSettings) -> Result<ExportSummary>
where
    E: FaceEncoder + ?Sized,
{
    let train_dir = out_dir.join("train");
    std::fs::create_dir_all(&train_dir).with_context(|| format!("creating {}", train_dir.display()))?;

    let folders = list_identity_folders(students_dir)?;
    let mut names = Vec::with_capacity(folders.len());
    let mut summary = ExportSummary {
        classes: folders.len(),
        ..ExportSummary::default()
    };

    for (class_id, folder) in folders.iter().enumerate() {
        let class_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let images = match std::fs::read_dir(folder) {
            Ok(entries) => {
                let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
                paths.sort();
                paths
            }
            Err(e) => {
                tracing::warn!(path = %folder.display(), error = %e, "skipping class folder");
                names.push(class_name);
                continue;
            }
        };

        for path in images.iter().filter(|p| p.is_file()) {
            match export_image(&mut *encoder, path, &class_name, class_id, &train_dir, settings) {
                Ok(0) => {
                    summary.images_skipped += 1;
                    tracing::warn!(path = %path.display(), "no faces detected");
                }
                Ok(faces) => {
                    summary.images_written += 1;
                    summary.faces_labelled += faces;
                    tracing::debug!(path = %path.display(), faces, class_id, "labelled");
                }
                Err(e) => {
                    summary.images_skipped += 1;
                    tracing::warn!(path = %path.display(), error = %e, "skipping image");
                }
            }
        }
        names.push(class_name);
    }

    write_dataset_config(out_dir, &train_dir, &names)?;
    tracing::info!(
        classes = summary.classes,
        images = summary.images_written,
        faces = summary.faces_labelled,
        skipped = summary.images_skipped,
        "dataset exported"
    );
    Ok(summary)
}

/// Returns the number of faces labelled; nothing is written when zero.
fn export_image<E>(
    encoder: &mut E,
    path: &Path,
    class_name: &str,
    class_id: usize,
    train_dir: &Path,
    settings: ExportSettings,
) -> Result<usize>
where
    E: FaceEncoder + ?Sized,
{
    let original = image::open(path)?.to_rgb8();
    let resized = image::imageops::resize(&original, TRAIN_WIDTH, TRAIN_HEIGHT, FilterType::Triangle);
    let enhanced = photo::enhance_contrast(&resized, settings.clahe_tiles, settings.clahe_clip_limit);

    let faces = encoder.detect(&enhanced)?;
    if faces.is_empty() {
        return Ok(0);
    }

    let mut labels = String::new();
    for face in &faces {
        let pixel_box = normalize(RawBox::from_detection(face), TRAIN_WIDTH, TRAIN_HEIGHT);
        let _ = writeln!(labels, "{}", pixel_box.to_training_label(class_id, TRAIN_WIDTH, TRAIN_HEIGHT));
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = format!("{class_name}_{stem}");
    enhanced.save(train_dir.join(format!("{base}.jpg")))?;
    let label_path = train_dir.join(format!("{base}.txt"));
    std::fs::write(&label_path, labels).with_context(|| format!("writing {}", label_path.display()))?;

    Ok(faces.len())
}

fn write_dataset_config(out_dir: &Path, train_dir: &Path, names: &[String]) -> Result<()> {
    let train = std::fs::canonicalize(train_dir).unwrap_or_else(|_| train_dir.to_path_buf());
    let train = serde_json::to_string(&train.to_string_lossy())?;
    let config = format!(
        "train: {train}\nval: {train}\n\nnc: {}\nnames: {}\n",
        names.len(),
        serde_json::to_string(names)?
    );
    let path = out_dir.join(DATASET_CONFIG_FILE);
    std::fs::write(&path, config).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
