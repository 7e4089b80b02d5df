//! Review annotations: boxes drawn over each detected face, green when the
//! face matched an enrolled identity and red otherwise.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rollcall_core::{MatchResult, PixelBox};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MATCHED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNMATCHED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One labelled face box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub label: String,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub bbox: PixelBox,
}

impl Annotation {
    pub fn from_match(result: &MatchResult, bbox: PixelBox) -> Self {
        let distance = match result {
            MatchResult::Matched { distance, .. } => Some(*distance),
            MatchResult::Unmatched => None,
        };
        Self {
            label: result.label(),
            matched: result.is_matched(),
            distance,
            bbox,
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        if self.matched {
            MATCHED_COLOR
        } else {
            UNMATCHED_COLOR
        }
    }
}

/// Draw every annotation box onto `image`.
pub fn draw(image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
        let b = &annotation.bbox;
        for inset in 0..BOX_THICKNESS {
            let (Some(width), Some(height)) = (
                b.width().checked_sub(2 * inset).filter(|w| *w > 0),
                b.height().checked_sub(2 * inset).filter(|h| *h > 0),
            ) else {
                break;
            };
            let rect = Rect::at(b.left + inset as i32, b.top + inset as i32).of_size(width, height);
            draw_hollow_rect_mut(image, rect, annotation.color());
        }
    }
}

/// Where annotated photos go for review.
pub trait Preview {
    fn show(
        &mut self,
        name: &str,
        title: &str,
        image: &RgbImage,
        annotations: &[Annotation],
    ) -> Result<(), ImagingError>;
}

/// Discards previews.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreview;

impl Preview for NoPreview {
    fn show(&mut self, _: &str, _: &str, _: &RgbImage, _: &[Annotation]) -> Result<(), ImagingError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Sidecar<'a> {
    title: &'a str,
    source: &'a str,
    faces: &'a [Annotation],
}

/// Writes `<stem>.annotated.png` plus a `<stem>.annotations.json` sidecar
/// holding the labels.
#[derive(Debug, Clone)]
pub struct DirectoryPreview {
    dir: PathBuf,
}

impl DirectoryPreview {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stem(name: &str) -> String {
        Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string())
    }
}

impl Preview for DirectoryPreview {
    fn show(
        &mut self,
        name: &str,
        title: &str,
        image: &RgbImage,
        annotations: &[Annotation],
    ) -> Result<(), ImagingError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ImagingError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let stem = Self::stem(name);
        let mut canvas = image.clone();
        draw(&mut canvas, annotations);
        let png_path = self.dir.join(format!("{stem}.annotated.png"));
        canvas.save(&png_path)?;

        let json_path = self.dir.join(format!("{stem}.annotations.json"));
        let file = File::create(&json_path).map_err(|source| ImagingError::Io {
            path: json_path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(
            BufWriter::new(file),
            &Sidecar {
                title,
                source: name,
                faces: annotations,
            },
        )?;

        tracing::info!(photo = name, path = %png_path.display(), faces = annotations.len(), "annotated photo saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::IdentityKey;

    fn pixel_box(left: i32, top: i32, right: i32, bottom: i32) -> PixelBox {
        PixelBox {
            left,
            top,
            right,
            bottom,
        }
    }

    fn matched(name: &str, roll: &str) -> MatchResult {
        MatchResult::Matched {
            identity: IdentityKey::new(name, roll),
            distance: 0.25,
        }
    }

    #[test]
    fn test_annotation_from_match() {
        let a = Annotation::from_match(&matched("Asha", "07"), pixel_box(0, 0, 10, 10));
        assert!(a.matched);
        assert_eq!(a.color(), MATCHED_COLOR);
        assert_eq!(a.distance, Some(0.25));

        let u = Annotation::from_match(&MatchResult::Unmatched, pixel_box(0, 0, 10, 10));
        assert!(!u.matched);
        assert_eq!(u.label, "Unrecognized");
        assert_eq!(u.color(), UNMATCHED_COLOR);
        assert_eq!(u.distance, None);
    }

    #[test]
    fn test_draw_two_pixel_border() {
        let mut image = RgbImage::new(20, 20);
        let a = Annotation::from_match(&matched("Asha", "07"), pixel_box(2, 2, 12, 12));
        draw(&mut image, &[a]);

        // Outer and inner rings coloured, interior untouched.
        assert_eq!(image.get_pixel(2, 2), &MATCHED_COLOR);
        assert_eq!(image.get_pixel(3, 3), &MATCHED_COLOR);
        assert_eq!(image.get_pixel(11, 7), &MATCHED_COLOR);
        assert_eq!(image.get_pixel(10, 7), &MATCHED_COLOR);
        assert_eq!(image.get_pixel(7, 7), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(4, 4), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(13, 7), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_unmatched_red_and_degenerate_box() {
        let mut image = RgbImage::new(10, 10);
        let red = Annotation::from_match(&MatchResult::Unmatched, pixel_box(0, 0, 4, 4));
        let tiny = Annotation::from_match(&MatchResult::Unmatched, pixel_box(8, 8, 9, 9));
        draw(&mut image, &[red, tiny]);
        assert_eq!(image.get_pixel(0, 0), &UNMATCHED_COLOR);
        assert_eq!(image.get_pixel(8, 8), &UNMATCHED_COLOR);
    }

    #[test]
    fn test_directory_preview_writes_png_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut preview = DirectoryPreview::new(dir.path().join("review"));
        let image = RgbImage::new(16, 16);
        let annotations = vec![
            Annotation::from_match(&matched("Asha", "07"), pixel_box(1, 1, 8, 8)),
            Annotation::from_match(&MatchResult::Unmatched, pixel_box(8, 8, 15, 15)),
        ];

        preview
            .show("class_a.jpg", "Recognized Faces", &image, &annotations)
            .unwrap();

        let png = dir.path().join("review/class_a.annotated.png");
        let saved = image::open(&png).unwrap().to_rgb8();
        assert_eq!(saved.get_pixel(1, 1), &MATCHED_COLOR);
        assert_eq!(saved.get_pixel(8, 8), &UNMATCHED_COLOR);

        let json = std::fs::read_to_string(dir.path().join("review/class_a.annotations.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["title"], "Recognized Faces");
        assert_eq!(value["faces"].as_array().unwrap().len(), 2);
        assert_eq!(value["faces"][1]["label"], "Unrecognized");
    }

    #[test]
    fn test_no_preview_is_silent() {
        let mut preview = NoPreview;
        assert!(preview.show("x.png", "t", &RgbImage::new(1, 1), &[]).is_ok());
    }
}
