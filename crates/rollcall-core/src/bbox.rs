//! Bounding-box normalization.
//!
//! Detector boxes cross into annotation drawing and training-label export
//! as raw numbers that may be degenerate or lie partly outside the image.
//! Both consumers go through [`normalize`], which guarantees a box with
//! `right > left`, `bottom > top` and every edge inside
//! `[0, width] × [0, height]`.

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized box in integer pixel coordinates (right/bottom exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    /// Convert to a `class_id x_center y_center width height` label,
    /// with geometry relative to the image size.
    pub fn to_training_label(&self, class_id: usize, image_width: u32, image_height: u32) -> TrainingLabel {
        let iw = image_width.max(1) as f64;
        let ih = image_height.max(1) as f64;
        TrainingLabel {
            class_id,
            x_center: (self.left as f64 + self.right as f64) / 2.0 / iw,
            y_center: (self.top as f64 + self.bottom as f64) / 2.0 / ih,
            width: self.width() as f64 / iw,
            height: self.height() as f64 / ih,
        }
    }
}

/// An unvalidated box as handed over by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBox {
    /// Origin plus extent; extents may be zero or negative.
    Xywh { x: i32, y: i32, width: i32, height: i32 },
    /// Edge coordinates; right/bottom may not exceed left/top.
    Ltrb { left: i32, top: i32, right: i32, bottom: i32 },
}

impl RawBox {
    /// Snap a floating-point detection outward to whole pixels.
    pub fn from_detection(face: &BoundingBox) -> Self {
        let left = face.x.floor();
        let top = face.y.floor();
        let right = (face.x + face.width).ceil();
        let bottom = (face.y + face.height).ceil();
        RawBox::Ltrb {
            left: left as i32,
            top: top as i32,
            right: right as i32,
            bottom: bottom as i32,
        }
    }

    fn edges(self) -> (i32, i32, i32, i32) {
        match self {
            RawBox::Xywh { x, y, width, height } => {
                (x, y, x.saturating_add(width), y.saturating_add(height))
            }
            RawBox::Ltrb { left, top, right, bottom } => (left, top, right, bottom),
        }
    }
}

/// Repair and clamp `raw` into a non-degenerate box inside the image.
///
/// Zero or negative extents are widened to one pixel first; the box is then
/// clamped so that at least one pixel survives even at the image edge. An
/// image dimension of zero is treated as one.
pub fn normalize(raw: RawBox, image_width: u32, image_height: u32) -> PixelBox {
    let w = i32::try_from(image_width.max(1)).unwrap_or(i32::MAX);
    let h = i32::try_from(image_height.max(1)).unwrap_or(i32::MAX);

    let (mut left, mut top, mut right, mut bottom) = raw.edges();
    if right <= left {
        right = left.saturating_add(1);
    }
    if bottom <= top {
        bottom = top.saturating_add(1);
    }

    left = left.clamp(0, w - 1);
    top = top.clamp(0, h - 1);
    right = right.min(w).max(left + 1);
    bottom = bottom.min(h).max(top + 1);

    PixelBox {
        left,
        top,
        right,
        bottom,
    }
}

/// One line of a detection training label file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingLabel {
    pub class_id: usize,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl fmt::Display for TrainingLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.x_center, self.y_center, self.width, self.height
        )
    }
}
