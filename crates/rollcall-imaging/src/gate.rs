//! Photo quality gate.
//!
//! Every group photo passes through a small state machine before face
//! detection:
//!
//! ```text
//! Untested ──focus < blur_threshold──▶ BlurRejected
//!    │
//!    ├──brightness < low_light_threshold──▶ LowLightEnhanced ──still dark──▶ DarkRejected
//!    │                                           │
//!    └───────────────────────────────────────────┴──▶ Accepted
//! ```
//!
//! Accepted photos are contrast-enhanced (CLAHE on luminance) and sharpened.
//! What happens to a rejected photo is up to a [`QualityPolicy`].

use crate::photo;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Thresholds and enhancement parameters for the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Laplacian variance below which a photo is too blurry.
    pub blur_threshold: f64,
    /// Mean brightness below which gamma correction is attempted.
    pub low_light_threshold: f64,
    pub gamma: f64,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            blur_threshold: 100.0,
            low_light_threshold: 50.0,
            gamma: 1.5,
            clahe_clip_limit: 3.0,
            clahe_tiles: 8,
        }
    }
}

/// Why the gate turned a photo away.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    Blurry { focus: f64, threshold: f64 },
    TooDark { brightness: f64, threshold: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Blurry { .. } => f.write_str("Image is too blurry for face detection."),
            Rejection::TooDark { .. } => f.write_str("Image is too dark for face detection."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Untested,
    BlurRejected,
    LowLightEnhanced,
    DarkRejected,
    Accepted,
}

impl GateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GateState::BlurRejected | GateState::DarkRejected | GateState::Accepted)
    }
}

/// Measurements taken while the photo moved through the gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub focus: f64,
    pub brightness: f64,
    /// Brightness after gamma correction, when it was attempted.
    pub enhanced_brightness: Option<f64>,
    /// States visited, starting with `Untested`.
    pub trail: Vec<GateState>,
}

impl QualityReport {
    pub fn final_state(&self) -> GateState {
        self.trail.last().copied().unwrap_or(GateState::Untested)
    }
}

#[derive(Debug)]
pub enum GateOutcome {
    /// Enhanced photo ready for detection.
    Accepted { image: RgbImage, report: QualityReport },
    /// The photo as last seen by the gate, for preview.
    Rejected {
        image: RgbImage,
        reason: Rejection,
        report: QualityReport,
    },
}

impl GateOutcome {
    pub fn report(&self) -> &QualityReport {
        match self {
            GateOutcome::Accepted { report, .. } | GateOutcome::Rejected { report, .. } => report,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: GateConfig,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Run `image` through the gate.
    pub fn assess(&self, image: &RgbImage) -> GateOutcome {
        let cfg = &self.config;
        let mut state = GateState::Untested;
        let mut trail = vec![state];
        let mut current = image.clone();
        let mut focus = 0.0;
        let mut brightness = 0.0;
        let mut enhanced_brightness = None;
        let mut rejection = None;

        while !state.is_terminal() {
            state = match state {
                GateState::Untested => {
                    let gray = photo::luma(&current);
                    focus = photo::focus_measure(&gray);
                    brightness = photo::mean_brightness(&gray);
                    if focus < cfg.blur_threshold {
                        rejection = Some(Rejection::Blurry {
                            focus,
                            threshold: cfg.blur_threshold,
                        });
                        GateState::BlurRejected
                    } else if brightness < cfg.low_light_threshold {
                        GateState::LowLightEnhanced
                    } else {
                        GateState::Accepted
                    }
                }
                GateState::LowLightEnhanced => {
                    current = photo::gamma_correct(&current, cfg.gamma);
                    let after = photo::mean_brightness(&photo::luma(&current));
                    enhanced_brightness = Some(after);
                    if after < cfg.low_light_threshold {
                        rejection = Some(Rejection::TooDark {
                            brightness: after,
                            threshold: cfg.low_light_threshold,
                        });
                        GateState::DarkRejected
                    } else {
                        GateState::Accepted
                    }
                }
                terminal => terminal,
            };
            trail.push(state);
        }

        let report = QualityReport {
            focus,
            brightness,
            enhanced_brightness,
            trail,
        };

        match rejection {
            Some(reason) => {
                tracing::debug!(%reason, focus, brightness, "photo rejected by quality gate");
                GateOutcome::Rejected {
                    image: current,
                    reason,
                    report,
                }
            }
            None => {
                let enhanced = photo::enhance_contrast(&current, cfg.clahe_tiles, cfg.clahe_clip_limit);
                GateOutcome::Accepted {
                    image: photo::sharpen(&enhanced),
                    report,
                }
            }
        }
    }
}

/// What to do after a photo fails the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityDecision {
    /// Rescan the photo folder and start over.
    Retry,
    /// Drop this photo and continue with the next.
    Skip,
    /// Stop and discard everything seen so far.
    Abort,
}

impl FromStr for QualityDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(QualityDecision::Retry),
            "skip" => Ok(QualityDecision::Skip),
            "abort" => Ok(QualityDecision::Abort),
            other => Err(format!("unknown quality decision '{other}' (expected retry, skip or abort)")),
        }
    }
}

/// Decides the fate of photos the gate rejects.
pub trait QualityPolicy {
    fn on_quality_failure(&mut self, photo: &str, reason: &Rejection) -> QualityDecision;
}

/// Always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub QualityDecision);

impl QualityPolicy for FixedPolicy {
    fn on_quality_failure(&mut self, photo: &str, reason: &Rejection) -> QualityDecision {
        tracing::info!(photo, %reason, decision = ?self.0, "quality failure");
        self.0
    }
}

impl<F> QualityPolicy for F
where
    F: FnMut(&str, &Rejection) -> QualityDecision,
{
    fn on_quality_failure(&mut self, photo: &str, reason: &Rejection) -> QualityDecision {
        self(photo, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// High-frequency pattern around `base`, sharp enough to pass the blur check.
    fn textured(w: u32, h: u32, base: u8, swing: u8) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = if (x + y) % 2 == 0 { base.saturating_add(swing) } else { base.saturating_sub(swing) };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_bright_sharp_photo_accepted() {
        let gate = QualityGate::default();
        let outcome = gate.assess(&textured(32, 32, 128, 60));
        match outcome {
            GateOutcome::Accepted { image, report } => {
                assert_eq!(image.dimensions(), (32, 32));
                assert_eq!(report.trail, vec![GateState::Untested, GateState::Accepted]);
                assert!(report.enhanced_brightness.is_none());
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_flat_photo_blur_rejected() {
        let gate = QualityGate::default();
        let outcome = gate.assess(&RgbImage::from_pixel(32, 32, Rgb([128, 128, 128])));
        match outcome {
            GateOutcome::Rejected { reason, report, .. } => {
                assert!(matches!(reason, Rejection::Blurry { .. }));
                assert_eq!(reason.to_string(), "Image is too blurry for face detection.");
                assert_eq!(report.final_state(), GateState::BlurRejected);
                assert_eq!(report.focus, 0.0);
            }
            other => panic!("expected blur rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_blur_checked_before_brightness() {
        let gate = QualityGate::default();
        let outcome = gate.assess(&RgbImage::from_pixel(16, 16, Rgb([5, 5, 5])));
        assert!(matches!(outcome, GateOutcome::Rejected { reason: Rejection::Blurry { .. }, .. }));
        assert_eq!(outcome.report().trail.len(), 2);
    }

    #[test]
    fn test_dim_photo_rescued_by_gamma() {
        // Mean ~40 is below 50; gamma 1.5 lifts it above.
        let gate = QualityGate::default();
        let outcome = gate.assess(&textured(32, 32, 40, 30));
        match outcome {
            GateOutcome::Accepted { report, .. } => {
                assert_eq!(
                    report.trail,
                    vec![GateState::Untested, GateState::LowLightEnhanced, GateState::Accepted]
                );
                assert!(report.brightness < 50.0);
                assert!(report.enhanced_brightness.is_some_and(|b| b >= 50.0));
            }
            other => panic!("expected rescue, got {other:?}"),
        }
    }

    #[test]
    fn test_very_dark_photo_dark_rejected() {
        let gate = QualityGate::default();
        let outcome = gate.assess(&textured(32, 32, 10, 10));
        match outcome {
            GateOutcome::Rejected { reason, report, .. } => {
                assert!(matches!(reason, Rejection::TooDark { .. }));
                assert_eq!(reason.to_string(), "Image is too dark for face detection.");
                assert_eq!(
                    report.trail,
                    vec![GateState::Untested, GateState::LowLightEnhanced, GateState::DarkRejected]
                );
            }
            other => panic!("expected dark rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let gate = QualityGate::new(GateConfig {
            blur_threshold: 0.0,
            low_light_threshold: 0.0,
            ..GateConfig::default()
        });
        let outcome = gate.assess(&RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
        assert!(matches!(outcome, GateOutcome::Accepted { .. }));
    }

    #[test]
    fn test_decision_from_str() {
        assert_eq!("Retry".parse::<QualityDecision>(), Ok(QualityDecision::Retry));
        assert_eq!(" skip ".parse::<QualityDecision>(), Ok(QualityDecision::Skip));
        assert_eq!("ABORT".parse::<QualityDecision>(), Ok(QualityDecision::Abort));
        assert!("later".parse::<QualityDecision>().is_err());
    }

    #[test]
    fn test_closure_policy() {
        let mut calls = Vec::new();
        let mut policy = |photo: &str, _: &Rejection| {
            calls.push(photo.to_string());
            QualityDecision::Skip
        };
        let reason = Rejection::Blurry {
            focus: 1.0,
            threshold: 100.0,
        };
        assert_eq!(policy.on_quality_failure("a.jpg", &reason), QualityDecision::Skip);
        assert_eq!(calls, vec!["a.jpg".to_string()]);
    }

    #[test]
    fn test_gate_config_partial_toml() {
        let cfg: GateConfig = toml::from_str("blur_threshold = 42.0").unwrap();
        assert_eq!(cfg.blur_threshold, 42.0);
        assert_eq!(cfg.clahe_tiles, 8);
    }
}
