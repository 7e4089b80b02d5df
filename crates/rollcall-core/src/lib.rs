//! rollcall-core: Face-match decisions and attendance aggregation.
//!
//! Matches probe embeddings against an enrolled roster, deduplicates the
//! identities seen during a run, and turns them into a per-period
//! attendance report. Face detection and embedding sit behind the
//! [`FaceEncoder`] trait; SCRFD + ArcFace via ONNX Runtime is provided
//! under the `onnx` feature.

#[cfg(feature = "onnx")]
pub mod alignment;
pub mod attendance;
pub mod bbox;
#[cfg(feature = "onnx")]
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod periods;
#[cfg(feature = "onnx")]
pub mod recognizer;
pub mod roster;
pub mod types;

pub use attendance::{aggregate, AttendanceReport, AttendanceRow, Status, Summary};
pub use bbox::{normalize, PixelBox, RawBox, TrainingLabel};
pub use encoder::{DetectedFace, EncodeError, FaceEncoder};
pub use matcher::{Matcher, NearestMatcher, DEFAULT_TOLERANCE};
pub use periods::{Schedule, FALLBACK_PERIOD};
pub use roster::{EnrolledIdentity, Roster, SeenSet};
pub use types::{BoundingBox, Embedding, IdentityKey, MatchResult, Metric, Observation};

#[cfg(feature = "onnx")]
pub use encoder::OnnxFaceEncoder;

/// Directory searched for ONNX models when none is configured.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("models")
}
