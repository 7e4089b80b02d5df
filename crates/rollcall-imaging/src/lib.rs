//! rollcall-imaging: Photo quality gating, enhancement, and review annotations.
//!
//! Group photos pass through the [`QualityGate`] before detection; faces
//! found in them are drawn back onto the photo for review through a
//! [`Preview`] sink.

pub mod annotate;
pub mod gate;
pub mod photo;

pub use annotate::{Annotation, DirectoryPreview, ImagingError, NoPreview, Preview};
pub use gate::{
    FixedPolicy, GateConfig, GateOutcome, GateState, QualityDecision, QualityGate, QualityPolicy, QualityReport,
    Rejection,
};
