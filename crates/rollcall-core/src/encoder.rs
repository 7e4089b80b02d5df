//! Face detection + embedding behind a single seam.
//!
//! The attendance pipeline only needs "faces with embeddings" out of a
//! photo; [`FaceEncoder`] is that contract. [`OnnxFaceEncoder`] provides it
//! with SCRFD and ArcFace when the `onnx` feature is enabled.

use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[cfg(feature = "onnx")]
    #[error("detector: {0}")]
    Detector(#[from] crate::detector::DetectorError),
    #[cfg(feature = "onnx")]
    #[error("recognizer: {0}")]
    Recognizer(#[from] crate::recognizer::RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// One detected face and its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

pub trait FaceEncoder {
    /// Face boxes only, most confident first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncodeError>;

    /// Faces with embeddings, most confident first.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncodeError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncodeError> {
        (**self).detect(image)
    }

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncodeError> {
        (**self).encode(image)
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxFaceEncoder;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{DetectedFace, EncodeError, FaceEncoder};
    use crate::detector::FaceDetector;
    use crate::recognizer::FaceRecognizer;
    use crate::types::BoundingBox;
    use image::RgbImage;
    use std::path::Path;

    /// SCRFD detection followed by ArcFace embedding of every face.
    pub struct OnnxFaceEncoder {
        detector: FaceDetector,
        recognizer: FaceRecognizer,
    }

    impl OnnxFaceEncoder {
        pub const DETECTOR_FILE: &'static str = "det_10g.onnx";
        pub const RECOGNIZER_FILE: &'static str = "w600k_r50.onnx";

        /// Load both models from `model_dir`. Fails fast if either is missing.
        pub fn load(model_dir: &Path) -> Result<Self, EncodeError> {
            let detector_path = model_dir.join(Self::DETECTOR_FILE);
            let recognizer_path = model_dir.join(Self::RECOGNIZER_FILE);
            let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
            let recognizer = FaceRecognizer::load(&recognizer_path.to_string_lossy())?;
            Ok(Self {
                detector,
                recognizer,
            })
        }
    }

    impl FaceEncoder for OnnxFaceEncoder {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncodeError> {
            Ok(self.detector.detect(image)?)
        }

        fn encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncodeError> {
            let faces = self.detector.detect(image)?;
            let mut encoded = Vec::with_capacity(faces.len());
            for face in faces {
                if face.landmarks.is_none() {
                    tracing::warn!(confidence = face.confidence, "face without landmarks skipped");
                    continue;
                }
                let embedding = self.recognizer.extract(image, &face)?;
                encoded.push(DetectedFace {
                    bbox: face,
                    embedding,
                });
            }
            Ok(encoded)
        }
    }
}
