use crate::bbox::PixelBox;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are raw detector output in image pixels and may extend past
/// the image or be degenerate; run them through [`crate::bbox::normalize`]
/// before drawing or labelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

/// Distance function used to compare embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cosine_similarity`, in [0, 2].
    #[default]
    Cosine,
    /// L2 distance between the raw vectors.
    Euclidean,
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            other => Err(format!("unknown metric '{other}' (expected cosine or euclidean)")),
        }
    }
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Zero vectors compare as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Distance under `metric`; smaller means more alike.
    pub fn distance(&self, other: &Embedding, metric: Metric) -> f32 {
        match metric {
            Metric::Cosine => 1.0 - self.similarity(other),
            Metric::Euclidean => self.euclidean_distance(other),
        }
    }
}

/// Who a person is on the roster: display name plus roll identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub name: String,
    pub roll: String,
}

impl IdentityKey {
    pub fn new(name: impl Into<String>, roll: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roll: roll.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.roll)
    }
}

/// One face found in one group photo, ready for matching.
#[derive(Debug, Clone)]
pub struct Observation {
    pub embedding: Embedding,
    pub bbox: PixelBox,
    /// File name of the photo the face came from.
    pub source: String,
}

/// Result of matching a probe embedding against the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched {
        identity: IdentityKey,
        /// Distance to the nearest reference embedding of `identity`.
        distance: f32,
    },
    Unmatched,
}

impl MatchResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn identity(&self) -> Option<&IdentityKey> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            MatchResult::Unmatched => None,
        }
    }

    /// Operator-facing label for annotations.
    pub fn label(&self) -> String {
        match self {
            MatchResult::Matched { identity, .. } => identity.to_string(),
            MatchResult::Unmatched => "Unrecognized".to_string(),
        }
    }
}
