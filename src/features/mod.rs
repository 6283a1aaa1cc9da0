mod embedding;
mod extract;
mod store;

pub use embedding::EmbeddingModel;
#[cfg(feature = "onnx")]
pub use embedding::OnnxEmbedding;
pub use store::{FeatureStore, IMAGE_OFFSET};

use std::fmt;
use std::str::FromStr;

use ndarray::Array3;

use crate::error::Error;

/// Per-pixel descriptor array for one image under one feature space.
/// Shape is (rows, cols, feature dim) at downsampled resolution.
pub type FeatureGrid = Array3<f32>;

/// Named strategy for turning raw pixels into feature vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSpace {
    /// Row/column indices plus a per-image offset channel.
    Position,
    /// Hue channel of the HSV conversion, one feature per pixel.
    Hue,
    /// The downsampled RGB values themselves.
    Color,
    /// Dense per-patch embeddings from an injected model.
    DeepEmbedding,
}

impl FeatureSpace {
    pub fn id(&self) -> &'static str {
        match self {
            FeatureSpace::Position => "position",
            FeatureSpace::Hue => "hue",
            FeatureSpace::Color => "color",
            FeatureSpace::DeepEmbedding => "deep-embedding",
        }
    }
}

impl FromStr for FeatureSpace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "position" => Ok(FeatureSpace::Position),
            "hue" => Ok(FeatureSpace::Hue),
            "color" => Ok(FeatureSpace::Color),
            "deep-embedding" => Ok(FeatureSpace::DeepEmbedding),
            other => Err(Error::UnknownFeatureSpace(other.to_string())),
        }
    }
}

impl fmt::Display for FeatureSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Distance metric selection. Stored with the session settings but not
/// consulted; the distance computation is Euclidean regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(Error::UnknownDistanceMetric(other.to_string())),
        }
    }
}
