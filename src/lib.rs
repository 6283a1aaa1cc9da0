//! Interactive click-driven binary segmentation.
//!
//! A session holds one or more uploaded images. The user places
//! positive/negative clicks on any image; every image is re-classified
//! pixel by pixel by similarity to the clicked exemplars, producing a
//! probability map and a thresholded mask that are pushed to observers.
//!
//! Flow: an image arrives and its feature grid is extracted; clicks bind
//! exemplar feature vectors; the classifier turns distances into a
//! k-nearest vote over the exemplar labels; probability maps are
//! upscaled back to native resolution; dirty artifacts are encoded and
//! pushed through an [`ArtifactSink`].

pub mod classifier;
pub mod error;
pub mod features;
pub mod rescale;
pub mod session;

pub use error::{Error, Result};
pub use features::{
    DistanceMetric, EmbeddingModel, FeatureGrid, FeatureSpace, FeatureStore, IMAGE_OFFSET,
};
#[cfg(feature = "onnx")]
pub use features::OnnxEmbedding;
pub use session::{
    ArtifactKind, ArtifactSink, Click, DirtyFlags, SessionConfig, SessionState, Viewer,
};
