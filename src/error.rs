use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Every variant is returned to the caller of the triggering operation;
/// a failed operation leaves the session in its last-good state.
#[derive(Debug, Error)]
pub enum Error {
    /// The client-reported running click count does not match the
    /// server-side exemplar list. The click is rejected without mutation.
    #[error("click count {reported} does not match expected {expected}")]
    Sequencing { reported: usize, expected: usize },

    /// Feature grids and exemplar vectors have incompatible spatial or
    /// feature dimensionality.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An injected feature extractor returned a grid of unexpected
    /// spatial shape.
    #[error("feature grid is {got_h}x{got_w}, expected {want_h}x{want_w}")]
    ResolutionMismatch {
        got_h: usize,
        got_w: usize,
        want_h: usize,
        want_w: usize,
    },

    #[error("unknown feature space: {0:?}")]
    UnknownFeatureSpace(String),

    #[error("unknown distance metric: {0:?}")]
    UnknownDistanceMetric(String),

    /// An operation referenced an image index with no registered viewer.
    #[error("image index {0} out of range ({1} registered)")]
    UnknownImage(usize, usize),

    /// A click landed outside the feature grid.
    #[error("click ({row}, {col}) outside feature grid {height}x{width}")]
    ClickOutOfBounds {
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },

    /// The deep-embedding space was selected but no model is configured.
    #[error("no embedding model configured")]
    EmbeddingUnavailable,

    /// The embedding backend itself failed.
    #[error("embedding model failed: {0}")]
    Embedding(String),

    #[error("k must be at least 1")]
    InvalidK,

    #[error("threshold {0} outside [0, 1]")]
    InvalidThreshold(f32),

    /// Artifact encoding failed.
    #[error("artifact encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// An artifact sink rejected a push.
    #[error("artifact push failed: {0}")]
    Publish(String),
}

pub type Result<T> = std::result::Result<T, Error>;
