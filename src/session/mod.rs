//! Session orchestration: registered images, exemplar clicks,
//! hyperparameters, and the recompute-and-publish cycle.
//!
//! A session is an explicitly owned value; concurrent sessions are
//! independent instances. State-changing operations are assumed to be
//! externally serialized; the engine is not internally thread-safe.

mod publish;
mod viewer;

pub use publish::ArtifactSink;
pub use viewer::{ArtifactKind, DirtyFlags, Viewer};

use image::RgbImage;
use ndarray::{Array1, Array2};

use crate::classifier;
use crate::error::{Error, Result};
use crate::features::{DistanceMetric, EmbeddingModel, FeatureSpace, FeatureStore};
use crate::rescale;

const DEFAULT_K: usize = 1;
const DEFAULT_THRESHOLD: f32 = 0.5;
const DEFAULT_SPACE: FeatureSpace = FeatureSpace::Position;

/// A user click in feature-grid coordinates, bound to one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    pub image_index: usize,
    pub row: usize,
    pub col: usize,
    /// true marks a positive (foreground) exemplar.
    pub positive: bool,
}

/// Session resolution knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Side length of the square working copy every upload is resized to.
    pub normalized_size: u32,
    /// Spatial downsampling between the working copy and its feature grid.
    pub downsample_factor: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            normalized_size: 512,
            downsample_factor: 14,
        }
    }
}

/// The interactive segmentation session.
///
/// Owns the registered images, the exemplar set, the hyperparameters and
/// the per-image dirty flags, and runs the full recompute sequence after
/// every state-changing operation.
pub struct SessionState {
    config: SessionConfig,
    viewers: Vec<Viewer>,
    clicks: Vec<Click>,
    /// One feature vector per click, sampled at click time and refreshed
    /// on every feature-space change.
    exemplars: Vec<Array1<f32>>,
    store: FeatureStore,
    k: usize,
    threshold: f32,
    metric: DistanceMetric,
}

impl SessionState {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_embedding(config, None)
    }

    /// Create a session with an injected deep-embedding backend.
    pub fn with_embedding(
        config: SessionConfig,
        model: Option<Box<dyn EmbeddingModel>>,
    ) -> Self {
        Self {
            store: FeatureStore::new(DEFAULT_SPACE, config.downsample_factor, model),
            config,
            viewers: Vec::new(),
            clicks: Vec::new(),
            exemplars: Vec::new(),
            k: DEFAULT_K,
            threshold: DEFAULT_THRESHOLD,
            metric: DistanceMetric::default(),
        }
    }

    /// Register an uploaded image.
    ///
    /// Extracts its features and, if exemplars exist, classifies only the
    /// new image; existing classifications stay valid. The new viewer's
    /// preview starts dirty; probability and mask are marked dirty only
    /// when classification ran.
    pub fn add_image(&mut self, image: RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        tracing::info!("Registering image {} ({}x{})", self.viewers.len(), width, height);

        let viewer = Viewer::new(image, self.config.normalized_size);
        self.store.register(viewer.pimg())?;
        self.viewers.push(viewer);

        if !self.clicks.is_empty() {
            let index = self.viewers.len() - 1;
            let labels = self.labels();
            let mut maps = classifier::classify(
                std::slice::from_ref(self.store.grid(index)?),
                &self.exemplars,
                &labels,
                self.k,
            )?;
            if let Some(map) = maps.pop() {
                self.install(index, map);
            }
        }
        Ok(())
    }

    /// Record a click and reclassify every image.
    ///
    /// `reported_count` is the client's running click count including
    /// this click; it must be exactly one more than the recorded count,
    /// guarding against dropped or duplicated messages. On a sequencing
    /// failure nothing is mutated.
    pub fn add_click(&mut self, click: Click, reported_count: usize) -> Result<()> {
        let expected = self.clicks.len() + 1;
        if reported_count != expected {
            return Err(Error::Sequencing {
                reported: reported_count,
                expected,
            });
        }
        if click.image_index >= self.viewers.len() {
            return Err(Error::UnknownImage(click.image_index, self.viewers.len()));
        }

        let vector = self.store.sample(click.image_index, click.row, click.col)?;
        tracing::info!(
            "Click {} on image {} at ({}, {}), positive={}",
            expected,
            click.image_index,
            click.row,
            click.col,
            click.positive
        );

        self.clicks.push(click);
        self.exemplars.push(vector);
        self.reclassify_all()
    }

    /// Switch the active feature space.
    ///
    /// Re-extracts every grid, re-samples every exemplar vector from the
    /// refreshed grids, and reclassifies everything. Calling this twice
    /// with the same space is idempotent.
    pub fn set_feature_space(&mut self, space: FeatureSpace) -> Result<()> {
        let images: Vec<&RgbImage> = self.viewers.iter().map(Viewer::pimg).collect();
        self.store.sync(space, &images)?;

        // Exemplars would otherwise reference the stale feature basis.
        let mut exemplars = Vec::with_capacity(self.clicks.len());
        for click in &self.clicks {
            exemplars.push(self.store.sample(click.image_index, click.row, click.col)?);
        }
        self.exemplars = exemplars;

        self.reclassify_all()
    }

    /// Change the vote size and reclassify every image.
    pub fn set_k(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Err(Error::InvalidK);
        }
        self.k = k;
        self.reclassify_all()
    }

    /// Change the mask threshold.
    ///
    /// Probabilities are unaffected; only the masks are rebuilt from the
    /// stored maps and marked dirty.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidThreshold(threshold));
        }
        self.threshold = threshold;

        for viewer in &mut self.viewers {
            let mask = match viewer.probability() {
                Some(prob) => classifier::mask(prob, threshold),
                None => continue,
            };
            viewer.set_mask(mask);
            viewer.mark_dirty(ArtifactKind::Mask);
        }
        Ok(())
    }

    /// Select the distance metric. Accepted and stored; the distance
    /// computation itself is Euclidean regardless of this setting.
    pub fn set_distance_metric(&mut self, metric: DistanceMetric) {
        self.metric = metric;
    }

    /// Clear all images and clicks and restore the hyperparameter
    /// defaults, returning to the initial empty state.
    pub fn reset(&mut self) {
        tracing::info!("Resetting session");
        self.viewers.clear();
        self.clicks.clear();
        self.exemplars.clear();
        self.store.reset(DEFAULT_SPACE);
        self.k = DEFAULT_K;
        self.threshold = DEFAULT_THRESHOLD;
        self.metric = DistanceMetric::default();
    }

    /// Push every dirty artifact to the sink, clearing each flag after
    /// its successful push.
    pub fn publish(&mut self, sink: &mut dyn ArtifactSink) -> Result<()> {
        for (index, viewer) in self.viewers.iter_mut().enumerate() {
            if viewer.dirty().preview {
                let bytes = publish::encode_preview(viewer.pimg())?;
                tracing::debug!("pushing preview for image {} ({} bytes)", index, bytes.len());
                sink.push(index, ArtifactKind::Preview, &bytes)
                    .map_err(|e| Error::Publish(e.to_string()))?;
                viewer.clear_dirty(ArtifactKind::Preview);
            }
            if viewer.dirty().probability {
                if let Some(prob) = viewer.probability() {
                    let bytes = publish::encode_probability(prob)?;
                    tracing::debug!(
                        "pushing probability for image {} ({:?})",
                        index,
                        prob.dim()
                    );
                    sink.push(index, ArtifactKind::Probability, &bytes)
                        .map_err(|e| Error::Publish(e.to_string()))?;
                }
                viewer.clear_dirty(ArtifactKind::Probability);
            }
            if viewer.dirty().mask {
                if let Some(mask) = viewer.mask() {
                    let bytes = publish::encode_mask(mask)?;
                    tracing::debug!("pushing mask for image {} ({:?})", index, mask.dim());
                    sink.push(index, ArtifactKind::Mask, &bytes)
                        .map_err(|e| Error::Publish(e.to_string()))?;
                }
                viewer.clear_dirty(ArtifactKind::Mask);
            }
        }
        Ok(())
    }

    pub fn viewers(&self) -> &[Viewer] {
        &self.viewers
    }

    pub fn viewer(&self, index: usize) -> Option<&Viewer> {
        self.viewers.get(index)
    }

    pub fn clicks(&self) -> &[Click] {
        &self.clicks
    }

    pub fn exemplars(&self) -> &[Array1<f32>] {
        &self.exemplars
    }

    pub fn feature_store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn feature_space(&self) -> FeatureSpace {
        self.store.space()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }

    fn labels(&self) -> Vec<bool> {
        self.clicks.iter().map(|c| c.positive).collect()
    }

    /// Recompute every probability map, then install the whole batch.
    ///
    /// All maps are computed before any viewer is touched; on error the
    /// previous artifacts and dirty flags are left as they were.
    fn reclassify_all(&mut self) -> Result<()> {
        let labels = self.labels();
        let maps = classifier::classify(self.store.grids(), &self.exemplars, &labels, self.k)?;
        for (index, map) in maps.into_iter().enumerate() {
            self.install(index, map);
        }
        Ok(())
    }

    /// Upscale a feature-resolution map to the image's native resolution,
    /// derive the mask, and mark both artifacts dirty.
    fn install(&mut self, index: usize, map: Array2<f32>) {
        let threshold = self.threshold;
        let viewer = &mut self.viewers[index];
        let (native_height, native_width) = viewer.native_size();
        let prob = rescale::upscale(&map, native_height, native_width);
        let mask = classifier::mask(&prob, threshold);
        viewer.set_probability(prob);
        viewer.set_mask(mask);
        viewer.mark_dirty(ArtifactKind::Probability);
        viewer.mark_dirty(ArtifactKind::Mask);
    }
}
