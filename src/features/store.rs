use image::RgbImage;
use ndarray::{s, Array1};

use super::embedding::EmbeddingModel;
use super::{extract, FeatureGrid, FeatureSpace};
use crate::error::{Error, Result};
use crate::rescale;

/// Separation written into the offset channel of position features, per
/// image, so exemplars pooled across images stay apart in feature space.
pub const IMAGE_OFFSET: f32 = 10_000.0;

/// Holds one feature grid per registered image and keeps them in sync
/// with the active feature space.
pub struct FeatureStore {
    space: FeatureSpace,
    factor: u32,
    model: Option<Box<dyn EmbeddingModel>>,
    grids: Vec<FeatureGrid>,
}

impl FeatureStore {
    pub fn new(space: FeatureSpace, factor: u32, model: Option<Box<dyn EmbeddingModel>>) -> Self {
        Self {
            space,
            factor,
            model,
            grids: Vec::new(),
        }
    }

    pub fn space(&self) -> FeatureSpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Extract features for a newly registered image under the current
    /// space and reapply the per-image offsets.
    pub fn register(&mut self, image: &RgbImage) -> Result<()> {
        let grid = self.extract(image, self.space)?;
        tracing::debug!(
            "registered image {} with {:?} features",
            self.grids.len(),
            grid.dim()
        );
        self.grids.push(grid);
        self.apply_offsets();
        Ok(())
    }

    /// Re-extract every stored grid under `space`.
    ///
    /// Offsets are reapplied afterwards, so position grids end up with
    /// offsets {0, 10000, 20000, ...} in registration order no matter how
    /// often sync runs. If any extraction fails the store is unchanged.
    ///
    /// Exemplar vectors are not refreshed here; the session must
    /// re-sample each click from the new grids.
    pub fn sync(&mut self, space: FeatureSpace, images: &[&RgbImage]) -> Result<()> {
        let mut grids = Vec::with_capacity(images.len());
        for image in images {
            grids.push(self.extract(image, space)?);
        }
        self.space = space;
        self.grids = grids;
        self.apply_offsets();
        tracing::info!("synced {} feature grids to {}", self.grids.len(), space);
        Ok(())
    }

    pub fn grid(&self, index: usize) -> Result<&FeatureGrid> {
        self.grids
            .get(index)
            .ok_or(Error::UnknownImage(index, self.grids.len()))
    }

    pub fn grids(&self) -> &[FeatureGrid] {
        &self.grids
    }

    /// Feature vector at a click location, copied out of the image's grid.
    pub fn sample(&self, index: usize, row: usize, col: usize) -> Result<Array1<f32>> {
        let grid = self.grid(index)?;
        let (height, width, _) = grid.dim();
        if row >= height || col >= width {
            return Err(Error::ClickOutOfBounds {
                row,
                col,
                height,
                width,
            });
        }
        Ok(grid.slice(s![row, col, ..]).to_owned())
    }

    /// Drop all grids and restore the given space. Keeps the embedding
    /// model so a later sync can reuse it.
    pub fn reset(&mut self, space: FeatureSpace) {
        self.grids.clear();
        self.space = space;
    }

    fn extract(&mut self, image: &RgbImage, space: FeatureSpace) -> Result<FeatureGrid> {
        match space {
            FeatureSpace::Position => {
                let height = (image.height() / self.factor) as usize;
                let width = (image.width() / self.factor) as usize;
                Ok(extract::position_grid(height, width))
            }
            FeatureSpace::Hue => {
                let small = rescale::downsample(image, self.factor);
                Ok(extract::hue_grid(&small))
            }
            FeatureSpace::Color => {
                let small = rescale::downsample(image, self.factor);
                Ok(extract::color_grid(&small))
            }
            FeatureSpace::DeepEmbedding => self.extract_embedding(image),
        }
    }

    fn extract_embedding(&mut self, image: &RgbImage) -> Result<FeatureGrid> {
        let model = self.model.as_mut().ok_or(Error::EmbeddingUnavailable)?;
        let grid = model
            .embed(image)
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let want_h = (image.height() / self.factor) as usize;
        let want_w = (image.width() / self.factor) as usize;
        let (got_h, got_w, _) = grid.dim();
        if (got_h, got_w) != (want_h, want_w) {
            return Err(Error::ResolutionMismatch {
                got_h,
                got_w,
                want_h,
                want_w,
            });
        }
        Ok(grid)
    }

    /// Position features carry a per-image constant in channel 2 so that
    /// grids stay separable when exemplars are pooled across images.
    fn apply_offsets(&mut self) {
        if self.space != FeatureSpace::Position {
            return;
        }
        for (index, grid) in self.grids.iter_mut().enumerate() {
            grid.slice_mut(s![.., .., 2]).fill(index as f32 * IMAGE_OFFSET);
        }
    }
}
