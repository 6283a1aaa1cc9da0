use image::RgbImage;
use ndarray::Array2;

use crate::rescale;

/// Derived artifact kinds pushed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Preview,
    Probability,
    Mask,
}

/// Per-artifact republish flags. A set flag means the artifact must be
/// pushed to observers before it is considered current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub preview: bool,
    pub probability: bool,
    pub mask: bool,
}

impl DirtyFlags {
    pub(crate) fn set(&mut self, kind: ArtifactKind) {
        match kind {
            ArtifactKind::Preview => self.preview = true,
            ArtifactKind::Probability => self.probability = true,
            ArtifactKind::Mask => self.mask = true,
        }
    }

    pub(crate) fn clear(&mut self, kind: ArtifactKind) {
        match kind {
            ArtifactKind::Preview => self.preview = false,
            ArtifactKind::Probability => self.probability = false,
            ArtifactKind::Mask => self.mask = false,
        }
    }
}

/// One registered image with its derived artifacts.
///
/// The original pixels are immutable; the normalized copy is used for
/// all feature extraction and as the preview. The probability map and
/// mask are at native resolution and absent until classification runs.
pub struct Viewer {
    orig: RgbImage,
    pimg: RgbImage,
    prob: Option<Array2<f32>>,
    mask: Option<Array2<bool>>,
    dirty: DirtyFlags,
}

impl Viewer {
    /// Wrap an uploaded image. The preview starts dirty so observers
    /// receive the normalized copy on the next publish.
    pub fn new(orig: RgbImage, normalized_size: u32) -> Self {
        let pimg = rescale::normalize(&orig, normalized_size);
        Self {
            orig,
            pimg,
            prob: None,
            mask: None,
            dirty: DirtyFlags {
                preview: true,
                ..DirtyFlags::default()
            },
        }
    }

    /// Normalized working copy.
    pub fn pimg(&self) -> &RgbImage {
        &self.pimg
    }

    /// Native resolution of the uploaded image as (height, width).
    pub fn native_size(&self) -> (u32, u32) {
        let (width, height) = self.orig.dimensions();
        (height, width)
    }

    pub fn probability(&self) -> Option<&Array2<f32>> {
        self.prob.as_ref()
    }

    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub(crate) fn set_probability(&mut self, prob: Array2<f32>) {
        self.prob = Some(prob);
    }

    pub(crate) fn set_mask(&mut self, mask: Array2<bool>) {
        self.mask = Some(mask);
    }

    pub(crate) fn mark_dirty(&mut self, kind: ArtifactKind) {
        self.dirty.set(kind);
    }

    pub(crate) fn clear_dirty(&mut self, kind: ArtifactKind) {
        self.dirty.clear(kind);
    }
}
