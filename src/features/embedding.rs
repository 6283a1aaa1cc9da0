use anyhow::Result;
use image::RgbImage;
use ndarray::Array3;

/// Trait for dense patch-embedding backends
/// Allows swapping between different models (DINOv2, CLIP, ...) and
/// stubbing the backend out when testing the rest of the pipeline.
pub trait EmbeddingModel {
    /// Embed an image into a per-patch feature grid.
    ///
    /// # Arguments
    /// * `image` - Input RGB image at the session's working resolution
    ///
    /// # Returns
    /// * A (rows, cols, dim) grid with one feature vector per patch. The
    ///   spatial shape is checked against the store's downsampling factor
    ///   by the caller.
    fn embed(&mut self, image: &RgbImage) -> Result<Array3<f32>>;

    /// Side length of one square patch, in pixels.
    fn patch_size(&self) -> u32;
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedding;

#[cfg(feature = "onnx")]
mod onnx {
    use super::EmbeddingModel;
    use anyhow::{ensure, Context, Result};
    use image::{imageops, RgbImage};
    use ndarray::{Array3, Array4};
    use ort::{GraphOptimizationLevel, Session};
    use std::path::Path;

    // ImageNet channel statistics, matching the training distribution of
    // the usual ViT backbones.
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// ONNX-backed patch embedding model.
    ///
    /// Expects a vision transformer exported with a single image input
    /// and patch tokens of shape [1, rows*cols, dim] as its first output.
    pub struct OnnxEmbedding {
        session: Session,
        patch_size: u32,
    }

    impl OnnxEmbedding {
        /// Load a patch-embedding model from an ONNX file.
        pub fn new<P: AsRef<Path>>(model_path: P, patch_size: u32) -> Result<Self> {
            let path = model_path.as_ref();

            tracing::info!("Loading embedding model from {}", path.display());

            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(path)
                .with_context(|| format!("Failed to load model from {}", path.display()))?;

            tracing::info!("Embedding model loaded successfully");

            Ok(Self {
                session,
                patch_size,
            })
        }

        /// Resize to the nearest patch multiple and normalize into an
        /// NCHW tensor with ImageNet statistics.
        fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
            let (width, height) = image.dimensions();
            let target_width = (width / self.patch_size) * self.patch_size;
            let target_height = (height / self.patch_size) * self.patch_size;

            let resized = if (width, height) != (target_width, target_height) {
                imageops::resize(
                    image,
                    target_width,
                    target_height,
                    imageops::FilterType::Triangle,
                )
            } else {
                image.clone()
            };

            let mut tensor =
                Array4::<f32>::zeros((1, 3, target_height as usize, target_width as usize));
            for y in 0..target_height {
                for x in 0..target_width {
                    let pixel = resized.get_pixel(x, y);
                    for channel in 0..3 {
                        let value = pixel[channel] as f32 / 255.0;
                        tensor[[0, channel, y as usize, x as usize]] =
                            (value - MEAN[channel]) / STD[channel];
                    }
                }
            }
            tensor
        }
    }

    impl EmbeddingModel for OnnxEmbedding {
        fn embed(&mut self, image: &RgbImage) -> Result<Array3<f32>> {
            let _span = tracing::debug_span!("embed").entered();

            let input = self.preprocess(image);
            let (_, _, height, width) = input.dim();
            let rows = height / self.patch_size as usize;
            let cols = width / self.patch_size as usize;

            let outputs = self
                .session
                .run(ort::inputs![input.view()]?)
                .context("Failed to run inference")?;

            // Patch tokens: [1, rows*cols, dim]
            let tokens = outputs[0].try_extract_tensor::<f32>()?.view().to_owned();
            let shape = tokens.shape().to_vec();
            ensure!(
                shape.len() == 3 && shape[0] == 1 && shape[1] == rows * cols,
                "unexpected token shape {:?}, expected [1, {}, dim]",
                shape,
                rows * cols
            );

            let dim = shape[2];
            let grid = tokens
                .into_shape((rows, cols, dim))
                .context("Failed to reshape patch tokens")?;
            Ok(grid)
        }

        fn patch_size(&self) -> u32 {
            self.patch_size
        }
    }
}
