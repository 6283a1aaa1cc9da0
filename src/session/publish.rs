use std::io::Cursor;

use image::{GrayImage, ImageFormat, RgbImage};
use ndarray::Array2;

use super::viewer::ArtifactKind;
use crate::error::Result;

/// Observer for republished artifacts. The transport layer (websocket
/// push, file dump, test capture) implements this.
pub trait ArtifactSink {
    /// Receive one encoded artifact for the image at `image_index`.
    fn push(&mut self, image_index: usize, kind: ArtifactKind, bytes: &[u8])
        -> anyhow::Result<()>;
}

/// JPEG of the normalized working copy. Lossy is acceptable for the
/// preview.
pub(super) fn encode_preview(pimg: &RgbImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    pimg.write_to(&mut cursor, ImageFormat::Jpeg)?;
    Ok(cursor.into_inner())
}

/// 8-bit grayscale PNG of the probability map, scaled to 0..255.
pub(super) fn encode_probability(prob: &Array2<f32>) -> Result<Vec<u8>> {
    let (height, width) = prob.dim();
    let gray = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let value = prob[[y as usize, x as usize]];
        image::Luma([(value * 255.0).clamp(0.0, 255.0) as u8])
    });
    encode_png(&gray)
}

/// 0/255 grayscale PNG of the binary mask.
pub(super) fn encode_mask(mask: &Array2<bool>) -> Result<Vec<u8>> {
    let (height, width) = mask.dim();
    let gray = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        image::Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    });
    encode_png(&gray)
}

fn encode_png(gray: &GrayImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    gray.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}
