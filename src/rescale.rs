//! Resolution reconciliation between native images, the fixed working
//! resolution, and the downsampled feature grids.

use image::{imageops, ImageBuffer, Luma, RgbImage};
use ndarray::Array2;

/// Resize an uploaded image to the square working resolution.
pub fn normalize(image: &RgbImage, size: u32) -> RgbImage {
    if image.dimensions() == (size, size) {
        image.clone()
    } else {
        imageops::resize(image, size, size, imageops::FilterType::Triangle)
    }
}

/// Downsample a working copy to feature resolution.
pub fn downsample(image: &RgbImage, factor: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    imageops::resize(
        image,
        width / factor,
        height / factor,
        imageops::FilterType::Triangle,
    )
}

/// Upscale a feature-resolution probability map to the target
/// resolution.
///
/// Interpolation is bilinear, so output values stay within the input's
/// min/max range; no out-of-range probabilities are introduced.
pub fn upscale(map: &Array2<f32>, target_height: u32, target_width: u32) -> Array2<f32> {
    let (height, width) = map.dim();
    if (height as u32, width as u32) == (target_height, target_width) {
        return map.clone();
    }

    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([map[[y as usize, x as usize]]])
        });

    let resized = imageops::resize(
        &buffer,
        target_width,
        target_height,
        imageops::FilterType::Triangle,
    );

    Array2::from_shape_fn(
        (target_height as usize, target_width as usize),
        |(row, col)| resized.get_pixel(col as u32, row as u32)[0],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array2;

    #[test]
    fn normalize_produces_the_working_square() {
        let image = RgbImage::from_pixel(100, 60, Rgb([1, 2, 3]));
        let normalized = normalize(&image, 64);
        assert_eq!(normalized.dimensions(), (64, 64));
    }

    #[test]
    fn normalize_is_a_copy_when_sizes_match() {
        let image = RgbImage::from_pixel(64, 64, Rgb([9, 9, 9]));
        let normalized = normalize(&image, 64);
        assert_eq!(normalized, image);
    }

    #[test]
    fn downsample_divides_dimensions() {
        let image = RgbImage::from_pixel(512, 512, Rgb([0, 0, 0]));
        let small = downsample(&image, 14);
        assert_eq!(small.dimensions(), (36, 36));
    }

    #[test]
    fn upscale_reshapes_exactly() {
        let map = Array2::from_elem((6, 4), 0.25f32);
        let up = upscale(&map, 31, 17);
        assert_eq!(up.dim(), (31, 17));
    }

    #[test]
    fn upscale_preserves_value_range() {
        let map = Array2::from_shape_fn((8, 8), |(row, col)| {
            0.2 + 0.6 * ((row * 8 + col) as f32 / 63.0)
        });
        let min = map.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = map.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        let up = upscale(&map, 64, 64);
        for &value in up.iter() {
            assert!(value >= min - 1e-4, "{value} fell below {min}");
            assert!(value <= max + 1e-4, "{value} rose above {max}");
        }
    }

    #[test]
    fn upscale_of_constant_map_is_constant() {
        let map = Array2::from_elem((3, 3), 0.75f32);
        let up = upscale(&map, 12, 12);
        for &value in up.iter() {
            assert!((value - 0.75).abs() < 1e-5);
        }
    }
}
