use image::RgbImage;
use ndarray::Array3;

use super::FeatureGrid;

/// Position features: channel 0 = row index, channel 1 = column index,
/// both in grid units. Channel 2 is left at zero; the store's offset
/// pass fills it with the per-image separation.
pub(super) fn position_grid(height: usize, width: usize) -> FeatureGrid {
    let mut grid = Array3::zeros((height, width, 3));
    for row in 0..height {
        for col in 0..width {
            grid[[row, col, 0]] = row as f32;
            grid[[row, col, 1]] = col as f32;
        }
    }
    grid
}

/// Hue features: one channel holding the hue of each downsampled pixel.
pub(super) fn hue_grid(small: &RgbImage) -> FeatureGrid {
    let (width, height) = small.dimensions();
    let mut grid = Array3::zeros((height as usize, width as usize, 1));
    for row in 0..height {
        for col in 0..width {
            let pixel = small.get_pixel(col, row);
            grid[[row as usize, col as usize, 0]] = hue(pixel[0], pixel[1], pixel[2]);
        }
    }
    grid
}

/// Color features: the downsampled RGB values, channel for channel.
pub(super) fn color_grid(small: &RgbImage) -> FeatureGrid {
    let (width, height) = small.dimensions();
    let mut grid = Array3::zeros((height as usize, width as usize, 3));
    for row in 0..height {
        for col in 0..width {
            let pixel = small.get_pixel(col, row);
            for channel in 0..3 {
                grid[[row as usize, col as usize, channel]] = pixel[channel] as f32;
            }
        }
    }
    grid
}

/// Hue of an RGB pixel on the 0..180 scale used by 8-bit HSV images.
fn hue(r: u8, g: u8, b: u8) -> f32 {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    if delta == 0.0 {
        return 0.0;
    }

    let degrees = if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
    degrees / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn position_grid_holds_indices() {
        let grid = position_grid(4, 6);
        assert_eq!(grid.dim(), (4, 6, 3));
        assert_eq!(grid[[2, 5, 0]], 2.0);
        assert_eq!(grid[[2, 5, 1]], 5.0);
        assert_eq!(grid[[2, 5, 2]], 0.0);
    }

    #[test]
    fn hue_of_primaries() {
        // red = 0, green = 120 deg, blue = 240 deg, halved to the 8-bit scale
        assert_eq!(hue(255, 0, 0), 0.0);
        assert_eq!(hue(0, 255, 0), 60.0);
        assert_eq!(hue(0, 0, 255), 120.0);
        // grayscale pixels have no hue
        assert_eq!(hue(77, 77, 77), 0.0);
    }

    #[test]
    fn color_grid_copies_channels() {
        let small = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let grid = color_grid(&small);
        assert_eq!(grid.dim(), (2, 3, 3));
        assert_eq!(grid[[1, 2, 0]], 10.0);
        assert_eq!(grid[[1, 2, 1]], 20.0);
        assert_eq!(grid[[1, 2, 2]], 30.0);
    }
}
