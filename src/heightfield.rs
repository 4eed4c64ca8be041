use image::DynamicImage;
use rayon::prelude::*;
use tracing::info;

use crate::settings::BorderSettings;

/// Row-major grid of height samples, the working representation every
/// synthesis stage reads and writes.
#[derive(Debug, Clone, Default)]
pub struct HeightField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl HeightField {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!((width * height) as usize, data.len());
        Self { width, height, data }
    }

    /// Extracts heights from the first channel of `image`, remapping the
    /// 0..=255 byte range linearly into `min_y..=max_y`.
    pub fn from_image(image: &DynamicImage, min_y: f32, max_y: f32) -> Self {
        let width = image.width();
        let height = image.height();
        let bytes = image.as_bytes();
        let stride = image.color().bytes_per_pixel() as usize;
        let span = max_y - min_y;

        let data: Vec<f32> = bytes
            .par_chunks(stride)
            .map(|pixel| min_y + (pixel[0] as f32 / 255.0) * span)
            .collect();

        info!("extracted {} height samples from {}x{} image", data.len(), width, height);
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn sample(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    /// Box-blurs the field `passes` times. Each pass averages every sample
    /// with its existing neighbors from a snapshot, so the blur is
    /// order-independent.
    pub fn smooth(&mut self, passes: u32) {
        let width = self.width as i64;
        let height = self.height as i64;

        for _ in 0..passes {
            let snapshot = self.data.clone();
            self.data
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, value)| {
                    let x = index as i64 % width;
                    let y = index as i64 / width;
                    let mut sum = 0.0f32;
                    let mut count = 0u32;
                    for dy in -1..=1i64 {
                        for dx in -1..=1i64 {
                            let nx = x + dx;
                            let ny = y + dy;
                            if nx >= 0 && nx < width && ny >= 0 && ny < height {
                                sum += snapshot[(ny * width + nx) as usize];
                                count += 1;
                            }
                        }
                    }
                    *value = sum / count as f32;
                });
        }
    }

    /// Adds a raised rim around the map: a plateau of `border.height` within
    /// `plateau_width` samples of any edge, falling off smoothly over the
    /// next `blend_width` samples.
    pub fn raise_border(&mut self, border: &BorderSettings) {
        let width = self.width;
        let height = self.height;
        let plateau = border.plateau_width;
        let blend = border.blend_width;

        self.data
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, value)| {
                let x = index as u32 % width;
                let y = index as u32 / width;
                // Chebyshev distance to the nearest edge.
                let distance = x.min(width - 1 - x).min(y).min(height - 1 - y);

                if distance < plateau {
                    *value += border.height;
                } else if distance < plateau + blend {
                    // Linear falloff from the plateau down to the interior.
                    let t = (distance - plateau) as f32 / blend as f32;
                    *value += border.height * (1.0 - t);
                }
            });
    }

    /// Bilinearly upsamples the grid to `d*(w-1)+1` by `d*(h-1)+1` samples,
    /// so every original sample survives at coordinates that are multiples
    /// of `density`. A factor of 1 or less leaves the field untouched.
    pub fn densify(&mut self, density: u32) {
        if density <= 1 {
            return;
        }

        let src_w = self.width as usize;
        let src_h = self.height as usize;
        let dst_w = (src_w - 1) * density as usize + 1;
        let dst_h = (src_h - 1) * density as usize + 1;
        let source = std::mem::take(&mut self.data);

        let data: Vec<f32> = (0..dst_w * dst_h)
            .into_par_iter()
            .map(|index| {
                let x = index % dst_w;
                let y = index / dst_w;

                // Continuous coordinates in the source grid.
                let fx = x as f32 / density as f32;
                let fy = y as f32 / density as f32;
                let x0 = (fx as usize).min(src_w - 1);
                let y0 = (fy as usize).min(src_h - 1);
                let x1 = (x0 + 1).min(src_w - 1);
                let y1 = (y0 + 1).min(src_h - 1);
                let tx = fx - x0 as f32;
                let ty = fy - y0 as f32;

                let h00 = source[y0 * src_w + x0];
                let h10 = source[y0 * src_w + x1];
                let h01 = source[y1 * src_w + x0];
                let h11 = source[y1 * src_w + x1];

                let top = h00 + (h10 - h00) * tx;
                let bottom = h01 + (h11 - h01) * tx;
                top + (bottom - top) * ty
            })
            .collect();

        self.width = dst_w as u32;
        self.height = dst_h as u32;
        self.data = data;
        info!("densified height field to {}x{}", dst_w, dst_h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn flat_field(width: u32, height: u32, value: f32) -> HeightField {
        HeightField::new(width, height, vec![value; (width * height) as usize])
    }

    #[test]
    fn from_image_remaps_byte_range() {
        let mut image = GrayImage::new(2, 1);
        image.put_pixel(0, 0, Luma([0]));
        image.put_pixel(1, 0, Luma([255]));

        let field = HeightField::from_image(&DynamicImage::ImageLuma8(image), -10.0, 30.0);
        assert_eq!(field.sample(0, 0), -10.0);
        assert_eq!(field.sample(1, 0), 30.0);
    }

    #[test]
    fn smooth_preserves_flat_field() {
        let mut field = flat_field(8, 8, 5.0);
        field.smooth(3);
        assert!(field.data().iter().all(|&h| (h - 5.0).abs() < 1e-6));
    }

    #[test]
    fn smooth_reduces_spikes() {
        let mut field = flat_field(5, 5, 0.0);
        field.data_mut()[12] = 100.0;
        field.smooth(1);
        assert!(field.sample(2, 2) < 100.0);
        assert!(field.sample(2, 2) > 0.0);
    }

    #[test]
    fn raise_border_is_additive_and_leaves_interior() {
        let mut field = flat_field(101, 101, 2.0);
        let border = BorderSettings {
            plateau_width: 3,
            blend_width: 2,
            height: 10.0,
        };
        field.raise_border(&border);
        assert_eq!(field.sample(0, 0), 12.0);
        assert_eq!(field.sample(50, 50), 2.0);
        // Blend region sits strictly between interior and plateau.
        let blended = field.sample(4, 50);
        assert!(blended > 2.0 && blended < 12.0);
    }

    #[test]
    fn densify_scales_dimensions_and_interpolates() {
        let mut field = HeightField::new(2, 2, vec![0.0, 4.0, 0.0, 4.0]);
        field.densify(2);
        assert_eq!(field.width(), 3);
        assert_eq!(field.height(), 3);
        // Halfway between columns 0 and 1 of the source.
        assert!((field.sample(1, 0) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn densify_is_identity_at_source_samples() {
        let data: Vec<f32> = (0..20).map(|i| (i * i % 13) as f32).collect();
        let source = HeightField::new(5, 4, data);
        let mut dense = source.clone();
        dense.densify(3);
        assert_eq!(dense.width(), 13);
        assert_eq!(dense.height(), 10);
        for y in 0..source.height() {
            for x in 0..source.width() {
                assert_eq!(dense.sample(x * 3, y * 3), source.sample(x, y));
            }
        }
    }

    #[test]
    fn densify_of_one_is_noop() {
        let mut field = flat_field(3, 3, 1.0);
        field.densify(1);
        assert_eq!(field.width(), 3);
        assert_eq!(field.data().len(), 9);
    }
}
