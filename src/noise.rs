use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::heightfield::HeightField;
use crate::settings::NoiseSettings;

/// Seeded 2D gradient noise with a shuffled 256-entry permutation table,
/// doubled so lookups never wrap explicitly.
pub struct GradientNoise {
    permutation: [u8; 512],
    gradients: [Vec2; 256],
}

impl GradientNoise {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut table: [u8; 256] = [0; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u8;
        }
        // Fisher-Yates shuffle.
        for i in (1..256usize).rev() {
            let j = rng.gen_range(0..=i);
            table.swap(i, j);
        }

        let mut permutation = [0u8; 512];
        for i in 0..512 {
            permutation[i] = table[i & 255];
        }

        let mut gradients = [Vec2::ZERO; 256];
        for gradient in gradients.iter_mut() {
            let angle = rng.gen::<f32>() * std::f32::consts::TAU;
            *gradient = Vec2::new(angle.cos(), angle.sin());
        }

        Self { permutation, gradients }
    }

    fn gradient_at(&self, x: i32, y: i32) -> Vec2 {
        let hash = self.permutation[(self.permutation[(x & 255) as usize] as usize) + (y & 255) as usize];
        self.gradients[hash as usize]
    }

    /// Single-octave sample in roughly [-1, 1].
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor() as i32;
        let y0 = y.floor() as i32;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let d00 = self.gradient_at(x0, y0).dot(Vec2::new(fx, fy));
        let d10 = self.gradient_at(x0 + 1, y0).dot(Vec2::new(fx - 1.0, fy));
        let d01 = self.gradient_at(x0, y0 + 1).dot(Vec2::new(fx, fy - 1.0));
        let d11 = self.gradient_at(x0 + 1, y0 + 1).dot(Vec2::new(fx - 1.0, fy - 1.0));

        let u = fade(fx);
        let v = fade(fy);

        let top = d00 + (d10 - d00) * u;
        let bottom = d01 + (d11 - d01) * u;
        top + (bottom - top) * v
    }

    /// Sums `octaves` samples with doubling frequency and `persistence`
    /// amplitude decay, normalized back into [-1, 1].
    pub fn fractal(&self, x: f32, y: f32, settings: &NoiseSettings) -> f32 {
        let mut total = 0.0;
        let mut frequency = settings.frequency;
        let mut amplitude = 1.0;
        let mut max_amplitude = 0.0;

        for _ in 0..settings.octaves {
            total += self.sample(x * frequency, y * frequency) * amplitude;
            max_amplitude += amplitude;
            amplitude *= settings.persistence;
            frequency *= 2.0;
        }

        total / max_amplitude
    }
}

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

/// Displaces every sample of `field` by seeded fractal noise scaled to
/// `settings.amplitude`.
pub fn apply_fractal_noise(field: &mut HeightField, settings: &NoiseSettings) {
    let noise = GradientNoise::new(settings.seed);
    let width = field.width();
    let amplitude = settings.amplitude;

    field
        .data_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, value)| {
            let x = (index as u32 % width) as f32;
            let y = (index as u32 / width) as f32;
            *value += noise.fractal(x, y, settings) * amplitude;
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_field() {
        let a = GradientNoise::new(7);
        let b = GradientNoise::new(7);
        for i in 0..50 {
            let x = i as f32 * 0.37;
            let y = i as f32 * 0.91;
            assert_eq!(a.sample(x, y), b.sample(x, y));
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let a = GradientNoise::new(1);
        let b = GradientNoise::new(2);
        let diverged = (0..100).any(|i| {
            let x = i as f32 * 0.53;
            (a.sample(x, x * 0.7) - b.sample(x, x * 0.7)).abs() > 1e-4
        });
        assert!(diverged);
    }

    #[test]
    fn fractal_stays_bounded() {
        let noise = GradientNoise::new(42);
        let settings = NoiseSettings::default();
        for i in 0..200 {
            let v = noise.fractal(i as f32 * 1.3, i as f32 * 0.6, &settings);
            assert!(v.abs() <= 1.0 + 1e-4, "fractal sample {v} out of range");
        }
    }

    #[test]
    fn displacement_respects_amplitude() {
        let mut field = HeightField::new(16, 16, vec![0.0; 256]);
        let settings = NoiseSettings {
            seed: 3,
            amplitude: 5.0,
            ..Default::default()
        };
        apply_fractal_noise(&mut field, &settings);
        assert!(field.data().iter().all(|h| h.abs() <= 5.0 + 1e-3));
        assert!(field.data().iter().any(|h| h.abs() > 1e-4));
    }
}
