use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::Mutex;
use tracing::info;

use crate::heightfield::HeightField;
use crate::settings::ErosionSettings;

const GRAVITY: f32 = 4.0;

// 3x3 Gaussian weights for the wind pass, center last.
const WIND_KERNEL: [f32; 9] = [
    0.0625, 0.125, 0.0625, //
    0.125, 0.25, 0.125, //
    0.0625, 0.125, 0.0625,
];

/// Hydraulic erosion: rains droplets onto the field, each one rolling
/// downhill, picking up and depositing sediment. Every `wind_interval`
/// droplets a wind pass smears exposed ridges with a Gaussian blur.
pub fn erode(field: &mut HeightField, settings: &ErosionSettings) {
    let width = field.width() as usize;
    let height = field.height() as usize;
    if width < 4 || height < 4 || settings.iterations == 0 {
        return;
    }

    let original = field.data().to_vec();
    let heights = Mutex::new(field.data().to_vec());

    // Droplets run in seeded batches; a wind pass separates batches so the
    // cadence matches a serial run of the same iteration count.
    let batch = settings.wind_interval.max(1);
    let mut simulated = 0u32;
    while simulated < settings.iterations {
        let count = batch.min(settings.iterations - simulated);
        let range_start = simulated;

        const DROPLETS_PER_TASK: u32 = 1024;
        let tasks = (count + DROPLETS_PER_TASK - 1) / DROPLETS_PER_TASK;
        (0..tasks).into_par_iter().for_each(|task| {
            let first = range_start + task * DROPLETS_PER_TASK;
            let last = (first + DROPLETS_PER_TASK).min(range_start + count);
            let mut rng = ChaCha8Rng::seed_from_u64(settings.seed ^ first as u64);
            for _ in first..last {
                simulate_droplet(&heights, &original, width, height, settings, &mut rng);
            }
        });

        simulated += count;
        if simulated < settings.iterations {
            let mut guard = match heights.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            wind_pass(&mut guard, width, height, settings.wind_strength);
        }
    }

    let eroded = match heights.into_inner() {
        Ok(data) => data,
        Err(poisoned) => poisoned.into_inner(),
    };
    *field = HeightField::new(width as u32, height as u32, eroded);
    info!("eroded height field with {} droplets", settings.iterations);
}

fn simulate_droplet(
    heights: &Mutex<Vec<f32>>,
    original: &[f32],
    width: usize,
    height: usize,
    settings: &ErosionSettings,
    rng: &mut ChaCha8Rng,
) {
    let mut pos_x = rng.gen_range(1.0..(width - 2) as f32);
    let mut pos_y = rng.gen_range(1.0..(height - 2) as f32);
    let mut dir_x = rng.gen_range(-0.2..0.2f32);
    let mut dir_y = rng.gen_range(-0.2..0.2f32);
    let mut speed = 1.0f32;
    let mut water = rng.gen_range(1.2..2.0f32);
    let mut sediment = 0.0f32;
    let capacity_factor = rng.gen_range(0.3..0.7f32);

    for _ in 0..settings.max_steps {
        let cell_x = pos_x as usize;
        let cell_y = pos_y as usize;
        let fx = pos_x - cell_x as f32;
        let fy = pos_y - cell_y as f32;

        let mut guard = match heights.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let (height_old, grad_x, grad_y) =
            sample_height_and_gradient(&guard, width, cell_x, cell_y, fx, fy);

        // Blend the downhill gradient into the travel direction.
        dir_x = dir_x * settings.inertia - grad_x * (1.0 - settings.inertia);
        dir_y = dir_y * settings.inertia - grad_y * (1.0 - settings.inertia);
        let len = (dir_x * dir_x + dir_y * dir_y).sqrt();
        if len < 1e-6 {
            break;
        }
        dir_x /= len;
        dir_y /= len;

        pos_x += dir_x;
        pos_y += dir_y;
        if pos_x < 1.0 || pos_x >= (width - 2) as f32 || pos_y < 1.0 || pos_y >= (height - 2) as f32
        {
            break;
        }

        let new_cell_x = pos_x as usize;
        let new_cell_y = pos_y as usize;
        let height_new = sample_height_and_gradient(
            &guard,
            width,
            new_cell_x,
            new_cell_y,
            pos_x - new_cell_x as f32,
            pos_y - new_cell_y as f32,
        )
        .0;
        let delta = height_new - height_old;

        let capacity = ((-delta).max(settings.min_slope)
            * speed
            * water
            * settings.sediment_capacity
            * capacity_factor)
            .max(0.01);

        if sediment > capacity {
            // Over capacity: drop a fraction of the excess at the old cell.
            let amount = (sediment - capacity) * settings.deposit_speed;
            sediment -= amount;
            deposit(&mut guard, original, width, cell_x, cell_y, fx, fy, amount, settings);
        } else {
            // Pick up sediment, never more than the terrain underneath.
            let amount = ((capacity - sediment) * settings.erode_speed).min(height_old);
            sediment += amount;
            deposit(&mut guard, original, width, cell_x, cell_y, fx, fy, -amount, settings);
        }
        drop(guard);

        // Downhill motion gains speed, uphill loses it.
        speed = (speed * speed - delta * GRAVITY).max(0.0).sqrt();
        water *= 1.0 - settings.evaporate_speed;
        if water < 1e-3 || speed < 1e-3 {
            break;
        }
    }
}

/// Bilinear height plus the analytic gradient of the bilinear patch at the
/// droplet's position within cell (x, y).
fn sample_height_and_gradient(
    heights: &[f32],
    width: usize,
    x: usize,
    y: usize,
    fx: f32,
    fy: f32,
) -> (f32, f32, f32) {
    let i = y * width + x;
    let h00 = heights[i];
    let h10 = heights[i + 1];
    let h01 = heights[i + width];
    let h11 = heights[i + width + 1];

    let grad_x = (h10 - h00) * (1.0 - fy) + (h11 - h01) * fy;
    let grad_y = (h01 - h00) * (1.0 - fx) + (h11 - h10) * fx;
    let h = h00 * (1.0 - fx) * (1.0 - fy) + h10 * fx * (1.0 - fy) + h01 * (1.0 - fx) * fy
        + h11 * fx * fy;
    (h, grad_x, grad_y)
}

/// Distributes `amount` (negative to erode) over the four corners of the
/// droplet's cell, bilinearly weighted, then clamps each touched sample to
/// its pre-erosion height plus or minus `max_height_delta`.
#[allow(clippy::too_many_arguments)]
fn deposit(
    heights: &mut [f32],
    original: &[f32],
    width: usize,
    x: usize,
    y: usize,
    fx: f32,
    fy: f32,
    amount: f32,
    settings: &ErosionSettings,
) {
    let weights = [
        (y * width + x, (1.0 - fx) * (1.0 - fy)),
        (y * width + x + 1, fx * (1.0 - fy)),
        ((y + 1) * width + x, (1.0 - fx) * fy),
        ((y + 1) * width + x + 1, fx * fy),
    ];
    for (index, weight) in weights {
        let limit = settings.max_height_delta;
        let next = heights[index] + amount * weight;
        heights[index] = next.clamp(original[index] - limit, original[index] + limit);
    }
}

/// One Gaussian smoothing pass over the interior, blended by `strength`.
fn wind_pass(heights: &mut [f32], width: usize, height: usize, strength: f32) {
    let snapshot = heights.to_vec();
    heights
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, value)| {
            let x = index % width;
            let y = index / width;
            if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                return;
            }
            let mut blurred = 0.0;
            let mut k = 0;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let n = (y as i64 + dy) as usize * width + (x as i64 + dx) as usize;
                    blurred += snapshot[n] * WIND_KERNEL[k];
                    k += 1;
                }
            }
            *value += (blurred - *value) * strength;
        });
}
