use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::error::Result;

/// Configuration for the whole terrain pipeline.
///
/// Defaults reproduce a harsh alpine map: sea level at y=0, snow starting
/// around y=400, a raised border so nothing walks off the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainSettings {
    /// Height the darkest source pixel maps to.
    pub min_y: f32,
    /// Height the brightest source pixel maps to.
    pub max_y: f32,
    /// Smoothing passes applied to the raw height map.
    pub smoothing_passes: u32,
    /// Optional raised border around the map.
    pub border: Option<BorderSettings>,
    /// Upsampling factor for the height grid; more positions, more triangles.
    pub density: u32,
    /// Physical scale of the mesh; affects terrain size, not sample density.
    pub scale: u32,
    /// Number of tiles per dimension the mesh is split into for streaming.
    pub tile_axis: u32,
    /// Where the generated terrain is cached between runs.
    pub cache_path: PathBuf,
    pub noise: NoiseSettings,
    pub erosion: ErosionSettings,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        let scale = 6;
        Self {
            min_y: 0.0,
            max_y: 200.0,
            smoothing_passes: 1,
            border: Some(BorderSettings::default()),
            density: 3,
            scale,
            tile_axis: 8 * scale,
            cache_path: PathBuf::from("terrain_cache.bin"),
            noise: NoiseSettings::default(),
            erosion: ErosionSettings::default(),
        }
    }
}

impl TerrainSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Raised-edge shaping: a flat plateau at `height` near the map border,
/// blending down to the untouched interior over `blend_width` samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BorderSettings {
    pub plateau_width: u32,
    pub blend_width: u32,
    pub height: f32,
}

impl Default for BorderSettings {
    fn default() -> Self {
        Self {
            plateau_width: 25,
            blend_width: 20,
            height: 280.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoiseSettings {
    pub seed: u64,
    pub amplitude: f32,
    pub frequency: f32,
    pub octaves: u32,
    pub persistence: f32,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            amplitude: 5.0,
            frequency: 0.01,
            octaves: 4,
            persistence: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ErosionSettings {
    pub seed: u64,
    /// Number of simulated droplets.
    pub iterations: u32,
    /// A wind smoothing pass runs after this many droplets.
    pub wind_interval: u32,
    pub wind_strength: f32,
    pub inertia: f32,
    pub sediment_capacity: f32,
    pub erode_speed: f32,
    pub deposit_speed: f32,
    pub evaporate_speed: f32,
    pub max_steps: u32,
    pub min_slope: f32,
    /// Hard clamp on how far any cell may move from its pre-erosion height.
    pub max_height_delta: f32,
}

impl Default for ErosionSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            iterations: 1_000_000,
            wind_interval: 150_000,
            wind_strength: 0.3,
            inertia: 0.02,
            sediment_capacity: 0.5,
            erode_speed: 0.4,
            deposit_speed: 0.5,
            evaporate_speed: 0.01,
            max_steps: 75,
            min_slope: 0.08,
            max_height_delta: 3.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_json_roundtrip() {
        let settings = TerrainSettings {
            density: 2,
            tile_axis: 4,
            ..Default::default()
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        settings.save(&path).unwrap();

        let loaded = TerrainSettings::load(&path).unwrap();
        assert_eq!(loaded.density, 2);
        assert_eq!(loaded.tile_axis, 4);
        assert_eq!(loaded.erosion.max_height_delta, settings.erosion.max_height_delta);
    }
}
