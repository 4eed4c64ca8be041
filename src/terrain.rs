use image::DynamicImage;
use std::path::Path;
use tracing::{info, warn};

use crate::cache::{self, CachedTerrain};
use crate::erosion;
use crate::error::{Error, Result};
use crate::heightfield::HeightField;
use crate::instancing::{GpuBufferFactory, InstanceCache, InstanceSet};
use crate::mesh::{self, TerrainMesh, TileData, TileSplitter, TriangleRecord};
use crate::noise;
use crate::placement::{self, PlacementSettings, PropKind};
use crate::progress::ProgressSink;
use crate::settings::TerrainSettings;

const GENERATION_STEPS: u32 = 9;

/// A generated terrain and everything derived from it. Feed it a height
/// source image, call [`Terrain::generate`], then scatter props and stream
/// the tiles.
#[derive(Default)]
pub struct Terrain {
    settings: TerrainSettings,
    height_source: Option<DynamicImage>,
    height_field: HeightField,
    mesh: TerrainMesh,
    triangle_records: Vec<TriangleRecord>,
    tiles: Vec<TileData>,
    instances: InstanceCache,
    area_km2: f32,
    is_generating: bool,
}

impl Terrain {
    pub fn new(settings: TerrainSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &TerrainSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut TerrainSettings {
        &mut self.settings
    }

    pub fn set_height_source(&mut self, image: DynamicImage) {
        self.height_source = Some(image);
    }

    pub fn load_height_source(&mut self, path: &Path) -> Result<()> {
        self.height_source = Some(image::open(path)?);
        Ok(())
    }

    pub fn height_field(&self) -> &HeightField {
        &self.height_field
    }

    pub fn mesh(&self) -> &TerrainMesh {
        &self.mesh
    }

    pub fn triangle_records(&self) -> &[TriangleRecord] {
        &self.triangle_records
    }

    pub fn tiles(&self) -> &[TileData] {
        &self.tiles
    }

    pub fn instances(&self) -> &InstanceCache {
        &self.instances
    }

    /// Footprint of the generated terrain in square kilometers.
    pub fn area_km2(&self) -> f32 {
        self.area_km2
    }

    /// Runs the full synthesis pipeline, or restores a previous run from
    /// the cache file when one is present and intact. A corrupt cache is
    /// logged and regenerated over; a missing one is simply not used.
    pub fn generate(
        &mut self,
        splitter: &dyn TileSplitter,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        if self.is_generating {
            warn!("terrain generation already running, ignoring request");
            return Err(Error::GenerationInProgress);
        }
        self.is_generating = true;
        let result = self.generate_inner(splitter, progress);
        self.is_generating = false;
        result
    }

    fn generate_inner(
        &mut self,
        splitter: &dyn TileSplitter,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        if self.height_source.is_none() {
            warn!("terrain has no height source image, nothing to generate");
            return Err(Error::MissingHeightSource);
        }

        if self.settings.cache_path.exists() {
            match cache::load(&self.settings.cache_path) {
                Ok(cached) => {
                    progress.begin(1);
                    self.install(cached);
                    progress.step("restored terrain from cache");
                    return Ok(());
                }
                Err(Error::CorruptCache(err)) => {
                    warn!("discarding corrupt terrain cache: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        let Some(source) = self.height_source.as_ref() else {
            return Err(Error::MissingHeightSource);
        };

        progress.begin(GENERATION_STEPS);

        progress.step("extracting heights");
        let mut field =
            HeightField::from_image(source, self.settings.min_y, self.settings.max_y);

        progress.step("smoothing");
        field.smooth(self.settings.smoothing_passes);

        progress.step("raising border");
        if let Some(border) = &self.settings.border {
            field.raise_border(border);
        }

        progress.step("densifying");
        field.densify(self.settings.density);

        progress.step("applying noise");
        noise::apply_fractal_noise(&mut field, &self.settings.noise);

        progress.step("eroding");
        erosion::erode(&mut field, &self.settings.erosion);

        progress.step("building mesh");
        let positions =
            mesh::generate_positions(&field, self.settings.density, self.settings.scale);
        let mut terrain_mesh = mesh::assemble_mesh(&positions, field.width(), field.height());
        mesh::compute_normals(&mut terrain_mesh);

        progress.step("indexing triangles");
        let triangle_records = mesh::build_triangle_index(&terrain_mesh);

        progress.step("splitting tiles");
        let tiles = splitter.split(&terrain_mesh, self.settings.tile_axis);

        let cached = CachedTerrain {
            height_field: field,
            mesh: terrain_mesh,
            triangle_records,
            tiles,
        };
        cache::save(&self.settings.cache_path, &cached)?;
        self.install(cached);

        info!(
            "generated terrain: {} tiles over {:.2} km2",
            self.tiles.len(),
            self.area_km2
        );
        Ok(())
    }

    fn install(&mut self, cached: CachedTerrain) {
        let spacing = self.settings.scale as f32 / self.settings.density.max(1) as f32;
        let span_x = (cached.mesh.width.saturating_sub(1)) as f32 * spacing;
        let span_z = (cached.mesh.height.saturating_sub(1)) as f32 * spacing;
        self.area_km2 = span_x * span_z / 1.0e6;

        self.height_field = cached.height_field;
        self.mesh = cached.mesh;
        self.triangle_records = cached.triangle_records;
        self.tiles = cached.tiles;
    }

    /// Scatters `count` instances of a built-in prop archetype and uploads
    /// them through `factory`, reusing a cached buffer when the scatter
    /// comes out identical.
    pub fn place_props(
        &mut self,
        kind: PropKind,
        count: u32,
        seed: u64,
        factory: &mut dyn GpuBufferFactory,
    ) -> (String, &InstanceSet) {
        let settings = kind.placement_settings(seed);
        self.place_with(&format!("{kind:?}").to_lowercase(), count, &settings, factory)
    }

    /// Same as [`Terrain::place_props`] but with caller-tuned constraints
    /// and owner name.
    pub fn place_with(
        &mut self,
        owner: &str,
        count: u32,
        settings: &PlacementSettings,
        factory: &mut dyn GpuBufferFactory,
    ) -> (String, &InstanceSet) {
        let transforms = placement::find_transforms(&self.triangle_records, count, settings);
        self.instances.get_or_create(owner, &transforms, factory)
    }

    /// Drops all generated data and placed instances. Settings and the
    /// height source stay, so the terrain can be generated again.
    pub fn clear(&mut self) {
        self.height_field = HeightField::default();
        self.mesh = TerrainMesh::default();
        self.triangle_records.clear();
        self.tiles.clear();
        self.instances.clear();
        self.area_km2 = 0.0;
        info!("cleared terrain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instancing::NullGpuBufferFactory;
    use crate::mesh::GridTileSplitter;
    use crate::progress::NullProgress;
    use crate::settings::{ErosionSettings, NoiseSettings};
    use image::{DynamicImage, GrayImage, Luma};

    fn test_settings(dir: &Path) -> TerrainSettings {
        TerrainSettings {
            min_y: 0.0,
            max_y: 50.0,
            smoothing_passes: 1,
            border: None,
            density: 2,
            scale: 2,
            tile_axis: 2,
            cache_path: dir.join("terrain.bin"),
            noise: NoiseSettings {
                seed: 1,
                ..Default::default()
            },
            erosion: ErosionSettings {
                seed: 1,
                iterations: 2_000,
                wind_interval: 1_000,
                ..Default::default()
            },
        }
    }

    fn gradient_image(size: u32) -> DynamicImage {
        let mut image = GrayImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                image.put_pixel(x, y, Luma([((x + y) * 255 / (2 * size - 2)) as u8]));
            }
        }
        DynamicImage::ImageLuma8(image)
    }

    #[test]
    fn generate_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut terrain = Terrain::new(test_settings(dir.path()));
        let result = terrain.generate(&GridTileSplitter, &mut NullProgress);
        assert!(matches!(result, Err(Error::MissingHeightSource)));
    }

    #[test]
    fn generate_produces_full_pipeline_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut terrain = Terrain::new(test_settings(dir.path()));
        terrain.set_height_source(gradient_image(16));
        terrain.generate(&GridTileSplitter, &mut NullProgress).unwrap();

        assert_eq!(terrain.height_field().width(), 31);
        assert!(!terrain.mesh().vertices.is_empty());
        assert_eq!(
            terrain.triangle_records().len(),
            terrain.mesh().indices.len() / 3
        );
        assert_eq!(terrain.tiles().len(), 4);
        assert!(terrain.area_km2() > 0.0);
        assert!(terrain.settings().cache_path.exists());
    }

    #[test]
    fn second_generate_restores_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut terrain = Terrain::new(test_settings(dir.path()));
        terrain.set_height_source(gradient_image(12));
        terrain.generate(&GridTileSplitter, &mut NullProgress).unwrap();
        let heights = terrain.height_field().data().to_vec();

        let mut restored = Terrain::new(test_settings(dir.path()));
        restored.set_height_source(gradient_image(12));
        restored.generate(&GridTileSplitter, &mut NullProgress).unwrap();
        assert_eq!(restored.height_field().data(), &heights[..]);
    }

    #[test]
    fn intact_cache_does_not_excuse_a_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut terrain = Terrain::new(test_settings(dir.path()));
        terrain.set_height_source(gradient_image(12));
        terrain.generate(&GridTileSplitter, &mut NullProgress).unwrap();

        let mut sourceless = Terrain::new(test_settings(dir.path()));
        let result = sourceless.generate(&GridTileSplitter, &mut NullProgress);
        assert!(matches!(result, Err(Error::MissingHeightSource)));
        assert!(sourceless.tiles().is_empty());
    }

    #[test]
    fn props_land_on_generated_terrain() {
        let dir = tempfile::tempdir().unwrap();
        let mut terrain = Terrain::new(test_settings(dir.path()));
        terrain.set_height_source(gradient_image(16));
        terrain.generate(&GridTileSplitter, &mut NullProgress).unwrap();

        let mut factory = NullGpuBufferFactory::default();
        let (key, set) = terrain.place_props(PropKind::Grass, 50, 7, &mut factory);
        assert!(key.starts_with("grass:"));
        assert_eq!(set.transforms.len(), 50);
    }

    #[test]
    fn clear_resets_generated_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut terrain = Terrain::new(test_settings(dir.path()));
        terrain.set_height_source(gradient_image(12));
        terrain.generate(&GridTileSplitter, &mut NullProgress).unwrap();

        terrain.clear();
        assert!(terrain.tiles().is_empty());
        assert!(terrain.triangle_records().is_empty());
        assert_eq!(terrain.area_km2(), 0.0);
    }
}
