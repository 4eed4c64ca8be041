//! Procedural terrain synthesis and instancing.
//!
//! The pipeline takes a grayscale height source image through smoothing,
//! densification, gradient noise and hydraulic erosion, then assembles an
//! indexed mesh, splits it into streaming tiles and scatters prop instances
//! over the result. Generated terrains persist to a binary cache so repeat
//! runs skip the simulation entirely.

pub mod cache;
pub mod erosion;
pub mod error;
pub mod heightfield;
pub mod instancing;
pub mod mesh;
pub mod noise;
pub mod placement;
pub mod progress;
pub mod settings;
pub mod terrain;
pub mod visibility;

pub use error::{Error, Result};
pub use heightfield::HeightField;
pub use instancing::{BufferHandle, GpuBufferFactory, InstanceCache, InstanceSet, NullGpuBufferFactory};
pub use mesh::{GridTileSplitter, TerrainMesh, TileData, TileSplitter, TriangleRecord, Vertex};
pub use placement::{PlacementSettings, PropKind};
pub use progress::{LogProgress, NullProgress, ProgressSink};
pub use settings::{BorderSettings, ErosionSettings, NoiseSettings, TerrainSettings};
pub use terrain::Terrain;
pub use visibility::{BoundingBox, CameraState, Frustum, VisibilityState};

use tracing::Level;

/// Installs a global stdout log subscriber. Call once at startup; later
/// calls are ignored so tests can share a process.
pub fn init_logging() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
