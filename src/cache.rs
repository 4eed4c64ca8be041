use glam::Vec3;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

use crate::error::{CorruptCacheError, Error, Result};
use crate::heightfield::HeightField;
use crate::mesh::{TerrainMesh, TileData, TriangleRecord, Vertex};

/// Upper bound on the tile count a cache file may claim. Anything larger is
/// a corrupt or hostile file, not a real terrain.
pub const MAX_TILE_COUNT: u32 = 10_000;

const HEADER_WORDS: usize = 8;

/// Everything `generate` produces, in the shape the cache persists.
#[derive(Debug, Clone, Default)]
pub struct CachedTerrain {
    pub height_field: HeightField,
    pub mesh: TerrainMesh,
    pub triangle_records: Vec<TriangleRecord>,
    pub tiles: Vec<TileData>,
}

/// Writes the terrain to `path`. Layout: an 8-word header, then the flat
/// arrays (heights, vertices, indices, triangle records, tile offsets),
/// then per-tile counted vertex/index blocks, all little-endian.
pub fn save(path: &Path, terrain: &CachedTerrain) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    let header: [u32; HEADER_WORDS] = [
        terrain.height_field.width(),
        terrain.height_field.height(),
        terrain.height_field.data().len() as u32,
        terrain.mesh.vertices.len() as u32,
        terrain.mesh.indices.len() as u32,
        terrain.tiles.len() as u32,
        terrain.triangle_records.len() as u32,
        terrain.tiles.len() as u32,
    ];
    writer.write_all(bytemuck::cast_slice(&header))?;

    writer.write_all(bytemuck::cast_slice(terrain.height_field.data()))?;
    writer.write_all(bytemuck::cast_slice(&terrain.mesh.vertices))?;
    writer.write_all(bytemuck::cast_slice(&terrain.mesh.indices))?;
    writer.write_all(bytemuck::cast_slice(&terrain.triangle_records))?;

    let offsets: Vec<[f32; 3]> = terrain.tiles.iter().map(|t| t.offset.to_array()).collect();
    writer.write_all(bytemuck::cast_slice(&offsets))?;

    for tile in &terrain.tiles {
        let counts = [tile.vertices.len() as u32, tile.indices.len() as u32];
        writer.write_all(bytemuck::cast_slice(&counts))?;
        writer.write_all(bytemuck::cast_slice(&tile.vertices))?;
        writer.write_all(bytemuck::cast_slice(&tile.indices))?;
    }

    writer.flush()?;
    info!("saved terrain cache to {}", path.display());
    Ok(())
}

/// Reads a terrain back from `path`. The whole file is parsed and validated
/// before anything is returned, so a truncated or inconsistent file yields
/// `Error::CorruptCache` and no partial state.
pub fn load(path: &Path) -> Result<CachedTerrain> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mut cursor = Cursor::new(path, &bytes);

    let header: Vec<u32> = cursor.take_pod(HEADER_WORDS)?;
    let &[width, height, height_count, vertex_count, index_count, tile_count, record_count, offset_count] =
        header.as_slice()
    else {
        return Err(cursor.corrupt("short header"));
    };

    if tile_count > MAX_TILE_COUNT {
        return Err(cursor.corrupt(format!("implausible tile count {tile_count}")));
    }
    if offset_count != tile_count {
        return Err(cursor.corrupt("tile offset count does not match tile count"));
    }
    if height_count != width * height {
        return Err(cursor.corrupt("height count does not match dimensions"));
    }
    if index_count % 3 != 0 {
        return Err(cursor.corrupt("index count is not a multiple of 3"));
    }

    let heights: Vec<f32> = cursor.take_pod(height_count as usize)?;
    let vertices: Vec<Vertex> = cursor.take_pod(vertex_count as usize)?;
    let indices: Vec<u32> = cursor.take_pod(index_count as usize)?;
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(cursor.corrupt(format!("index {bad} out of range")));
    }
    let triangle_records: Vec<TriangleRecord> = cursor.take_pod(record_count as usize)?;
    let offsets: Vec<[f32; 3]> = cursor.take_pod(tile_count as usize)?;

    let mut tiles = Vec::with_capacity(tile_count as usize);
    for offset in offsets {
        let counts: Vec<u32> = cursor.take_pod(2)?;
        let tile_vertices: Vec<Vertex> = cursor.take_pod(counts[0] as usize)?;
        let tile_indices: Vec<u32> = cursor.take_pod(counts[1] as usize)?;
        if let Some(&bad) = tile_indices.iter().find(|&&i| i as usize >= tile_vertices.len()) {
            return Err(cursor.corrupt(format!("tile index {bad} out of range")));
        }
        tiles.push(TileData {
            vertices: tile_vertices,
            indices: tile_indices,
            offset: Vec3::from_array(offset),
        });
    }

    if !cursor.is_empty() {
        return Err(cursor.corrupt("trailing bytes after tile data"));
    }

    info!("loaded terrain cache from {}", path.display());
    Ok(CachedTerrain {
        height_field: HeightField::new(width, height, heights),
        mesh: TerrainMesh {
            vertices,
            indices,
            width,
            height,
        },
        triangle_records,
        tiles,
    })
}

/// Byte reader over the cache file that turns every underflow into a
/// `CorruptCache` error naming the file.
struct Cursor<'a> {
    path: &'a Path,
    remaining: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(path: &'a Path, bytes: &'a [u8]) -> Self {
        Self {
            path,
            remaining: bytes,
        }
    }

    fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::CorruptCache(CorruptCacheError {
            path: self.path.to_path_buf(),
            reason: reason.into(),
        })
    }

    /// Pops `count` items off the front. Copying through
    /// `pod_collect_to_vec` sidesteps the alignment of the source buffer.
    fn take_pod<T: bytemuck::Pod>(&mut self, count: usize) -> Result<Vec<T>> {
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| self.corrupt("count overflow"))?;
        if bytes > self.remaining.len() {
            return Err(self.corrupt(format!(
                "needed {bytes} bytes, {} left",
                self.remaining.len()
            )));
        }
        let (head, tail) = self.remaining.split_at(bytes);
        self.remaining = tail;
        Ok(bytemuck::pod_collect_to_vec(head))
    }
}
