use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};
use rayon::prelude::*;
use tracing::info;

use crate::heightfield::HeightField;

/// GPU-layout terrain vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

/// Indexed triangle mesh over the full terrain, with the vertex grid
/// dimensions kept around for tiling and normal reconstruction.
#[derive(Debug, Clone, Default)]
pub struct TerrainMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub width: u32,
    pub height: u32,
}

/// Per-triangle record used for prop placement: enough geometry to sample a
/// point on the triangle and orient a prop without touching the mesh again.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TriangleRecord {
    pub normal: Vec3,
    pub v0: Vec3,
    pub edge1: Vec3,
    pub edge2: Vec3,
    pub slope_radians: f32,
    pub height_min: f32,
    pub height_max: f32,
    /// `Quat` carrying +Y onto the face normal, stored as xyzw to keep the
    /// record tightly packed.
    pub rotation_to_normal: [f32; 4],
}

impl TriangleRecord {
    pub fn surface_rotation(&self) -> Quat {
        Quat::from_array(self.rotation_to_normal)
    }
}

/// One streaming tile: a self-contained vertex/index pair with vertices
/// rebased around `offset`, the tile's center in world space.
#[derive(Debug, Clone, Default)]
pub struct TileData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub offset: Vec3,
}

/// Lifts height samples into world-space positions centered on the origin.
/// `density` is the upsampling factor already applied to the field, so the
/// physical footprint stays that of the base grid times `scale`.
pub fn generate_positions(field: &HeightField, density: u32, scale: u32) -> Vec<Vec3> {
    let width = field.width();
    let height = field.height();
    let spacing = scale as f32 / density.max(1) as f32;
    let half_x = (width - 1) as f32 * spacing * 0.5;
    let half_z = (height - 1) as f32 * spacing * 0.5;

    field
        .data()
        .par_iter()
        .enumerate()
        .map(|(index, &y)| {
            let gx = (index as u32 % width) as f32;
            let gz = (index as u32 / width) as f32;
            Vec3::new(gx * spacing - half_x, y, gz * spacing - half_z)
        })
        .collect()
}

/// Builds the indexed mesh for a `width` x `height` vertex grid. Two
/// triangles per quad, counter-clockwise when seen from above.
pub fn assemble_mesh(positions: &[Vec3], width: u32, height: u32) -> TerrainMesh {
    let w = width as usize;
    let h = height as usize;
    debug_assert_eq!(positions.len(), w * h);

    let mut vertices = vec![Vertex::zeroed(); w * h];
    vertices
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, vertex)| {
            let x = index % w;
            let y = index / w;
            vertex.position = positions[index].to_array();
            vertex.uv = [x as f32 / (w - 1) as f32, y as f32 / (h - 1) as f32];
        });

    let quads_x = w - 1;
    let quads_y = h - 1;
    let mut indices = vec![0u32; quads_x * quads_y * 6];
    indices
        .par_chunks_mut(6)
        .enumerate()
        .for_each(|(quad, slot)| {
            let qx = quad % quads_x;
            let qy = quad / quads_x;
            let top_left = (qy * w + qx) as u32;
            let top_right = top_left + 1;
            let bottom_left = top_left + w as u32;
            let bottom_right = bottom_left + 1;
            slot.copy_from_slice(&[
                bottom_right,
                top_left,
                bottom_left,
                bottom_right,
                top_right,
                top_left,
            ]);
        });

    info!(
        "assembled mesh: {} vertices, {} triangles",
        vertices.len(),
        indices.len() / 3
    );
    TerrainMesh {
        vertices,
        indices,
        width,
        height,
    }
}

/// Fills vertex normals and tangents from height differences across the
/// grid. Central differences inside, one-sided at the borders. Tangents
/// follow grid +X, re-orthogonalized against the normal.
pub fn compute_normals(mesh: &mut TerrainMesh) {
    let w = mesh.width as usize;
    let h = mesh.height as usize;
    let positions: Vec<Vec3> = mesh
        .vertices
        .iter()
        .map(|v| Vec3::from_array(v.position))
        .collect();

    mesh.vertices
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, vertex)| {
            let x = index % w;
            let y = index / w;
            let left = positions[y * w + x.saturating_sub(1)];
            let right = positions[y * w + (x + 1).min(w - 1)];
            let up = positions[y.saturating_sub(1) * w + x];
            let down = positions[(y + 1).min(h - 1) * w + x];

            let dx = right - left;
            let dz = down - up;
            let normal = dz.cross(dx).normalize_or_zero();
            let normal = if normal == Vec3::ZERO { Vec3::Y } else { normal };
            let tangent = (dx - normal * normal.dot(dx)).normalize_or_zero();
            let tangent = if tangent == Vec3::ZERO { Vec3::X } else { tangent };

            vertex.normal = normal.to_array();
            vertex.tangent = tangent.to_array();
        });
}

/// Precomputes one record per triangle: face normal, edges for barycentric
/// sampling, slope and height extents for placement filters, and the
/// rotation carrying +Y onto the face normal.
pub fn build_triangle_index(mesh: &TerrainMesh) -> Vec<TriangleRecord> {
    mesh.indices
        .par_chunks_exact(3)
        .map(|tri| {
            let a = Vec3::from_array(mesh.vertices[tri[0] as usize].position);
            let b = Vec3::from_array(mesh.vertices[tri[1] as usize].position);
            let c = Vec3::from_array(mesh.vertices[tri[2] as usize].position);

            let edge1 = b - a;
            let edge2 = c - a;
            let normal = edge1.cross(edge2).normalize_or_zero();
            let normal = if normal == Vec3::ZERO { Vec3::Y } else { normal };
            let slope_radians = normal.dot(Vec3::Y).clamp(-1.0, 1.0).acos();

            TriangleRecord {
                normal,
                v0: a,
                edge1,
                edge2,
                slope_radians,
                height_min: a.y.min(b.y).min(c.y),
                height_max: a.y.max(b.y).max(c.y),
                rotation_to_normal: Quat::from_rotation_arc(Vec3::Y, normal).to_array(),
            }
        })
        .collect()
}

/// Strategy for cutting the full mesh into streamable tiles.
pub trait TileSplitter {
    fn split(&self, mesh: &TerrainMesh, tile_axis: u32) -> Vec<TileData>;
}

/// Cuts the vertex grid into a `tile_axis` x `tile_axis` array of tiles.
/// Neighboring tiles duplicate their shared boundary row and column so each
/// tile renders seamlessly on its own.
#[derive(Debug, Default)]
pub struct GridTileSplitter;

impl TileSplitter for GridTileSplitter {
    fn split(&self, mesh: &TerrainMesh, tile_axis: u32) -> Vec<TileData> {
        let w = mesh.width as usize;
        let h = mesh.height as usize;
        let axis = tile_axis.max(1) as usize;
        let quads_x = w - 1;
        let quads_y = h - 1;
        let axis = axis.min(quads_x).min(quads_y);

        (0..axis * axis)
            .into_par_iter()
            .map(|tile| {
                let tx = tile % axis;
                let ty = tile / axis;
                // Quad ranges; the last tile along each axis absorbs the
                // remainder when the grid does not divide evenly.
                let qx0 = tx * quads_x / axis;
                let qx1 = (tx + 1) * quads_x / axis;
                let qy0 = ty * quads_y / axis;
                let qy1 = (ty + 1) * quads_y / axis;
                let tile_w = qx1 - qx0 + 1;
                let tile_h = qy1 - qy0 + 1;

                let mut vertices = Vec::with_capacity(tile_w * tile_h);
                let mut min = Vec3::splat(f32::MAX);
                let mut max = Vec3::splat(f32::MIN);
                for y in qy0..=qy1 {
                    for x in qx0..=qx1 {
                        let vertex = mesh.vertices[y * w + x];
                        let p = Vec3::from_array(vertex.position);
                        min = min.min(p);
                        max = max.max(p);
                        vertices.push(vertex);
                    }
                }
                let offset = (min + max) * 0.5;
                for vertex in &mut vertices {
                    vertex.position = (Vec3::from_array(vertex.position) - offset).to_array();
                }

                let mut indices = Vec::with_capacity((tile_w - 1) * (tile_h - 1) * 6);
                for qy in 0..tile_h - 1 {
                    for qx in 0..tile_w - 1 {
                        let top_left = (qy * tile_w + qx) as u32;
                        let top_right = top_left + 1;
                        let bottom_left = top_left + tile_w as u32;
                        let bottom_right = bottom_left + 1;
                        indices.extend_from_slice(&[
                            bottom_right,
                            top_left,
                            bottom_left,
                            bottom_right,
                            top_right,
                            top_left,
                        ]);
                    }
                }

                TileData {
                    vertices,
                    indices,
                    offset,
                }
            })
            .collect()
    }
}
