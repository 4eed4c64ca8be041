use glam::{Mat4, Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mesh::TriangleRecord;

/// Water line of the generated maps.
pub const LEVEL_SEA: f32 = 0.0;
/// Height where snow takes over.
pub const LEVEL_SNOW: f32 = 400.0;

/// Constraints for scattering one kind of prop across the terrain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlacementSettings {
    pub seed: u64,
    /// Triangles steeper than this are rejected.
    pub max_slope_radians: f32,
    /// Triangles entirely below this height are rejected.
    pub height_min: f32,
    /// Triangles reaching above this height are rejected.
    pub height_max: f32,
    /// Random slack added to the height bounds per triangle, so tree lines
    /// and shore lines come out ragged instead of razor sharp.
    pub height_jitter: f32,
    /// Tilt instances onto the surface normal instead of keeping them
    /// upright.
    pub rotate_to_surface_normal: bool,
    /// Vertical offset applied after placement, e.g. to sink trunks.
    pub offset_y: f32,
    pub scale_min: f32,
    pub scale_max: f32,
    /// Shrink instances toward `scale_min` on steep ground.
    pub scale_by_slope: bool,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            max_slope_radians: f32::to_radians(45.0),
            height_min: f32::MIN,
            height_max: f32::MAX,
            height_jitter: 0.0,
            rotate_to_surface_normal: false,
            offset_y: 0.0,
            scale_min: 1.0,
            scale_max: 1.0,
            scale_by_slope: false,
        }
    }
}

/// Built-in prop archetypes with tuned placement constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropKind {
    Tree,
    Grass,
    Rock,
}

impl PropKind {
    pub fn placement_settings(self, seed: u64) -> PlacementSettings {
        match self {
            PropKind::Tree => PlacementSettings {
                seed,
                max_slope_radians: f32::to_radians(30.0),
                height_min: LEVEL_SEA + 5.0,
                height_max: LEVEL_SNOW + 20.0,
                scale_min: 0.8,
                scale_max: 1.5,
                ..Default::default()
            },
            PropKind::Grass => PlacementSettings {
                seed,
                max_slope_radians: f32::to_radians(45.0),
                height_min: LEVEL_SEA + 5.0,
                height_max: LEVEL_SNOW,
                height_jitter: 5.0,
                rotate_to_surface_normal: true,
                scale_min: 1.0,
                scale_max: 1.5,
                ..Default::default()
            },
            PropKind::Rock => PlacementSettings {
                seed,
                max_slope_radians: f32::to_radians(60.0),
                height_min: LEVEL_SEA - 10.0,
                rotate_to_surface_normal: true,
                scale_min: 0.1,
                scale_max: 1.5,
                scale_by_slope: true,
                ..Default::default()
            },
        }
    }
}

/// Scatters up to `count` instances over the triangles that satisfy
/// `settings`, returning one world transform per instance. With no
/// acceptable triangles the result is empty.
pub fn find_transforms(
    records: &[TriangleRecord],
    count: u32,
    settings: &PlacementSettings,
) -> Vec<Mat4> {
    let mut filter_rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let mut jitter = 0.0f32;
    let mut acceptable: Vec<&TriangleRecord> = Vec::new();
    for record in records {
        if record.slope_radians > settings.max_slope_radians {
            continue;
        }
        // Jitter only widens the band, and a fresh value is rolled on each
        // acceptance so band edges come out ragged.
        if record.height_min >= settings.height_min - jitter
            && record.height_max <= settings.height_max + jitter
        {
            acceptable.push(record);
            if settings.height_jitter > 0.0 {
                jitter = filter_rng.gen_range(0.0..settings.height_jitter);
            }
        }
    }

    if acceptable.is_empty() {
        warn!("no acceptable triangles for placement, skipping {} instances", count);
        return Vec::new();
    }

    (0..count as u64)
        .into_par_iter()
        .map(|instance| {
            let mut rng = ChaCha8Rng::seed_from_u64(settings.seed ^ (instance + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15));
            let record = acceptable[rng.gen_range(0..acceptable.len())];

            // Square-root barycentrics give a uniform point on the triangle.
            let r1: f32 = rng.gen();
            let r2: f32 = rng.gen();
            let u = 1.0 - r1.sqrt();
            let v = r2 * r1.sqrt();
            let mut position = record.v0 + record.edge1 * u + record.edge2 * v;
            position.y += settings.offset_y;

            let yaw = Quat::from_rotation_y(rng.gen::<f32>() * std::f32::consts::TAU);
            let rotation = if settings.rotate_to_surface_normal {
                record.surface_rotation() * yaw
            } else {
                yaw
            };

            // Flatter ground carries the larger scale when slope drives it.
            let scale = if settings.scale_by_slope && settings.max_slope_radians > 0.0 {
                let t = (record.slope_radians / settings.max_slope_radians).clamp(0.0, 1.0);
                settings.scale_max + (settings.scale_min - settings.scale_max) * t
            } else {
                rng.gen_range(settings.scale_min..=settings.scale_max)
            };

            Mat4::from_scale_rotation_translation(Vec3::splat(scale), rotation, position)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::HeightField;
    use crate::mesh::{assemble_mesh, build_triangle_index, generate_positions};

    fn flat_records(size: u32, height: f32) -> Vec<TriangleRecord> {
        let field = HeightField::new(size, size, vec![height; (size * size) as usize]);
        let positions = generate_positions(&field, 1, 1);
        let mesh = assemble_mesh(&positions, size, size);
        build_triangle_index(&mesh)
    }

    #[test]
    fn places_requested_count_on_flat_ground() {
        let records = flat_records(8, 10.0);
        let settings = PropKind::Tree.placement_settings(1);
        let transforms = find_transforms(&records, 64, &settings);
        assert_eq!(transforms.len(), 64);
    }

    #[test]
    fn instances_stay_inside_terrain_bounds() {
        let records = flat_records(8, 10.0);
        let settings = PlacementSettings {
            seed: 2,
            ..Default::default()
        };
        for transform in find_transforms(&records, 200, &settings) {
            let (_, _, translation) = transform.to_scale_rotation_translation();
            assert!(translation.x.abs() <= 3.5 + 1e-4);
            assert!(translation.z.abs() <= 3.5 + 1e-4);
            assert!((translation.y - 10.0).abs() < 1e-4);
        }
    }

    #[test]
    fn terrain_exactly_at_height_bound_is_always_accepted() {
        // Jitter widens the band, so a triangle sitting precisely on the
        // lower bound can never be filtered out by an unlucky roll.
        let records = flat_records(8, LEVEL_SEA + 5.0);
        let settings = PlacementSettings {
            height_jitter: 5.0,
            ..PropKind::Tree.placement_settings(42)
        };
        let transforms = find_transforms(&records, 64, &settings);
        assert_eq!(transforms.len(), 64);
    }

    #[test]
    fn slope_driven_scale_is_largest_on_flat_ground() {
        let records = flat_records(8, 10.0);
        let settings = PropKind::Rock.placement_settings(8);
        assert!(settings.scale_by_slope);
        for transform in find_transforms(&records, 40, &settings) {
            let (scale, _, _) = transform.to_scale_rotation_translation();
            assert!((scale.x - settings.scale_max).abs() < 1e-4);
        }
    }

    #[test]
    fn preset_constraints_match_archetypes() {
        let tree = PropKind::Tree.placement_settings(0);
        assert_eq!(tree.height_jitter, 0.0);
        assert_eq!(tree.height_max, LEVEL_SNOW + 20.0);

        let grass = PropKind::Grass.placement_settings(0);
        assert_eq!(grass.height_min, LEVEL_SEA + 5.0);
        assert!(grass.rotate_to_surface_normal);

        let rock = PropKind::Rock.placement_settings(0);
        assert_eq!(rock.height_max, f32::MAX);
        assert!(rock.scale_by_slope);
    }

    #[test]
    fn rejects_terrain_outside_height_window() {
        let records = flat_records(4, -50.0);
        let settings = PropKind::Tree.placement_settings(3);
        assert!(find_transforms(&records, 16, &settings).is_empty());
    }

    #[test]
    fn zero_slope_limit_on_sloped_mesh_yields_nothing() {
        let size = 6u32;
        let data = (0..size * size).map(|i| (i / size) as f32 * 3.0).collect();
        let field = HeightField::new(size, size, data);
        let positions = generate_positions(&field, 1, 1);
        let mesh = assemble_mesh(&positions, size, size);
        let records = build_triangle_index(&mesh);
        assert!(records.iter().all(|r| r.slope_radians > 0.0));

        let settings = PlacementSettings {
            seed: 4,
            max_slope_radians: 0.0,
            ..Default::default()
        };
        assert!(find_transforms(&records, 32, &settings).is_empty());
    }

    #[test]
    fn same_seed_is_deterministic() {
        let records = flat_records(8, 10.0);
        let settings = PropKind::Rock.placement_settings(9);
        let a = find_transforms(&records, 32, &settings);
        let b = find_transforms(&records, 32, &settings);
        assert_eq!(a, b);
    }

    #[test]
    fn scales_stay_in_range() {
        let records = flat_records(8, 10.0);
        let settings = PlacementSettings {
            seed: 5,
            scale_min: 0.5,
            scale_max: 2.0,
            ..Default::default()
        };
        for transform in find_transforms(&records, 100, &settings) {
            let (scale, _, _) = transform.to_scale_rotation_translation();
            assert!(scale.x >= 0.5 - 1e-4 && scale.x <= 2.0 + 1e-4);
        }
    }

    #[test]
    fn upright_props_keep_y_axis() {
        let records = flat_records(6, 10.0);
        let settings = PlacementSettings {
            seed: 6,
            rotate_to_surface_normal: false,
            ..Default::default()
        };
        for transform in find_transforms(&records, 20, &settings) {
            let (_, rotation, _) = transform.to_scale_rotation_translation();
            assert!((rotation * Vec3::Y - Vec3::Y).length() < 1e-4);
        }
    }
}
