use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use crate::instancing::InstanceSet;

/// Projected-angle LOD cut points in degrees, widest first. An object whose
/// projected angle exceeds a threshold uses that threshold's LOD; anything
/// smaller than all of them lands on the coarsest level.
pub const LOD_THRESHOLDS_DEG: [f32; 4] = [23.0, 11.5, 5.7, 2.9];

/// Coarsest LOD index, used for objects past every threshold or culled away.
pub const MAX_LOD: u32 = LOD_THRESHOLDS_DEG.len() as u32;

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    /// Inverted box that merges into whatever it first meets.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bounds = Self::EMPTY;
        for point in points {
            bounds.merge_point(point);
        }
        bounds
    }

    pub fn merge_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn merge(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-size along each axis.
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.max.cmpge(other.min).all() && self.min.cmple(other.max).all()
    }

    /// World-space box enclosing this box under `transform`.
    pub fn transformed(&self, transform: &Mat4) -> BoundingBox {
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];
        Self::from_points(corners.iter().map(|&c| transform.transform_point3(c)))
    }
}

/// View frustum as six inward-facing planes, extracted from a combined
/// view-projection matrix with 0..1 depth.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let m = view_projection;
        let row = |i: usize| Vec4::new(m.x_axis[i], m.y_axis[i], m.z_axis[i], m.w_axis[i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let mut planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r2,      // near
            r3 - r2, // far
        ];
        for plane in &mut planes {
            let len = plane.xyz().length();
            if len > 1e-6 {
                *plane /= len;
            }
        }
        Self { planes }
    }

    /// Conservative box-vs-frustum test: a box is rejected only if some
    /// plane has the whole box on its outside.
    pub fn intersects(&self, bounds: &BoundingBox) -> bool {
        for plane in &self.planes {
            let normal = plane.xyz();
            // Corner of the box farthest along the plane normal.
            let support = Vec3::select(normal.cmpge(Vec3::ZERO), bounds.max, bounds.min);
            if normal.dot(support) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

/// Default cutoff for distance culling, generous enough to keep whole maps
/// visible unless a caller tightens it.
pub const DEFAULT_MAX_RENDER_DISTANCE: f32 = 10_000.0;

#[derive(Debug, Clone, Copy)]
pub struct CameraState {
    pub position: Vec3,
    pub frustum: Frustum,
    pub max_render_distance: f32,
}

impl CameraState {
    pub fn from_view_projection(position: Vec3, view_projection: &Mat4) -> Self {
        Self {
            position,
            frustum: Frustum::from_view_projection(view_projection),
            max_render_distance: DEFAULT_MAX_RENDER_DISTANCE,
        }
    }

    pub fn with_max_render_distance(mut self, distance: f32) -> Self {
        self.max_render_distance = distance;
        self
    }
}

/// Per-group culling and LOD result, refreshed every frame.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityState {
    pub visible: bool,
    pub distance_sq: f32,
    pub lod_index: u32,
}

impl Default for VisibilityState {
    fn default() -> Self {
        Self {
            visible: true,
            distance_sq: 0.0,
            lod_index: 0,
        }
    }
}

/// Frustum-tests every box; survivors get the squared distance from the
/// camera to the box's closest point and stay visible only within the
/// camera's render distance. Boxes outside the frustum skip the distance
/// computation. Without a camera everything stays visible.
pub fn update_culling(
    bounds: &[BoundingBox],
    camera: Option<&CameraState>,
    states: &mut [VisibilityState],
) {
    debug_assert_eq!(bounds.len(), states.len());
    let Some(camera) = camera else {
        for state in states.iter_mut() {
            state.visible = true;
            state.distance_sq = 0.0;
        }
        return;
    };

    let max_distance_sq = camera.max_render_distance * camera.max_render_distance;
    for (bounds, state) in bounds.iter().zip(states.iter_mut()) {
        if !camera.frustum.intersects(bounds) {
            state.visible = false;
            state.distance_sq = f32::MAX;
            continue;
        }
        state.distance_sq = bounds
            .closest_point(camera.position)
            .distance_squared(camera.position);
        state.visible = state.distance_sq <= max_distance_sq;
    }
}

/// Picks a LOD per box from its projected angle, `2 * atan(radius /
/// distance)` with `radius` the length of the box extents. A box containing
/// the camera always gets the finest level; a culled box, or any box
/// without a camera to judge it, gets the coarsest.
pub fn update_lod_indices(
    bounds: &[BoundingBox],
    camera: Option<&CameraState>,
    states: &mut [VisibilityState],
) {
    debug_assert_eq!(bounds.len(), states.len());
    let Some(camera) = camera else {
        for state in states.iter_mut() {
            state.lod_index = MAX_LOD;
        }
        return;
    };

    for (bounds, state) in bounds.iter().zip(states.iter_mut()) {
        if !state.visible {
            state.lod_index = MAX_LOD;
            continue;
        }
        if bounds.contains(camera.position) {
            state.lod_index = 0;
            continue;
        }

        let distance = state.distance_sq.sqrt().max(1e-4);
        let radius = bounds.extents().length();
        let angle_deg = (2.0 * (radius / distance).atan()).to_degrees();

        state.lod_index = LOD_THRESHOLDS_DEG
            .iter()
            .position(|&threshold| angle_deg > threshold)
            .map(|i| i as u32)
            .unwrap_or(MAX_LOD);
    }
}

/// One bounding box per cell chunk of an instance set, each enclosing the
/// local-space `base` box under every transform in the chunk.
pub fn group_bounding_boxes(set: &InstanceSet, base: &BoundingBox) -> Vec<BoundingBox> {
    let mut boxes = Vec::with_capacity(set.group_end_indices.len());
    let mut start = 0usize;
    for &end in &set.group_end_indices {
        let mut merged = BoundingBox::EMPTY;
        for transform in &set.transforms[start..end as usize] {
            merged.merge(&base.transformed(transform));
        }
        boxes.push(merged);
        start = end as usize;
    }
    boxes
}
