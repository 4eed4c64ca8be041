use glam::Mat4;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::info;

/// World-space edge length of one instance grid cell.
pub const CELL_SIZE: f32 = 300.0;

/// Opaque handle to an uploaded instance buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Destination for instance transforms that leave the CPU. Renderers
/// implement this against their own buffer allocator.
pub trait GpuBufferFactory {
    fn create_instance_buffer(&mut self, name: &str, transforms: &[Mat4]) -> BufferHandle;
}

/// Factory for headless use and tests: hands out sequential handles and
/// uploads nothing.
#[derive(Debug, Default)]
pub struct NullGpuBufferFactory {
    next: u64,
    pub created: Vec<(String, usize)>,
}

impl GpuBufferFactory for NullGpuBufferFactory {
    fn create_instance_buffer(&mut self, name: &str, transforms: &[Mat4]) -> BufferHandle {
        self.next += 1;
        self.created.push((name.to_string(), transforms.len()));
        BufferHandle(self.next)
    }
}

/// Signed 3D cell coordinate on the instance grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridKey {
    pub fn from_position(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: (x / CELL_SIZE).floor() as i32,
            y: (y / CELL_SIZE).floor() as i32,
            z: (z / CELL_SIZE).floor() as i32,
        }
    }
}

impl Hash for GridKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Morton interleave of the three coordinates, one well-mixed word.
        let x = spread_bits(self.x as u32 as u64);
        let y = spread_bits(self.y as u32 as u64);
        let z = spread_bits(self.z as u32 as u64);
        state.write_u64(x | (y << 1) | (z << 2));
    }
}

/// Spreads the low 21 bits of `v` into every third bit position.
fn spread_bits(mut v: u64) -> u64 {
    v &= 0x1f_ffff;
    v = (v | (v << 32)) & 0x001f_0000_0000_ffff;
    v = (v | (v << 16)) & 0x001f_0000_ff00_00ff;
    v = (v | (v << 8)) & 0x100f_00f0_0f00_f00f;
    v = (v | (v << 4)) & 0x10c3_0c30_c30c_30c3;
    v = (v | (v << 2)) & 0x1249_2492_4924_9249;
    v
}

/// Instance transforms reordered into spatial cell chunks, plus the uploaded
/// buffer. `group_end_indices[i]` is one past the last transform of cell
/// chunk `i`, so chunk `i` spans `group_end_indices[i-1]..group_end_indices[i]`.
#[derive(Debug, Clone)]
pub struct InstanceSet {
    pub transforms: Vec<Mat4>,
    pub group_end_indices: Vec<u32>,
    pub buffer: Option<BufferHandle>,
}

/// Cache of uploaded instance sets keyed by owner name and a digest of the
/// transforms. Identical scatter results across regenerations reuse the
/// existing buffer instead of re-uploading.
#[derive(Debug, Default)]
pub struct InstanceCache {
    sets: HashMap<String, InstanceSet>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }

    pub fn get(&self, key: &str) -> Option<&InstanceSet> {
        self.sets.get(key)
    }

    /// Returns the cached set for `owner` + `transforms`, building and
    /// uploading it on first sight.
    pub fn get_or_create(
        &mut self,
        owner: &str,
        transforms: &[Mat4],
        factory: &mut dyn GpuBufferFactory,
    ) -> (String, &InstanceSet) {
        let key = instance_key(owner, transforms);
        match self.sets.entry(key.clone()) {
            Entry::Occupied(entry) => (key, entry.into_mut()),
            Entry::Vacant(entry) => {
                let set = build_instance_set(owner, transforms, factory);
                info!(
                    "uploaded instance set '{}': {} transforms in {} cells",
                    key,
                    set.transforms.len(),
                    set.group_end_indices.len()
                );
                (key, entry.insert(set))
            }
        }
    }
}

/// Cache key: the owner name joined with a digest over every byte of every
/// transform, so any change in count or content produces a new key.
pub fn instance_key(owner: &str, transforms: &[Mat4]) -> String {
    let mut hasher = DefaultHasher::new();
    for transform in transforms {
        hasher.write(bytemuck::bytes_of(&transform.to_cols_array()));
    }
    hasher.write_usize(transforms.len());
    format!("{owner}:{:016x}", hasher.finish())
}

fn build_instance_set(
    owner: &str,
    transforms: &[Mat4],
    factory: &mut dyn GpuBufferFactory,
) -> InstanceSet {
    if transforms.is_empty() {
        return InstanceSet {
            transforms: Vec::new(),
            group_end_indices: Vec::new(),
            buffer: None,
        };
    }

    // Bucket by grid cell, then lay the buckets out back to back.
    let mut cells: HashMap<GridKey, Vec<Mat4>> = HashMap::new();
    for transform in transforms {
        let translation = transform.w_axis;
        cells
            .entry(GridKey::from_position(translation.x, translation.y, translation.z))
            .or_default()
            .push(*transform);
    }

    let mut keys: Vec<GridKey> = cells.keys().copied().collect();
    keys.sort_by_key(|k| (k.z, k.y, k.x));

    let mut ordered = Vec::with_capacity(transforms.len());
    let mut group_end_indices = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(chunk) = cells.remove(&key) {
            ordered.extend(chunk);
        }
        group_end_indices.push(ordered.len() as u32);
    }

    // GPUs consume the matrices row-major.
    let transposed: Vec<Mat4> = ordered.iter().map(Mat4::transpose).collect();
    let buffer = factory.create_instance_buffer(owner, &transposed);

    InstanceSet {
        transforms: ordered,
        group_end_indices,
        buffer: Some(buffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn translation(x: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, 0.0, z))
    }

    #[test]
    fn grid_key_buckets_by_cell_size() {
        assert_eq!(
            GridKey::from_position(0.0, 0.0, 0.0),
            GridKey { x: 0, y: 0, z: 0 }
        );
        assert_eq!(
            GridKey::from_position(299.9, 150.0, 0.0),
            GridKey { x: 0, y: 0, z: 0 }
        );
        assert_eq!(
            GridKey::from_position(300.0, 300.0, 0.0),
            GridKey { x: 1, y: 1, z: 0 }
        );
        assert_eq!(
            GridKey::from_position(-0.1, 0.0, -300.1),
            GridKey { x: -1, y: 0, z: -2 }
        );
    }

    #[test]
    fn same_transforms_reuse_the_buffer() {
        let transforms = vec![translation(10.0, 10.0), translation(500.0, 0.0)];
        let mut cache = InstanceCache::new();
        let mut factory = NullGpuBufferFactory::default();

        let first = cache
            .get_or_create("trees", &transforms, &mut factory)
            .1
            .buffer;
        let second = cache
            .get_or_create("trees", &transforms, &mut factory)
            .1
            .buffer;

        assert_eq!(first, second);
        assert_eq!(factory.created.len(), 1);
    }

    #[test]
    fn changed_transforms_get_a_new_key() {
        let a = vec![translation(10.0, 10.0)];
        let b = vec![translation(10.0, 11.0)];
        assert_ne!(instance_key("rocks", &a), instance_key("rocks", &b));
        assert_ne!(instance_key("rocks", &a), instance_key("trees", &a));
    }

    #[test]
    fn cell_chunks_are_contiguous() {
        let transforms = vec![
            translation(10.0, 10.0),
            translation(400.0, 10.0),
            translation(20.0, 20.0),
            translation(410.0, 20.0),
        ];
        let mut cache = InstanceCache::new();
        let mut factory = NullGpuBufferFactory::default();
        let (_, set) = cache.get_or_create("grass", &transforms, &mut factory);

        assert_eq!(set.transforms.len(), 4);
        assert_eq!(set.group_end_indices, vec![2, 4]);
        // Everything inside one chunk shares a grid cell.
        let mut start = 0;
        for &end in &set.group_end_indices {
            let chunk = &set.transforms[start..end as usize];
            let w = chunk[0].w_axis;
            let key = GridKey::from_position(w.x, w.y, w.z);
            for t in chunk {
                let w = t.w_axis;
                assert_eq!(GridKey::from_position(w.x, w.y, w.z), key);
            }
            start = end as usize;
        }
    }

    #[test]
    fn vertically_separated_transforms_form_separate_groups() {
        // Same x/z cell, 500 units apart in height.
        let transforms = vec![
            Mat4::from_translation(Vec3::new(10.0, 0.0, 10.0)),
            Mat4::from_translation(Vec3::new(10.0, 500.0, 10.0)),
        ];
        let mut cache = InstanceCache::new();
        let mut factory = NullGpuBufferFactory::default();
        let (_, set) = cache.get_or_create("trees", &transforms, &mut factory);
        assert_eq!(set.group_end_indices, vec![1, 2]);
    }

    #[test]
    fn empty_input_creates_no_buffer() {
        let mut cache = InstanceCache::new();
        let mut factory = NullGpuBufferFactory::default();
        let (_, set) = cache.get_or_create("trees", &[], &mut factory);
        assert!(set.buffer.is_none());
        assert!(set.group_end_indices.is_empty());
        assert!(factory.created.is_empty());
    }

    #[test]
    fn clear_drops_cached_sets() {
        let mut cache = InstanceCache::new();
        let mut factory = NullGpuBufferFactory::default();
        cache.get_or_create("trees", &[translation(1.0, 1.0)], &mut factory);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
