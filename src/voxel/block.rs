//! Voxels, voxel blocks, and the integer block lattice
//!
//! A block is the allocation and dirty-tracking unit: an 8×8×8 brick of
//! 4-byte voxels plus generation counters. Block coordinates live on an
//! integer lattice whose cell size depends on the block's voxel size tier.

use glam::Vec3;
use half::f16;
use serde::{Deserialize, Serialize};

use crate::constants::{BLOCK_EDGE, BLOCK_VOLUME, MAX_VOXEL_WEIGHT};
use crate::math;

/// Lattice coordinate of a voxel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIndex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockIndex {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block containing a world-space point at the given voxel size.
    /// Floor rounds toward negative infinity on every axis.
    pub fn of_world_point(p: Vec3, voxel_size: f32) -> Self {
        let c = math::lattice_coord(p, voxel_size * BLOCK_EDGE as f32);
        Self { x: c.x, y: c.y, z: c.z }
    }

    /// Teschner spatial hash, folded to a slot by the table. The wrapping
    /// products intentionally spill across the i32 range; the fold takes
    /// the absolute value before the modulo.
    #[inline]
    pub fn spatial_hash(&self) -> i32 {
        (self.x.wrapping_mul(73_856_093))
            ^ (self.y.wrapping_mul(19_349_669))
            ^ (self.z.wrapping_mul(83_492_791))
    }

    /// Probe start slot for a table of the given capacity.
    #[inline]
    pub fn home_slot(&self, capacity: usize) -> usize {
        (self.spatial_hash() as i64).unsigned_abs() as usize % capacity
    }

    /// World-space origin (minimum corner) of this block.
    pub fn world_origin(&self, voxel_size: f32) -> Vec3 {
        let edge = voxel_size * BLOCK_EDGE as f32;
        Vec3::new(self.x as f32, self.y as f32, self.z as f32) * edge
    }

    /// World-space center of this block.
    pub fn world_center(&self, voxel_size: f32) -> Vec3 {
        let edge = voxel_size * BLOCK_EDGE as f32;
        self.world_origin(voxel_size) + Vec3::splat(edge * 0.5)
    }

    /// The six face-adjacent neighbors.
    pub fn face_neighbors(&self) -> [BlockIndex; 6] {
        [
            Self::new(self.x - 1, self.y, self.z),
            Self::new(self.x + 1, self.y, self.z),
            Self::new(self.x, self.y - 1, self.z),
            Self::new(self.x, self.y + 1, self.z),
            Self::new(self.x, self.y, self.z - 1),
            Self::new(self.x, self.y, self.z + 1),
        ]
    }
}

/// One 4-byte TSDF sample. The SDF is stored in half precision, normalized
/// by the block's truncation distance to [-1, +1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    sdf: f16,
    /// Accumulated observation weight, saturates at [`MAX_VOXEL_WEIGHT`].
    pub weight: u8,
    /// Best sensor confidence class ever observed (0 low, 1 mid, 2 high).
    /// Monotonically non-decreasing over the voxel's lifetime.
    pub confidence: u8,
}

impl Voxel {
    /// The empty sentinel: free space at full truncation, never observed.
    /// The +1.0 SDF makes out-of-block sampling branch-free in the mesher.
    pub const EMPTY: Voxel = Voxel {
        sdf: f16::ONE,
        weight: 0,
        confidence: 0,
    };

    #[inline]
    pub fn sdf(&self) -> f32 {
        math::decode_sdf(self.sdf)
    }

    /// Store a normalized SDF value. Clamped to [-1, +1] before the half
    /// conversion.
    #[inline]
    pub fn set_sdf(&mut self, sdf: f32) {
        self.sdf = math::encode_sdf(sdf);
    }

    /// Fold one observation into the voxel: weighted running mean on the
    /// SDF, saturating weight accumulation, monotonic confidence. Weight
    /// accumulation rounds up so a fractional observation weight still
    /// leaves a mark in the 8-bit store.
    pub fn apply_observation(&mut self, sdf_n: f32, obs_weight: f32, confidence: u8) {
        let w_stored = self.weight as f32;
        let blended = (self.sdf() * w_stored + sdf_n * obs_weight) / (w_stored + obs_weight);
        self.set_sdf(blended);
        let new_weight = (w_stored + obs_weight).ceil().min(MAX_VOXEL_WEIGHT as f32);
        self.weight = new_weight as u8;
        self.confidence = self.confidence.max(confidence);
    }
}

impl Default for Voxel {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Row-major voxel index within a block: x outer, z inner.
#[inline]
pub fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    x * BLOCK_EDGE * BLOCK_EDGE + y * BLOCK_EDGE + z
}

/// An 8×8×8 brick of voxels plus bookkeeping. Blocks live in the pool and
/// are addressed by pool index; they never point back at the table.
#[derive(Debug, Clone)]
pub struct VoxelBlock {
    pub voxels: [Voxel; BLOCK_VOLUME],
    /// Voxel edge length chosen at allocation from the observed depth.
    pub voxel_size: f32,
    /// Increments every time integration touches the block.
    pub integration_generation: u32,
    /// Set to `integration_generation` when the mesher commits the block.
    pub mesh_generation: u32,
    /// Sensor timestamp of the last frame that touched the block, seconds.
    pub last_observed: f64,
}

impl VoxelBlock {
    pub fn empty() -> Self {
        Self {
            voxels: [Voxel::EMPTY; BLOCK_VOLUME],
            voxel_size: 0.0,
            integration_generation: 0,
            mesh_generation: 0,
            last_observed: 0.0,
        }
    }

    /// Reinitialize for reuse from the pool free-list.
    pub fn reset(&mut self, voxel_size: f32) {
        self.voxels = [Voxel::EMPTY; BLOCK_VOLUME];
        self.voxel_size = voxel_size;
        self.integration_generation = 0;
        self.mesh_generation = 0;
        self.last_observed = 0.0;
    }

    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> &Voxel {
        &self.voxels[voxel_index(x, y, z)]
    }

    #[inline]
    pub fn voxel_mut(&mut self, x: usize, y: usize, z: usize) -> &mut Voxel {
        &mut self.voxels[voxel_index(x, y, z)]
    }

    /// A block is dirty when integration has advanced past the last mesh
    /// commit.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.integration_generation > self.mesh_generation
    }

    /// Mesh staleness used to order extraction work.
    #[inline]
    pub fn staleness(&self) -> u32 {
        self.integration_generation.saturating_sub(self.mesh_generation)
    }

    /// Sum of voxel weights normalized by the fully converged block,
    /// clamped to [0, 1]. Drives the per-vertex quality channel.
    pub fn convergence(&self) -> f32 {
        let total: u32 = self.voxels.iter().map(|v| v.weight as u32).sum();
        (total as f32 / (BLOCK_VOLUME as f32 * MAX_VOXEL_WEIGHT as f32)).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_index_floor_semantics() {
        // 10 mm voxels -> 80 mm blocks
        let idx = BlockIndex::of_world_point(Vec3::new(-0.001, 0.0, 0.159), 0.01);
        assert_eq!(idx, BlockIndex::new(-1, 0, 1));
    }

    #[test]
    fn test_spatial_hash_is_fieldwise() {
        let a = BlockIndex::new(1, 2, 3);
        let b = BlockIndex::new(1, 2, 3);
        assert_eq!(a.spatial_hash(), b.spatial_hash());
        assert_ne!(a.spatial_hash(), BlockIndex::new(3, 2, 1).spatial_hash());
    }

    #[test]
    fn test_home_slot_in_range_for_extreme_coords() {
        for idx in [
            BlockIndex::new(i32::MIN, i32::MAX, -1),
            BlockIndex::new(0, 0, 0),
            BlockIndex::new(-100_000, 100_000, 7),
        ] {
            assert!(idx.home_slot(65_536) < 65_536);
        }
    }

    #[test]
    fn test_voxel_is_four_bytes() {
        assert_eq!(core::mem::size_of::<Voxel>(), 4);
    }

    #[test]
    fn test_empty_voxel_sentinel() {
        let v = Voxel::EMPTY;
        assert_eq!(v.sdf(), 1.0);
        assert_eq!(v.weight, 0);
        assert_eq!(v.confidence, 0);
    }

    #[test]
    fn test_observation_weight_saturates() {
        let mut v = Voxel::EMPTY;
        for _ in 0..200 {
            v.apply_observation(-0.25, 1.0, 2);
        }
        assert_eq!(v.weight, MAX_VOXEL_WEIGHT);
        assert!(v.sdf() >= -1.0 && v.sdf() <= 1.0);
        assert_eq!(v.confidence, 2);
    }

    #[test]
    fn test_confidence_is_monotonic() {
        let mut v = Voxel::EMPTY;
        v.apply_observation(0.0, 1.0, 2);
        v.apply_observation(0.0, 1.0, 0);
        assert_eq!(v.confidence, 2);
    }

    #[test]
    fn test_voxel_index_row_major_z_inner() {
        assert_eq!(voxel_index(0, 0, 0), 0);
        assert_eq!(voxel_index(0, 0, 1), 1);
        assert_eq!(voxel_index(0, 1, 0), 8);
        assert_eq!(voxel_index(1, 0, 0), 64);
        assert_eq!(voxel_index(7, 7, 7), 511);
    }

    #[test]
    fn test_equilibrium_update_is_stable() {
        // Integrating the same observation at saturated weight must not
        // drift the mean by more than one ULP-ish step.
        let mut v = Voxel::EMPTY;
        for _ in 0..100 {
            v.apply_observation(-0.5, 1.0, 2);
        }
        let before = v.sdf();
        v.apply_observation(-0.5, 1.0, 2);
        assert!((v.sdf() - before).abs() < 1e-3);
    }
}
