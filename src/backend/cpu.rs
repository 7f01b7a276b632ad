//! CPU reference backend
//!
//! The normative fusion arithmetic: project every voxel of every active
//! block into the depth image and fold the measurement in with a weighted
//! running mean. Blocks are independent, so the per-block work runs on the
//! rayon pool with a read-copy-update scheme; the sequential commit keeps
//! output deterministic.

use std::time::Instant;

use glam::Vec3;
use rayon::prelude::*;
use tracing::debug_span;

use crate::backend::{IntegrationBackend, VoxelAccessor};
use crate::constants::{BLOCK_EDGE, DEPTH_MAX, DEPTH_MIN};
use crate::frame::{DepthDataProvider, IntegrationInput, IntegrationStats};
use crate::voxel::resolution;
use crate::voxel::{BlockIndex, VoxelBlock};

pub struct CpuBackend {
    /// Reject pixels whose sensor confidence class is 0.
    pub skip_low_confidence: bool,
}

impl CpuBackend {
    pub fn new(skip_low_confidence: bool) -> Self {
        Self { skip_low_confidence }
    }
}

impl IntegrationBackend for CpuBackend {
    fn process_frame(
        &mut self,
        input: &IntegrationInput,
        depth: &dyn DepthDataProvider,
        accessor: &mut dyn VoxelAccessor,
        active_blocks: &[(BlockIndex, u32)],
    ) -> IntegrationStats {
        let _span = debug_span!(
            "cpu_process_frame",
            blocks = active_blocks.len(),
            timestamp = input.timestamp
        )
        .entered();
        let start = Instant::now();

        let world_to_camera = input.camera_to_world.inverse();
        let camera_pos = input.camera_position();
        let skip_low = self.skip_low_confidence;

        // Read-copy-update: each task owns a private copy of its block, so
        // the parallel phase never aliases storage.
        let updated: Vec<(u32, VoxelBlock, u32)> = {
            let reader: &dyn VoxelAccessor = accessor;
            active_blocks
                .par_iter()
                .map(|(index, slot)| {
                    let mut block = reader.read_block(*slot);
                    let voxels = integrate_block(
                        &mut block,
                        index,
                        input,
                        depth,
                        &world_to_camera,
                        camera_pos,
                        skip_low,
                    );
                    block.integration_generation += 1;
                    block.last_observed = input.timestamp;
                    (*slot, block, voxels)
                })
                .collect()
        };

        let mut stats = IntegrationStats::default();
        for (slot, block, voxels) in updated {
            if voxels > 0 {
                stats.blocks_updated += 1;
            }
            stats.voxels_updated += voxels;
            accessor.write_block(slot, block);
        }

        // The reference path has no device queue; its compute time stands
        // in for GPU time so the thermal controller sees a real signal.
        let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
        stats.gpu_time_ms = elapsed_ms;
        stats.total_time_ms = elapsed_ms;
        stats
    }

    fn name(&self) -> &'static str {
        "cpu-reference"
    }
}

/// Fuse one frame into one block. Returns the number of voxels written.
fn integrate_block(
    block: &mut VoxelBlock,
    index: &BlockIndex,
    input: &IntegrationInput,
    depth: &dyn DepthDataProvider,
    world_to_camera: &glam::Mat4,
    camera_pos: Vec3,
    skip_low_confidence: bool,
) -> u32 {
    let voxel_size = block.voxel_size;
    let tau = resolution::truncation_distance(voxel_size);
    let origin = index.world_origin(voxel_size);
    // The placeholder surface normal for angle weighting until per-voxel
    // normals exist. See the gradient estimate in the mesher for the
    // eventual replacement.
    let placeholder_normal = Vec3::Y;

    let width = depth.width() as i32;
    let height = depth.height() as i32;
    let mut written = 0u32;

    for x in 0..BLOCK_EDGE {
        for y in 0..BLOCK_EDGE {
            for z in 0..BLOCK_EDGE {
                let center = origin
                    + (Vec3::new(x as f32, y as f32, z as f32) + Vec3::splat(0.5)) * voxel_size;

                let p_cam = world_to_camera.transform_point3(center);
                if p_cam.z <= 0.0 {
                    continue;
                }

                let (px, py) = input.intrinsics.project(p_cam);
                let pxi = px.round() as i32;
                let pyi = py.round() as i32;
                if pxi < 0 || pxi >= width || pyi < 0 || pyi >= height {
                    continue;
                }

                let measured = depth.depth_at(pxi as u32, pyi as u32);
                if measured.is_nan() || measured < DEPTH_MIN || measured > DEPTH_MAX {
                    continue;
                }
                let confidence = depth.confidence_at(pxi as u32, pyi as u32);
                if skip_low_confidence && confidence == 0 {
                    continue;
                }

                let sdf_raw = measured - p_cam.z;
                if sdf_raw > tau {
                    // Free space beyond the truncation band. Carving decay
                    // is a GPU-backend concern (CARVING_DECAY_RATE).
                    continue;
                }
                let sdf_n = (sdf_raw / tau).clamp(-1.0, 1.0);

                let view_ray = (center - camera_pos).normalize_or_zero();
                let w_obs = resolution::confidence_weight(confidence)
                    * resolution::viewing_angle_weight(view_ray, placeholder_normal)
                    * resolution::distance_weight(measured);

                block
                    .voxel_mut(x, y, z)
                    .apply_observation(sdf_n, w_obs, confidence);
                written += 1;
            }
        }
    }

    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraIntrinsics, TrackingState};
    use crate::voxel::BlockPool;
    use glam::Mat4;

    /// Flat wall at constant depth, full high confidence.
    struct WallDepth {
        width: u32,
        height: u32,
        depth: f32,
    }

    impl DepthDataProvider for WallDepth {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn depth_at(&self, _x: u32, _y: u32) -> f32 {
            self.depth
        }
        fn confidence_at(&self, _x: u32, _y: u32) -> u8 {
            2
        }
    }

    fn test_input(width: u32, height: u32) -> IntegrationInput {
        IntegrationInput {
            timestamp: 1.0,
            intrinsics: CameraIntrinsics {
                fx: width as f32,
                fy: width as f32,
                cx: width as f32 / 2.0,
                cy: height as f32 / 2.0,
            },
            camera_to_world: Mat4::IDENTITY,
            width,
            height,
            tracking_state: TrackingState::Normal,
        }
    }

    /// Allocate the block straddling the wall in front of the camera.
    fn wall_block(pool: &mut BlockPool, wall_depth: f32) -> (BlockIndex, u32) {
        let voxel_size = resolution::voxel_size_for_depth(wall_depth);
        let index = BlockIndex::of_world_point(Vec3::new(0.0, 0.0, wall_depth), voxel_size);
        let slot = pool.allocate(voxel_size).unwrap();
        (index, slot)
    }

    #[test]
    fn test_wall_produces_zero_crossing() {
        let wall = WallDepth { width: 128, height: 96, depth: 1.5 };
        let input = test_input(wall.width, wall.height);
        let mut pool = BlockPool::new(8);
        let (index, slot) = wall_block(&mut pool, wall.depth);

        let mut backend = CpuBackend::new(true);
        let stats = backend.process_frame(&input, &wall, &mut pool, &[(index, slot)]);

        assert_eq!(stats.blocks_updated, 1);
        assert!(stats.voxels_updated > 0);

        let block = pool.block(slot);
        assert_eq!(block.integration_generation, 1);
        let sdfs: Vec<f32> = block.voxels.iter().map(|v| v.sdf()).collect();
        assert!(sdfs.iter().any(|s| *s < 0.0), "no voxel behind the wall");
        assert!(sdfs.iter().any(|s| *s > 0.0), "no voxel in front of the wall");
        for v in &block.voxels {
            assert!(v.sdf() >= -1.0 && v.sdf() <= 1.0);
            assert!(v.weight <= crate::constants::MAX_VOXEL_WEIGHT);
        }
    }

    #[test]
    fn test_depth_min_boundary_inclusive() {
        // Depth exactly at DEPTH_MIN integrates; one step below does not.
        let input = test_input(128, 96);
        let mut backend = CpuBackend::new(true);

        let at_min = WallDepth { width: 128, height: 96, depth: DEPTH_MIN };
        let mut pool = BlockPool::new(8);
        let (index, slot) = wall_block(&mut pool, at_min.depth);
        let stats = backend.process_frame(&input, &at_min, &mut pool, &[(index, slot)]);
        assert!(stats.voxels_updated > 0);

        let below = WallDepth { width: 128, height: 96, depth: DEPTH_MIN - 1e-4 };
        let mut pool = BlockPool::new(8);
        let (index, slot) = wall_block(&mut pool, DEPTH_MIN);
        let stats = backend.process_frame(&input, &below, &mut pool, &[(index, slot)]);
        assert_eq!(stats.voxels_updated, 0);
    }

    #[test]
    fn test_low_confidence_gate() {
        struct LowConf;
        impl DepthDataProvider for LowConf {
            fn width(&self) -> u32 {
                128
            }
            fn height(&self) -> u32 {
                96
            }
            fn depth_at(&self, _x: u32, _y: u32) -> f32 {
                1.5
            }
            fn confidence_at(&self, _x: u32, _y: u32) -> u8 {
                0
            }
        }

        let input = test_input(128, 96);
        let mut pool = BlockPool::new(8);
        let (index, slot) = wall_block(&mut pool, 1.5);

        let mut strict = CpuBackend::new(true);
        let stats = strict.process_frame(&input, &LowConf, &mut pool, &[(index, slot)]);
        assert_eq!(stats.voxels_updated, 0);
        // Generation still advances: the block was in the active set.
        assert_eq!(pool.block(slot).integration_generation, 1);

        let mut lenient = CpuBackend::new(false);
        let stats = lenient.process_frame(&input, &LowConf, &mut pool, &[(index, slot)]);
        assert!(stats.voxels_updated > 0);
    }

    #[test]
    fn test_behind_camera_rejected() {
        let wall = WallDepth { width: 128, height: 96, depth: 1.5 };
        let input = test_input(wall.width, wall.height);
        let mut pool = BlockPool::new(8);
        // A block entirely behind the camera never projects.
        let voxel_size = resolution::voxel_size_for_depth(1.5);
        let index = BlockIndex::of_world_point(Vec3::new(0.0, 0.0, -1.5), voxel_size);
        let slot = pool.allocate(voxel_size).unwrap();

        let mut backend = CpuBackend::new(true);
        let stats = backend.process_frame(&input, &wall, &mut pool, &[(index, slot)]);
        assert_eq!(stats.voxels_updated, 0);
    }

    #[test]
    fn test_repeat_frame_is_stable_at_equilibrium() {
        let wall = WallDepth { width: 128, height: 96, depth: 1.5 };
        let input = test_input(wall.width, wall.height);
        let mut pool = BlockPool::new(8);
        let (index, slot) = wall_block(&mut pool, wall.depth);
        let mut backend = CpuBackend::new(true);

        // Drive weights to saturation.
        for _ in 0..80 {
            backend.process_frame(&input, &wall, &mut pool, &[(index, slot)]);
        }
        let before: Vec<f32> = pool.block(slot).voxels.iter().map(|v| v.sdf()).collect();
        backend.process_frame(&input, &wall, &mut pool, &[(index, slot)]);
        let after: Vec<f32> = pool.block(slot).voxels.iter().map(|v| v.sdf()).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((b - a).abs() < 1e-3, "equilibrium drifted: {b} -> {a}");
        }
    }
}
