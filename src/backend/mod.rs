//! Integration backends
//!
//! The per-voxel fusion arithmetic sits behind a trait so the CPU
//! reference path, a GPU path, and test mocks can coexist. Backends see
//! voxel storage only through [`VoxelAccessor`]; the accessor also exposes
//! the pool's stable base address for zero-copy GPU binding.

pub mod cpu;

use std::collections::VecDeque;

use crate::frame::{DepthDataProvider, IntegrationInput, IntegrationStats};
use crate::voxel::{BlockIndex, VoxelBlock};

/// Storage access handed to a backend for the duration of one frame.
/// `Sync` so backends may fan read-side work out across threads; writes
/// happen through the exclusive borrow.
pub trait VoxelAccessor: Sync {
    /// Copy out the block in the given pool slot.
    fn read_block(&self, slot: u32) -> VoxelBlock;
    /// Replace the block in the given pool slot.
    fn write_block(&mut self, slot: u32, block: VoxelBlock);
    /// Base pointer and byte length of the whole block storage. Stable
    /// for the pool's lifetime; GPU backends bind this once.
    fn base_address(&self) -> (*const u8, usize);
    /// Pool capacity in blocks.
    fn capacity(&self) -> usize;
}

/// A fusion backend. The volume manager resolves the active block set and
/// guarantees exclusive storage access while `process_frame` runs.
pub trait IntegrationBackend {
    /// Fuse one depth frame into the given blocks and report work done.
    fn process_frame(
        &mut self,
        input: &IntegrationInput,
        depth: &dyn DepthDataProvider,
        accessor: &mut dyn VoxelAccessor,
        active_blocks: &[(BlockIndex, u32)],
    ) -> IntegrationStats;

    fn name(&self) -> &'static str;
}

/// Scripted backend for tests and host bring-up: touches generation
/// counters like a real backend but performs no voxel arithmetic, and
/// reports whatever GPU timings it was scripted with.
#[derive(Default)]
pub struct MockBackend {
    /// Timings popped front-to-back, one per frame; empty falls back to 1 ms.
    pub scripted_gpu_time_ms: VecDeque<f64>,
    pub frames_processed: u32,
}

impl IntegrationBackend for MockBackend {
    fn process_frame(
        &mut self,
        input: &IntegrationInput,
        _depth: &dyn DepthDataProvider,
        accessor: &mut dyn VoxelAccessor,
        active_blocks: &[(BlockIndex, u32)],
    ) -> IntegrationStats {
        for (_, slot) in active_blocks {
            let mut block = accessor.read_block(*slot);
            block.integration_generation += 1;
            block.last_observed = input.timestamp;
            accessor.write_block(*slot, block);
        }
        self.frames_processed += 1;
        let gpu = self.scripted_gpu_time_ms.pop_front().unwrap_or(1.0);
        IntegrationStats {
            blocks_updated: active_blocks.len() as u32,
            blocks_allocated: 0,
            voxels_updated: 0,
            gpu_time_ms: gpu,
            total_time_ms: gpu,
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
