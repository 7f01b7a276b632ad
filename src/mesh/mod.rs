//! Mesh output types and incremental extraction
//!
//! The mesher walks dirty blocks, polygonizes the TSDF zero-crossing with
//! marching cubes, and returns an immutable [`MeshOutput`] per call.

mod extract;
pub mod tables;

pub use extract::{CongestionController, MeshExtractor};

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// One 32-byte mesh vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    /// World-space position, quantized to the vertex grid.
    pub position: Vec3,
    /// Normalized SDF gradient at the vertex.
    pub normal: Vec3,
    /// Progressive-reveal opacity in [0, 1].
    pub alpha: f32,
    /// Source block convergence in [0, 1].
    pub quality: f32,
}

/// One extraction cycle's output. Produced atomically, never mutated after
/// return; render layers may snapshot it freely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshOutput {
    pub vertices: Vec<MeshVertex>,
    /// Triangle index triplets into `vertices`.
    pub indices: Vec<u32>,
    /// Sensor timestamp the extraction ran at.
    pub extraction_timestamp: f64,
    /// Dirty blocks that remained unprocessed when the cycle's budget ran
    /// out (or the motion gate deferred the whole cycle).
    pub dirty_blocks_remaining: usize,
}

impl MeshOutput {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_32_bytes() {
        assert_eq!(core::mem::size_of::<MeshVertex>(), 32);
    }

    #[test]
    fn test_empty_output() {
        let out = MeshOutput::default();
        assert!(out.is_empty());
        assert_eq!(out.triangle_count(), 0);
    }
}
