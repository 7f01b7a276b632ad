//! scanfuse — real-time TSDF volumetric reconstruction
//!
//! Fuses a ~60 Hz stream of depth+confidence frames into a sparse voxel
//! signed distance field and extracts an incremental triangle mesh from
//! its zero-crossing, under mobile real-time, thermal, and memory
//! budgets.
//!
//! The public surface is small: build a [`Volume`] over an
//! [`IntegrationBackend`], feed it [`IntegrationInput`]s plus a
//! [`DepthDataProvider`], and periodically pull a [`MeshOutput`]. Host
//! events (thermal state, memory pressure, reset) are discrete calls on
//! the same single-writer object.
//!
//! Out of scope by design: sensor acquisition, camera tracking, GPU
//! shader bodies, render submission, networking, and any cross-session
//! persistence of the voxel field.

pub mod backend;
pub mod config;
pub mod constants;
pub mod frame;
pub mod math;
pub mod mesh;
pub mod volume;
pub mod voxel;

use thiserror::Error;

pub use backend::{IntegrationBackend, MockBackend, VoxelAccessor};
pub use backend::cpu::CpuBackend;
pub use config::EngineConfig;
pub use frame::{
    CameraIntrinsics, DepthDataProvider, IntegrationInput, IntegrationStats, TrackingState,
};
pub use mesh::{MeshOutput, MeshVertex};
pub use volume::thermal::ThermalState;
pub use volume::{
    FusionStats, HealthLevel, IntegrationOutcome, MemoryPressureLevel, SessionHealth,
    SharedVolume, SkipReason, Volume,
};
pub use voxel::{BlockIndex, Voxel};

/// Structural, caller-visible failures. Per-frame gate rejections are not
/// errors; they come back as [`IntegrationOutcome::Skipped`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("voxel block pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },
    #[error("hash probe bound exhausted after {0} steps")]
    ProbeBoundExhausted(usize),
    #[error("constants validation failed: {0}")]
    InvalidConstants(String),
    #[error("invalid engine config: {0}")]
    Config(String),
}
