//! Engine Configuration
//!
//! Host-tunable knobs with JSON persistence. Defaults come from the
//! canonical constants; the file exists so integrators can dial budgets
//! per device class without rebuilding.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::{HASH_INITIAL_CAPACITY, MAX_TOTAL_VOXEL_BLOCKS, MAX_TRIANGLES_PER_CYCLE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Voxel block pool capacity. The pool is allocated once at this size.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Initial spatial hash capacity. Must be a power of two.
    #[serde(default = "default_hash_capacity")]
    pub hash_initial_capacity: usize,

    /// Per-extraction triangle budget.
    #[serde(default = "default_max_triangles")]
    pub max_triangles_per_cycle: usize,

    /// Reject depth pixels with sensor confidence class 0.
    #[serde(default = "default_skip_low_confidence")]
    pub skip_low_confidence: bool,

    /// Pixel stride for the block-collection back-projection pass.
    /// 1 = every pixel; the default trades negligible coverage for a
    /// large CPU saving.
    #[serde(default = "default_depth_stride")]
    pub depth_stride: usize,
}

fn default_pool_capacity() -> usize {
    MAX_TOTAL_VOXEL_BLOCKS
}

fn default_hash_capacity() -> usize {
    HASH_INITIAL_CAPACITY
}

fn default_max_triangles() -> usize {
    MAX_TRIANGLES_PER_CYCLE
}

fn default_skip_low_confidence() -> bool {
    true
}

fn default_depth_stride() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            hash_initial_capacity: default_hash_capacity(),
            max_triangles_per_cycle: default_max_triangles(),
            skip_low_confidence: default_skip_low_confidence(),
            depth_stride: default_depth_stride(),
        }
    }
}

impl EngineConfig {
    /// Load config from file, creating the default file if missing.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();

        if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read engine config: {}", e))?;
            let config: EngineConfig = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse engine config: {}", e))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save config to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize engine config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write engine config: {}", e))?;
        Ok(())
    }

    /// Sanity limits on the knobs; wrong values here only ever mean a
    /// hand-edited file.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_capacity == 0 || self.pool_capacity > MAX_TOTAL_VOXEL_BLOCKS {
            return Err(format!(
                "pool_capacity must be in 1..={}, got {}",
                MAX_TOTAL_VOXEL_BLOCKS, self.pool_capacity
            ));
        }
        if !self.hash_initial_capacity.is_power_of_two() {
            return Err(format!(
                "hash_initial_capacity must be a power of two, got {}",
                self.hash_initial_capacity
            ));
        }
        if self.max_triangles_per_cycle == 0 {
            return Err("max_triangles_per_cycle must be positive".to_string());
        }
        if self.depth_stride == 0 {
            return Err("depth_stride must be at least 1".to_string());
        }
        Ok(())
    }
}
