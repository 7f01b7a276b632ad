//! Per-frame input contracts
//!
//! Platform-agnostic frame descriptor handed to `Volume::integrate`, the
//! random-access depth reader the sensor layer implements, and the stats
//! block every backend returns.

use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Camera tracking quality reported by the host tracking stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Pose is trustworthy; integration may proceed.
    Normal,
    /// Pose is degraded (relocalizing, low feature count).
    Limited,
    /// No pose available.
    NotAvailable,
}

/// Pinhole intrinsics for the depth image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    /// The 3×3 intrinsic matrix (column-major, as glam stores it).
    pub fn matrix(&self) -> Mat3 {
        Mat3::from_cols(
            Vec3::new(self.fx, 0.0, 0.0),
            Vec3::new(0.0, self.fy, 0.0),
            Vec3::new(self.cx, self.cy, 1.0),
        )
    }

    /// Project a camera-space point (z > 0, +Z forward) to pixel coords.
    #[inline]
    pub fn project(&self, p: Vec3) -> (f32, f32) {
        (self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy)
    }

    /// Back-project a pixel at measured depth into camera space.
    #[inline]
    pub fn unproject(&self, px: f32, py: f32, depth: f32) -> Vec3 {
        Vec3::new(
            (px - self.cx) / self.fx * depth,
            (py - self.cy) / self.fy * depth,
            depth,
        )
    }
}

/// Everything the engine needs to know about one depth frame, minus the
/// pixels themselves (those stay behind [`DepthDataProvider`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegrationInput {
    /// Sensor timestamp, seconds. Monotone within a session.
    pub timestamp: f64,
    pub intrinsics: CameraIntrinsics,
    /// Camera-to-world transform of the depth sensor.
    pub camera_to_world: Mat4,
    pub width: u32,
    pub height: u32,
    pub tracking_state: TrackingState,
}

impl IntegrationInput {
    /// Camera position in world space.
    pub fn camera_position(&self) -> Vec3 {
        self.camera_to_world.w_axis.truncate()
    }

    /// Rotation block of the pose.
    pub fn rotation(&self) -> Mat3 {
        Mat3::from_mat4(self.camera_to_world)
    }
}

/// Random-access depth + confidence reader. `Sync` because the reference
/// backend fans per-block work out across threads.
pub trait DepthDataProvider: Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Measured depth in meters; NaN marks an invalid pixel.
    fn depth_at(&self, x: u32, y: u32) -> f32;
    /// Sensor confidence class: 0 low, 1 mid, 2 high.
    fn confidence_at(&self, x: u32, y: u32) -> u8;
}

/// Per-frame work accounting returned by every backend. Feeds the thermal
/// AIMD controller and the session stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub blocks_updated: u32,
    pub blocks_allocated: u32,
    pub voxels_updated: u32,
    pub gpu_time_ms: f64,
    pub total_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_unproject_roundtrip() {
        let k = CameraIntrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 };
        let p = Vec3::new(0.3, -0.2, 1.5);
        let (px, py) = k.project(p);
        let back = k.unproject(px, py, p.z);
        assert!((back - p).length() < 1e-5);
    }

    #[test]
    fn test_camera_position_from_pose() {
        let pose = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let input = IntegrationInput {
            timestamp: 0.0,
            intrinsics: CameraIntrinsics { fx: 1.0, fy: 1.0, cx: 0.0, cy: 0.0 },
            camera_to_world: pose,
            width: 64,
            height: 48,
            tracking_state: TrackingState::Normal,
        };
        assert_eq!(input.camera_position(), Vec3::new(1.0, 2.0, 3.0));
    }
}
