//! Adaptive resolution
//!
//! Depth-dependent voxel size tiers, the truncation band, and the
//! observation weight factors folded into every integration update.

use glam::Vec3;

use crate::constants::{
    CONFIDENCE_WEIGHTS, DEPTH_FAR_THRESHOLD, DEPTH_NEAR_THRESHOLD, DISTANCE_DECAY_ALPHA,
    TRUNCATION_MIN, TRUNCATION_MULTIPLIER, VIEW_ANGLE_WEIGHT_FLOOR, VOXEL_SIZE_FAR,
    VOXEL_SIZE_MID, VOXEL_SIZE_NEAR,
};

/// Voxel edge length for geometry measured at the given depth, meters.
/// Close geometry earns fine voxels; distant geometry is noisy anyway.
#[inline]
pub fn voxel_size_for_depth(depth: f32) -> f32 {
    if depth < DEPTH_NEAR_THRESHOLD {
        VOXEL_SIZE_NEAR
    } else if depth < DEPTH_FAR_THRESHOLD {
        VOXEL_SIZE_MID
    } else {
        VOXEL_SIZE_FAR
    }
}

/// Truncation distance for a voxel size. The band must cover at least
/// three voxels, an absolute noise floor, and a two-voxel guardrail.
#[inline]
pub fn truncation_distance(voxel_size: f32) -> f32 {
    let tau = (TRUNCATION_MULTIPLIER * voxel_size).max(TRUNCATION_MIN);
    tau.max(2.0 * voxel_size)
}

/// Weight factor for a sensor confidence class.
#[inline]
pub fn confidence_weight(confidence: u8) -> f32 {
    CONFIDENCE_WEIGHTS[(confidence as usize).min(CONFIDENCE_WEIGHTS.len() - 1)]
}

/// Quadratic falloff with measured distance.
#[inline]
pub fn distance_weight(depth: f32) -> f32 {
    1.0 / (1.0 + DISTANCE_DECAY_ALPHA * depth * depth)
}

/// Grazing-angle penalty with a floor so oblique rays still contribute.
#[inline]
pub fn viewing_angle_weight(view_ray: Vec3, surface_normal: Vec3) -> f32 {
    view_ray.dot(surface_normal).abs().max(VIEW_ANGLE_WEIGHT_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection() {
        assert_eq!(voxel_size_for_depth(0.5), 0.005);
        assert_eq!(voxel_size_for_depth(0.999), 0.005);
        assert_eq!(voxel_size_for_depth(1.0), 0.01);
        assert_eq!(voxel_size_for_depth(2.0), 0.01);
        assert_eq!(voxel_size_for_depth(3.0), 0.02);
        assert_eq!(voxel_size_for_depth(4.0), 0.02);
    }

    #[test]
    fn test_truncation_per_tier() {
        // 5 mm: 3*0.005 = 0.015 wins over the 0.01 floor.
        assert!((truncation_distance(0.005) - 0.015).abs() < 1e-6);
        assert!((truncation_distance(0.01) - 0.03).abs() < 1e-6);
        assert!((truncation_distance(0.02) - 0.06).abs() < 1e-6);
    }

    #[test]
    fn test_truncation_floor_guardrail() {
        // A hypothetical sub-tier voxel size is caught by the absolute floor.
        assert!(truncation_distance(0.001) >= 0.01);
        // And the two-voxel guardrail holds everywhere.
        for vs in [0.001f32, 0.005, 0.01, 0.02, 0.04] {
            assert!(truncation_distance(vs) >= 2.0 * vs);
        }
    }

    #[test]
    fn test_confidence_weights_clamp_high() {
        assert_eq!(confidence_weight(0), 0.1);
        assert_eq!(confidence_weight(1), 0.5);
        assert_eq!(confidence_weight(2), 1.0);
        assert_eq!(confidence_weight(200), 1.0);
    }

    #[test]
    fn test_distance_weight_decays() {
        assert!((distance_weight(0.0) - 1.0).abs() < 1e-6);
        let near = distance_weight(1.0);
        let far = distance_weight(4.0);
        assert!(near > far);
        assert!((near - 1.0 / 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_viewing_angle_floor() {
        let normal = Vec3::Y;
        assert_eq!(viewing_angle_weight(Vec3::X, normal), 0.1);
        assert!((viewing_angle_weight(Vec3::Y, normal) - 1.0).abs() < 1e-6);
        assert!((viewing_angle_weight(-Vec3::Y, normal) - 1.0).abs() < 1e-6);
    }
}
