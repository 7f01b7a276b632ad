//! Small numeric helpers on top of glam
//!
//! Half-precision SDF codec, interpolation, and the rotation-delta
//! extraction used by the pose gates. Everything here is branch-light and
//! safe to call per voxel.

use glam::{Mat3, Vec3};
use half::f16;

/// Encode a normalized SDF value for storage. Values are clamped to
/// [-1, +1] in f32 *before* the half conversion so round-trip error can
/// never push a stored sample outside the contract range.
#[inline]
pub fn encode_sdf(sdf: f32) -> f16 {
    f16::from_f32(sdf.clamp(-1.0, 1.0))
}

/// Decode a stored SDF sample back to f32.
#[inline]
pub fn decode_sdf(raw: f16) -> f32 {
    raw.to_f32()
}

/// Linear interpolation.
#[inline]
pub fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Angle in radians between two rotations, from the trace of the relative
/// rotation. The argument to acos is clamped: accumulated float error can
/// push it a few ULP outside [-1, 1].
pub fn rotation_angle_between(a: &Mat3, b: &Mat3) -> f32 {
    let rel = *a * b.transpose();
    let trace = rel.x_axis.x + rel.y_axis.y + rel.z_axis.z;
    let cos_theta = ((trace - 1.0) * 0.5).clamp(-1.0, 1.0);
    cos_theta.acos()
}

/// Component-wise floor division of a point by a positive cell size,
/// rounding toward negative infinity. Maps world positions onto integer
/// lattice coordinates.
#[inline]
pub fn lattice_coord(p: Vec3, cell: f32) -> glam::IVec3 {
    glam::IVec3::new(
        (p.x / cell).floor() as i32,
        (p.y / cell).floor() as i32,
        (p.z / cell).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_sdf_roundtrip_stays_in_range() {
        for raw in [-5.0f32, -1.0, -0.999, -0.3, 0.0, 0.3, 0.999, 1.0, 5.0] {
            let decoded = decode_sdf(encode_sdf(raw));
            assert!((-1.0..=1.0).contains(&decoded), "{raw} -> {decoded}");
        }
    }

    #[test]
    fn test_sdf_half_precision_is_close() {
        let decoded = decode_sdf(encode_sdf(0.12345));
        assert!((decoded - 0.12345).abs() < 1e-3);
    }

    #[test]
    fn test_rotation_angle_identity() {
        let a = Mat3::IDENTITY;
        assert!(rotation_angle_between(&a, &a) < 1e-6);
    }

    #[test]
    fn test_rotation_angle_quarter_turn() {
        let a = Mat3::IDENTITY;
        let b = Mat3::from_rotation_y(FRAC_PI_2);
        let angle = rotation_angle_between(&a, &b);
        assert!((angle - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_lattice_coord_floors_toward_negative_infinity() {
        assert_eq!(lattice_coord(Vec3::new(-0.001, 0.0, 0.079), 0.08), glam::IVec3::new(-1, 0, 0));
        assert_eq!(lattice_coord(Vec3::new(0.08, 0.16, -0.08), 0.08), glam::IVec3::new(1, 2, -1));
    }

    #[test]
    fn test_mix_endpoints() {
        assert_eq!(mix(2.0, 6.0, 0.0), 2.0);
        assert_eq!(mix(2.0, 6.0, 1.0), 6.0);
        assert_eq!(mix(2.0, 6.0, 0.5), 4.0);
    }
}
