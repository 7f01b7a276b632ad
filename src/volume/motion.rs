//! Camera motion estimation
//!
//! A short pose-history window yields translation and angular speeds for
//! the motion tiers: meshing defers while the device sweeps fast, and
//! near-stillness enables anticipatory block allocation.

use std::collections::VecDeque;

use glam::{Mat3, Vec3};

use crate::constants::{
    IDLE_ANGULAR_SPEED, IDLE_TRANSLATION_SPEED, MOTION_DEFER_ANGULAR_SPEED,
    MOTION_DEFER_TRANSLATION_SPEED, POSE_HISTORY_CAP,
};
use crate::math;

/// Coarse motion classification derived from the pose window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTier {
    /// Both speeds under the idle thresholds.
    Idle,
    /// Ordinary handheld motion.
    Moving,
    /// Sweeping fast enough that meshing should wait.
    Fast,
}

#[derive(Debug, Clone, Copy)]
struct PoseSample {
    timestamp: f64,
    position: Vec3,
    rotation: Mat3,
}

pub struct MotionEstimator {
    history: VecDeque<PoseSample>,
}

impl MotionEstimator {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(POSE_HISTORY_CAP),
        }
    }

    pub fn push(&mut self, timestamp: f64, position: Vec3, rotation: Mat3) {
        if self.history.len() == POSE_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(PoseSample { timestamp, position, rotation });
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn window(&self) -> Option<(&PoseSample, &PoseSample)> {
        if self.history.len() < 2 {
            return None;
        }
        let oldest = self.history.front()?;
        let newest = self.history.back()?;
        if newest.timestamp - oldest.timestamp <= 1e-6 {
            return None;
        }
        Some((oldest, newest))
    }

    /// Mean translation speed over the window, m/s. Zero until two usable
    /// samples exist.
    pub fn translation_speed(&self) -> f32 {
        match self.window() {
            Some((a, b)) => {
                (b.position - a.position).length() / (b.timestamp - a.timestamp) as f32
            }
            None => 0.0,
        }
    }

    /// Mean angular speed over the window, rad/s.
    pub fn angular_speed(&self) -> f32 {
        match self.window() {
            Some((a, b)) => {
                math::rotation_angle_between(&b.rotation, &a.rotation)
                    / (b.timestamp - a.timestamp) as f32
            }
            None => 0.0,
        }
    }

    /// Mean velocity vector over the window, m/s.
    pub fn velocity(&self) -> Vec3 {
        match self.window() {
            Some((a, b)) => (b.position - a.position) / (b.timestamp - a.timestamp) as f32,
            None => Vec3::ZERO,
        }
    }

    pub fn tier(&self) -> MotionTier {
        let t = self.translation_speed();
        let r = self.angular_speed();
        if t > MOTION_DEFER_TRANSLATION_SPEED || r > MOTION_DEFER_ANGULAR_SPEED {
            MotionTier::Fast
        } else if t < IDLE_TRANSLATION_SPEED && r < IDLE_ANGULAR_SPEED {
            MotionTier::Idle
        } else {
            MotionTier::Moving
        }
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new()
    }
}
