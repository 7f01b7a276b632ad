//! Thermal AIMD controller
//!
//! Two tiers steer the integration skip interval: the host OS supplies a
//! hard ceiling per thermal state, and within that ceiling an AIMD loop
//! reacts to per-frame GPU time. Recovery is additive and slow, damage
//! control is multiplicative and immediate.

use std::time::Instant;

use tracing::{debug, info};

use crate::constants::{
    INTEGRATION_TIMEOUT_MS, THERMAL_CEILING_BY_STATE, THERMAL_DEGRADE_HYSTERESIS_SECS,
    THERMAL_GOOD_FRAME_FRACTION, THERMAL_MAX_INTEGRATION_SKIP, THERMAL_RECOVER_GOOD_FRAMES,
    THERMAL_RECOVER_HYSTERESIS_SECS,
};

/// Host OS thermal state, coarsest to hottest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThermalState {
    Nominal = 0,
    Fair = 1,
    Serious = 2,
    Critical = 3,
}

impl ThermalState {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Nominal,
            1 => Self::Fair,
            2 => Self::Serious,
            _ => Self::Critical,
        }
    }

    /// Skip-interval ceiling imposed by this state.
    pub fn skip_ceiling(self) -> u32 {
        THERMAL_CEILING_BY_STATE[self as usize]
    }
}

pub struct ThermalController {
    current_skip: u32,
    system_ceiling: u32,
    good_frames: u32,
    last_ceiling_change: Option<Instant>,
}

impl ThermalController {
    pub fn new() -> Self {
        Self {
            current_skip: 1,
            system_ceiling: ThermalState::Nominal.skip_ceiling(),
            good_frames: 0,
            last_ceiling_change: None,
        }
    }

    /// Current skip interval. Integration runs on frames where
    /// `frame_count % skip == 0`.
    pub fn current_skip(&self) -> u32 {
        self.current_skip
    }

    pub fn system_ceiling(&self) -> u32 {
        self.system_ceiling
    }

    /// Feed one integrated frame's GPU time back into the loop.
    pub fn observe_frame(&mut self, gpu_time_ms: f64) {
        let good = gpu_time_ms < INTEGRATION_TIMEOUT_MS * THERMAL_GOOD_FRAME_FRACTION;
        if good {
            self.good_frames += 1;
            if self.good_frames >= THERMAL_RECOVER_GOOD_FRAMES {
                // Additive increase of throughput: ease the skip by one.
                let eased = self.current_skip.saturating_sub(1).max(1);
                if eased != self.current_skip {
                    debug!(
                        target: "scanfuse::thermal",
                        skip = eased,
                        "thermal recovery, easing integration skip"
                    );
                }
                self.current_skip = eased;
                self.good_frames = 0;
            }
        } else {
            // Multiplicative decrease of throughput: double the skip.
            let doubled = (self.current_skip * 2)
                .min(self.system_ceiling)
                .min(THERMAL_MAX_INTEGRATION_SKIP);
            if doubled != self.current_skip {
                info!(
                    target: "scanfuse::thermal",
                    gpu_time_ms,
                    skip = doubled,
                    "slow frame, backing off integration rate"
                );
            }
            self.current_skip = doubled;
            self.good_frames = 0;
        }
    }

    /// Apply a host thermal state change with asymmetric hysteresis:
    /// worsening is accepted at most every 10 s, improvement at most every
    /// 5 s. On a rise the skip is clamped up to the new ceiling at once;
    /// on a fall it is clamped down to it.
    pub fn set_system_state(&mut self, state: ThermalState, now: Instant) {
        let new_ceiling = state.skip_ceiling();
        if new_ceiling == self.system_ceiling {
            return;
        }
        let rising = new_ceiling > self.system_ceiling;
        let cooldown = if rising {
            THERMAL_DEGRADE_HYSTERESIS_SECS
        } else {
            THERMAL_RECOVER_HYSTERESIS_SECS
        };
        if let Some(last) = self.last_ceiling_change {
            if now.duration_since(last).as_secs_f64() < cooldown {
                debug!(
                    target: "scanfuse::thermal",
                    ?state,
                    "thermal state change inside hysteresis window, deferred"
                );
                return;
            }
        }
        info!(
            target: "scanfuse::thermal",
            ?state,
            ceiling = new_ceiling,
            rising,
            "thermal ceiling applied"
        );
        self.system_ceiling = new_ceiling;
        self.last_ceiling_change = Some(now);
        if rising {
            self.current_skip = self.current_skip.max(new_ceiling);
        } else {
            self.current_skip = self.current_skip.min(new_ceiling);
        }
        self.good_frames = 0;
    }

    pub fn reset(&mut self) {
        self.current_skip = 1;
        self.system_ceiling = ThermalState::Nominal.skip_ceiling();
        self.good_frames = 0;
        self.last_ceiling_change = None;
    }
}

impl Default for ThermalController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_recovery_after_thirty_good_frames() {
        let mut t = ThermalController::new();
        t.set_system_state(ThermalState::Serious, Instant::now());
        assert_eq!(t.current_skip(), 4);

        for _ in 0..30 {
            t.observe_frame(5.0);
        }
        assert_eq!(t.current_skip(), 3);
        // The counter reset: 29 more good frames change nothing.
        for _ in 0..29 {
            t.observe_frame(5.0);
        }
        assert_eq!(t.current_skip(), 3);
        t.observe_frame(5.0);
        assert_eq!(t.current_skip(), 2);
    }

    #[test]
    fn test_bad_frame_doubles_within_ceiling() {
        let mut t = ThermalController::new();
        t.set_system_state(ThermalState::Serious, Instant::now());
        assert_eq!(t.system_ceiling(), 4);
        // Work the skip down to 1 first.
        for _ in 0..120 {
            t.observe_frame(5.0);
        }
        assert_eq!(t.current_skip(), 1);

        t.observe_frame(15.0);
        assert_eq!(t.current_skip(), 2, "min(2*1, ceiling 4, 12)");
        t.observe_frame(15.0);
        assert_eq!(t.current_skip(), 4);
        t.observe_frame(15.0);
        assert_eq!(t.current_skip(), 4, "ceiling caps the decrease");
    }

    #[test]
    fn test_good_frame_threshold_is_eighty_percent() {
        let mut t = ThermalController::new();
        t.set_system_state(ThermalState::Fair, Instant::now());
        // 7.9 ms is good against a 10 ms budget, 8.1 ms is not.
        for _ in 0..29 {
            t.observe_frame(7.9);
        }
        t.observe_frame(8.1);
        assert_eq!(t.current_skip(), 2, "bad frame resets the streak and doubles");
    }

    #[test]
    fn test_rising_ceiling_clamps_skip_up_immediately() {
        let mut t = ThermalController::new();
        assert_eq!(t.current_skip(), 1);
        t.set_system_state(ThermalState::Critical, Instant::now());
        assert_eq!(t.current_skip(), 12);
    }

    #[test]
    fn test_falling_ceiling_clamps_skip_down() {
        let mut t = ThermalController::new();
        let t0 = Instant::now();
        t.set_system_state(ThermalState::Critical, t0);
        assert_eq!(t.current_skip(), 12);
        // Past the 5 s recover hysteresis, improvement is accepted.
        t.set_system_state(ThermalState::Fair, t0 + Duration::from_secs(6));
        assert_eq!(t.system_ceiling(), 2);
        assert_eq!(t.current_skip(), 2);
    }

    #[test]
    fn test_hysteresis_defers_rapid_changes() {
        let mut t = ThermalController::new();
        let t0 = Instant::now();
        t.set_system_state(ThermalState::Serious, t0);
        assert_eq!(t.system_ceiling(), 4);

        // A worsening inside the 10 s window is deferred.
        t.set_system_state(ThermalState::Critical, t0 + Duration::from_secs(4));
        assert_eq!(t.system_ceiling(), 4);

        // An improvement must also wait out its (shorter) window.
        t.set_system_state(ThermalState::Nominal, t0 + Duration::from_secs(4));
        assert_eq!(t.system_ceiling(), 4);
        t.set_system_state(ThermalState::Nominal, t0 + Duration::from_secs(6));
        assert_eq!(t.system_ceiling(), 1);
    }
}
