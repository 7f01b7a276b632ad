//! Volume manager
//!
//! Single-writer owner of the voxel field. Every depth frame runs an
//! ordered gate chain before any voxel is touched; accepted frames are
//! dispatched to the integration backend, fed back into the thermal AIMD
//! loop, and logged to the session ring. Host events (thermal state,
//! memory pressure, reset) arrive as discrete calls on the same writer.

pub mod motion;
pub mod record;
pub mod thermal;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat3, Vec3};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, debug_span, error, info, warn};

use crate::backend::IntegrationBackend;
use crate::config::EngineConfig;
use crate::constants::{
    self, CONSECUTIVE_REJECT_FAIL, CONSECUTIVE_REJECT_WARN, DEPTH_MAX, DEPTH_MIN,
    IDLE_LOOKAHEAD_DISTANCE, INTEGRATION_TIMEOUT_MS, KEYFRAME_FRAME_INTERVAL,
    KEYFRAME_ROTATION_DEG, KEYFRAME_TRANSLATION, MAX_POSE_DELTA_PER_FRAME, MAX_ANGULAR_VELOCITY,
    MAX_TOTAL_VOXEL_BLOCKS, MIN_ROTATION_DELTA, MIN_TRANSLATION_DELTA, MIN_VALID_PIXEL_RATIO,
    NOMINAL_FRAME_DT, PRESSURE_CRITICAL_RADIUS, PRESSURE_TERMINAL_RADIUS, STALE_BLOCK_EVICT_SECS,
    TELEPORT_PAUSE_STREAK,
};
use crate::frame::{DepthDataProvider, IntegrationInput, IntegrationStats, TrackingState};
use crate::math;
use crate::mesh::{MeshExtractor, MeshOutput};
use crate::voxel::{resolution, BlockIndex, BlockPool, BlockTable, Voxel};
use crate::EngineError;

use motion::{MotionEstimator, MotionTier};
use record::{IntegrationRecord, RecordRing};
use thermal::{ThermalController, ThermalState};

/// Why a frame was not (fully) integrated. Non-fatal; the host decides
/// what, if anything, to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TrackingLost,
    PoseTeleport,
    PoseJitter,
    ThermalThrottle,
    FrameTimeout,
    LowValidPixels,
    MemoryPressure,
}

/// Result of one `integrate` call.
#[derive(Debug, Clone, Copy)]
pub enum IntegrationOutcome {
    Integrated(IntegrationStats),
    Skipped(SkipReason),
}

/// Host-supplied memory pressure tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressureLevel {
    Warning,
    Critical,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Ok,
    Warn,
    Fail,
}

/// Pollable session health summary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionHealth {
    pub consecutive_rejections: u32,
    pub level: HealthLevel,
    /// Latched after three consecutive pose teleports; cleared by the
    /// next accepted frame or `reset`.
    pub pause_requested: bool,
}

/// Point-in-time session statistics for host dashboards.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FusionStats {
    pub frames_seen: u64,
    pub frames_integrated: u64,
    pub frames_skipped_tracking: u64,
    pub frames_skipped_teleport: u64,
    pub frames_skipped_jitter: u64,
    pub frames_skipped_thermal: u64,
    pub frames_skipped_timeout: u64,
    pub frames_skipped_low_pixels: u64,
    pub frames_skipped_pressure: u64,
    pub live_blocks: usize,
    pub pool_allocated: usize,
    pub pool_capacity: usize,
    pub triangles_emitted_total: u64,
    pub keyframes: u32,
    pub current_integration_skip: u32,
    pub current_mesh_block_budget: usize,
}

static CONSTANTS_CHECK: OnceCell<Result<(), String>> = OnceCell::new();

/// Convenience handle satisfying the single-writer model for hosts that
/// drive the volume from more than one task.
pub type SharedVolume = Arc<Mutex<Volume>>;

pub struct Volume {
    config: EngineConfig,
    table: BlockTable,
    pool: BlockPool,
    backend: Box<dyn IntegrationBackend + Send>,
    extractor: MeshExtractor,
    thermal: ThermalController,
    motion: MotionEstimator,
    records: RecordRing,

    frame_count: u64,
    frames_integrated: u64,
    skip_counts: [u64; 7],
    last_timestamp: Option<f64>,
    last_pose: Option<(Vec3, Mat3)>,
    last_camera_position: Vec3,

    consecutive_rejections: u32,
    teleport_streak: u32,
    pause_requested: bool,
    pressure_breather: bool,

    keyframe_count: u32,
    last_keyframe_pose: Option<(u64, Vec3, Mat3)>,
}

impl Volume {
    pub fn new(
        config: EngineConfig,
        backend: Box<dyn IntegrationBackend + Send>,
    ) -> Result<Self, EngineError> {
        let check = CONSTANTS_CHECK.get_or_init(constants::validate);
        if let Err(msg) = check {
            return Err(EngineError::InvalidConstants(msg.clone()));
        }
        config
            .validate()
            .map_err(EngineError::Config)?;

        info!(
            target: "scanfuse::volume",
            backend = backend.name(),
            pool_capacity = config.pool_capacity,
            hash_capacity = config.hash_initial_capacity,
            "volume created"
        );

        Ok(Self {
            table: BlockTable::with_capacity(config.hash_initial_capacity),
            pool: BlockPool::new(config.pool_capacity),
            backend,
            extractor: MeshExtractor::new(),
            thermal: ThermalController::new(),
            motion: MotionEstimator::new(),
            records: RecordRing::new(),
            frame_count: 0,
            frames_integrated: 0,
            skip_counts: [0; 7],
            last_timestamp: None,
            last_pose: None,
            last_camera_position: Vec3::ZERO,
            consecutive_rejections: 0,
            teleport_streak: 0,
            pause_requested: false,
            pressure_breather: false,
            keyframe_count: 0,
            last_keyframe_pose: None,
            config,
        })
    }

    pub fn into_shared(self) -> SharedVolume {
        Arc::new(Mutex::new(self))
    }

    /// Fuse one depth frame through the gate chain. Gate failures come
    /// back as `Ok(Skipped(..))`; structural failures (pool exhausted
    /// beyond recovery) as `Err`.
    pub fn integrate(
        &mut self,
        input: &IntegrationInput,
        depth: &dyn DepthDataProvider,
    ) -> Result<IntegrationOutcome, EngineError> {
        let started = Instant::now();
        let frame_index = self.frame_count;
        self.frame_count += 1;
        let _span = debug_span!("integrate", frame = frame_index, timestamp = input.timestamp)
            .entered();

        // Breather after a hard memory pressure event.
        if self.pressure_breather {
            self.pressure_breather = false;
            return Ok(self.skip(SkipReason::MemoryPressure));
        }

        // 1. Tracking must be healthy.
        if input.tracking_state != TrackingState::Normal {
            return Ok(self.skip(SkipReason::TrackingLost));
        }

        let position = input.camera_position();
        let rotation = input.rotation();

        if let Some((prev_pos, prev_rot)) = self.last_pose {
            // 2. Translation teleport.
            let translation_delta = (position - prev_pos).length();
            if translation_delta > MAX_POSE_DELTA_PER_FRAME {
                return Ok(self.skip(SkipReason::PoseTeleport));
            }

            // 3. Rotation speed against the real frame spacing when we
            // have it, the nominal 60 Hz otherwise.
            let rotation_delta = math::rotation_angle_between(&rotation, &prev_rot);
            let dt = match self.last_timestamp {
                Some(prev_ts) if input.timestamp - prev_ts > 1e-4 => input.timestamp - prev_ts,
                _ => NOMINAL_FRAME_DT,
            };
            if rotation_delta / dt as f32 > MAX_ANGULAR_VELOCITY {
                return Ok(self.skip(SkipReason::PoseTeleport));
            }

            // 4. Pose jitter: a camera that is not really moving only
            // smears sensor noise into the field.
            if translation_delta < MIN_TRANSLATION_DELTA && rotation_delta < MIN_ROTATION_DELTA {
                return Ok(self.skip(SkipReason::PoseJitter));
            }
        }

        // 5. Thermal throttle.
        if frame_index % self.thermal.current_skip() as u64 != 0 {
            return Ok(self.skip(SkipReason::ThermalThrottle));
        }

        // 6. Back-project the depth image and resolve the active block set.
        let (active, accepted, sampled) = self.collect_blocks(input, depth)?;
        let allocated = active.len() as u32;
        self.table.rehash_if_needed();

        // 7. Enough of the image must have survived rejection.
        let ratio = accepted as f32 / sampled.max(1) as f32;
        if ratio < MIN_VALID_PIXEL_RATIO {
            debug!(target: "scanfuse::volume", ratio, "valid pixel ratio below threshold");
            return Ok(self.skip(SkipReason::LowValidPixels));
        }

        // 8. Capacity cap with LRU fallback.
        if self.table.len() > MAX_TOTAL_VOXEL_BLOCKS {
            self.evict_lru_to(MAX_TOTAL_VOXEL_BLOCKS);
        }

        // 9. Dispatch.
        let mut stats = self
            .backend
            .process_frame(input, depth, &mut self.pool, &active);
        stats.blocks_allocated = allocated;

        // 10. Wall-clock budget. Voxel work already applied stays
        // committed, but a late frame counts as skipped, not integrated.
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        let late = elapsed_ms > INTEGRATION_TIMEOUT_MS;

        // 11. Thermal feedback, recorded even for late frames.
        self.thermal.observe_frame(stats.gpu_time_ms);

        if late {
            warn!(
                target: "scanfuse::volume",
                elapsed_ms,
                budget_ms = INTEGRATION_TIMEOUT_MS,
                "frame exceeded integration budget"
            );
            return Ok(self.skip(SkipReason::FrameTimeout));
        }

        // 12. Record and advance.
        let (is_keyframe, keyframe_id) = self.mark_keyframe(position, rotation);
        self.records.push(IntegrationRecord {
            timestamp: input.timestamp,
            pose: input.camera_to_world,
            intrinsics: input.intrinsics,
            affected_blocks: active.iter().map(|(k, _)| *k).collect(),
            is_keyframe,
            keyframe_id,
        });
        self.last_pose = Some((position, rotation));
        self.last_timestamp = Some(input.timestamp);
        self.last_camera_position = position;
        self.motion.push(input.timestamp, position, rotation);
        self.frames_integrated += 1;

        // 13. Anticipatory allocation while the camera hovers.
        self.idle_prealloc(position);

        self.consecutive_rejections = 0;
        self.teleport_streak = 0;
        self.pause_requested = false;
        debug!(
            target: "scanfuse::volume",
            blocks = stats.blocks_updated,
            voxels = stats.voxels_updated,
            elapsed_ms,
            "frame integrated"
        );
        Ok(IntegrationOutcome::Integrated(stats))
    }

    /// Extract the incremental mesh, unless the camera is sweeping too
    /// fast for the result to be worth drawing.
    pub fn extract_mesh(&mut self) -> MeshOutput {
        let timestamp = self.last_timestamp.unwrap_or(0.0);
        if self.motion.tier() == MotionTier::Fast {
            debug!(target: "scanfuse::mesh", "extraction deferred, camera in fast motion");
            return MeshOutput {
                extraction_timestamp: timestamp,
                dirty_blocks_remaining: MeshExtractor::dirty_block_count(&self.table, &self.pool),
                ..MeshOutput::default()
            };
        }
        self.extractor.extract_incremental(
            &self.table,
            &mut self.pool,
            self.config.max_triangles_per_cycle,
            timestamp,
        )
    }

    /// Host thermal state change (raw platform enum value).
    pub fn handle_thermal_state(&mut self, raw_state: u8) {
        self.thermal
            .set_system_state(ThermalState::from_raw(raw_state), Instant::now());
    }

    /// Tiered eviction in response to host memory pressure. Never fails;
    /// at worst the volume ends up empty.
    pub fn handle_memory_pressure(&mut self, level: MemoryPressureLevel) {
        let before = self.table.len();
        // Collect first, then remove: the eviction pass must not
        // invalidate the key list it walks.
        let victims: Vec<BlockIndex> = match level {
            MemoryPressureLevel::Warning => {
                let now = self.last_timestamp.unwrap_or(0.0);
                self.collect_blocks_where(|_, block| {
                    block.last_observed < now - STALE_BLOCK_EVICT_SECS
                })
            }
            MemoryPressureLevel::Critical => {
                let camera = self.last_camera_position;
                self.collect_blocks_where(|key, block| {
                    key.world_center(block.voxel_size).distance(camera) > PRESSURE_CRITICAL_RADIUS
                })
            }
            MemoryPressureLevel::Terminal => {
                let camera = self.last_camera_position;
                self.collect_blocks_where(|key, block| {
                    key.world_center(block.voxel_size).distance(camera) > PRESSURE_TERMINAL_RADIUS
                })
            }
        };
        for key in &victims {
            self.table.remove(*key, &mut self.pool);
        }
        if level != MemoryPressureLevel::Warning {
            self.pressure_breather = true;
        }
        info!(
            target: "scanfuse::memory",
            ?level,
            evicted = victims.len(),
            live_before = before,
            live_after = self.table.len(),
            "memory pressure handled"
        );
    }

    /// Drop the whole session state. The pool keeps its storage (and base
    /// address); every block returns to the free-list.
    pub fn reset(&mut self) {
        let keys: Vec<BlockIndex> = self.table.live_keys().to_vec();
        for key in keys {
            self.table.remove(key, &mut self.pool);
        }
        self.extractor = MeshExtractor::new();
        self.thermal.reset();
        self.motion.clear();
        self.records.clear();
        self.frame_count = 0;
        self.frames_integrated = 0;
        self.skip_counts = [0; 7];
        self.last_timestamp = None;
        self.last_pose = None;
        self.last_camera_position = Vec3::ZERO;
        self.consecutive_rejections = 0;
        self.teleport_streak = 0;
        self.pause_requested = false;
        self.pressure_breather = false;
        self.keyframe_count = 0;
        self.last_keyframe_pose = None;
        info!(target: "scanfuse::volume", "session reset");
    }

    /// Read the voxel containing a world position, picking the resolution
    /// tier from the point's distance to the camera.
    pub fn query_voxel(&self, world: Vec3) -> Option<Voxel> {
        let estimated_depth = world.distance(self.last_camera_position);
        let voxel_size = resolution::voxel_size_for_depth(estimated_depth);
        let key = BlockIndex::of_world_point(world, voxel_size);
        let slot = self.table.lookup(key)?;
        let block = self.pool.block(slot);
        let local = (world - key.world_origin(block.voxel_size)) / block.voxel_size;
        let hi = (crate::constants::BLOCK_EDGE - 1) as i32;
        let vx = (local.x.floor() as i32).clamp(0, hi) as usize;
        let vy = (local.y.floor() as i32).clamp(0, hi) as usize;
        let vz = (local.z.floor() as i32).clamp(0, hi) as usize;
        Some(*block.voxel(vx, vy, vz))
    }

    pub fn health(&self) -> SessionHealth {
        let level = if self.consecutive_rejections >= CONSECUTIVE_REJECT_FAIL {
            HealthLevel::Fail
        } else if self.consecutive_rejections >= CONSECUTIVE_REJECT_WARN {
            HealthLevel::Warn
        } else {
            HealthLevel::Ok
        };
        SessionHealth {
            consecutive_rejections: self.consecutive_rejections,
            level,
            pause_requested: self.pause_requested,
        }
    }

    pub fn stats(&self) -> FusionStats {
        FusionStats {
            frames_seen: self.frame_count,
            frames_integrated: self.frames_integrated,
            frames_skipped_tracking: self.skip_counts[0],
            frames_skipped_teleport: self.skip_counts[1],
            frames_skipped_jitter: self.skip_counts[2],
            frames_skipped_thermal: self.skip_counts[3],
            frames_skipped_timeout: self.skip_counts[4],
            frames_skipped_low_pixels: self.skip_counts[5],
            frames_skipped_pressure: self.skip_counts[6],
            live_blocks: self.table.len(),
            pool_allocated: self.pool.allocated_count(),
            pool_capacity: self.pool.capacity(),
            triangles_emitted_total: self.extractor.triangles_emitted_total(),
            keyframes: self.keyframe_count,
            current_integration_skip: self.thermal.current_skip(),
            current_mesh_block_budget: self.extractor.current_block_budget(),
        }
    }

    /// The session ring as JSON, oldest record first.
    pub fn session_log_json(&self) -> serde_json::Result<String> {
        self.records.to_json()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ---- internals ----

    fn skip(&mut self, reason: SkipReason) -> IntegrationOutcome {
        self.skip_counts[reason as usize] += 1;
        self.consecutive_rejections += 1;

        if reason == SkipReason::PoseTeleport {
            self.teleport_streak += 1;
            if self.teleport_streak >= TELEPORT_PAUSE_STREAK && !self.pause_requested {
                self.pause_requested = true;
                warn!(
                    target: "scanfuse::volume",
                    streak = self.teleport_streak,
                    "repeated pose teleports, requesting session pause"
                );
            }
        } else {
            self.teleport_streak = 0;
        }

        if self.consecutive_rejections == CONSECUTIVE_REJECT_WARN {
            warn!(
                target: "scanfuse::volume",
                rejections = self.consecutive_rejections,
                ?reason,
                "sustained frame rejection"
            );
        } else if self.consecutive_rejections == CONSECUTIVE_REJECT_FAIL {
            error!(
                target: "scanfuse::volume",
                rejections = self.consecutive_rejections,
                ?reason,
                "session is not integrating; host intervention required"
            );
        }
        debug!(target: "scanfuse::volume", ?reason, "frame skipped");
        IntegrationOutcome::Skipped(reason)
    }

    /// Back-project sampled depth pixels to world space and allocate the
    /// union of touched blocks. Returns (active set, accepted, sampled).
    fn collect_blocks(
        &mut self,
        input: &IntegrationInput,
        depth: &dyn DepthDataProvider,
    ) -> Result<(Vec<(BlockIndex, u32)>, usize, usize), EngineError> {
        let stride = self.config.depth_stride.max(1) as u32;
        let mut active: Vec<(BlockIndex, u32)> = Vec::new();
        let mut seen: HashSet<BlockIndex> = HashSet::new();
        let mut accepted = 0usize;
        let mut sampled = 0usize;

        let mut y = 0;
        while y < input.height.min(depth.height()) {
            let mut x = 0;
            while x < input.width.min(depth.width()) {
                sampled += 1;
                let measured = depth.depth_at(x, y);
                if !measured.is_nan() && (DEPTH_MIN..=DEPTH_MAX).contains(&measured) {
                    let confidence = depth.confidence_at(x, y);
                    if !(self.config.skip_low_confidence && confidence == 0) {
                        accepted += 1;
                        let p_cam = input.intrinsics.unproject(x as f32, y as f32, measured);
                        let world = input.camera_to_world.transform_point3(p_cam);
                        let voxel_size = resolution::voxel_size_for_depth(measured);
                        let key = BlockIndex::of_world_point(world, voxel_size);
                        if seen.insert(key) {
                            let slot = self.insert_block(key, voxel_size)?;
                            active.push((key, slot));
                        }
                    }
                }
                x += stride;
            }
            y += stride;
        }

        Ok((active, accepted, sampled))
    }

    /// insert_or_get with the two structural recovery paths: a forced
    /// rehash on probe-bound exhaustion, and an LRU trim on pool
    /// exhaustion. Each remedy is tried once.
    fn insert_block(&mut self, key: BlockIndex, voxel_size: f32) -> Result<u32, EngineError> {
        match self.table.insert_or_get(key, voxel_size, &mut self.pool) {
            Ok(slot) => Ok(slot),
            Err(EngineError::ProbeBoundExhausted(_)) => {
                self.table.force_rehash();
                self.table.insert_or_get(key, voxel_size, &mut self.pool)
            }
            Err(EngineError::PoolExhausted { .. }) => {
                let target = self.pool.capacity() - self.pool.capacity() / 10;
                warn!(
                    target: "scanfuse::memory",
                    target_blocks = target,
                    "pool exhausted, trimming least recently observed blocks"
                );
                self.evict_lru_to(target);
                self.table.insert_or_get(key, voxel_size, &mut self.pool)
            }
            Err(e) => Err(e),
        }
    }

    /// Evict least-recently-observed blocks until at most `target` remain.
    /// Ties resolve by stable key order.
    fn evict_lru_to(&mut self, target: usize) {
        let excess = self.table.len().saturating_sub(target);
        if excess == 0 {
            return;
        }
        let mut aged: Vec<(f64, BlockIndex)> = self
            .table
            .live_keys()
            .iter()
            .filter_map(|k| {
                self.table
                    .lookup(*k)
                    .map(|slot| (self.pool.block(slot).last_observed, *k))
            })
            .collect();
        aged.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let victims: Vec<BlockIndex> = aged.into_iter().take(excess).map(|(_, k)| k).collect();
        for key in &victims {
            self.table.remove(*key, &mut self.pool);
        }
        info!(
            target: "scanfuse::memory",
            evicted = victims.len(),
            live = self.table.len(),
            "LRU eviction"
        );
    }

    fn collect_blocks_where<F>(&self, predicate: F) -> Vec<BlockIndex>
    where
        F: Fn(&BlockIndex, &crate::voxel::VoxelBlock) -> bool,
    {
        let mut matched = Vec::new();
        self.table.for_each_block(|key, slot| {
            if predicate(key, self.pool.block(slot)) {
                matched.push(*key);
            }
        });
        matched
    }

    /// Keyframe triggers: frame interval, rotation, or translation since
    /// the last keyframe.
    fn mark_keyframe(&mut self, position: Vec3, rotation: Mat3) -> (bool, Option<u32>) {
        let due = match self.last_keyframe_pose {
            None => true,
            Some((frame, kf_pos, kf_rot)) => {
                self.frames_integrated - frame >= KEYFRAME_FRAME_INTERVAL
                    || (position - kf_pos).length() >= KEYFRAME_TRANSLATION
                    || math::rotation_angle_between(&rotation, &kf_rot).to_degrees()
                        >= KEYFRAME_ROTATION_DEG
            }
        };
        if !due {
            return (false, None);
        }
        let id = self.keyframe_count;
        self.keyframe_count += 1;
        self.last_keyframe_pose = Some((self.frames_integrated, position, rotation));
        debug!(target: "scanfuse::volume", keyframe_id = id, "keyframe marked");
        (true, Some(id))
    }

    /// While the camera hovers, pre-allocate the block half a meter down
    /// the recent velocity direction so a resumed sweep lands on warm
    /// storage. A numerically zero velocity leaves nothing to extrapolate.
    fn idle_prealloc(&mut self, position: Vec3) {
        if self.motion.tier() != MotionTier::Idle {
            return;
        }
        let velocity = self.motion.velocity();
        let speed = velocity.length();
        if speed < 1e-6 {
            return;
        }
        let future = position + velocity / speed * IDLE_LOOKAHEAD_DISTANCE;
        let voxel_size = resolution::voxel_size_for_depth(IDLE_LOOKAHEAD_DISTANCE);
        let key = BlockIndex::of_world_point(future, voxel_size);
        if self.table.lookup(key).is_none() {
            if let Err(e) = self.insert_block(key, voxel_size) {
                debug!(target: "scanfuse::volume", error = %e, "anticipatory allocation failed");
            } else {
                debug!(target: "scanfuse::volume", ?key, "anticipatory block allocated");
            }
        }
    }
}
