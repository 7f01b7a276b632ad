//! Engine constants
//!
//! Single source of truth for every tunable numeric in the engine. Nothing
//! in here is duplicated elsewhere; modules pull from this file and the
//! cross-checks in [`validate`] run once at volume construction.

// ============================
// Voxel blocks & pool
// ============================

/// Edge length of a voxel block, in voxels. Blocks are cubes.
pub const BLOCK_EDGE: usize = 8;

/// Voxels per block (BLOCK_EDGE^3).
pub const BLOCK_VOLUME: usize = BLOCK_EDGE * BLOCK_EDGE * BLOCK_EDGE;

/// Hard cap on simultaneously allocated voxel blocks.
pub const MAX_TOTAL_VOXEL_BLOCKS: usize = 100_000;

/// Upper bound on voxel storage; checked against the pool layout at startup.
pub const MAX_VOXEL_MEMORY_BYTES: usize = 800 * 1024 * 1024;

/// Saturation ceiling for the per-voxel observation weight.
pub const MAX_VOXEL_WEIGHT: u8 = 64;

// ============================
// Spatial hash table
// ============================

/// Initial hash table capacity. Must be a power of two.
pub const HASH_INITIAL_CAPACITY: usize = 65_536;

/// Load factor at which the table doubles.
pub const HASH_LOAD_FACTOR_MAX: f32 = 0.7;

/// Linear-probe bound; insertions and lookups give up past this.
pub const HASH_MAX_PROBE: usize = 128;

// ============================
// Adaptive resolution
// ============================

/// Voxel edge length for close-range geometry (depth < 1 m).
pub const VOXEL_SIZE_NEAR: f32 = 0.005;

/// Voxel edge length for mid-range geometry (1 m ≤ depth < 3 m).
pub const VOXEL_SIZE_MID: f32 = 0.01;

/// Voxel edge length for far geometry (depth ≥ 3 m).
pub const VOXEL_SIZE_FAR: f32 = 0.02;

/// Depth threshold between the near and mid tiers, meters.
pub const DEPTH_NEAR_THRESHOLD: f32 = 1.0;

/// Depth threshold between the mid and far tiers, meters.
pub const DEPTH_FAR_THRESHOLD: f32 = 3.0;

/// Truncation distance as a multiple of the voxel size.
pub const TRUNCATION_MULTIPLIER: f32 = 3.0;

/// Absolute floor for the truncation distance, meters.
pub const TRUNCATION_MIN: f32 = 0.01;

// ============================
// Depth & observation weighting
// ============================

/// Measurements closer than this are sensor noise, meters.
pub const DEPTH_MIN: f32 = 0.1;

/// Measurements beyond this carry too little signal, meters.
pub const DEPTH_MAX: f32 = 5.0;

/// Observation weight per sensor confidence class {low, mid, high}.
pub const CONFIDENCE_WEIGHTS: [f32; 3] = [0.1, 0.5, 1.0];

/// Quadratic distance decay coefficient: w = 1 / (1 + alpha * d^2).
pub const DISTANCE_DECAY_ALPHA: f32 = 0.1;

/// Floor for the viewing-angle weight so grazing rays still contribute.
pub const VIEW_ANGLE_WEIGHT_FLOOR: f32 = 0.1;

/// Weight shrink applied by carving-capable backends when a ray passes
/// clean through a voxel. Not exercised by the CPU reference backend.
pub const CARVING_DECAY_RATE: f32 = 0.95;

// ============================
// Integration gates
// ============================

/// Fraction of sampled depth pixels that must survive rejection.
pub const MIN_VALID_PIXEL_RATIO: f32 = 0.3;

/// Translation beyond this between consecutive frames is a tracking
/// teleport, meters.
pub const MAX_POSE_DELTA_PER_FRAME: f32 = 0.1;

/// Rotation speed beyond this is a teleport, rad/s.
pub const MAX_ANGULAR_VELOCITY: f32 = 2.0;

/// Minimum translation for a frame to count as camera motion, meters.
pub const MIN_TRANSLATION_DELTA: f32 = 0.001;

/// Minimum rotation for a frame to count as camera motion, radians.
pub const MIN_ROTATION_DELTA: f32 = 0.002;

/// Wall-clock budget for one integrate call, milliseconds.
pub const INTEGRATION_TIMEOUT_MS: f64 = 10.0;

/// Hard ceiling on a GPU fence wait before the frame is abandoned.
pub const SEMAPHORE_WAIT_TIMEOUT_MS: u64 = 100;

/// Assumed frame spacing when the input carries no usable delta, seconds.
pub const NOMINAL_FRAME_DT: f64 = 1.0 / 60.0;

// ============================
// Session health
// ============================

/// Consecutive rejected frames before the host is warned.
pub const CONSECUTIVE_REJECT_WARN: u32 = 30;

/// Consecutive rejected frames before the session is failed.
pub const CONSECUTIVE_REJECT_FAIL: u32 = 180;

/// Consecutive pose teleports that latch the pause signal.
pub const TELEPORT_PAUSE_STREAK: u32 = 3;

/// Capacity of the per-session integration record ring.
pub const RECORD_RING_CAPACITY: usize = 300;

/// Pose history window used for motion estimation.
pub const POSE_HISTORY_CAP: usize = 10;

// ============================
// Keyframes
// ============================

/// Every Nth integrated frame is a keyframe regardless of motion.
pub const KEYFRAME_FRAME_INTERVAL: u64 = 6;

/// Rotation since the last keyframe that forces a new one, degrees.
pub const KEYFRAME_ROTATION_DEG: f32 = 15.0;

/// Translation since the last keyframe that forces a new one, meters.
pub const KEYFRAME_TRANSLATION: f32 = 0.3;

// ============================
// Thermal AIMD
// ============================

/// Consecutive good frames before the skip interval is eased by one.
pub const THERMAL_RECOVER_GOOD_FRAMES: u32 = 30;

/// Absolute ceiling on the integration skip interval.
pub const THERMAL_MAX_INTEGRATION_SKIP: u32 = 12;

/// Skip ceiling per host thermal state {nominal, fair, serious, critical}.
pub const THERMAL_CEILING_BY_STATE: [u32; 4] = [1, 2, 4, 12];

/// Cooldown before accepting a worsening ceiling change, seconds.
pub const THERMAL_DEGRADE_HYSTERESIS_SECS: f64 = 10.0;

/// Cooldown before accepting an improving ceiling change, seconds.
pub const THERMAL_RECOVER_HYSTERESIS_SECS: f64 = 5.0;

/// A frame is thermally good when GPU time stays under this fraction of
/// the integration timeout.
pub const THERMAL_GOOD_FRAME_FRACTION: f64 = 0.8;

// ============================
// Mesh extraction
// ============================

/// Blocks need this many integrations before they may produce triangles.
pub const MIN_OBSERVATIONS_BEFORE_MESH: u32 = 3;

/// Frames over which a newly revealed block fades in.
pub const MESH_FADE_IN_FRAMES: u32 = 7;

/// Marching cubes interpolation clamp, suppresses sliver triangles.
pub const MC_INTERP_MIN: f32 = 0.1;
pub const MC_INTERP_MAX: f32 = 0.9;

/// Vertex positions snap to this grid, meters.
pub const VERTEX_QUANTIZATION: f32 = 0.0005;

/// Triangles smaller than this are degenerate, square meters.
pub const MIN_TRIANGLE_AREA: f32 = 1e-8;

/// Triangles with a max/min edge ratio beyond this are degenerate.
pub const MAX_TRIANGLE_ASPECT_RATIO: f32 = 100.0;

/// Default per-extraction triangle budget.
pub const MAX_TRIANGLES_PER_CYCLE: usize = 50_000;

// ============================
// Mesh congestion control
// ============================

/// Extraction time budget the controller steers toward, milliseconds.
pub const MESH_BUDGET_TARGET_MS: f64 = 4.0;

/// Cycles faster than this count toward the ramp-up streak.
pub const MESH_BUDGET_GOOD_MS: f64 = 3.0;

/// Cycles slower than this halve the block budget.
pub const MESH_BUDGET_OVERRUN_MS: f64 = 5.0;

/// Block budget bounds per extraction cycle.
pub const MIN_BLOCKS_PER_EXTRACTION: usize = 50;
pub const MAX_BLOCKS_PER_EXTRACTION: usize = 250;

/// Additive ramp applied after a sustained run of good cycles.
pub const BLOCK_BUDGET_RAMP_STEP: usize = 15;

/// Good cycles required before ramping.
pub const BLOCK_BUDGET_GOOD_STREAK: u32 = 3;

/// Fraction of the budget range granted at startup (slow start).
pub const BLOCK_BUDGET_SLOW_START: f32 = 0.25;

/// Good cycles consumed repairing trust after an overrun, before any
/// ramp-up streak may begin.
pub const CONGESTION_FORGIVENESS_CYCLES: u32 = 5;

// ============================
// Motion tiers
// ============================

/// Above either threshold mesh extraction defers to the next cycle.
pub const MOTION_DEFER_TRANSLATION_SPEED: f32 = 0.5;
pub const MOTION_DEFER_ANGULAR_SPEED: f32 = 1.0;

/// Below both thresholds the camera is considered idle.
pub const IDLE_TRANSLATION_SPEED: f32 = 0.01;
pub const IDLE_ANGULAR_SPEED: f32 = 0.05;

/// Anticipatory allocation distance along the recent velocity, meters.
pub const IDLE_LOOKAHEAD_DISTANCE: f32 = 0.5;

// ============================
// Memory pressure
// ============================

/// Warning pressure evicts blocks unobserved for longer than this, seconds.
pub const STALE_BLOCK_EVICT_SECS: f64 = 30.0;

/// Critical pressure evicts blocks farther than this from the camera, meters.
pub const PRESSURE_CRITICAL_RADIUS: f32 = 3.0;

/// Terminal pressure keeps only the immediate neighborhood, meters.
pub const PRESSURE_TERMINAL_RADIUS: f32 = 1.0;

/// GPU heap thresholds for proactive/aggressive trimming, bytes. Consumed
/// by GPU backends; validated here so both paths share one definition.
pub const GPU_MEMORY_PROACTIVE_BYTES: usize = 256 * 1024 * 1024;
pub const GPU_MEMORY_AGGRESSIVE_BYTES: usize = 512 * 1024 * 1024;

// ============================
// Cross-validation
// ============================

/// Verify the relationships between constants that the rest of the engine
/// silently relies on. Runs once at volume construction; a failure here is
/// a build mistake, not a runtime condition, so production callers treat
/// it as a soft session failure rather than aborting.
pub fn validate() -> Result<(), String> {
    let check = |ok: bool, what: &str| -> Result<(), String> {
        if ok {
            Ok(())
        } else {
            Err(format!("constants cross-check failed: {what}"))
        }
    };

    check(
        VOXEL_SIZE_NEAR < VOXEL_SIZE_MID && VOXEL_SIZE_MID < VOXEL_SIZE_FAR,
        "voxel size tiers must be strictly increasing",
    )?;
    check(
        DEPTH_MIN < DEPTH_NEAR_THRESHOLD && DEPTH_NEAR_THRESHOLD < DEPTH_FAR_THRESHOLD,
        "depth tier thresholds must be ordered",
    )?;
    check(DEPTH_FAR_THRESHOLD < DEPTH_MAX, "far tier must start inside the depth range")?;
    check(
        CONFIDENCE_WEIGHTS[0] < CONFIDENCE_WEIGHTS[1] && CONFIDENCE_WEIGHTS[1] < CONFIDENCE_WEIGHTS[2],
        "confidence weights must be strictly increasing",
    )?;
    check(
        TRUNCATION_MULTIPLIER * VOXEL_SIZE_NEAR >= 2.0 * VOXEL_SIZE_NEAR,
        "truncation band must span at least two voxels",
    )?;
    check(
        MAX_TOTAL_VOXEL_BLOCKS * core::mem::size_of::<crate::voxel::VoxelBlock>()
            <= MAX_VOXEL_MEMORY_BYTES,
        "pool at capacity must fit the voxel memory budget",
    )?;
    check(HASH_INITIAL_CAPACITY.is_power_of_two(), "hash capacity must be a power of two")?;
    check(
        (0.0..1.0).contains(&HASH_LOAD_FACTOR_MAX),
        "hash load factor must be in (0, 1)",
    )?;
    check(
        MESH_BUDGET_TARGET_MS < MESH_BUDGET_OVERRUN_MS,
        "mesh budget target must sit below the overrun threshold",
    )?;
    check(
        MESH_BUDGET_GOOD_MS <= MESH_BUDGET_TARGET_MS,
        "mesh good threshold must not exceed the target",
    )?;
    check(
        MIN_BLOCKS_PER_EXTRACTION < MAX_BLOCKS_PER_EXTRACTION,
        "extraction block budget bounds must be ordered",
    )?;
    check(
        IDLE_TRANSLATION_SPEED < MOTION_DEFER_TRANSLATION_SPEED
            && IDLE_ANGULAR_SPEED < MOTION_DEFER_ANGULAR_SPEED,
        "idle thresholds must sit below the motion-defer thresholds",
    )?;
    check(
        PRESSURE_TERMINAL_RADIUS < PRESSURE_CRITICAL_RADIUS,
        "pressure eviction radii must tighten with severity",
    )?;
    check(STALE_BLOCK_EVICT_SECS > 0.0, "stale eviction age must be positive")?;
    check(
        GPU_MEMORY_PROACTIVE_BYTES < GPU_MEMORY_AGGRESSIVE_BYTES,
        "GPU memory thresholds must be ordered",
    )?;
    check(
        THERMAL_RECOVER_HYSTERESIS_SECS <= THERMAL_DEGRADE_HYSTERESIS_SECS,
        "thermal recover hysteresis must not exceed degrade hysteresis",
    )?;
    check(MC_INTERP_MIN < MC_INTERP_MAX, "MC interpolation clamp must be ordered")?;
    check(
        THERMAL_CEILING_BY_STATE.windows(2).all(|w| w[0] <= w[1]),
        "thermal ceilings must be non-decreasing with severity",
    )?;
    check(
        *THERMAL_CEILING_BY_STATE.last().unwrap() <= THERMAL_MAX_INTEGRATION_SKIP,
        "thermal ceilings must respect the absolute skip cap",
    )?;

    Ok(())
}
