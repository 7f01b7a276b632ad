//! scanfuse demo binary
//!
//! Synthetic handheld-scan simulator: orbits a virtual depth camera
//! around an analytic sphere, renders noisy depth+confidence frames,
//! drives the full integrate/extract loop, and dumps session stats plus
//! the integration log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Mat4, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scanfuse::{
    CameraIntrinsics, CpuBackend, DepthDataProvider, EngineConfig, IntegrationInput,
    IntegrationOutcome, TrackingState, Volume,
};

#[derive(Parser, Debug)]
#[command(name = "scanfuse", about = "TSDF reconstruction demo on a synthetic scene")]
struct Args {
    /// Frames to simulate at the nominal 60 Hz.
    #[arg(long, default_value_t = 240)]
    frames: u32,

    /// Run mesh extraction every Nth frame.
    #[arg(long, default_value_t = 6)]
    extract_every: u32,

    /// Engine config file (created with defaults if missing).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the session integration log here as JSON.
    #[arg(long)]
    session_log: Option<PathBuf>,

    /// Raise the host thermal state to Serious halfway through the run.
    #[arg(long, default_value_t = false)]
    simulate_thermal: bool,

    /// Depth noise RNG seed.
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

const IMAGE_WIDTH: u32 = 96;
const IMAGE_HEIGHT: u32 = 72;
const SPHERE_CENTER: Vec3 = Vec3::ZERO;
const SPHERE_RADIUS: f32 = 0.8;
const ORBIT_RADIUS: f32 = 2.0;
/// Fraction of a full orbit covered by the run; slow enough to stay under
/// the motion-defer thresholds.
const ORBIT_SWEEP: f32 = 0.15;

/// One rendered synthetic frame.
struct RenderedDepth {
    width: u32,
    height: u32,
    depth: Vec<f32>,
    confidence: Vec<u8>,
}

impl DepthDataProvider for RenderedDepth {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn depth_at(&self, x: u32, y: u32) -> f32 {
        self.depth[(y * self.width + x) as usize]
    }
    fn confidence_at(&self, x: u32, y: u32) -> u8 {
        self.confidence[(y * self.width + x) as usize]
    }
}

fn main() -> Result<()> {
    let filter = std::env::var("SCANFUSE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".into());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load_or_create(path)
            .map_err(|e| anyhow::anyhow!(e))
            .context("loading engine config")?,
        None => EngineConfig::default(),
    };

    let backend = CpuBackend::new(config.skip_low_confidence);
    let mut volume = Volume::new(config.clone(), Box::new(backend))?;
    info!(backend = volume.backend_name(), frames = args.frames, "simulation starting");

    let intrinsics = CameraIntrinsics {
        fx: IMAGE_WIDTH as f32 * 0.9,
        fy: IMAGE_WIDTH as f32 * 0.9,
        cx: IMAGE_WIDTH as f32 / 2.0,
        cy: IMAGE_HEIGHT as f32 / 2.0,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut integrated = 0u32;
    let mut skipped = 0u32;
    let mut triangles_last = 0usize;

    for frame in 0..args.frames {
        let timestamp = frame as f64 / 60.0;
        let pose = orbit_pose(frame, args.frames);
        let depth = render_sphere(&pose, &intrinsics, &mut rng);

        let input = IntegrationInput {
            timestamp,
            intrinsics,
            camera_to_world: pose,
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
            tracking_state: TrackingState::Normal,
        };

        match volume.integrate(&input, &depth)? {
            IntegrationOutcome::Integrated(stats) => {
                integrated += 1;
                if frame % 60 == 0 {
                    info!(
                        frame,
                        blocks = stats.blocks_updated,
                        voxels = stats.voxels_updated,
                        total_ms = stats.total_time_ms,
                        "integrated"
                    );
                }
            }
            IntegrationOutcome::Skipped(reason) => {
                skipped += 1;
                info!(frame, ?reason, "skipped");
            }
        }

        if args.simulate_thermal && frame == args.frames / 2 {
            info!(frame, "raising host thermal state to Serious");
            volume.handle_thermal_state(2);
        }

        if frame % args.extract_every == args.extract_every - 1 {
            let mesh = volume.extract_mesh();
            if !mesh.is_empty() {
                triangles_last = mesh.triangle_count();
            }
            if frame % 60 == 59 {
                info!(
                    frame,
                    triangles = mesh.triangle_count(),
                    vertices = mesh.vertices.len(),
                    dirty_remaining = mesh.dirty_blocks_remaining,
                    "extracted"
                );
            }
        }
    }

    let stats = volume.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        integrated,
        skipped,
        live_blocks = stats.live_blocks,
        triangles_last,
        "simulation done"
    );

    if let Some(path) = &args.session_log {
        let json = volume.session_log_json()?;
        std::fs::write(path, json).context("writing session log")?;
        info!(path = %path.display(), "session log written");
    }

    Ok(())
}

/// Camera pose on a slow orbit, always looking at the sphere center.
fn orbit_pose(frame: u32, total_frames: u32) -> Mat4 {
    let theta = std::f32::consts::TAU * ORBIT_SWEEP * frame as f32 / total_frames.max(1) as f32;
    let position = SPHERE_CENTER
        + Vec3::new(
            ORBIT_RADIUS * theta.cos(),
            0.3 * (2.0 * theta).sin(),
            ORBIT_RADIUS * theta.sin(),
        );
    look_at(position, SPHERE_CENTER, Vec3::Y)
}

/// Camera-to-world transform with the +Z axis looking at `target`.
fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    let forward = (target - position).normalize();
    let right = up.cross(forward).normalize();
    let true_up = forward.cross(right);
    Mat4::from_cols(
        right.extend(0.0),
        true_up.extend(0.0),
        forward.extend(0.0),
        Vec4::new(position.x, position.y, position.z, 1.0),
    )
}

/// Render the analytic sphere into a depth+confidence image with mild
/// uniform noise. Rays that miss return NaN depth; hits below the sensor
/// floor read as invalid rather than as wrong geometry.
fn render_sphere(
    camera_to_world: &Mat4,
    intrinsics: &CameraIntrinsics,
    rng: &mut StdRng,
) -> RenderedDepth {
    let size = (IMAGE_WIDTH * IMAGE_HEIGHT) as usize;
    let mut depth = vec![f32::NAN; size];
    let mut confidence = vec![0u8; size];

    let origin = camera_to_world.w_axis.truncate();
    let rotation = glam::Mat3::from_mat4(*camera_to_world);

    for y in 0..IMAGE_HEIGHT {
        for x in 0..IMAGE_WIDTH {
            // Camera-space ray with z = 1: the parameter of the hit IS
            // the measured depth.
            let dir_cam = Vec3::new(
                (x as f32 - intrinsics.cx) / intrinsics.fx,
                (y as f32 - intrinsics.cy) / intrinsics.fy,
                1.0,
            );
            let dir = rotation * dir_cam;

            let oc = origin - SPHERE_CENTER;
            let a = dir.dot(dir);
            let b = 2.0 * oc.dot(dir);
            let c = oc.dot(oc) - SPHERE_RADIUS * SPHERE_RADIUS;
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                continue;
            }
            let s = (-b - disc.sqrt()) / (2.0 * a);
            if s <= 0.0 {
                continue;
            }

            let idx = (y * IMAGE_WIDTH + x) as usize;
            let noise = (rng.gen::<f32>() - 0.5) * 0.004;
            let measured = s + noise;
            if measured >= scanfuse::constants::DEPTH_MIN {
                depth[idx] = measured;
            }

            // Confidence from incidence angle, like a real sensor.
            let hit = origin + dir * s;
            let normal = (hit - SPHERE_CENTER).normalize();
            let incidence = dir.normalize().dot(normal).abs();
            confidence[idx] = if incidence > 0.6 {
                2
            } else if incidence > 0.3 {
                1
            } else {
                0
            };
        }
    }

    RenderedDepth { width: IMAGE_WIDTH, height: IMAGE_HEIGHT, depth, confidence }
}
