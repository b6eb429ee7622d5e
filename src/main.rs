use std::path::PathBuf;

use clap::Parser;
use hecs::World;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keel::components::{LocalTransform, Name};
use keel::config::{PhysicsSettings, DEFAULT_FIXED_TIME_STEP};
use keel::engine::time::FrameTimer;
use keel::scene::test_scene::load_test_scene;
use keel::{PhysicsResult, Simulation};

#[derive(Parser)]
#[command(name = "keel", about = "Headless physics and character controller demo")]
struct Args {
    /// Frames to simulate
    #[arg(long, default_value_t = 300)]
    frames: u32,

    /// Frame delta in seconds
    #[arg(long, default_value_t = DEFAULT_FIXED_TIME_STEP)]
    dt: f32,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sync transforms on the stepping thread only
    #[arg(long)]
    serial_sync: bool,
}

fn main() -> PhysicsResult<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = match &args.config {
        Some(path) => PhysicsSettings::load(path)?,
        None => PhysicsSettings::default(),
    };
    if args.serial_sync {
        settings.parallel_transform_sync = false;
    }

    let sim = Simulation::new(settings)?;
    let mut world = World::new();
    let player = load_test_scene(&mut world, &sim)?;
    info!(frames = args.frames, dt = args.dt, "starting simulation");

    let mut timer = FrameTimer::fixed(args.dt);
    let mut steps = 0u64;
    for _ in 0..args.frames {
        timer.tick();
        steps += u64::from(sim.simulate(timer.dt, &mut world).steps);
    }

    info!(
        steps,
        simulated = timer.elapsed,
        bodies = sim.body_count(),
        "simulation finished"
    );
    for (_, (name, transform)) in world.query::<(&Name, &LocalTransform)>().iter() {
        info!(name = name.0, position = ?transform.position, "final pose");
    }
    if let Some(pose) = sim.character_pose(player) {
        info!(position = ?pose.position, "player");
    }
    Ok(())
}
