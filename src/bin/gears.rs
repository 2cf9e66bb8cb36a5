//! Renders a scrolling grid of gears headlessly and logs per-frame statistics.
//!
//! `RUST_LOG=info cargo run --bin gears -- --backend dummy --frames 120`

use clap::Parser;
use indirect_engine::scene::{
    gear_grid_scene, FrameStateProducer, SceneConfig, ScrollingCamera, Viewport,
};
use indirect_engine::{create_backend, BackendType, EngineConfig, GpuDrivenPipeline};

#[derive(Parser, Debug)]
#[command(name = "gears", about = "GPU-driven indirect rendering of a gear grid")]
struct Args {
    /// Backend to render with; defaults to INDIRECT_BACKEND or wgpu
    #[arg(long, value_enum)]
    backend: Option<BackendType>,

    #[arg(long, default_value_t = 32)]
    columns: u32,

    #[arg(long, default_value_t = 8)]
    rows: u32,

    /// Frames to render before exiting
    #[arg(long, default_value_t = 60)]
    frames: u64,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Disable the compaction pass
    #[arg(long)]
    no_compaction: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env().with_size(args.width, args.height);
    if let Some(backend) = args.backend {
        config = config.with_backend(backend);
    }
    if args.no_compaction {
        config = config.with_compaction(false);
    }

    let backend = create_backend(&config)?;
    log::info!("Using {}", backend.name());

    let scene = SceneConfig::default().with_grid(args.columns, args.rows);
    let objects = gear_grid_scene(&scene)?;
    let mut pipeline = GpuDrivenPipeline::new(backend, config, objects)?;

    let viewport = Viewport::new(args.width, args.height);
    let mut camera = ScrollingCamera {
        amplitude: scene.columns as f32 * scene.spacing * 0.5,
        ..ScrollingCamera::default()
    };

    let started = std::time::Instant::now();
    for frame in 0..args.frames {
        let state = camera.frame_state(frame, viewport);
        let report = pipeline.render_frame(&state)?;
        if frame % 30 == 0 {
            let snapshot = pipeline.read_command_list()?;
            log::info!(
                "Frame {}: {} of {} objects visible, compacted {:?} into {} commands",
                report.frame_index,
                snapshot.populated_count(),
                report.object_count,
                report.compacted,
                snapshot.header.count
            );
        }
    }

    let output = pipeline.read_color_target()?;
    let elapsed = started.elapsed();
    log::info!(
        "Rendered {} frames in {:.2?} ({:.1} fps), last frame {}x{}",
        args.frames,
        elapsed,
        args.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        output.width,
        output.height
    );
    Ok(())
}
