use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use puck_follow::{
    actuator,
    config::{ActuatorConfig, AppConfig, SourceKind},
    logging,
    pipeline::ControlLoop,
    source,
};

#[derive(Debug, Parser)]
#[clap(about)]
struct Args {
    /// Path to the JSON run configuration; defaults apply if it does not exist
    #[clap(short, long, value_parser, default_value = "config.json")]
    config: PathBuf,

    /// Tracking source: `camera`, `sim`, or the path of a tracking log to replay
    #[clap(short, long, value_parser)]
    source: Option<String>,

    /// Write annotated frames to this `.mp4` file
    #[clap(long, value_parser)]
    output_video: Option<PathBuf>,

    /// Write per-marker tracking rows to this `.csv` file
    #[clap(long, value_parser)]
    output_data: Option<PathBuf>,

    /// Minimum shift in pixels, on both axes, before the stage follows
    #[clap(long, value_parser)]
    min_delta: Option<f64>,

    /// Evaluate the filter once every this many marker observations
    #[clap(long, value_parser)]
    stride: Option<u64>,

    /// Log moves instead of driving the stage
    #[clap(long, action)]
    dry_run: bool,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        if let Some(kind) = self.source {
            config.source = match kind.as_str() {
                "camera" => SourceKind::Camera,
                "sim" | "simulated" => match &config.source {
                    SourceKind::Simulated { .. } => config.source.clone(),
                    _ => SourceKind::default(),
                },
                path => SourceKind::Replay {
                    path: PathBuf::from(path),
                    fps: Some(config.camera.camera_settings.fps()),
                },
            };
        }
        if self.output_video.is_some() {
            config.camera.output_video = self.output_video;
        }
        if self.output_data.is_some() {
            config.camera.output_data = self.output_data;
        }
        if let Some(min_delta) = self.min_delta {
            config.control.min_delta = min_delta;
        }
        if let Some(stride) = self.stride {
            config.control.stride = stride;
        }
        if self.dry_run {
            config.actuator = ActuatorConfig::DryRun { latency_ms: 0 };
        }
    }
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = if args.config.exists() {
        AppConfig::load(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        info!("{} not found, using defaults", args.config.display());
        AppConfig::default()
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let stage = actuator::from_config(&config.actuator).context("Failed to connect to the stage")?;

    let mut control = ControlLoop::new(stage, &config);
    let summary = control.run(|| source::open(&config))?;

    info!("Waiting for moves in flight");
    let moves = control.finish();
    info!(
        "Run finished: {}; moves submitted {}, dropped {}, completed {}, failed {}",
        summary, moves.submitted, moves.dropped, moves.completed, moves.failed
    );

    Ok(())
}
