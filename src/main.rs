//! Motion-target extraction from depth/video recordings

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};

use motion_target::capture::RecordingDevice;
use motion_target::output::TargetWriter;
use motion_target::pipeline::Coordinator;
use motion_target::tracking::{CentroidTracker, Context, TrackingContext};
use motion_target::{utils, Config};

#[derive(Parser, Debug)]
#[command(
    name = "motion-target",
    version,
    about = "Track a skeleton through a depth recording and write per-frame motion targets"
)]
struct Cli {
    /// Recording directory to replay
    #[arg(value_name = "RECORDING")]
    recording: PathBuf,

    /// Directory receiving the target files and index
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Tracking context configuration (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pipeline settings (TOML)
    #[arg(short, long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// First recording frame to track [default: 1]
    #[arg(short, long, value_name = "N")]
    begin: Option<u32>,

    /// Recording frame to stop at, exclusive [default: last frame]
    #[arg(short, long, value_name = "N")]
    end: Option<u32>,

    /// Minimum time between targets in seconds
    #[arg(short, long, value_name = "SECONDS")]
    time: Option<f64>,

    /// Log skip decisions and pipeline details
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        config.recording.path = self.recording.clone();
        config.output.dir = self.output.clone();
        if let Some(begin) = self.begin {
            config.pipeline.begin_frame = begin;
        }
        if let Some(end) = self.end {
            config.pipeline.end_frame = Some(end);
        }
        if let Some(seconds) = self.time {
            config.pipeline.time_step_ns = utils::seconds_to_nanos(seconds);
        }
    }
}

fn parse_args() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    let cli = parse_args();

    // Initialize error handling and logging
    color_eyre::install()?;
    let default_filter = if cli.verbose {
        "motion_target=debug"
    } else {
        "motion_target=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let mut config = Config::load(cli.settings.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let tracking_config = match &cli.config {
        Some(path) => Some(path.clone()),
        None => utils::find_asset(utils::assets_root().as_deref(), utils::TRACKING_CONFIG_NAME),
    };

    utils::prepare_output_dir(&config.output.dir)?;

    let device = RecordingDevice::open(&config.recording)?;

    let mut context = TrackingContext::new(Box::new(CentroidTracker::new()))?;
    match &tracking_config {
        Some(path) => {
            info!("Using tracking config {}", path.display());
            context.set_config(&utils::read_json(path)?)?;
        }
        None => warn!("No tracking config, using tracker defaults"),
    }

    let sink = TargetWriter::create(&config.output.dir, &config.output.index_name)?;

    let coordinator = Coordinator::new(device, context, sink, &config.pipeline)?;
    let stats = coordinator.run()?;

    info!(
        "Wrote {} targets to {}",
        stats.targets_written,
        config.output.dir.display()
    );
    Ok(())
}
