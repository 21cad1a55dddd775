use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use veriface_hw::Camera;

mod config;
mod engine;
mod report;
mod watch;

use config::Config;
use engine::{open_camera, spawn_engine, Pipeline};
use report::VerifyReport;

#[derive(Parser)]
#[command(name = "veriface", about = "Siamese-network face verification from a webcam")]
struct Cli {
    /// Config file (default: $VERIFACE_CONFIG, then ./veriface.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a frame and verify it against the reference images
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify an existing image file against the reference images
    Check {
        /// Image to verify
        image: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture reference images into the verification directory
    Capture {
        /// Number of images to capture
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Pause between captures in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Live preview; press Enter to verify
    Watch,
    /// List V4L2 capture devices
    Devices,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Verify { json } => {
            let mut pipeline = Pipeline::load(&config)?;
            let camera = open_camera(&config)?;
            let frame = camera.capture_lit_frame(config.max_capture_attempts)?;
            let outcome = pipeline.verify_frame(&frame)?;
            print_report(&VerifyReport::new(&outcome, pipeline.thresholds()), json)?;
        }
        Commands::Check { image, json } => {
            let mut pipeline = Pipeline::load(&config)?;
            let outcome = pipeline
                .verify_file(&image)
                .with_context(|| format!("verifying {}", image.display()))?;
            print_report(&VerifyReport::new(&outcome, pipeline.thresholds()), json)?;
        }
        Commands::Capture { count, interval_ms } => {
            capture_references(&config, count, Duration::from_millis(interval_ms))?;
        }
        Commands::Watch => {
            let pipeline = Pipeline::load(&config)?;
            let thresholds = pipeline.thresholds();
            let camera = open_camera(&config)?;
            let handle = spawn_engine(camera, pipeline, config.max_capture_attempts)?;
            watch::run(
                handle,
                Duration::from_millis(config.refresh_interval_ms),
                thresholds,
            )
            .await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_report(report: &VerifyReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

/// Save `count` cropped frames into the verification directory under
/// fresh UUID file names.
fn capture_references(config: &Config, count: usize, interval: Duration) -> Result<()> {
    let dir = config.verification_dir_path();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating {}", dir.display()))?;

    let camera = open_camera(config)?;
    for i in 0..count {
        if i > 0 {
            std::thread::sleep(interval);
        }
        let frame = camera.capture_lit_frame(config.max_capture_attempts)?;
        let face = frame.crop_or_center(config.crop)?;
        let path = reference_path(&dir);
        face.save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        tracing::info!(path = %path.display(), seq = face.sequence, "reference captured");
        println!("{}", path.display());
    }
    Ok(())
}

fn reference_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.jpg", uuid::Uuid::new_v4()))
}
