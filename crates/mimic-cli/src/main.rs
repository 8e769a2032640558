mod config;
mod play;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use mimic_core::{
    CameraCollaborator, FilesystemCollaborator, GameSession, ImagePostProcessor, SessionChange,
    SessionObserver, TurnReport,
};
use mimic_emotion::EmotionApiClient;
use mimic_hw::{ImportCamera, LocalFilesystem};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mimic", about = "Mimic: copy the leader's face, get scored by emotion similarity")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/mimic/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play an interactive game
    Play {
        /// Import photo files instead of using the webcam
        #[arg(long)]
        import: bool,
        /// V4L2 device path (overrides MIMIC_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Score a challenger photo against a leader photo
    Compare {
        leader: PathBuf,
        challenger: PathBuf,
        /// Print the final session snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resize and re-encode a photo the way captures are prepared for upload
    Process {
        image: PathBuf,
        /// Write here instead of overwriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List video capture devices
    Devices,
}

struct LogObserver;

impl SessionObserver for LogObserver {
    fn changed(&self, change: &SessionChange) {
        tracing::debug!(?change, "session changed");
    }
}

fn build_session(config: &Config, camera: Arc<dyn CameraCollaborator>) -> Result<GameSession> {
    let processor = ImagePostProcessor::new(config.post_process_policy())
        .context("invalid post-processing settings")?;
    let scoring = EmotionApiClient::new(&config.emotion_api())
        .context("emotion service not configured")?;

    Ok(
        GameSession::new(camera, Arc::new(LocalFilesystem::new()), Arc::new(scoring))
            .with_post_processor(processor)
            .with_observer(Arc::new(LogObserver)),
    )
}

#[cfg(feature = "v4l2")]
fn open_webcam(config: &Config, device: Option<String>) -> Result<Arc<dyn CameraCollaborator>> {
    use mimic_hw::{V4l2Camera, V4l2Options};

    let camera = V4l2Camera::open(V4l2Options {
        device_path: device.unwrap_or_else(|| config.camera_device.clone()),
        capture_dir: config.capture_dir.clone(),
        width: 1280,
        height: 720,
        warmup_frames: config.warmup_frames,
    })
    .context("failed to open webcam")?;
    tracing::info!(device = camera.device_path(), "webcam ready");
    Ok(Arc::new(camera))
}

#[cfg(not(feature = "v4l2"))]
fn open_webcam(_config: &Config, _device: Option<String>) -> Result<Arc<dyn CameraCollaborator>> {
    bail!("built without webcam support; rebuild with `--features v4l2` or use `--import`")
}

async fn play(config: &Config, import: bool, device: Option<String>) -> Result<()> {
    let use_import = import || (cfg!(not(feature = "v4l2")) && device.is_none());
    let (camera, importer) = if use_import {
        let importer = Arc::new(ImportCamera::new(&config.capture_dir));
        let camera: Arc<dyn CameraCollaborator> = importer.clone();
        (camera, Some(importer))
    } else {
        (open_webcam(config, device)?, None)
    };

    let session = Arc::new(build_session(config, camera)?);
    play::run(session, importer).await
}

async fn compare(config: &Config, leader: &Path, challenger: &Path, json: bool) -> Result<()> {
    let camera = Arc::new(ImportCamera::new(&config.capture_dir));
    let session = build_session(config, camera.clone())?;

    camera.stage(leader);
    let report = session.start_capture().await?;
    let TurnReport::Scored { emotion: leader_emotion, .. } = report else {
        bail!("leader photo: {}", play::describe_report(&report));
    };
    session.advance_turn()?;

    camera.stage(challenger);
    let report = session.start_capture().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        return Ok(());
    }

    println!("leader:     {} (mostly {})", leader.display(), leader_emotion.dominant());
    match report {
        TurnReport::Scored { emotion, score } => {
            println!("challenger: {} (mostly {})", challenger.display(), emotion.dominant());
            println!("similarity: {score:.3}");
            Ok(())
        }
        other => bail!("challenger photo: {}", play::describe_report(&other)),
    }
}

async fn process(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let processor = ImagePostProcessor::new(config.post_process_policy())
        .context("invalid post-processing settings")?;
    let fs = LocalFilesystem::new();

    let raw = fs.read_all(input).await?;
    let processed = tokio::task::spawn_blocking(move || processor.process(&raw))
        .await
        .context("post-processing worker panicked")?
        .with_context(|| format!("failed to process {}", input.display()))?;

    let dest = output.unwrap_or(input);
    fs.write_all(&processed.bytes, dest).await?;
    println!(
        "{}: {}x{} JPEG q{}, {} bytes",
        dest.display(),
        processed.width,
        processed.height,
        processed.quality,
        processed.bytes.len()
    );
    Ok(())
}

#[cfg(feature = "v4l2")]
fn devices() -> Result<()> {
    let devices = mimic_hw::V4l2Camera::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}

#[cfg(not(feature = "v4l2"))]
fn devices() -> Result<()> {
    bail!("built without webcam support; rebuild with `--features v4l2`")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Play { import, device } => play(&config, import, device).await,
        Commands::Compare {
            leader,
            challenger,
            json,
        } => compare(&config, &leader, &challenger, json).await,
        Commands::Process { image, output } => process(&config, &image, output.as_deref()).await,
        Commands::Devices => devices(),
    }
}
