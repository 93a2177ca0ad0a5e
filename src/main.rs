// src/main.rs

mod alert;
mod boundary_line;
mod config;
mod daily_count;
mod detector;
mod persistence;
mod pipeline;
mod stream;
mod tracking;
mod types;
mod video;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use boundary_line::BoundaryLine;
use config::{AppConfig, SessionConfig, StreamConfig};
use daily_count::DailyCountManager;
use detector::RemoteTracker;
use persistence::{DirectoryStorage, FailureLog, MySqlStore, PersistencePipeline};
use pipeline::{ClipBuffer, DetectionLoop, LoopParts, PipelineMetrics};
use stream::{ConnectivityTracker, FileSource, FrameConsumer, RtspConnector, StreamSupervisor};
use tracking::TrackEngine;
use video::ffmpeg::{recording_path, FfmpegInput, SessionRecorder};
use video::MotionGate;

/// In-flight persistence jobs get this long to finish at shutdown.
const JOB_GRACE: Duration = Duration::from_secs(30);
const METRICS_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "biosec-monitor", version, about = "Biosecurity line-crossing monitor")]
#[command(group(ArgGroup::new("input").required(true).args(["rtsp", "video"])))]
struct Args {
    /// Live RTSP camera URL
    #[arg(long)]
    rtsp: Option<String>,

    /// Local video file (single pass)
    #[arg(long)]
    video: Option<PathBuf>,

    /// Farm section to load from the configuration
    #[arg(long)]
    farm_name: String,

    /// Also record every processed frame to recording_dir
    #[arg(long)]
    record: bool,

    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("biosec_monitor=info")),
        )
        .init();

    let args = Args::parse();
    info!("🐖 Biosecurity monitor starting (farm: {})", args.farm_name);

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let farm = config
        .resolve_farm(&args.farm_name)
        .with_context(|| format!("Invalid configuration for farm '{}'", args.farm_name))?;
    info!(
        "✓ Configuration loaded: farm_code={}, orientation={}, dirty_zone={:?}, warning={}",
        farm.farm_code,
        farm.orientation.as_str(),
        farm.dirty_zone,
        farm.warning.as_str()
    );

    let input = match (args.rtsp.clone(), args.video.clone()) {
        (Some(url), _) => FfmpegInput::Rtsp(url),
        (None, Some(path)) => FfmpegInput::File(path),
        (None, None) => anyhow::bail!("one of --rtsp or --video is required"),
    };

    let video = config.video.clone();
    let session = SessionConfig::default();
    let stream_config = StreamConfig::default();

    for dir in [&config.paths.clip_dir, &config.paths.failure_log_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    persistence::retained::scan_retained_clips(&config.paths.clip_dir);

    // ========================================================================
    // COLLABORATORS
    // ========================================================================

    let store = Arc::new(MySqlStore::new(config.database.url.clone()));
    let failures = FailureLog::new(&config.paths.failure_log_dir);
    let storage = Arc::new(DirectoryStorage::new(
        &config.paths.storage_root,
        config.paths.storage_link_base.clone(),
    ));
    let metrics = PipelineMetrics::new();

    let persistence = PersistencePipeline::new(
        store.clone(),
        storage,
        failures.clone(),
        config.paths.clip_dir.clone(),
        video.fps,
        session.record_window,
        metrics.clone(),
    );

    let counter = Arc::new(DailyCountManager::new(
        farm.farm_code,
        store.clone(),
        failures.clone(),
        Local::now().date_naive(),
    ));
    counter.load_initial().await;

    let mut alert_client = alert::build_alert_client(&farm.warning, session.alert_timeout)
        .context("Failed to build alert client")?;
    alert::connect_or_warn(alert_client.as_mut()).await;

    let detector = RemoteTracker::new(&config.detector, farm.name.clone())?;
    info!("✓ Tracker client ready ({})", config.detector.url);

    let line = BoundaryLine::from_config_or_centered(
        farm.line_coords,
        farm.orientation,
        video.width,
        video.height,
    );
    let engine = TrackEngine::new(line, farm.tracking(), farm.dirty_zone);

    let recorder = if args.record {
        let path = recording_path(&config.paths.recording_dir, &input, Local::now());
        match SessionRecorder::start(path, video.width, video.height, video.fps).await {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                warn!("⚠️  Recording disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    // ========================================================================
    // BACKGROUND TASKS
    // ========================================================================

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("🛑 Shutdown requested");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let flush_task = tokio::spawn(
        counter
            .clone()
            .run_periodic(cancel.clone(), session.count_flush_period),
    );

    {
        let cancel = cancel.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(METRICS_PERIOD) => metrics.log_summary(),
                }
            }
        });
    }

    // ========================================================================
    // DETECTION
    // ========================================================================

    let jobs = TaskTracker::new();
    let mut detection = DetectionLoop::new(LoopParts {
        motion: MotionGate::new(farm.motion_threshold, session.motion_idle_hold),
        detector: Box::new(detector),
        engine,
        clip_buffer: ClipBuffer::with_capacity(video.buffer_capacity()),
        counter: counter.clone(),
        alert: alert_client,
        persistence,
        jobs: jobs.clone(),
        metrics: metrics.clone(),
        recorder,
        session: session.clone(),
    });

    match input {
        FfmpegInput::Rtsp(url) => {
            let connectivity = ConnectivityTracker::new(farm.farm_code, store.clone());
            let connector = RtspConnector::new(url, video.clone(), stream_config.clone());
            let mut supervisor =
                StreamSupervisor::new(connector, connectivity, stream_config.reconnect_backoff);
            supervisor.run(&mut detection, &cancel).await;
        }
        FfmpegInput::File(path) => match FileSource::open(path, &video) {
            Ok(mut source) => {
                detection.consume(&mut source, &cancel).await;
                source.shutdown().await;
            }
            Err(e) => error!("❌ Could not open video: {}", e),
        },
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    detection.finish().await;
    cancel.cancel();

    jobs.close();
    if !jobs.is_empty() {
        info!(pending = jobs.len(), "⏳ Waiting for persistence jobs");
    }
    if tokio::time::timeout(JOB_GRACE, jobs.wait()).await.is_err() {
        warn!(
            pending = jobs.len(),
            "⚠️  Persistence jobs still running after {:?}, clips stay in {}",
            JOB_GRACE,
            config.paths.clip_dir.display()
        );
    }

    if let Err(e) = flush_task.await {
        warn!("⚠️  Daily count flush task failed: {}", e);
    }

    metrics.log_summary();
    info!(count = counter.current(), "👋 Monitor stopped");
    Ok(())
}
