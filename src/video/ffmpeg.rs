// src/video/ffmpeg.rs
//
// ffmpeg subprocess plumbing. Every video byte in or out of the process goes
// through ffmpeg as raw RGB24:
//
//   - raw readers: RTSP or file → scaled rawvideo on stdout
//   - clip encoder: buffered frames on stdin → H.264 mp4
//   - session recorder: every processed frame on stdin → mp4

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info};

use crate::types::Frame;

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffmpeg binary could not be started: {0}")]
    NotFound(std::io::Error),

    #[error("ffmpeg failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffmpeg {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("clip has no frames")]
    EmptyClip,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a raw reader pulls video from.
#[derive(Debug, Clone)]
pub enum FfmpegInput {
    Rtsp(String),
    File(PathBuf),
}

impl FfmpegInput {
    pub fn describe(&self) -> String {
        match self {
            Self::Rtsp(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// Spawn ffmpeg decoding `input` into `width`x`height` RGB24 frames at `fps`
/// on stdout.
pub fn spawn_raw_reader(
    input: &FfmpegInput,
    width: usize,
    height: usize,
    fps: u32,
) -> Result<Child, FfmpegError> {
    let mut cmd = Command::new("ffmpeg");
    match input {
        FfmpegInput::Rtsp(url) => {
            cmd.args(["-rtsp_transport", "tcp", "-i", url]);
        }
        FfmpegInput::File(path) => {
            cmd.arg("-i").arg(path);
        }
    }
    cmd.args(["-vf", &format!("scale={width}:{height},fps={fps}")])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-vcodec", "rawvideo"])
        .args(["-loglevel", "warning", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    debug!("Spawning ffmpeg reader for {}", input.describe());
    cmd.spawn().map_err(FfmpegError::NotFound)
}

fn spawn_encoder(out: &Path, width: usize, height: usize, fps: u32) -> Result<Child, FfmpegError> {
    Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error"])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
        .args(["-s", &format!("{width}x{height}")])
        .args(["-r", &fps.to_string()])
        .args(["-i", "-"])
        .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "veryfast"])
        .arg(out)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(FfmpegError::NotFound)
}

async fn wait_checked(mut child: Child) -> Result<(), FfmpegError> {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        pipe.read_to_string(&mut stderr).await?;
    }
    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(FfmpegError::ExecutionFailed {
            exit_code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

/// Encode buffered frames into an mp4 at `out`.
pub async fn encode_clip(frames: &[Arc<Frame>], fps: u32, out: &Path) -> Result<(), FfmpegError> {
    let first = frames.first().ok_or(FfmpegError::EmptyClip)?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut child = spawn_encoder(out, first.width, first.height, fps)?;
    let mut stdin = child.stdin.take().ok_or(FfmpegError::MissingPipe("stdin"))?;
    for frame in frames {
        stdin.write_all(&frame.data).await?;
    }
    stdin.shutdown().await?;
    drop(stdin);

    wait_checked(child).await?;
    debug!(frames = frames.len(), "Encoded clip {}", out.display());
    Ok(())
}

// ============================================================================
// SESSION RECORDER
// ============================================================================

/// Streams every processed frame into a single mp4 (`--record`).
pub struct SessionRecorder {
    child: Child,
    stdin: ChildStdin,
    path: PathBuf,
}

impl SessionRecorder {
    pub async fn start(
        path: PathBuf,
        width: usize,
        height: usize,
        fps: u32,
    ) -> Result<Self, FfmpegError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut child = spawn_encoder(&path, width, height, fps)?;
        let stdin = child.stdin.take().ok_or(FfmpegError::MissingPipe("stdin"))?;
        info!("⏺  Recording session to {}", path.display());
        Ok(Self { child, stdin, path })
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FfmpegError> {
        self.stdin.write_all(&frame.data).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<PathBuf, FfmpegError> {
        self.stdin.shutdown().await?;
        drop(self.stdin);
        wait_checked(self.child).await?;
        info!("⏹  Recording saved: {}", self.path.display());
        Ok(self.path)
    }
}

/// `{recording_dir}/{stem}_{YYYYmmdd_HHMMSS}.mp4`
pub fn recording_path(dir: &Path, source: &FfmpegInput, now: DateTime<Local>) -> PathBuf {
    let stem = match source {
        FfmpegInput::File(path) => path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string()),
        FfmpegInput::Rtsp(_) => "rtsp".to_string(),
    };
    dir.join(format!("{}_{}.mp4", stem, now.format("%Y%m%d_%H%M%S")))
}
