// src/stream/source.rs
//
// Frame sources. A live RTSP session runs ffmpeg plus one reader task that
// cuts stdout into fixed-size RGB frames and pushes them into a bounded
// channel (`send().await` blocks when full, nothing is dropped). A file
// source reads ffmpeg's stdout directly and ends on exhaustion.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{StreamConfig, VideoConfig};
use crate::types::Frame;
use crate::video::ffmpeg::{spawn_raw_reader, FfmpegError, FfmpegInput};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[from] FfmpegError),

    #[error("ffmpeg exited during start-up (exit code {0:?})")]
    StartFailed(Option<i32>),

    #[error("no frame received within {0:?}")]
    NoFirstFrame(Duration),

    #[error("invalid frame size: expected {expected} bytes, got {got}")]
    InvalidFrame { expected: usize, got: usize },

    #[error("ffmpeg stdout was not captured")]
    NoStdout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that yields frames until it ends.
#[async_trait]
pub trait FrameSource: Send {
    /// `None` once the source has ended or stalled.
    async fn next_frame(&mut self) -> Option<Frame>;
}

/// Read one frame worth of bytes. A short read at EOF returns the partial
/// buffer so the caller can tell a malformed frame from a clean end.
async fn read_frame_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    frame_size: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; frame_size];
    let mut filled = 0;
    while filled < frame_size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 => Ok(None),
        n if n < frame_size => {
            buf.truncate(n);
            Ok(Some(buf))
        }
        _ => Ok(Some(buf)),
    }
}

// ============================================================================
// RTSP SESSION
// ============================================================================

/// Frame bytes stamped when the reader finished reading them, so time spent
/// waiting in the queue does not shift session timing.
struct RawFrame {
    bytes: Vec<u8>,
    captured_at: Instant,
    wall_time: DateTime<Local>,
}

/// Reader task body: cut `reader` into frames and push them until EOF, a
/// short frame, a closed receiver or `stop`.
async fn pump_frames<R: AsyncRead + Unpin>(
    mut reader: R,
    frame_size: usize,
    tx: mpsc::Sender<RawFrame>,
    stop: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = stop.cancelled() => break,
            read = read_frame_bytes(&mut reader, frame_size) => read,
        };
        match chunk {
            Ok(Some(bytes)) => {
                let short = bytes.len() != frame_size;
                let raw = RawFrame {
                    bytes,
                    captured_at: Instant::now(),
                    wall_time: Local::now(),
                };
                let sent = tokio::select! {
                    _ = stop.cancelled() => false,
                    res = tx.send(raw) => res.is_ok(),
                };
                if !sent || short {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stream reader stopped: {}", e);
                break;
            }
        }
    }
    debug!("Stream reader exited");
}

pub struct RtspSession {
    child: Child,
    rx: mpsc::Receiver<RawFrame>,
    stop: CancellationToken,
    reader: JoinHandle<()>,
    first: Option<RawFrame>,
    width: usize,
    height: usize,
    frame_timeout: Duration,
}

impl RtspSession {
    /// Start ffmpeg and the reader; succeed only once a full first frame arrived.
    pub async fn open(
        url: &str,
        video: &VideoConfig,
        stream: &StreamConfig,
    ) -> Result<Self, StreamError> {
        let input = FfmpegInput::Rtsp(url.to_string());
        let mut child = spawn_raw_reader(&input, video.width, video.height, video.fps.max(1))?;

        tokio::time::sleep(stream.start_grace).await;
        if let Some(status) = child.try_wait()? {
            return Err(StreamError::StartFailed(status.code()));
        }

        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                let _ = child.kill().await;
                return Err(StreamError::NoStdout);
            }
        };

        let frame_size = Frame::byte_len(video.width, video.height);
        let (tx, rx) = mpsc::channel::<RawFrame>(stream.queue_capacity);
        let stop = CancellationToken::new();
        let reader = tokio::spawn(pump_frames(stdout, frame_size, tx, stop.clone()));

        let mut session = Self {
            child,
            rx,
            stop,
            reader,
            first: None,
            width: video.width,
            height: video.height,
            frame_timeout: stream.frame_timeout,
        };

        let first = tokio::time::timeout(stream.first_frame_timeout, session.rx.recv()).await;
        match first {
            Ok(Some(raw)) if raw.bytes.len() == frame_size => {
                session.first = Some(raw);
                Ok(session)
            }
            Ok(Some(raw)) => {
                session.shutdown().await;
                Err(StreamError::InvalidFrame {
                    expected: frame_size,
                    got: raw.bytes.len(),
                })
            }
            Ok(None) | Err(_) => {
                session.shutdown().await;
                Err(StreamError::NoFirstFrame(stream.first_frame_timeout))
            }
        }
    }

    /// Stop the reader and terminate ffmpeg.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        self.rx.close();
        if let Err(e) = self.child.kill().await {
            debug!("ffmpeg already gone: {}", e);
        }
        let _ = self.reader.await;
    }

    fn to_frame(&self, raw: RawFrame) -> Frame {
        Frame {
            data: raw.bytes,
            width: self.width,
            height: self.height,
            captured_at: raw.captured_at,
            wall_time: raw.wall_time,
        }
    }
}

#[async_trait]
impl FrameSource for RtspSession {
    async fn next_frame(&mut self) -> Option<Frame> {
        if let Some(raw) = self.first.take() {
            return Some(self.to_frame(raw));
        }
        let expected = Frame::byte_len(self.width, self.height);
        let pulled = tokio::time::timeout(self.frame_timeout, self.rx.recv()).await;
        match pulled {
            Ok(Some(raw)) if raw.bytes.len() == expected => Some(self.to_frame(raw)),
            Ok(Some(raw)) => {
                warn!(expected, got = raw.bytes.len(), "⚠️  Truncated frame, stream ended");
                None
            }
            Ok(None) => {
                info!("Stream closed by ffmpeg");
                None
            }
            Err(_) => {
                warn!("⚠️  No frame for {:?}, stream stalled", self.frame_timeout);
                None
            }
        }
    }
}

// ============================================================================
// FILE SOURCE
// ============================================================================

/// Single pass over a video file. Timestamps are synthetic (start + index / fps)
/// so session timing does not depend on processing speed.
pub struct FileSource {
    child: Child,
    stdout: tokio::process::ChildStdout,
    path: PathBuf,
    width: usize,
    height: usize,
    fps: u32,
    index: u64,
    started_at: Instant,
    started_wall: chrono::DateTime<Local>,
}

impl FileSource {
    pub fn open(path: PathBuf, video: &VideoConfig) -> Result<Self, StreamError> {
        let input = FfmpegInput::File(path.clone());
        let mut child = spawn_raw_reader(&input, video.width, video.height, video.fps.max(1))?;
        let stdout = child.stdout.take().ok_or(StreamError::NoStdout)?;
        info!("📼 Reading {}", path.display());
        Ok(Self {
            child,
            stdout,
            path,
            width: video.width,
            height: video.height,
            fps: video.fps.max(1),
            index: 0,
            started_at: Instant::now(),
            started_wall: Local::now(),
        })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("ffmpeg already gone: {}", e);
        }
        info!(frames = self.index, "📼 Finished {}", self.path.display());
    }
}

#[async_trait]
impl FrameSource for FileSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let expected = Frame::byte_len(self.width, self.height);
        let data = match read_frame_bytes(&mut self.stdout, expected).await {
            Ok(Some(bytes)) if bytes.len() == expected => bytes,
            Ok(Some(bytes)) => {
                warn!(expected, got = bytes.len(), "⚠️  Truncated final frame ignored");
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                warn!("⚠️  Video read failed: {}", e);
                return None;
            }
        };

        let offset = Duration::from_secs_f64(self.index as f64 / self.fps as f64);
        self.index += 1;
        let wall_offset =
            chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        Some(Frame {
            data,
            width: self.width,
            height: self.height,
            captured_at: self.started_at + offset,
            wall_time: self.started_wall + wall_offset,
        })
    }
}
