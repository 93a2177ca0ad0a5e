// src/pipeline/detection_loop.rs
//
// The single-writer detection loop. Per frame:
//
//   motion gate ─▶ detector ─▶ track engine ─▶ counter deltas
//                                           └▶ coordinator (+ light for workers)
//   clip buffer ◀─ every frame ─▶ session recorder (--record)
//   coordinator due ─▶ snapshot clip ─▶ persistence job (fire-and-forget)
//
// Track maps live here and survive stream reconnects. When a source ends,
// an open session is closed and persisted at once and the clip buffer is
// emptied, so no clip spans an outage. Nothing in this file returns an error: each stage logs its
// own failure and the loop moves on.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::clip_buffer::ClipBuffer;
use super::event_coordinator::{ClosedSession, EventCoordinator};
use super::metrics::PipelineMetrics;
use crate::alert::{AlertClient, LIGHT_ON};
use crate::config::SessionConfig;
use crate::daily_count::DailyCountManager;
use crate::detector::Detector;
use crate::persistence::PersistencePipeline;
use crate::stream::{FrameConsumer, FrameSource};
use crate::tracking::{CountChange, FrameOutcome, TrackEngine};
use crate::types::{Category, Frame};
use crate::video::ffmpeg::SessionRecorder;
use crate::video::MotionGate;

/// Collaborators handed to the loop at start-up.
pub struct LoopParts {
    pub motion: MotionGate,
    pub detector: Box<dyn Detector>,
    pub engine: TrackEngine,
    pub clip_buffer: ClipBuffer,
    pub counter: Arc<DailyCountManager>,
    pub alert: Box<dyn AlertClient>,
    pub persistence: PersistencePipeline,
    pub jobs: TaskTracker,
    pub metrics: PipelineMetrics,
    pub recorder: Option<SessionRecorder>,
    pub session: SessionConfig,
}

/// What happened on one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub detected: bool,
    pub detections: usize,
    pub violations: usize,
    pub session_opened: bool,
    pub session_closed: bool,
}

pub struct DetectionLoop {
    motion: MotionGate,
    detector: Box<dyn Detector>,
    engine: TrackEngine,
    coordinator: EventCoordinator,
    clip_buffer: ClipBuffer,
    counter: Arc<DailyCountManager>,
    alert: Box<dyn AlertClient>,
    persistence: PersistencePipeline,
    jobs: TaskTracker,
    metrics: PipelineMetrics,
    recorder: Option<SessionRecorder>,
    session: SessionConfig,
    last_wall: Option<DateTime<Local>>,
}

impl DetectionLoop {
    pub fn new(parts: LoopParts) -> Self {
        Self {
            coordinator: EventCoordinator::new(parts.session.close_delay),
            motion: parts.motion,
            detector: parts.detector,
            engine: parts.engine,
            clip_buffer: parts.clip_buffer,
            counter: parts.counter,
            alert: parts.alert,
            persistence: parts.persistence,
            jobs: parts.jobs,
            metrics: parts.metrics,
            recorder: parts.recorder,
            session: parts.session,
            last_wall: None,
        }
    }

    #[cfg(test)]
    pub fn session_active(&self) -> bool {
        self.coordinator.is_active()
    }

    #[cfg(test)]
    pub fn buffered_frames(&self) -> usize {
        self.clip_buffer.len()
    }

    pub async fn process_frame(&mut self, frame: Frame) -> FrameReport {
        self.metrics.inc(&self.metrics.total_frames);
        let now = frame.captured_at;
        let wall = frame.wall_time;
        self.last_wall = Some(wall);
        let mut report = FrameReport::default();

        if self.motion.update(&frame) {
            report.detected = true;
            let started = Instant::now();
            let tracked = self.detector.track(&frame).await;
            self.metrics.inc(&self.metrics.detector_runs);
            self.metrics.set_timing(
                &self.metrics.detector_time_us,
                started.elapsed().as_micros() as u64,
            );

            match tracked {
                Ok(detections) => {
                    report.detections = detections.len();
                    let outcome = self.engine.process(&detections, now);
                    self.apply_outcome(outcome, now, wall, &mut report).await;
                }
                Err(e) => {
                    self.metrics.inc(&self.metrics.detector_failures);
                    warn!("⚠️  Detector failed, frame skipped: {:#}", e);
                }
            }
        }

        let frame = Arc::new(frame);
        self.clip_buffer.push(frame.clone());
        self.record(&frame).await;

        if let Some(closed) = self.coordinator.poll_close(now, wall) {
            report.session_closed = true;
            self.dispatch(closed);
        }

        self.engine.sweep_expired(now);
        report
    }

    async fn apply_outcome(
        &mut self,
        outcome: FrameOutcome,
        now: Instant,
        wall: DateTime<Local>,
        report: &mut FrameReport,
    ) {
        for change in outcome.count_changes {
            match change {
                CountChange::Increment => {
                    let count = self.counter.increment();
                    info!(count, "🐖 Pig passed, daily count up");
                }
                CountChange::Decrement => {
                    let count = self.counter.decrement();
                    info!(count, "↩️  Pig returned, daily count down");
                }
            }
        }

        for violation in &outcome.violations {
            report.violations += 1;
            self.metrics.inc(&self.metrics.violations);
            if self.coordinator.on_violation(violation, now, wall) {
                report.session_opened = true;
            }
            if violation.category == Category::Worker {
                self.raise_alert().await;
            }
        }
    }

    async fn raise_alert(&mut self) {
        let sent =
            tokio::time::timeout(self.session.alert_timeout, self.alert.send_signal(LIGHT_ON))
                .await;
        match sent {
            Ok(Ok(())) => self.metrics.inc(&self.metrics.alerts_sent),
            Ok(Err(e)) => {
                self.metrics.inc(&self.metrics.alerts_failed);
                warn!(transport = self.alert.kind(), "❌ Alert delivery failed: {}", e);
            }
            Err(_) => {
                self.metrics.inc(&self.metrics.alerts_failed);
                warn!(
                    transport = self.alert.kind(),
                    "❌ Alert delivery timed out after {:?}", self.session.alert_timeout
                );
            }
        }
    }

    async fn record(&mut self, frame: &Frame) {
        let failed = match self.recorder.as_mut() {
            Some(recorder) => recorder.write_frame(frame).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            warn!("⚠️  Session recording stopped: {}", e);
            self.recorder = None;
        }
    }

    fn dispatch(&mut self, closed: ClosedSession) {
        self.metrics.inc(&self.metrics.sessions_closed);
        let closed_at = closed.closed_at.format("%H:%M:%S").to_string();
        let clip = self.clip_buffer.take_clip(closed);
        info!(
            frames = clip.frames.len(),
            closed_at = %closed_at,
            "📦 Persisting {}",
            clip.filename
        );

        let pipeline = self.persistence.clone();
        self.jobs.spawn(async move {
            let outcome = pipeline.process(clip).await;
            debug!(?outcome, "Persistence job finished");
        });
    }

    /// Close and persist an open session right away, stamped with the last
    /// frame seen.
    fn flush_open_session(&mut self) {
        let wall = self.last_wall.unwrap_or_else(Local::now);
        if let Some(closed) = self.coordinator.close(wall) {
            info!("🎬 Flushing open session at end of stream");
            self.dispatch(closed);
        }
    }

    /// The source ended or stalled. The open session is persisted with the
    /// frames seen so far and the buffer starts empty on the next stream.
    fn on_stream_end(&mut self) {
        self.flush_open_session();
        self.clip_buffer.clear();
    }

    /// End of run: close any open session immediately, stop the recorder and
    /// release the alert transport.
    pub async fn finish(&mut self) {
        self.flush_open_session();
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish().await {
                warn!("⚠️  Session recording could not be finalized: {}", e);
            }
        }
        self.alert.close().await;
    }
}

#[async_trait]
impl FrameConsumer for DetectionLoop {
    async fn consume(&mut self, source: &mut dyn FrameSource, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = source.next_frame() => frame,
            };
            let Some(frame) = next else {
                self.on_stream_end();
                break;
            };
            let report = self.process_frame(frame).await;
            if report.session_opened || report.session_closed {
                debug!(
                    detected = report.detected,
                    detections = report.detections,
                    violations = report.violations,
                    opened = report.session_opened,
                    closed = report.session_closed,
                    "Session boundary"
                );
            }
        }
    }
}
