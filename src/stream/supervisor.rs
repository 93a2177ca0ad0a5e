// src/stream/supervisor.rs
//
// Reconnect loop for live sources.
//
//   connect ──ok──▶ mark up ─▶ consumer pulls frames ─▶ release ─▶ connect again
//      └──err──▶ mark down (once per down period) ─▶ backoff ─▶ connect again
//
// Runs until the cancellation token fires; the backoff wait is raced against
// it. On exit a still-up link is recorded as down.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::connectivity::ConnectivityTracker;
use super::source::{FrameSource, RtspSession, StreamError};
use crate::config::{StreamConfig, VideoConfig};

/// Opens and tears down one stream session per attempt.
#[async_trait]
pub trait StreamConnector: Send {
    type Session: FrameSource;

    async fn connect(&mut self) -> Result<Self::Session, StreamError>;

    async fn release(&mut self, session: Self::Session);
}

/// Pulls frames from a connected session until it ends or shutdown is requested.
#[async_trait]
pub trait FrameConsumer: Send {
    async fn consume(&mut self, source: &mut dyn FrameSource, cancel: &CancellationToken);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub attempts: u64,
    pub failures: u64,
    /// Backoff sleeps that ran to completion.
    pub backoff_waits: u64,
}

pub struct StreamSupervisor<C: StreamConnector> {
    connector: C,
    connectivity: ConnectivityTracker,
    backoff: Duration,
    stats: SupervisorStats,
}

impl<C: StreamConnector> StreamSupervisor<C> {
    pub fn new(connector: C, connectivity: ConnectivityTracker, backoff: Duration) -> Self {
        Self {
            connector,
            connectivity,
            backoff,
            stats: SupervisorStats::default(),
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    pub async fn run<F: FrameConsumer>(&mut self, consumer: &mut F, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            self.stats.attempts += 1;
            match self.connector.connect().await {
                Ok(mut session) => {
                    self.connectivity.mark(true).await;
                    consumer.consume(&mut session, cancel).await;
                    self.connector.release(session).await;
                    if !cancel.is_cancelled() {
                        info!("🔄 Stream ended, reconnecting");
                    }
                }
                Err(e) => {
                    self.stats.failures += 1;
                    self.connectivity.mark(false).await;
                    warn!(
                        attempt = self.stats.attempts,
                        "🔄 Stream attempt failed ({}), retrying in {:?}", e, self.backoff
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.backoff) => self.stats.backoff_waits += 1,
                    }
                }
            }
        }
        self.connectivity.finish().await;
        info!(
            attempts = self.stats.attempts,
            failures = self.stats.failures,
            backoff_waits = self.stats.backoff_waits,
            "Stream supervisor stopped"
        );
    }
}

// ============================================================================
// RTSP CONNECTOR
// ============================================================================

pub struct RtspConnector {
    url: String,
    video: VideoConfig,
    stream: StreamConfig,
}

impl RtspConnector {
    pub fn new(url: String, video: VideoConfig, stream: StreamConfig) -> Self {
        Self { url, video, stream }
    }
}

#[async_trait]
impl StreamConnector for RtspConnector {
    type Session = RtspSession;

    async fn connect(&mut self) -> Result<RtspSession, StreamError> {
        RtspSession::open(&self.url, &self.video, &self.stream).await
    }

    async fn release(&mut self, session: RtspSession) {
        session.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::connectivity::tests::RecordingStore;
    use crate::types::Frame;
    use std::sync::Arc;

    struct FailingConnector {
        calls: u64,
        cancel_after: u64,
        cancel: CancellationToken,
    }

    struct NeverSession;

    #[async_trait]
    impl FrameSource for NeverSession {
        async fn next_frame(&mut self) -> Option<Frame> {
            None
        }
    }

    #[async_trait]
    impl StreamConnector for FailingConnector {
        type Session = NeverSession;

        async fn connect(&mut self) -> Result<NeverSession, StreamError> {
            self.calls += 1;
            if self.calls >= self.cancel_after {
                self.cancel.cancel();
            }
            Err(StreamError::NoFirstFrame(Duration::from_secs(5)))
        }

        async fn release(&mut self, _session: NeverSession) {}
    }

    /// Connects `ok_sessions` times, each session ending immediately, then fails.
    struct FlakyConnector {
        calls: u64,
        ok_sessions: u64,
        cancel_after: u64,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl StreamConnector for FlakyConnector {
        type Session = NeverSession;

        async fn connect(&mut self) -> Result<NeverSession, StreamError> {
            self.calls += 1;
            if self.calls >= self.cancel_after {
                self.cancel.cancel();
            }
            if self.calls <= self.ok_sessions {
                Ok(NeverSession)
            } else {
                Err(StreamError::StartFailed(Some(1)))
            }
        }

        async fn release(&mut self, _session: NeverSession) {}
    }

    struct Drain {
        sessions: u32,
    }

    #[async_trait]
    impl FrameConsumer for Drain {
        async fn consume(&mut self, source: &mut dyn FrameSource, _cancel: &CancellationToken) {
            self.sessions += 1;
            while source.next_frame().await.is_some() {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_failures_back_off_and_log_one_down() {
        let n = 7;
        let cancel = CancellationToken::new();
        let store = Arc::new(RecordingStore::default());
        let connector = FailingConnector {
            calls: 0,
            cancel_after: n,
            cancel: cancel.clone(),
        };
        let mut sup = StreamSupervisor::new(
            connector,
            ConnectivityTracker::new(1, store.clone()),
            Duration::from_secs(5),
        );
        let mut consumer = Drain { sessions: 0 };

        let started = tokio::time::Instant::now();
        sup.run(&mut consumer, &cancel).await;
        let elapsed = started.elapsed();

        let stats = sup.stats();
        assert_eq!(stats.failures, n);
        // The last failure's wait is cut short by the cancellation.
        assert_eq!(stats.backoff_waits, n - 1);
        let waited = Duration::from_secs(5) * (n as u32 - 1);
        assert!(elapsed >= waited && elapsed < waited + Duration::from_secs(1));
        assert_eq!(
            *store.rows.lock().unwrap(),
            vec![false],
            "exactly one down row across consecutive failures"
        );
        assert_eq!(consumer.sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_end_and_logs_transitions() {
        let cancel = CancellationToken::new();
        let store = Arc::new(RecordingStore::default());
        let connector = FlakyConnector {
            calls: 0,
            ok_sessions: 2,
            cancel_after: 5,
            cancel: cancel.clone(),
        };
        let mut sup = StreamSupervisor::new(
            connector,
            ConnectivityTracker::new(1, store.clone()),
            Duration::from_secs(5),
        );
        let mut consumer = Drain { sessions: 0 };

        let started = tokio::time::Instant::now();
        sup.run(&mut consumer, &cancel).await;

        assert_eq!(consumer.sessions, 2, "stream end reconnects without backoff");
        assert_eq!(sup.stats().backoff_waits, 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
        assert_eq!(*store.rows.lock().unwrap(), vec![true, false]);
    }
}
