// src/persistence/pipeline.rs
//
// One persistence job per closed session, spawned off the detection loop:
//
//   encode clip → open connection → upload → insert history row → delete local clip
//
// Any failed stage stops the job and writes exactly one failure-log entry.
// After a successful encode the local clip is kept on failure; a failed
// encode removes its partial output. The connection is closed on every path.
// Jobs never retry; retained clips are recovered out of band.

use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::failure_log::{FailureEntry, FailureLog};
use super::storage::ClipStorage;
use super::{ViolationRecord, ViolationSink, ViolationStore};
use crate::pipeline::clip_buffer::PendingClip;
use crate::pipeline::event_coordinator::ClosedSession;
use crate::pipeline::metrics::PipelineMetrics;
use crate::video::ffmpeg::encode_clip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Persisted,
    /// The clip stays on disk; `stage` names the failed operation.
    Retained { stage: &'static str },
}

#[derive(Clone)]
pub struct PersistencePipeline {
    store: Arc<dyn ViolationStore>,
    storage: Arc<dyn ClipStorage>,
    failures: FailureLog,
    clip_dir: PathBuf,
    fps: u32,
    record_window: Duration,
    metrics: PipelineMetrics,
}

impl PersistencePipeline {
    pub fn new(
        store: Arc<dyn ViolationStore>,
        storage: Arc<dyn ClipStorage>,
        failures: FailureLog,
        clip_dir: PathBuf,
        fps: u32,
        record_window: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            store,
            storage,
            failures,
            clip_dir,
            fps,
            record_window,
            metrics,
        }
    }

    /// Encode the clip, then persist it.
    pub async fn process(&self, clip: PendingClip) -> JobOutcome {
        let path = self.clip_dir.join(&clip.filename);
        if let Err(e) = encode_clip(&clip.frames, self.fps, &path).await {
            let err = anyhow::Error::new(e).context("clip encoding failed");
            warn!("❌ Could not encode {}: {:#}", clip.filename, err);
            self.fail("encode", &clip.filename, &err, json!({ "frames": clip.frames.len() }))
                .await;
            self.metrics.inc(&self.metrics.clips_retained);
            discard_partial(&path).await;
            return JobOutcome::Retained { stage: "encode" };
        }
        info!(
            worker = clip.session.counts.worker,
            pig = clip.session.counts.pig,
            "🎞️  Clip saved: {}",
            path.display()
        );
        self.run(&path, &clip.filename, &clip.session).await
    }

    /// Upload, insert and clean up an already encoded clip.
    pub async fn run(&self, path: &Path, filename: &str, session: &ClosedSession) -> JobOutcome {
        let mut sink = match self.store.connect().await {
            Ok(sink) => sink,
            Err(e) => {
                self.fail("db_connect", filename, &e, json!({})).await;
                return JobOutcome::Retained { stage: "db_connect" };
            }
        };

        let outcome = self.upload_and_insert(sink.as_mut(), path, filename, session).await;
        sink.close().await;

        match outcome {
            JobOutcome::Persisted => {
                self.metrics.inc(&self.metrics.clips_persisted);
                match tokio::fs::remove_file(path).await {
                    Ok(()) => info!("🗑️  Local clip removed after upload: {}", filename),
                    Err(e) => warn!("⚠️  Local clip already gone ({}): {}", e, filename),
                }
            }
            JobOutcome::Retained { stage } => {
                self.metrics.inc(&self.metrics.clips_retained);
                warn!(stage, "⚠️  Keeping local clip: {}", path.display());
            }
        }
        outcome
    }

    async fn upload_and_insert(
        &self,
        sink: &mut dyn ViolationSink,
        path: &Path,
        filename: &str,
        session: &ClosedSession,
    ) -> JobOutcome {
        let day = session.started_at.date_naive();
        let link = match self.storage.upload(path, filename, day).await {
            Ok(link) => link,
            Err(e) => {
                let err = anyhow::Error::new(e).context("clip upload failed");
                self.fail("upload", filename, &err, json!({ "path": path.display().to_string() }))
                    .await;
                return JobOutcome::Retained { stage: "upload" };
            }
        };

        let record = self.build_record(session, filename, link);
        if let Err(e) = sink.insert(&record).await {
            let details = serde_json::to_value(&record).unwrap_or_default();
            self.fail("db_insert", filename, &e, details).await;
            return JobOutcome::Retained { stage: "db_insert" };
        }

        info!(
            code = record.category_code,
            "💾 Violation recorded: {}", filename
        );
        JobOutcome::Persisted
    }

    pub fn build_record(
        &self,
        session: &ClosedSession,
        filename: &str,
        link: String,
    ) -> ViolationRecord {
        let event = session.started_at.naive_local();
        let window =
            ChronoDuration::from_std(self.record_window).unwrap_or_else(|_| ChronoDuration::zero());
        ViolationRecord {
            event_time: event,
            category_code: session.counts.code().db_code(),
            record_start: event - window,
            record_end: event + window,
            clip_filename: filename.to_string(),
            link,
        }
    }

    async fn fail(
        &self,
        operation: &str,
        filename: &str,
        err: &anyhow::Error,
        details: serde_json::Value,
    ) {
        warn!(operation, "❌ Persistence failed for {}: {:#}", filename, err);
        let entry = FailureEntry::new(operation, Some(filename), err).with_details(details);
        self.failures.record(entry).await;
    }
}

/// A failed encode may leave a truncated mp4 behind.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!("🗑️  Removed partial clip {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️  Partial clip left at {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::storage::StorageError;
    use crate::pipeline::event_coordinator::CategoryCounts;
    use async_trait::async_trait;
    use chrono::{Local, NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        fail_insert: bool,
        fail_connect: bool,
        closed: Arc<AtomicU32>,
        inserted: Arc<Mutex<Vec<ViolationRecord>>>,
    }

    struct FakeSink {
        fail_insert: bool,
        closed: Arc<AtomicU32>,
        inserted: Arc<Mutex<Vec<ViolationRecord>>>,
    }

    #[async_trait]
    impl ViolationStore for FakeStore {
        async fn connect(&self) -> anyhow::Result<Box<dyn ViolationSink>> {
            if self.fail_connect {
                anyhow::bail!("connection refused");
            }
            Ok(Box::new(FakeSink {
                fail_insert: self.fail_insert,
                closed: self.closed.clone(),
                inserted: self.inserted.clone(),
            }))
        }
    }

    #[async_trait]
    impl ViolationSink for FakeSink {
        async fn insert(&mut self, record: &ViolationRecord) -> anyhow::Result<()> {
            if self.fail_insert {
                anyhow::bail!("Duplicate entry for key 'PRIMARY'");
            }
            self.inserted.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeStorage {
        fail: bool,
    }

    #[async_trait]
    impl ClipStorage for FakeStorage {
        async fn upload(
            &self,
            local: &Path,
            filename: &str,
            day: NaiveDate,
        ) -> Result<String, StorageError> {
            if self.fail {
                return Err(StorageError::Io {
                    path: local.to_path_buf(),
                    source: std::io::Error::other("quota exceeded"),
                });
            }
            Ok(format!("https://share/{}/{}", day.format("%y%m%d"), filename))
        }
    }

    fn session() -> ClosedSession {
        let t = Local.with_ymd_and_hms(2025, 5, 20, 9, 30, 0).unwrap();
        ClosedSession {
            started_at: t,
            closed_at: t,
            counts: CategoryCounts { worker: 1, pig: 0 },
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clip: PathBuf,
        logs: PathBuf,
        pipeline: PersistencePipeline,
    }

    fn fixture(store: FakeStore, storage: FakeStorage) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("250520_093000_Worker1Pig0.mp4");
        std::fs::write(&clip, b"fake mp4").unwrap();
        let logs = dir.path().join("errors");
        let pipeline = PersistencePipeline::new(
            Arc::new(store),
            Arc::new(storage),
            FailureLog::new(&logs),
            dir.path().to_path_buf(),
            15,
            Duration::from_secs(3),
            PipelineMetrics::new(),
        );
        Fixture {
            _dir: dir,
            clip,
            logs,
            pipeline,
        }
    }

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_failure_keeps_clip_and_logs_once() {
        let closed = Arc::new(AtomicU32::new(0));
        let store = FakeStore {
            fail_insert: true,
            closed: closed.clone(),
            ..Default::default()
        };
        let fx = fixture(store, FakeStorage { fail: false });
        let name = "250520_093000_Worker1Pig0.mp4";

        let outcome = fx.pipeline.run(&fx.clip, name, &session()).await;

        assert_eq!(outcome, JobOutcome::Retained { stage: "db_insert" });
        assert!(fx.clip.exists(), "clip must survive a failed insert");
        let logs = log_files(&fx.logs);
        assert_eq!(logs.len(), 1, "exactly one failure entry");
        let body = std::fs::read_to_string(&logs[0]).unwrap();
        assert!(body.contains(name));
        assert!(body.contains("Duplicate entry"));
        assert_eq!(closed.load(Ordering::SeqCst), 1, "connection closed");
    }

    #[tokio::test]
    async fn test_success_removes_clip() {
        let closed = Arc::new(AtomicU32::new(0));
        let inserted = Arc::new(Mutex::new(Vec::new()));
        let store = FakeStore {
            closed: closed.clone(),
            inserted: inserted.clone(),
            ..Default::default()
        };
        let fx = fixture(store, FakeStorage { fail: false });

        let outcome = fx
            .pipeline
            .run(&fx.clip, "250520_093000_Worker1Pig0.mp4", &session())
            .await;

        assert_eq!(outcome, JobOutcome::Persisted);
        assert!(!fx.clip.exists());
        assert!(log_files(&fx.logs).is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let rows = inserted.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category_code, 1);
        assert_eq!(rows[0].link, "https://share/250520/250520_093000_Worker1Pig0.mp4");
        assert_eq!(
            rows[0].record_end - rows[0].record_start,
            ChronoDuration::seconds(6)
        );
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_clip_and_closes() {
        let closed = Arc::new(AtomicU32::new(0));
        let inserted = Arc::new(Mutex::new(Vec::new()));
        let store = FakeStore {
            closed: closed.clone(),
            inserted: inserted.clone(),
            ..Default::default()
        };
        let fx = fixture(store, FakeStorage { fail: true });

        let outcome = fx.pipeline.run(&fx.clip, "clip.mp4", &session()).await;

        assert_eq!(outcome, JobOutcome::Retained { stage: "upload" });
        assert!(fx.clip.exists());
        assert_eq!(log_files(&fx.logs).len(), 1);
        assert!(inserted.lock().unwrap().is_empty(), "no insert after failed upload");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_encode_failure_counts_retained_and_removes_partial() {
        let fx = fixture(FakeStore::default(), FakeStorage { fail: false });
        let metrics = fx.pipeline.metrics.clone();
        let name = "250520_093000_Worker1Pig0.mp4";
        let clip = PendingClip {
            filename: name.to_string(),
            frames: Vec::new(),
            session: session(),
        };

        // The fixture's placeholder file stands in for a partial write.
        let outcome = fx.pipeline.process(clip).await;

        assert_eq!(outcome, JobOutcome::Retained { stage: "encode" });
        assert_eq!(metrics.summary().clips_retained, 1);
        assert!(!fx.clip.exists(), "partial output removed");
        let logs = log_files(&fx.logs);
        assert_eq!(logs.len(), 1);
        assert!(std::fs::read_to_string(&logs[0]).unwrap().contains("encode"));
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_clip() {
        let store = FakeStore {
            fail_connect: true,
            ..Default::default()
        };
        let fx = fixture(store, FakeStorage { fail: false });
        let outcome = fx.pipeline.run(&fx.clip, "clip.mp4", &session()).await;
        assert_eq!(outcome, JobOutcome::Retained { stage: "db_connect" });
        assert!(fx.clip.exists());
        assert_eq!(log_files(&fx.logs).len(), 1);
    }
}
