// src/daily_count.rs
//
// Cumulative daily throughput count shared between the detection loop
// (increment/decrement) and a background flush task.
//
// Every mutation bumps a revision; a flush only writes when the revision
// moved since the last successful write. On a date change the previous
// day's final count is written under its own date key and the in-memory
// count starts again from zero. The mutex is never held across an await.

use chrono::{Local, NaiveDate};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::persistence::{DailyCountStore, FailureEntry, FailureLog};

#[derive(Debug)]
struct CountState {
    count: i64,
    date: NaiveDate,
    revision: u64,
    written_revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    /// Nothing changed since the last write.
    Idle,
    Saved { day: NaiveDate, count: i64 },
    RolledOver { previous: NaiveDate, count: i64 },
    Failed { day: NaiveDate },
}

pub struct DailyCountManager {
    farm_code: i32,
    state: Mutex<CountState>,
    store: Arc<dyn DailyCountStore>,
    failures: FailureLog,
}

impl DailyCountManager {
    pub fn new(
        farm_code: i32,
        store: Arc<dyn DailyCountStore>,
        failures: FailureLog,
        today: NaiveDate,
    ) -> Self {
        Self {
            farm_code,
            state: Mutex::new(CountState {
                count: 0,
                date: today,
                revision: 0,
                written_revision: 0,
            }),
            store,
            failures,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CountState> {
        // A poisoned lock still holds a valid count.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Load today's persisted value so a restart keeps same-day progress.
    pub async fn load_initial(&self) -> i64 {
        let day = self.lock().date;
        match self.store.load(self.farm_code, day).await {
            Ok(value) => {
                let count = value.unwrap_or(0);
                self.lock().count = count;
                info!(farm_code = self.farm_code, "📈 Today's count loaded: {}", count);
                count
            }
            Err(e) => {
                warn!(farm_code = self.farm_code, "⚠️  Could not load today's count: {:#}", e);
                0
            }
        }
    }

    pub fn increment(&self) -> i64 {
        let mut state = self.lock();
        state.count += 1;
        state.revision += 1;
        state.count
    }

    pub fn decrement(&self) -> i64 {
        let mut state = self.lock();
        state.count -= 1;
        state.revision += 1;
        state.count
    }

    pub fn current(&self) -> i64 {
        self.lock().count
    }

    #[cfg(test)]
    pub fn date(&self) -> NaiveDate {
        self.lock().date
    }

    /// One timer tick: roll over, or write the current count if it changed.
    pub async fn flush_tick(&self, today: NaiveDate) -> FlushAction {
        enum Plan {
            Rollover(NaiveDate, i64, bool),
            Save(NaiveDate, i64, u64),
            Idle,
        }

        let plan = {
            let mut state = self.lock();
            if state.date != today {
                let previous = state.date;
                let count = state.count;
                let dirty = state.revision != state.written_revision;
                state.count = 0;
                state.date = today;
                state.revision = 0;
                state.written_revision = 0;
                Plan::Rollover(previous, count, dirty)
            } else if state.revision != state.written_revision {
                Plan::Save(state.date, state.count, state.revision)
            } else {
                Plan::Idle
            }
        };

        match plan {
            Plan::Idle => FlushAction::Idle,
            Plan::Rollover(previous, count, dirty) => {
                info!(
                    farm_code = self.farm_code,
                    "📅 Day rolled over, final count for {}: {}", previous, count
                );
                if dirty && !self.write(previous, count).await {
                    return FlushAction::Failed { day: previous };
                }
                FlushAction::RolledOver { previous, count }
            }
            Plan::Save(day, count, revision) => {
                if !self.write(day, count).await {
                    return FlushAction::Failed { day };
                }
                let mut state = self.lock();
                if state.date == day {
                    state.written_revision = state.written_revision.max(revision);
                }
                debug!(farm_code = self.farm_code, count, "Daily count saved");
                FlushAction::Saved { day, count }
            }
        }
    }

    async fn write(&self, day: NaiveDate, count: i64) -> bool {
        match self.store.upsert(self.farm_code, day, count).await {
            Ok(()) => true,
            Err(e) => {
                warn!(farm_code = self.farm_code, "❌ Daily count flush failed: {:#}", e);
                let entry = FailureEntry::new("count_flush", None, &e).with_details(
                    serde_json::json!({
                        "farm_code": self.farm_code,
                        "day": day.format("%y%m%d").to_string(),
                        "count": count,
                    }),
                );
                self.failures.record(entry).await;
                false
            }
        }
    }

    /// Flush every `period` until cancelled, then once more.
    pub async fn run_periodic(self: Arc<Self>, cancel: CancellationToken, period: Duration) {
        info!(period_secs = period.as_secs(), "✓ Daily count flush task started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
            self.flush_tick(Local::now().date_naive()).await;
        }
        self.flush_tick(Local::now().date_naive()).await;
        info!(count = self.current(), "Daily count flush task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<(NaiveDate, i64)>>,
        initial: Option<i64>,
        fail: bool,
    }

    #[async_trait]
    impl DailyCountStore for MemoryStore {
        async fn load(&self, _farm: i32, _day: NaiveDate) -> anyhow::Result<Option<i64>> {
            Ok(self.initial)
        }

        async fn upsert(&self, _farm: i32, day: NaiveDate, count: i64) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("server has gone away");
            }
            self.rows.lock().unwrap().push((day, count));
            Ok(())
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn manager(store: Arc<MemoryStore>, logs: &std::path::Path) -> DailyCountManager {
        DailyCountManager::new(5, store, FailureLog::new(logs), day(1))
    }

    #[tokio::test]
    async fn test_increment_decrement_return_new_value() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(Arc::new(MemoryStore::default()), dir.path());
        assert_eq!(m.increment(), 1);
        assert_eq!(m.increment(), 2);
        assert_eq!(m.decrement(), 1);
        assert_eq!(m.current(), 1);
    }

    #[tokio::test]
    async fn test_load_initial_restores_today() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore {
            initial: Some(42),
            ..Default::default()
        });
        let m = manager(store, dir.path());
        assert_eq!(m.load_initial().await, 42);
        assert_eq!(m.increment(), 43);
    }

    #[tokio::test]
    async fn test_flush_only_when_changed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let m = manager(store.clone(), dir.path());

        assert_eq!(m.flush_tick(day(1)).await, FlushAction::Idle);
        m.increment();
        assert_eq!(
            m.flush_tick(day(1)).await,
            FlushAction::Saved { day: day(1), count: 1 }
        );
        assert_eq!(m.flush_tick(day(1)).await, FlushAction::Idle);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollover_persists_previous_day_then_resets() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let m = manager(store.clone(), dir.path());
        for _ in 0..3 {
            m.increment();
        }

        let action = m.flush_tick(day(2)).await;
        assert_eq!(
            action,
            FlushAction::RolledOver {
                previous: day(1),
                count: 3
            }
        );
        assert_eq!(m.current(), 0);
        assert_eq!(m.date(), day(2));
        assert_eq!(*store.rows.lock().unwrap(), vec![(day(1), 3)]);
    }

    #[tokio::test]
    async fn test_failed_flush_stays_dirty_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let m = manager(store, dir.path());
        m.increment();

        assert_eq!(m.flush_tick(day(1)).await, FlushAction::Failed { day: day(1) });
        assert_eq!(
            m.flush_tick(day(1)).await,
            FlushAction::Failed { day: day(1) },
            "still dirty, retried next tick"
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let today = Local::now().date_naive();
        let m = Arc::new(DailyCountManager::new(
            5,
            store.clone(),
            FailureLog::new(dir.path()),
            today,
        ));
        m.increment();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(m.clone().run_periodic(cancel.clone(), Duration::from_secs(60)));
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(store.rows.lock().unwrap().len(), 1, "final flush on stop");
    }
}
