// src/persistence/mod.rs
//
// Durable side of the monitor: clip upload, violation history, daily counts
// and the local failure log. Database access sits behind small traits so
// jobs can be exercised without a server.

pub mod failure_log;
pub mod mysql;
pub mod pipeline;
pub mod retained;
pub mod storage;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

pub use failure_log::{FailureEntry, FailureLog};
pub use mysql::MySqlStore;
pub use pipeline::PersistencePipeline;
pub use storage::DirectoryStorage;

/// One row of the violation history table.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub event_time: NaiveDateTime,
    pub category_code: i32,
    pub record_start: NaiveDateTime,
    pub record_end: NaiveDateTime,
    pub clip_filename: String,
    pub link: String,
}

/// Opens a dedicated connection for one persistence job.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn ViolationSink>>;
}

/// An open connection owned by a single job.
#[async_trait]
pub trait ViolationSink: Send {
    async fn insert(&mut self, record: &ViolationRecord) -> anyhow::Result<()>;

    async fn close(self: Box<Self>);
}

/// Daily throughput aggregate, keyed by farm and `yymmdd`.
#[async_trait]
pub trait DailyCountStore: Send + Sync {
    async fn load(&self, farm_code: i32, day: NaiveDate) -> anyhow::Result<Option<i64>>;

    async fn upsert(&self, farm_code: i32, day: NaiveDate, count: i64) -> anyhow::Result<()>;
}
