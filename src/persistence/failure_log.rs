// src/persistence/failure_log.rs
//
// Structured failure log. Every failed persistence or flush operation writes
// one JSON file into the failure directory; recovery reads them out of band.
// File names carry a timestamp plus a uuid suffix so concurrent jobs never
// collide.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    /// Local time the failure was recorded (RFC 3339).
    pub timestamp: String,
    /// Operation that failed, e.g. `db_insert`, `upload`, `count_flush`.
    pub operation: String,
    /// Clip the operation was about, if any. The file is kept on disk.
    pub clip_filename: Option<String>,
    /// Raw error text including its cause chain.
    pub error: String,
    /// Operation-specific values (SQL parameters, paths).
    #[serde(default)]
    pub details: serde_json::Value,
}

impl FailureEntry {
    pub fn new(operation: &str, clip_filename: Option<&str>, err: &anyhow::Error) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            operation: operation.to_string(),
            clip_filename: clip_filename.map(str::to_string),
            error: format!("{:#}", err),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FailureLog {
    dir: PathBuf,
}

impl FailureLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn write(&self, entry: &FailureEntry) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}_error_{}_{}.json",
            entry.operation,
            Local::now().format("%Y%m%d_%H%M%S_%f"),
            &suffix[..8]
        );
        let path = self.dir.join(name);
        let body = serde_json::to_vec_pretty(entry).context("Failed to serialize failure entry")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("📄 Failure log written: {}", path.display());
        Ok(path)
    }

    /// Write, logging instead of propagating if the log itself cannot be written.
    pub async fn record(&self, entry: FailureEntry) {
        if let Err(e) = self.write(&entry).await {
            error!(
                operation = %entry.operation,
                "Could not write failure log ({:#}); original error: {}", e, entry.error
            );
        }
    }
}
