// src/persistence/mysql.rs
//
// MySQL implementations of the three tables the monitor writes:
//
//   dc_biosec_violation_hist     one row per closed capture session
//   dc_piglet_shipment_day_aggr  one row per farm and day (upsert)
//   dc_camera_connect_hist       one row per connectivity transition
//
// Every operation uses its own connection and closes it on every path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::mysql::MySqlConnection;
use sqlx::Connection;
use tracing::debug;

use super::{DailyCountStore, ViolationRecord, ViolationSink, ViolationStore};
use crate::stream::ConnectivityStore;

#[derive(Debug, Clone)]
pub struct MySqlStore {
    url: String,
}

impl MySqlStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn open(&self) -> Result<MySqlConnection> {
        MySqlConnection::connect(&self.url)
            .await
            .context("Failed to connect to MySQL")
    }
}

async fn close_quietly(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        debug!("MySQL connection close failed: {}", e);
    }
}

pub fn date_key(day: NaiveDate) -> String {
    day.format("%y%m%d").to_string()
}

// ============================================================================
// VIOLATION HISTORY
// ============================================================================

struct MySqlViolationSink {
    conn: MySqlConnection,
}

#[async_trait]
impl ViolationStore for MySqlStore {
    async fn connect(&self) -> Result<Box<dyn ViolationSink>> {
        let conn = self.open().await?;
        Ok(Box::new(MySqlViolationSink { conn }))
    }
}

#[async_trait]
impl ViolationSink for MySqlViolationSink {
    async fn insert(&mut self, record: &ViolationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dc_biosec_violation_hist
                (event_dttm, detection_target_div_cd, record_start_dttm, record_end_dttm,
                 snapshot_file_nm, snapshot_drive_link_addr, reg_dttm)
            VALUES (?, ?, ?, ?, ?, ?, NOW())
            "#,
        )
        .bind(record.event_time)
        .bind(record.category_code)
        .bind(record.record_start)
        .bind(record.record_end)
        .bind(&record.clip_filename)
        .bind(&record.link)
        .execute(&mut self.conn)
        .await
        .context("INSERT dc_biosec_violation_hist failed")?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        close_quietly(self.conn).await;
    }
}

// ============================================================================
// DAILY AGGREGATE
// ============================================================================

#[async_trait]
impl DailyCountStore for MySqlStore {
    async fn load(&self, farm_code: i32, day: NaiveDate) -> Result<Option<i64>> {
        let mut conn = self.open().await?;
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT CAST(shipment_headno AS SIGNED)
            FROM dc_piglet_shipment_day_aggr
            WHERE farm_div_cd = ? AND shipment_ymd = ?
            "#,
        )
        .bind(farm_code)
        .bind(date_key(day))
        .fetch_optional(&mut conn)
        .await;
        close_quietly(conn).await;
        result.context("SELECT dc_piglet_shipment_day_aggr failed")
    }

    async fn upsert(&self, farm_code: i32, day: NaiveDate, count: i64) -> Result<()> {
        let mut conn = self.open().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO dc_piglet_shipment_day_aggr
                (farm_div_cd, shipment_ymd, shipment_headno, reg_dttm)
            VALUES (?, ?, ?, NOW())
            ON DUPLICATE KEY UPDATE
                shipment_headno = VALUES(shipment_headno),
                reg_dttm = NOW()
            "#,
        )
        .bind(farm_code)
        .bind(date_key(day))
        .bind(count)
        .execute(&mut conn)
        .await;
        close_quietly(conn).await;
        result.context("UPSERT dc_piglet_shipment_day_aggr failed")?;
        Ok(())
    }
}

// ============================================================================
// CONNECTIVITY HISTORY
// ============================================================================

#[async_trait]
impl ConnectivityStore for MySqlStore {
    async fn record(&self, farm_code: i32, connected: bool) -> Result<()> {
        let mut conn = self.open().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO dc_camera_connect_hist (farm_div_cd, event_dttm, connect_yn, reg_dttm)
            VALUES (?, NOW(), ?, NOW())
            "#,
        )
        .bind(farm_code)
        .bind(if connected { "Y" } else { "N" })
        .execute(&mut conn)
        .await;
        close_quietly(conn).await;
        result.context("INSERT dc_camera_connect_hist failed")?;
        Ok(())
    }
}
