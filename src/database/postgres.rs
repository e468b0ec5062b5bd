// src/database/postgres.rs
use crate::blocks::condition::ConditionSet;
use crate::blocks::detection::{Detection, DetectionStatus};
use crate::blocks::pattern::{Pattern, RedetectionEvent, RedetectionStatus};
use crate::database::models::Candle;
use crate::database::schema;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{error, info};

/// Where candle series come from. The scanners only need this trait, so
/// tests can feed them in-memory series without a database.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn tickers(&self) -> Result<Vec<String>>;
    async fn candles(&self, ticker: &str) -> Result<Vec<Candle>>;
}

pub struct PostgresManager {
    pool: PgPool,
}

impl PostgresManager {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create database connection pool")?;

        Ok(Self { pool })
    }

    // Create tables if they don't exist
    pub async fn init_tables(&self) -> Result<()> {
        for ddl in [
            schema::CREATE_DAILY_CANDLES_TABLE,
            schema::CREATE_BLOCK_CONDITIONS_TABLE,
            schema::CREATE_BLOCK_DETECTIONS_TABLE,
            schema::CREATE_BLOCK_PATTERNS_TABLE,
            schema::CREATE_BLOCK_REDETECTIONS_TABLE,
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        for stmt in schema::CREATE_INDICES.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        info!("Database tables initialized successfully");
        Ok(())
    }

    pub async fn get_tickers(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT ticker FROM daily_candles ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    pub async fn get_candles(&self, ticker: &str) -> Result<Vec<Candle>> {
        let candles = sqlx::query_as::<_, Candle>(
            "SELECT ticker, date, open, high, low, close, volume, trading_value
            FROM daily_candles
            WHERE ticker = $1
            ORDER BY date ASC",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        Ok(candles)
    }

    pub async fn upsert_candles(&self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Ok(());
        }

        // Each row is its own statement: a shared transaction would abort on
        // the first bad row and take the rest of the batch down with it.
        for candle in candles {
            let result = sqlx::query(
                "INSERT INTO daily_candles
                (ticker, date, open, high, low, close, volume, trading_value)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (ticker, date)
                DO UPDATE SET open = EXCLUDED.open, high = EXCLUDED.high,
                    low = EXCLUDED.low, close = EXCLUDED.close,
                    volume = EXCLUDED.volume, trading_value = EXCLUDED.trading_value",
            )
            .bind(&candle.ticker)
            .bind(candle.date)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.trading_value)
            .execute(&self.pool)
            .await;

            if let Err(e) = result {
                error!("Error upserting candle for {}: {}", candle.ticker, e);
                // Continue with the rest of the batch
            }
        }

        Ok(())
    }

    pub async fn save_condition_set(&self, set: &ConditionSet) -> Result<()> {
        let document = serde_json::to_value(set).context("Failed to serialize condition set")?;
        sqlx::query(
            "INSERT INTO block_conditions (id, name, document, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id)
            DO UPDATE SET name = EXCLUDED.name, document = EXCLUDED.document,
                updated_at = NOW()",
        )
        .bind(&set.id)
        .bind(&set.name)
        .bind(&document)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_condition_set(&self, id: &str) -> Result<Option<ConditionSet>> {
        let row = sqlx::query("SELECT document FROM block_conditions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: serde_json::Value = row.get(0);
                let set = serde_json::from_value(document)
                    .with_context(|| format!("Malformed condition set document '{}'", id))?;
                Ok(Some(set))
            }
            None => Ok(None),
        }
    }

    pub async fn list_condition_sets(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT id, name FROM block_conditions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    /// Rescans are idempotent: a detection keyed on the same
    /// (condition set, ticker, level, start date) overwrites its prior row.
    pub async fn save_detections(
        &self,
        condition_set_id: &str,
        detections: &[Detection],
    ) -> Result<()> {
        if detections.is_empty() {
            return Ok(());
        }

        // Same per-row isolation as candle upserts: one rejected detection
        // must not abort the rest of the batch.
        for det in detections {
            let spots = serde_json::to_value(&det.spots)?;
            let result = sqlx::query(
                "INSERT INTO block_detections
                (id, condition_set_id, ticker, level, status, started_at, ended_at,
                entry_open, entry_high, entry_low, entry_close, entry_volume,
                peak_price, peak_date, peak_volume, exit_reason, parent_id,
                pattern_id, is_virtual, spots)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
                ON CONFLICT (condition_set_id, ticker, level, started_at)
                DO UPDATE SET status = EXCLUDED.status, ended_at = EXCLUDED.ended_at,
                    peak_price = EXCLUDED.peak_price, peak_date = EXCLUDED.peak_date,
                    peak_volume = EXCLUDED.peak_volume, exit_reason = EXCLUDED.exit_reason,
                    parent_id = EXCLUDED.parent_id, pattern_id = EXCLUDED.pattern_id,
                    is_virtual = EXCLUDED.is_virtual, spots = EXCLUDED.spots",
            )
            .bind(&det.id)
            .bind(condition_set_id)
            .bind(&det.ticker)
            .bind(det.level as i32)
            .bind(status_str(det.status))
            .bind(det.started_at)
            .bind(det.ended_at)
            .bind(det.entry.open)
            .bind(det.entry.high)
            .bind(det.entry.low)
            .bind(det.entry.close)
            .bind(det.entry.volume)
            .bind(det.peak_price)
            .bind(det.peak_date)
            .bind(det.peak_volume)
            .bind(det.exit_reason.map(|r| r.as_str()))
            .bind(&det.parent_id)
            .bind(&det.pattern_id)
            .bind(det.is_virtual)
            .bind(&spots)
            .execute(&self.pool)
            .await;

            if let Err(e) = result {
                error!("Error saving detection {} for {}: {}", det.id, det.ticker, e);
                // Continue with the rest of the batch
            }
        }

        Ok(())
    }

    pub async fn save_patterns(&self, patterns: &[Pattern]) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for pattern in patterns {
            let detection_ids = serde_json::to_value(&pattern.detection_ids)?;
            let windows = serde_json::to_value(&pattern.windows)?;
            sqlx::query(
                "INSERT INTO block_patterns
                (id, condition_set_id, ticker, detection_ids, windows)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id)
                DO UPDATE SET detection_ids = EXCLUDED.detection_ids,
                    windows = EXCLUDED.windows",
            )
            .bind(&pattern.id)
            .bind(&pattern.condition_set_id)
            .bind(&pattern.ticker)
            .bind(&detection_ids)
            .bind(&windows)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    pub async fn save_redetections(&self, events: &[RedetectionEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                "INSERT INTO block_redetections
                (id, parent_detection_id, seq, status, started_at, ended_at,
                entry_open, entry_close, peak_price, peak_volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (parent_detection_id, started_at)
                DO UPDATE SET seq = EXCLUDED.seq, status = EXCLUDED.status,
                    ended_at = EXCLUDED.ended_at, peak_price = EXCLUDED.peak_price,
                    peak_volume = EXCLUDED.peak_volume",
            )
            .bind(&event.id)
            .bind(&event.parent_detection_id)
            .bind(event.seq as i32)
            .bind(redetection_status_str(event.status))
            .bind(event.started_at)
            .bind(event.ended_at)
            .bind(event.entry_open)
            .bind(event.entry_close)
            .bind(event.peak_price)
            .bind(event.peak_volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl CandleSource for PostgresManager {
    async fn tickers(&self) -> Result<Vec<String>> {
        self.get_tickers().await
    }

    async fn candles(&self, ticker: &str) -> Result<Vec<Candle>> {
        self.get_candles(ticker).await
    }
}

fn status_str(status: DetectionStatus) -> &'static str {
    match status {
        DetectionStatus::Active => "active",
        DetectionStatus::Completed => "completed",
        DetectionStatus::Failed => "failed",
    }
}

fn redetection_status_str(status: RedetectionStatus) -> &'static str {
    match status {
        RedetectionStatus::Active => "active",
        RedetectionStatus::Completed => "completed",
    }
}
