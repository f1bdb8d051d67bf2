use chrono::{DateTime, Utc};
use quarry_core::error::AppError;
use quarry_core::models::{Bucket, Record, RecordError, ScrapeResult, SubmitReport};
use quarry_core::traits::RecordStore;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// A persisted record as read back from PostgreSQL.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub scraper: String,
    pub bucket: Bucket,
    pub collection: String,
    pub natural_key: String,
    pub fields: serde_json::Value,
    pub first_run_id: Uuid,
    pub last_run_id: Uuid,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Repository for run results in PostgreSQL.
///
/// Records are upserted on `(scraper, bucket, natural_key)`, so submitting
/// the same result twice leaves one row per record.
#[derive(Clone)]
pub struct RecordRepository {
    pool: Pool<Postgres>,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the run summary row. Records reference it.
    pub async fn save_run(&self, result: &ScrapeResult) -> Result<(), AppError> {
        let m = &result.metadata;
        sqlx::query(
            r#"
            INSERT INTO scrape_runs
                (id, scraper, mode, started_at, finished_at, duration_ms, record_count, error_count, errors)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(result.run_id)
        .bind(&result.scraper)
        .bind(m.mode.as_str())
        .bind(m.started_at)
        .bind(m.finished_at)
        .bind(m.duration_ms as i64)
        .bind(result.total_records() as i32)
        .bind(m.error_count as i32)
        .bind(Json(&result.errors))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Insert or refresh one record.
    pub async fn upsert_record(
        &self,
        run_id: Uuid,
        scraper: &str,
        bucket: Bucket,
        record: &Record,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scraped_records
                (scraper, bucket, collection, natural_key, fields, first_run_id, last_run_id)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (scraper, bucket, natural_key) DO UPDATE
            SET collection = EXCLUDED.collection,
                fields = EXCLUDED.fields,
                last_run_id = EXCLUDED.last_run_id,
                last_seen_at = NOW()
            "#,
        )
        .bind(scraper)
        .bind(bucket.as_str())
        .bind(&record.collection)
        .bind(&record.key)
        .bind(Json(&record.fields))
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Records of a scraper, most recently seen first.
    pub async fn get_records(
        &self,
        scraper: &str,
        bucket: Option<Bucket>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, AppError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, scraper, bucket, collection, natural_key, fields,
                   first_run_id, last_run_id, first_seen_at, last_seen_at
            FROM scraped_records
            WHERE scraper = $1 AND ($2::VARCHAR IS NULL OR bucket = $2)
            ORDER BY last_seen_at DESC, natural_key
            LIMIT $3
            "#,
        )
        .bind(scraper)
        .bind(bucket.map(|b| b.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(StoredRecord::try_from).collect()
    }

    pub async fn count_records(&self, scraper: &str) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scraped_records WHERE scraper = $1")
            .bind(scraper)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    pub async fn count_runs(&self, scraper: &str) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scrape_runs WHERE scraper = $1")
            .bind(scraper)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    scraper: String,
    bucket: String,
    collection: String,
    natural_key: String,
    fields: serde_json::Value,
    first_run_id: Uuid,
    last_run_id: Uuid,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = AppError;

    fn try_from(row: RecordRow) -> Result<Self, AppError> {
        let bucket = Bucket::ALL
            .into_iter()
            .find(|b| b.as_str() == row.bucket)
            .ok_or_else(|| AppError::DatabaseError(format!("unknown bucket '{}'", row.bucket)))?;
        Ok(StoredRecord {
            id: row.id,
            scraper: row.scraper,
            bucket,
            collection: row.collection,
            natural_key: row.natural_key,
            fields: row.fields,
            first_run_id: row.first_run_id,
            last_run_id: row.last_run_id,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
        })
    }
}

// -- Trait implementation --

impl RecordStore for RecordRepository {
    async fn submit(&self, result: &ScrapeResult) -> Result<SubmitReport, AppError> {
        self.save_run(result).await?;

        let mut report = SubmitReport::default();
        for (bucket, record) in result.records() {
            match self
                .upsert_record(result.run_id, &result.scraper, bucket, record)
                .await
            {
                Ok(()) => report.persisted += 1,
                Err(e) => report.errors.push(RecordError {
                    bucket,
                    collection: record.collection.clone(),
                    key: record.key.clone(),
                    message: e.to_string(),
                }),
            }
        }
        tracing::debug!(
            run_id = %result.run_id,
            persisted = report.persisted,
            failed = report.errors.len(),
            "Submitted run to PostgreSQL"
        );
        Ok(report)
    }
}
