use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::{Classify, ErrorClass};
use crate::models::prediction::{DetectionLabel, PredictionRecord};

/// Durable store of prediction records keyed by prediction id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the record. Replaying the same id is last-write-wins.
    async fn put(&self, record: &PredictionRecord) -> Result<(), ResultStoreError>;

    async fn get(&self, prediction_id: &str) -> Result<Option<PredictionRecord>, ResultStoreError>;
}

/// PostgreSQL-backed prediction store.
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<(), ResultStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn put(&self, record: &PredictionRecord) -> Result<(), ResultStoreError> {
        sqlx::query(
            r#"
            INSERT INTO predictions
                (prediction_id, original_img_path, predicted_img_path,
                 chat_id, labels, predicted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (prediction_id) DO UPDATE
            SET original_img_path = EXCLUDED.original_img_path,
                predicted_img_path = EXCLUDED.predicted_img_path,
                chat_id = EXCLUDED.chat_id,
                labels = EXCLUDED.labels,
                predicted_at = EXCLUDED.predicted_at,
                updated_at = NOW()
            "#,
        )
        .bind(&record.prediction_id)
        .bind(&record.original_img_path)
        .bind(&record.predicted_img_path)
        .bind(&record.chat_id)
        .bind(Json(&record.labels))
        .bind(record.time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, prediction_id: &str) -> Result<Option<PredictionRecord>, ResultStoreError> {
        let row = sqlx::query(
            r#"
            SELECT prediction_id, original_img_path, predicted_img_path,
                   chat_id, labels, predicted_at
            FROM predictions
            WHERE prediction_id = $1
            "#,
        )
        .bind(prediction_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let labels: Json<Vec<DetectionLabel>> = row.try_get("labels")?;

        Ok(Some(PredictionRecord {
            prediction_id: row.try_get("prediction_id")?,
            original_img_path: row.try_get("original_img_path")?,
            predicted_img_path: row.try_get("predicted_img_path")?,
            chat_id: row.try_get("chat_id")?,
            labels: labels.0,
            time: row.try_get("predicted_at")?,
        }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Classify for ResultStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            ResultStoreError::Database(sqlx::Error::Configuration(_))
            | ResultStoreError::Database(sqlx::Error::Migrate(_)) => ErrorClass::Configuration,
            ResultStoreError::Database(sqlx::Error::Database(db))
                if db.code().as_deref() == Some("42P01") =>
            {
                // undefined_table: migrations were never applied
                ErrorClass::Configuration
            }
            _ => ErrorClass::Transient,
        }
    }
}
