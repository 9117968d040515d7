use analysis_core::{AnalysisError, BatchMetadata, PersistenceSink, UnifiedAnalysisResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS analysis_results (
    id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    as_of TEXT NOT NULL,
    overall_score INTEGER NOT NULL,
    overall_confidence REAL NOT NULL,
    tier TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
)";

/// SQLite-backed store for synthesized results.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

fn db_error(e: sqlx::Error) -> AnalysisError {
    AnalysisError::PersistenceFailure(e.to_string())
}

impl SqlitePersistence {
    pub async fn connect(database_url: &str) -> Result<Self, AnalysisError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, AnalysisError> {
        sqlx::query(SCHEMA).execute(&pool).await.map_err(db_error)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceSink for SqlitePersistence {
    async fn store(
        &self,
        result: &UnifiedAnalysisResult,
        batch: &BatchMetadata,
    ) -> Result<String, AnalysisError> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(result)
            .map_err(|e| AnalysisError::PersistenceFailure(e.to_string()))?;

        sqlx::query(
            "INSERT INTO analysis_results (id, batch_id, instrument, as_of, overall_score, overall_confidence, tier, payload_json, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&batch.batch_id)
        .bind(result.instrument.as_str())
        .bind(result.as_of.format("%Y-%m-%d").to_string())
        .bind(result.overall_score as i64)
        .bind(result.overall_confidence)
        .bind(result.tier.label())
        .bind(&payload)
        .bind(Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::debug!("Stored analysis for {} as {}", result.instrument, id);
        Ok(id)
    }
}
