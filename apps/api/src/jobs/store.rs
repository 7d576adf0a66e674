use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::run::{PipelineRun, RunStatus};

/// Persistence for `PipelineRun` records.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts `run`, or returns the run already stored under the same
    /// `(user_id, idempotency_key)`. The returned record is the one that exists.
    async fn insert(&self, run: PipelineRun) -> Result<PipelineRun, StoreError>;

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError>;

    /// Moves a pending run to running. `None` when the run is not pending,
    /// so at most one worker ever executes a run.
    async fn claim(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError>;

    /// Overwrites a non-terminal run. Terminal runs are frozen.
    async fn update(&self, run: &PipelineRun) -> Result<(), StoreError>;
}

/// `pipeline_runs` table; the full record lives in the `document` JSONB column and
/// `status` / `idempotency_key` are mirrored into plain columns for the guards.
#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<PipelineRun>, StoreError> {
        let document: Option<Json<PipelineRun>> = sqlx::query_scalar(
            "SELECT document FROM pipeline_runs WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(document.map(|Json(run)| run))
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert(&self, run: PipelineRun) -> Result<PipelineRun, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO pipeline_runs
                (run_id, user_id, idempotency_key, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, idempotency_key) WHERE idempotency_key IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(run.run_id)
        .bind(&run.user_id)
        .bind(&run.idempotency_key)
        .bind(run.status.as_str())
        .bind(Json(&run))
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(run);
        }
        let key = run.idempotency_key.as_deref().unwrap_or_default();
        debug!(user_id = %run.user_id, key, "Idempotency key already used");
        self.find_by_idempotency_key(&run.user_id, key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("run for idempotency key '{key}'")))
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        let document: Option<Json<PipelineRun>> =
            sqlx::query_scalar("SELECT document FROM pipeline_runs WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|Json(run)| run))
    }

    async fn claim(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        let Some(mut run) = self.get(run_id).await? else {
            return Ok(None);
        };
        if run.status != RunStatus::Pending {
            return Ok(None);
        }
        run.status = RunStatus::Running;
        run.updated_at = Utc::now();

        let claimed = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2, document = $3, updated_at = $4
            WHERE run_id = $1 AND status = 'pending'
            "#,
        )
        .bind(run_id)
        .bind(run.status.as_str())
        .bind(Json(&run))
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok((claimed == 1).then_some(run))
    }

    async fn update(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2, document = $3, updated_at = $4
            WHERE run_id = $1 AND status NOT IN ('succeeded', 'failed', 'partial')
            "#,
        )
        .bind(run.run_id)
        .bind(run.status.as_str())
        .bind(Json(run))
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }
        match self.get(run.run_id).await? {
            Some(_) => Err(StoreError::Terminal(run.run_id)),
            None => Err(StoreError::NotFound(format!("run {}", run.run_id))),
        }
    }
}
