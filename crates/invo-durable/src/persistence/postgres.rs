//! PostgreSQL implementation of the scheduler and checkpoint stores
//!
//! Tables (created by the deployment's migration step):
//!
//! ```text
//! scheduler_tasks      (entity_id TEXT PRIMARY KEY, payload JSONB NOT NULL,
//!                       updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW())
//! scheduler_timers     (entity_id TEXT PRIMARY KEY, deadline TIMESTAMPTZ NOT NULL)
//! workflow_runs        (id UUID PRIMARY KEY, workflow_type TEXT NOT NULL,
//!                       entity_id TEXT NOT NULL, status TEXT NOT NULL,
//!                       input JSONB NOT NULL, error TEXT,
//!                       created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!                       updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW())
//! workflow_checkpoints (run_id UUID NOT NULL, step_name TEXT NOT NULL,
//!                       result JSONB NOT NULL,
//!                       completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!                       PRIMARY KEY (run_id, step_name))
//! ```
//!
//! Timer arming relies on `INSERT ... ON CONFLICT DO NOTHING` so the first
//! trigger wins the deadline and later triggers within the window never
//! extend it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use invo_core::CodeData;

use super::store::*;

/// PostgreSQL-backed [`SchedulerStore`] and [`CheckpointStore`]
///
/// # Example
///
/// ```ignore
/// use invo_durable::PostgresDurableStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/invo").await?;
/// let store = PostgresDurableStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresDurableStore {
    pool: PgPool,
}

impl PostgresDurableStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SchedulerStore for PostgresDurableStore {
    #[instrument(skip(self, task), fields(entity_id = %task.code_id))]
    async fn put_task(&self, task: &CodeData) -> Result<(), StoreError> {
        let payload = serde_json::to_value(task)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO scheduler_tasks (entity_id, payload, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (entity_id)
            DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()
            "#,
        )
        .bind(&task.code_id)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to persist pending task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_task(&self, entity_id: &str) -> Result<Option<CodeData>, StoreError> {
        let row = sqlx::query("SELECT payload FROM scheduler_tasks WHERE entity_id = $1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|r| {
            let payload: serde_json::Value = r.get("payload");
            serde_json::from_value(payload).map_err(|e| StoreError::Serialization(e.to_string()))
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, entity_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM scheduler_tasks WHERE entity_id = $1")
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn arm_timer(
        &self,
        entity_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_timers (entity_id, deadline)
            VALUES ($1, $2)
            ON CONFLICT (entity_id) DO NOTHING
            "#,
        )
        .bind(entity_id)
        .bind(deadline)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn due_timers(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT entity_id FROM scheduler_timers WHERE deadline <= $1")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("entity_id")).collect())
    }

    #[instrument(skip(self))]
    async fn clear_timer(&self, entity_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM scheduler_timers WHERE entity_id = $1")
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresDurableStore {
    #[instrument(skip(self, input))]
    async fn create_or_resume_run(
        &self,
        workflow_type: &str,
        entity_id: &str,
        input: serde_json::Value,
    ) -> Result<RunHandle, StoreError> {
        let existing = sqlx::query(
            r#"
            SELECT id FROM workflow_runs
            WHERE workflow_type = $1 AND entity_id = $2 AND status = 'running'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if let Some(row) = existing {
            return Ok(RunHandle {
                run_id: row.get("id"),
                resumed: true,
            });
        }

        let run_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_type, entity_id, status, input)
            VALUES ($1, $2, $3, 'running', $4)
            "#,
        )
        .bind(run_id)
        .bind(workflow_type)
        .bind(entity_id)
        .bind(&input)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create workflow run: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(RunHandle {
            run_id,
            resumed: false,
        })
    }

    #[instrument(skip(self))]
    async fn get_step_result(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query(
            "SELECT result FROM workflow_checkpoints WHERE run_id = $1 AND step_name = $2",
        )
        .bind(run_id)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.map(|r| r.get("result")))
    }

    #[instrument(skip(self, result))]
    async fn record_step_result(
        &self,
        run_id: Uuid,
        step_name: &str,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        // Re-recording after a crash between persist and advance is benign
        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (run_id, step_name, result)
            VALUES ($1, $2, $3)
            ON CONFLICT (run_id, step_name) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(step_name)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_run_completed(&self, run_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE workflow_runs SET status = 'completed', updated_at = NOW() WHERE id = $1",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE workflow_runs SET status = 'failed', error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(run_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run_status(&self, run_id: Uuid) -> Result<RunStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM workflow_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::RunNotFound(run_id))?;

        let status: String = row.get("status");
        match status.as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(StoreError::Database(format!(
                "unexpected run status: {other}"
            ))),
        }
    }
}
