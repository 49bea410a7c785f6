//! Store trait definitions for the scheduler and the workflow engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use invo_core::CodeData;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is in progress (or was interrupted and can be resumed)
    Running,

    /// All steps completed
    Completed,

    /// A step exhausted its retries
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Handle returned when a run is created or resumed
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: Uuid,

    /// True when an interrupted run for the same entity was picked up
    /// instead of a fresh one being created
    pub resumed: bool,
}

/// Durable state for the per-entity debounce scheduler
///
/// One pending task and at most one armed timer per entity. Implementations
/// must make `put_task` an overwrite and `arm_timer` a no-op when a timer is
/// already armed; that pair of semantics is what makes the debounce window
/// fixed rather than sliding.
#[async_trait]
pub trait SchedulerStore: Send + Sync + 'static {
    /// Persist (or overwrite) the pending task for `task.code_id`
    async fn put_task(&self, task: &CodeData) -> Result<(), StoreError>;

    /// Read the pending task for an entity
    async fn get_task(&self, entity_id: &str) -> Result<Option<CodeData>, StoreError>;

    /// Remove the pending task for an entity
    async fn delete_task(&self, entity_id: &str) -> Result<(), StoreError>;

    /// Arm the one-shot timer, only if none is armed
    ///
    /// Returns `true` if this call armed the timer, `false` if one was
    /// already armed (the existing deadline stands).
    async fn arm_timer(&self, entity_id: &str, deadline: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Entities whose timer deadline has passed
    async fn due_timers(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    /// Clear the timer for an entity
    async fn clear_timer(&self, entity_id: &str) -> Result<(), StoreError>;
}

/// Durable progress for workflow runs
///
/// Step results are persisted before the next step starts, keyed by
/// `(run_id, step_name)`, so resumption after a crash is a lookup rather
/// than a re-execution.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Find an interrupted run for `(workflow_type, entity_id)` or create a
    /// fresh one
    async fn create_or_resume_run(
        &self,
        workflow_type: &str,
        entity_id: &str,
        input: serde_json::Value,
    ) -> Result<RunHandle, StoreError>;

    /// Result of a step that already completed in this run, if any
    async fn get_step_result(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// Durably record a step's result
    async fn record_step_result(
        &self,
        run_id: Uuid,
        step_name: &str,
        result: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Mark the run completed
    async fn mark_run_completed(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Mark the run failed with an operator-visible error
    async fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Current status of a run
    async fn get_run_status(&self, run_id: Uuid) -> Result<RunStatus, StoreError>;
}
