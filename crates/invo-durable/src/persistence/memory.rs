//! In-memory store implementations for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use invo_core::CodeData;

use super::store::*;

/// In-memory implementation of [`SchedulerStore`]
///
/// Provides the same semantics as the PostgreSQL implementation. Primarily
/// for tests and local runs.
#[derive(Default)]
pub struct InMemorySchedulerStore {
    tasks: RwLock<HashMap<String, CodeData>>,
    timers: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemorySchedulerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending tasks (for assertions)
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Armed deadline for an entity (for assertions)
    pub fn deadline(&self, entity_id: &str) -> Option<DateTime<Utc>> {
        self.timers.read().get(entity_id).copied()
    }
}

#[async_trait]
impl SchedulerStore for InMemorySchedulerStore {
    async fn put_task(&self, task: &CodeData) -> Result<(), StoreError> {
        self.tasks
            .write()
            .insert(task.code_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, entity_id: &str) -> Result<Option<CodeData>, StoreError> {
        Ok(self.tasks.read().get(entity_id).cloned())
    }

    async fn delete_task(&self, entity_id: &str) -> Result<(), StoreError> {
        self.tasks.write().remove(entity_id);
        Ok(())
    }

    async fn arm_timer(
        &self,
        entity_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut timers = self.timers.write();
        if timers.contains_key(entity_id) {
            return Ok(false);
        }
        timers.insert(entity_id.to_string(), deadline);
        Ok(true)
    }

    async fn due_timers(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .timers
            .read()
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(entity, _)| entity.clone())
            .collect())
    }

    async fn clear_timer(&self, entity_id: &str) -> Result<(), StoreError> {
        self.timers.write().remove(entity_id);
        Ok(())
    }
}

/// Internal run state
struct RunState {
    workflow_type: String,
    entity_id: String,
    status: RunStatus,
    #[allow(dead_code)] // Stored for operator inspection
    input: serde_json::Value,
    error: Option<String>,
    steps: HashMap<String, serde_json::Value>,
}

/// In-memory implementation of [`CheckpointStore`]
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    runs: RwLock<HashMap<Uuid, RunState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs ever created (for assertions)
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Recorded failure message for a run (for assertions)
    pub fn run_error(&self, run_id: Uuid) -> Option<String> {
        self.runs.read().get(&run_id).and_then(|r| r.error.clone())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create_or_resume_run(
        &self,
        workflow_type: &str,
        entity_id: &str,
        input: serde_json::Value,
    ) -> Result<RunHandle, StoreError> {
        let mut runs = self.runs.write();

        if let Some((run_id, _)) = runs.iter().find(|(_, run)| {
            run.workflow_type == workflow_type
                && run.entity_id == entity_id
                && run.status == RunStatus::Running
        }) {
            return Ok(RunHandle {
                run_id: *run_id,
                resumed: true,
            });
        }

        let run_id = Uuid::now_v7();
        runs.insert(
            run_id,
            RunState {
                workflow_type: workflow_type.to_string(),
                entity_id: entity_id.to_string(),
                status: RunStatus::Running,
                input,
                error: None,
                steps: HashMap::new(),
            },
        );

        Ok(RunHandle {
            run_id,
            resumed: false,
        })
    }

    async fn get_step_result(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let runs = self.runs.read();
        let run = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        Ok(run.steps.get(step_name).cloned())
    }

    async fn record_step_result(
        &self,
        run_id: Uuid,
        step_name: &str,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.steps.insert(step_name.to_string(), result);
        Ok(())
    }

    async fn mark_run_completed(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.status = RunStatus::Completed;
        Ok(())
    }

    async fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.status = RunStatus::Failed;
        run.error = Some(error.to_string());
        Ok(())
    }

    async fn get_run_status(&self, run_id: Uuid) -> Result<RunStatus, StoreError> {
        let runs = self.runs.read();
        runs.get(&run_id)
            .map(|r| r.status)
            .ok_or(StoreError::RunNotFound(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invo_core::CodeStatus;

    fn task(code_id: &str) -> CodeData {
        CodeData {
            code_id: code_id.to_string(),
            user_id: "u1".to_string(),
            status: CodeStatus::Pending,
            ai_generated: false,
            email_send: true,
        }
    }

    #[tokio::test]
    async fn test_put_task_overwrites() {
        let store = InMemorySchedulerStore::new();
        store.put_task(&task("c1")).await.unwrap();

        let mut updated = task("c1");
        updated.email_send = false;
        store.put_task(&updated).await.unwrap();

        let stored = store.get_task("c1").await.unwrap().unwrap();
        assert!(!stored.email_send);
        assert_eq!(store.task_count(), 1);
    }

    #[tokio::test]
    async fn test_arm_timer_is_fixed_window() {
        let store = InMemorySchedulerStore::new();
        let first = Utc::now();
        let later = first + chrono::Duration::minutes(5);

        assert!(store.arm_timer("c1", first).await.unwrap());
        // Second arm does not replace the deadline
        assert!(!store.arm_timer("c1", later).await.unwrap());
        assert_eq!(store.deadline("c1"), Some(first));
    }

    #[tokio::test]
    async fn test_due_timers() {
        let store = InMemorySchedulerStore::new();
        let now = Utc::now();
        store
            .arm_timer("past", now - chrono::Duration::seconds(1))
            .await
            .unwrap();
        store
            .arm_timer("future", now + chrono::Duration::minutes(3))
            .await
            .unwrap();

        let due = store.due_timers(now).await.unwrap();
        assert_eq!(due, vec!["past".to_string()]);
    }

    #[tokio::test]
    async fn test_create_or_resume_run() {
        let store = InMemoryCheckpointStore::new();
        let first = store
            .create_or_resume_run("code_evaluation", "c1", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!first.resumed);

        // Still running: same run is handed back
        let second = store
            .create_or_resume_run("code_evaluation", "c1", serde_json::json!({}))
            .await
            .unwrap();
        assert!(second.resumed);
        assert_eq!(first.run_id, second.run_id);

        // After completion a fresh run is created
        store.mark_run_completed(first.run_id).await.unwrap();
        let third = store
            .create_or_resume_run("code_evaluation", "c1", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!third.resumed);
        assert_ne!(first.run_id, third.run_id);
    }

    #[tokio::test]
    async fn test_step_results_round_trip() {
        let store = InMemoryCheckpointStore::new();
        let handle = store
            .create_or_resume_run("code_evaluation", "c1", serde_json::json!({}))
            .await
            .unwrap();

        assert!(store
            .get_step_result(handle.run_id, "generate_content")
            .await
            .unwrap()
            .is_none());

        store
            .record_step_result(
                handle.run_id,
                "generate_content",
                serde_json::json!({"success": true}),
            )
            .await
            .unwrap();

        let cached = store
            .get_step_result(handle.run_id, "generate_content")
            .await
            .unwrap();
        assert_eq!(cached, Some(serde_json::json!({"success": true})));
    }

    #[tokio::test]
    async fn test_unknown_run_is_an_error() {
        let store = InMemoryCheckpointStore::new();
        let missing = Uuid::now_v7();
        assert!(matches!(
            store.get_run_status(missing).await,
            Err(StoreError::RunNotFound(_))
        ));
    }
}
