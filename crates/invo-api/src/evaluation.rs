//! Code evaluation pipeline
//!
//! The concrete workflow the scheduler hands debounced tasks to:
//!
//! 1. `generate_content`: derive content for the code (2 attempts, 1s apart)
//! 2. `send_notification`: tell the requester (3 attempts, 2s apart)
//! 3. `persist_status`: flip the code row to `success` (2 attempts, 1s apart)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use invo_core::CodeData;
use invo_durable::{
    CheckpointStore, RetryPolicy, Step, StepContext, StepError, StoreError, WorkflowDefinition,
    WorkflowLauncher, WorkflowRunError, WorkflowRunner,
};
use invo_storage::CodeStore;

pub const CODE_EVALUATION_WORKFLOW: &str = "code_evaluation";

/// Produces derived content for a generated code
#[async_trait]
pub trait ContentGenerator: Send + Sync + 'static {
    async fn generate(&self, code_id: &str) -> anyhow::Result<String>;
}

/// Tells the requesting user their code is ready
#[async_trait]
pub trait EvaluationNotifier: Send + Sync + 'static {
    async fn notify_ready(&self, user_id: &str, code_id: &str) -> anyhow::Result<()>;
}

/// Stand-in generator until a model provider is wired up
// TODO: replace with the real model call once a provider is picked
#[derive(Default)]
pub struct SimulatedContentGenerator;

#[async_trait]
impl ContentGenerator for SimulatedContentGenerator {
    async fn generate(&self, code_id: &str) -> anyhow::Result<String> {
        info!(code_id, "generating content for code");
        Ok("AI generated content".to_string())
    }
}

/// Notifier that records the notification to the log stream
#[derive(Default)]
pub struct LoggingEvaluationNotifier;

#[async_trait]
impl EvaluationNotifier for LoggingEvaluationNotifier {
    async fn notify_ready(&self, user_id: &str, code_id: &str) -> anyhow::Result<()> {
        info!(user_id, code_id, "notifying user that code is ready");
        Ok(())
    }
}

struct GenerateContent {
    generator: Arc<dyn ContentGenerator>,
}

#[async_trait]
impl Step<CodeData> for GenerateContent {
    fn name(&self) -> &'static str {
        "generate_content"
    }

    async fn execute(
        &self,
        _ctx: &StepContext,
        payload: &CodeData,
    ) -> Result<serde_json::Value, StepError> {
        if payload.ai_generated {
            // Content already exists for this code
            return Ok(json!({ "generated": false }));
        }

        let content = self
            .generator
            .generate(&payload.code_id)
            .await
            .map_err(|e| StepError::retryable(e.to_string()))?;

        Ok(json!({ "generated": true, "content": content }))
    }
}

struct SendNotification {
    notifier: Arc<dyn EvaluationNotifier>,
}

#[async_trait]
impl Step<CodeData> for SendNotification {
    fn name(&self) -> &'static str {
        "send_notification"
    }

    async fn execute(
        &self,
        _ctx: &StepContext,
        payload: &CodeData,
    ) -> Result<serde_json::Value, StepError> {
        if !payload.email_send {
            return Ok(json!({ "sent": false }));
        }

        self.notifier
            .notify_ready(&payload.user_id, &payload.code_id)
            .await
            .map_err(|e| StepError::retryable(e.to_string()))?;

        Ok(json!({ "sent": true }))
    }
}

struct PersistStatus {
    codes: Arc<dyn CodeStore>,
}

#[async_trait]
impl Step<CodeData> for PersistStatus {
    fn name(&self) -> &'static str {
        "persist_status"
    }

    async fn execute(
        &self,
        _ctx: &StepContext,
        payload: &CodeData,
    ) -> Result<serde_json::Value, StepError> {
        self.codes
            .mark_code_evaluated(&payload.code_id)
            .await
            .map_err(|e| StepError::retryable(e.to_string()))?;

        info!(code_id = %payload.code_id, "code marked as evaluated");
        Ok(json!({ "status": "success" }))
    }
}

/// Build the evaluation pipeline with its per-step retry policies
pub fn code_evaluation_workflow(
    generator: Arc<dyn ContentGenerator>,
    notifier: Arc<dyn EvaluationNotifier>,
    codes: Arc<dyn CodeStore>,
) -> WorkflowDefinition<CodeData> {
    WorkflowDefinition::new(CODE_EVALUATION_WORKFLOW)
        .step(
            GenerateContent { generator },
            RetryPolicy::fixed(Duration::from_secs(1), 2),
        )
        .step(
            SendNotification { notifier },
            RetryPolicy::fixed(Duration::from_secs(2), 3),
        )
        .step(
            PersistStatus { codes },
            RetryPolicy::fixed(Duration::from_secs(1), 2),
        )
}

/// Connects the scheduler to the evaluation pipeline
///
/// Each launch resolves to a run id first: a firing retried after a crash
/// resumes the interrupted run's checkpoints instead of repeating its
/// completed steps.
pub struct CodeEvaluationLauncher<C: CheckpointStore> {
    runner: WorkflowRunner<CodeData, C>,
    checkpoints: Arc<C>,
}

impl<C: CheckpointStore> CodeEvaluationLauncher<C> {
    pub fn new(definition: WorkflowDefinition<CodeData>, checkpoints: Arc<C>) -> Self {
        Self {
            runner: WorkflowRunner::new(definition, checkpoints.clone()),
            checkpoints,
        }
    }
}

#[async_trait]
impl<C: CheckpointStore> WorkflowLauncher for CodeEvaluationLauncher<C> {
    async fn launch(&self, task: &CodeData) -> Result<(), WorkflowRunError> {
        let input = serde_json::to_value(task)
            .map_err(|e| WorkflowRunError::Store(StoreError::Serialization(e.to_string())))?;

        let handle = self
            .checkpoints
            .create_or_resume_run(CODE_EVALUATION_WORKFLOW, &task.code_id, input)
            .await?;

        if handle.resumed {
            info!(code_id = %task.code_id, run_id = %handle.run_id, "resuming interrupted run");
        }

        self.runner.run(handle.run_id, task).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use invo_core::CodeStatus;
    use invo_durable::InMemoryCheckpointStore;
    use invo_storage::{Code, InMemoryLedger};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        notified: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EvaluationNotifier for RecordingNotifier {
        async fn notify_ready(&self, _user_id: &str, code_id: &str) -> anyhow::Result<()> {
            self.notified.lock().push(code_id.to_string());
            Ok(())
        }
    }

    fn task(code_id: &str, email_send: bool) -> CodeData {
        CodeData {
            code_id: code_id.to_string(),
            user_id: "u1".to_string(),
            status: CodeStatus::Pending,
            ai_generated: false,
            email_send,
        }
    }

    fn seed_code(ledger: &InMemoryLedger, code_id: &str) {
        ledger.insert_code(Code {
            id: code_id.to_string(),
            user_id: "u1".to_string(),
            status: CodeStatus::Pending,
            ai_generated: false,
            email_send: false,
            updated_at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_pipeline_finalizes_code() {
        let ledger = Arc::new(InMemoryLedger::new());
        seed_code(&ledger, "c1");
        let notifier = Arc::new(RecordingNotifier::default());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let launcher = CodeEvaluationLauncher::new(
            code_evaluation_workflow(
                Arc::new(SimulatedContentGenerator),
                notifier.clone(),
                ledger.clone(),
            ),
            checkpoints,
        );

        launcher.launch(&task("c1", true)).await.unwrap();

        let code = ledger.code("c1").unwrap();
        assert_eq!(code.status, CodeStatus::Success);
        assert!(code.ai_generated);
        assert!(code.email_send);
        assert_eq!(*notifier.notified.lock(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_email_flag_off_skips_notification() {
        let ledger = Arc::new(InMemoryLedger::new());
        seed_code(&ledger, "c2");
        let notifier = Arc::new(RecordingNotifier::default());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let launcher = CodeEvaluationLauncher::new(
            code_evaluation_workflow(
                Arc::new(SimulatedContentGenerator),
                notifier.clone(),
                ledger.clone(),
            ),
            checkpoints,
        );

        launcher.launch(&task("c2", false)).await.unwrap();

        assert!(notifier.notified.lock().is_empty());
        // Status still persisted
        assert_eq!(ledger.code("c2").unwrap().status, CodeStatus::Success);
    }
}
