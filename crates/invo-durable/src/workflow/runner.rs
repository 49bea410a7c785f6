//! Workflow runner with durable checkpoints
//!
//! The runner drives an ordered list of steps against one payload. Before a
//! step executes, the checkpoint store is consulted; a step that completed in
//! a prior (crashed or retried) run of the same id is skipped and its cached
//! result reused. A step's success is persisted before the next step starts.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::persistence::{CheckpointStore, StoreError};
use crate::retry::RetryPolicy;

use super::step::{Step, StepContext, StepError};

/// One step slot in a workflow definition
pub struct StepDefinition<P> {
    step: Box<dyn Step<P>>,
    policy: RetryPolicy,
}

impl<P: 'static> StepDefinition<P> {
    pub fn new(step: impl Step<P>, policy: RetryPolicy) -> Self {
        Self {
            step: Box::new(step),
            policy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.step.name()
    }
}

/// An ordered, named pipeline of steps
pub struct WorkflowDefinition<P> {
    workflow_type: &'static str,
    steps: Vec<StepDefinition<P>>,
}

impl<P: 'static> WorkflowDefinition<P> {
    pub fn new(workflow_type: &'static str) -> Self {
        Self {
            workflow_type,
            steps: Vec::new(),
        }
    }

    /// Append a step with its retry policy
    pub fn step(mut self, step: impl Step<P>, policy: RetryPolicy) -> Self {
        self.steps.push(StepDefinition::new(step, policy));
        self
    }

    pub fn workflow_type(&self) -> &'static str {
        self.workflow_type
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Errors from running a workflow
#[derive(Debug, thiserror::Error)]
pub enum WorkflowRunError {
    /// Store error while reading or recording progress
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A step exhausted its retries (or failed non-retryably)
    #[error("step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: &'static str,
        attempts: u32,
        source: StepError,
    },
}

/// Outcome detail for a single step
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,

    /// Attempts executed in this invocation (0 when the checkpoint was reused)
    pub attempts: u32,

    /// True when a prior run's checkpoint satisfied this step
    pub resumed_from_checkpoint: bool,

    pub result: serde_json::Value,
}

/// Outcome of a whole run, for observability
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub run_id: Uuid,
    pub steps: Vec<StepReport>,
}

/// Executes workflow definitions against a checkpoint store
///
/// # Example
///
/// ```ignore
/// use invo_durable::prelude::*;
///
/// let store = Arc::new(InMemoryCheckpointStore::new());
/// let definition = WorkflowDefinition::new("code_evaluation")
///     .step(GenerateContent, RetryPolicy::fixed(Duration::from_secs(1), 2))
///     .step(SendNotification, RetryPolicy::fixed(Duration::from_secs(2), 3));
/// let runner = WorkflowRunner::new(definition, store.clone());
///
/// let handle = store.create_or_resume_run("code_evaluation", "c1", input).await?;
/// let report = runner.run(handle.run_id, &payload).await?;
/// ```
pub struct WorkflowRunner<P, C: CheckpointStore> {
    definition: WorkflowDefinition<P>,
    store: Arc<C>,
}

impl<P: Send + Sync + 'static, C: CheckpointStore> WorkflowRunner<P, C> {
    pub fn new(definition: WorkflowDefinition<P>, store: Arc<C>) -> Self {
        Self { definition, store }
    }

    pub fn definition(&self) -> &WorkflowDefinition<P> {
        &self.definition
    }

    /// Execute the pipeline for one run
    ///
    /// Steps run strictly in order. A failure marks the run failed in the
    /// store and surfaces as [`WorkflowRunError::StepFailed`]; completed
    /// steps keep their checkpoints, so a later invocation with the same
    /// `run_id` picks up where this one stopped.
    #[instrument(skip(self, payload), fields(workflow_type = self.definition.workflow_type))]
    pub async fn run(&self, run_id: Uuid, payload: &P) -> Result<WorkflowReport, WorkflowRunError> {
        let mut reports = Vec::with_capacity(self.definition.steps.len());

        for slot in &self.definition.steps {
            let name = slot.name();

            if let Some(cached) = self.store.get_step_result(run_id, name).await? {
                debug!(%run_id, step = name, "step already completed, reusing checkpoint");
                reports.push(StepReport {
                    name,
                    attempts: 0,
                    resumed_from_checkpoint: true,
                    result: cached,
                });
                continue;
            }

            let result = self.run_step(run_id, slot, payload).await;

            match result {
                Ok((attempts, value)) => {
                    // Persist before the next step may start
                    self.store.record_step_result(run_id, name, value.clone()).await?;
                    reports.push(StepReport {
                        name,
                        attempts,
                        resumed_from_checkpoint: false,
                        result: value,
                    });
                }
                Err((attempts, step_error)) => {
                    error!(
                        %run_id,
                        step = name,
                        attempts,
                        error = %step_error,
                        "workflow run failed"
                    );
                    self.store
                        .mark_run_failed(run_id, &step_error.message)
                        .await?;
                    return Err(WorkflowRunError::StepFailed {
                        step: name,
                        attempts,
                        source: step_error,
                    });
                }
            }
        }

        self.store.mark_run_completed(run_id).await?;
        info!(%run_id, steps = reports.len(), "workflow run completed");

        Ok(WorkflowReport {
            run_id,
            steps: reports,
        })
    }

    /// Retry loop for one step; returns the attempt count either way
    async fn run_step(
        &self,
        run_id: Uuid,
        slot: &StepDefinition<P>,
        payload: &P,
    ) -> Result<(u32, serde_json::Value), (u32, StepError)> {
        let name = slot.name();
        let mut attempt = 1u32;

        loop {
            let ctx = StepContext { run_id, attempt };

            match slot.step.execute(&ctx, payload).await {
                Ok(value) => {
                    debug!(%run_id, step = name, attempt, "step succeeded");
                    return Ok((attempt, value));
                }
                Err(err) if err.retryable && slot.policy.has_attempts_remaining(attempt) => {
                    warn!(
                        %run_id,
                        step = name,
                        attempt,
                        error = %err,
                        "step failed, retrying"
                    );
                    tokio::time::sleep(slot.policy.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryCheckpointStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Counts executions; fails until `fail_first` attempts have happened
    struct FlakyStep {
        name: &'static str,
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl Step<String> for FlakyStep {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &self,
            _ctx: &StepContext,
            payload: &String,
        ) -> Result<serde_json::Value, StepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(StepError::retryable("transient"))
            } else {
                Ok(serde_json::json!({ "payload": payload, "call": call }))
            }
        }
    }

    fn flaky(
        name: &'static str,
        fail_first: u32,
    ) -> (FlakyStep, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            FlakyStep {
                name,
                calls: calls.clone(),
                fail_first,
            },
            calls,
        )
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1), max_attempts)
    }

    async fn start_run(store: &Arc<InMemoryCheckpointStore>, entity: &str) -> Uuid {
        store
            .create_or_resume_run("test_workflow", entity, serde_json::json!({}))
            .await
            .unwrap()
            .run_id
    }

    #[tokio::test]
    async fn test_steps_run_in_order_with_retries() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (a, a_calls) = flaky("a", 0);
        let (b, b_calls) = flaky("b", 2); // fails twice, succeeds on 3rd
        let (c, c_calls) = flaky("c", 0);

        let definition = WorkflowDefinition::new("test_workflow")
            .step(a, policy(3))
            .step(b, policy(3))
            .step(c, policy(3));
        let runner = WorkflowRunner::new(definition, store.clone());

        let run_id = start_run(&store, "e1").await;
        let report = runner.run(run_id, &"x".to_string()).await.unwrap();

        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 3);
        assert_eq!(c_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.steps[1].attempts, 3);
        assert_eq!(
            store.get_run_status(run_id).await.unwrap(),
            crate::persistence::RunStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_stop_the_pipeline() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (a, a_calls) = flaky("a", 0);
        let (b, b_calls) = flaky("b", 10); // never succeeds within 3 attempts
        let (c, c_calls) = flaky("c", 0);

        let definition = WorkflowDefinition::new("test_workflow")
            .step(a, policy(3))
            .step(b, policy(3))
            .step(c, policy(3));
        let runner = WorkflowRunner::new(definition, store.clone());

        let run_id = start_run(&store, "e1").await;
        let err = runner.run(run_id, &"x".to_string()).await.unwrap_err();

        match err {
            WorkflowRunError::StepFailed { step, attempts, .. } => {
                assert_eq!(step, "b");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 3);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get_run_status(run_id).await.unwrap(),
            crate::persistence::RunStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        struct Fatal;

        #[async_trait]
        impl Step<String> for Fatal {
            fn name(&self) -> &'static str {
                "fatal"
            }

            async fn execute(
                &self,
                _ctx: &StepContext,
                _payload: &String,
            ) -> Result<serde_json::Value, StepError> {
                Err(StepError::non_retryable("bad payload"))
            }
        }

        let store = Arc::new(InMemoryCheckpointStore::new());
        let definition =
            WorkflowDefinition::new("test_workflow").step(Fatal, policy(5));
        let runner = WorkflowRunner::new(definition, store.clone());

        let run_id = start_run(&store, "e1").await;
        let err = runner.run(run_id, &"x".to_string()).await.unwrap_err();

        match err {
            WorkflowRunError::StepFailed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_crash_resumption_skips_completed_steps() {
        let store = Arc::new(InMemoryCheckpointStore::new());

        // Simulate a crash after step a persisted its checkpoint but before
        // b started: the run stays in `running` with a's result recorded
        let run_id = start_run(&store, "e1").await;
        store
            .record_step_result(run_id, "a", serde_json::json!({ "call": 1 }))
            .await
            .unwrap();

        // Re-entry resolves to the same interrupted run
        let resumed = store
            .create_or_resume_run("test_workflow", "e1", serde_json::json!({}))
            .await
            .unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.run_id, run_id);

        let (a, a_calls) = flaky("a", 0);
        let (b, b_calls) = flaky("b", 0);
        let (c, c_calls) = flaky("c", 0);
        let definition = WorkflowDefinition::new("test_workflow")
            .step(a, policy(1))
            .step(b, policy(1))
            .step(c, policy(1));
        let runner = WorkflowRunner::new(definition, store.clone());
        let report = runner.run(resumed.run_id, &"x".to_string()).await.unwrap();

        // a is satisfied from its checkpoint, b and c execute once each
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 1);
        assert!(report.steps[0].resumed_from_checkpoint);
        assert_eq!(report.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_rerun_of_same_run_reuses_checkpoints() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let run_id = start_run(&store, "e1").await;

        // First pass runs both steps
        {
            let (a, _) = flaky("a", 0);
            let (b, _) = flaky("b", 0);
            let definition = WorkflowDefinition::new("test_workflow")
                .step(a, policy(1))
                .step(b, policy(1));
            let runner = WorkflowRunner::new(definition, store.clone());
            runner.run(run_id, &"x".to_string()).await.unwrap();
        }

        // Re-invoking the same run id executes nothing
        let (a, a_calls) = flaky("a", 0);
        let (b, b_calls) = flaky("b", 0);
        let definition = WorkflowDefinition::new("test_workflow")
            .step(a, policy(1))
            .step(b, policy(1));
        let runner = WorkflowRunner::new(definition, store.clone());
        let report = runner.run(run_id, &"x".to_string()).await.unwrap();

        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
        assert!(report.steps.iter().all(|s| s.resumed_from_checkpoint));
    }
}
