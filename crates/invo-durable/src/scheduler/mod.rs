//! Per-entity debounce scheduler
//!
//! Bursts of triggers for the same code id collapse into a single workflow
//! launch. The first trigger arms a one-shot timer at `now + debounce`; later
//! triggers overwrite the pending payload but never move the deadline. When
//! the timer fires, the payload of the *last* trigger is handed to the
//! workflow exactly once.

mod daemon;

pub use daemon::{SchedulerDaemon, SchedulerDaemonConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, error, info, instrument};

use invo_core::CodeData;

use crate::persistence::{SchedulerStore, StoreError};
use crate::workflow::WorkflowRunError;

/// Launches a workflow run for a debounced task
///
/// Implemented by the wiring layer; keeps the scheduler decoupled from any
/// particular pipeline definition.
#[async_trait]
pub trait WorkflowLauncher: Send + Sync + 'static {
    async fn launch(&self, task: &CodeData) -> Result<(), WorkflowRunError>;
}

/// Errors from scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Durability layer unavailable; the caller retries or the transport
    /// redelivers
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Workflow launch failed when the timer fired; the pending task is kept
    /// so a retried firing sees the same payload
    #[error("workflow launch failed for {entity_id}: {source}")]
    LaunchFailed {
        entity_id: String,
        source: WorkflowRunError,
    },
}

/// Debounce scheduler over a durable store
///
/// State for each entity (pending task + timer) has exactly one writer at a
/// time: every operation for an entity runs under that entity's lock, so
/// concurrent `collect` calls and timer firings for the same code id are
/// serialized while different code ids proceed in parallel.
pub struct EvaluationScheduler<S: SchedulerStore> {
    store: Arc<S>,
    launcher: Arc<dyn WorkflowLauncher>,
    debounce: Duration,
    entity_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl<S: SchedulerStore> EvaluationScheduler<S> {
    pub fn new(store: Arc<S>, launcher: Arc<dyn WorkflowLauncher>, debounce: Duration) -> Self {
        Self {
            store,
            launcher,
            debounce,
            entity_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn entity_lock(&self, entity_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.entity_locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Persist (or overwrite) the pending task and arm the timer if idle
    ///
    /// Idempotent on overwrite: redelivered triggers for the same entity just
    /// rewrite the payload. Returns once the task is durable; nothing is
    /// invoked downstream synchronously.
    #[instrument(skip(self, task), fields(entity_id = %task.code_id))]
    pub async fn collect(&self, task: CodeData) -> Result<(), SchedulerError> {
        let lock = self.entity_lock(&task.code_id);
        let _guard = lock.lock().await;

        self.store.put_task(&task).await?;

        let deadline = Utc::now()
            + chrono::Duration::from_std(self.debounce)
                .unwrap_or_else(|_| chrono::Duration::seconds(180));
        let armed = self.store.arm_timer(&task.code_id, deadline).await?;

        if armed {
            info!(entity_id = %task.code_id, %deadline, "armed evaluation timer");
        } else {
            debug!(entity_id = %task.code_id, "timer already armed, payload updated");
        }

        Ok(())
    }

    /// Handle the timer firing for an entity
    ///
    /// Reads the current pending task. Absence means the work was already
    /// handled (raced cleanup) and only clears the stale timer. On a
    /// successful launch the task and timer are removed so future triggers
    /// open a fresh debounce window; on failure both survive for the next
    /// firing attempt.
    #[instrument(skip(self))]
    pub async fn on_timer_fire(&self, entity_id: &str) -> Result<(), SchedulerError> {
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().await;

        let Some(task) = self.store.get_task(entity_id).await? else {
            info!(entity_id, "no pending task at timer fire, already handled");
            self.store.clear_timer(entity_id).await?;
            return Ok(());
        };

        match self.launcher.launch(&task).await {
            Ok(()) => {
                info!(entity_id, "workflow launched for debounced task");
                self.store.delete_task(entity_id).await?;
                self.store.clear_timer(entity_id).await?;
                Ok(())
            }
            Err(source) => {
                error!(entity_id, error = %source, "workflow launch failed, keeping pending task");
                Err(SchedulerError::LaunchFailed {
                    entity_id: entity_id.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemorySchedulerStore;
    use invo_core::CodeStatus;
    use parking_lot::Mutex;

    /// Records launched payloads; optionally fails
    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<CodeData>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl WorkflowLauncher for RecordingLauncher {
        async fn launch(&self, task: &CodeData) -> Result<(), WorkflowRunError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(WorkflowRunError::Store(StoreError::Database(
                    "simulated outage".to_string(),
                )));
            }
            self.launched.lock().push(task.clone());
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

    fn scheduler(
        debounce: Duration,
    ) -> (
        EvaluationScheduler<InMemorySchedulerStore>,
        Arc<InMemorySchedulerStore>,
        Arc<RecordingLauncher>,
    ) {
        let store = Arc::new(InMemorySchedulerStore::new());
        let launcher = Arc::new(RecordingLauncher::default());
        let sched = EvaluationScheduler::new(store.clone(), launcher.clone(), debounce);
        (sched, store, launcher)
    }

    #[tokio::test]
    async fn test_repeated_collects_fire_once_with_last_payload() {
        let (sched, store, launcher) = scheduler(Duration::from_secs(180));

        sched.collect(task("c1", true)).await.unwrap();
        let deadline = store.deadline("c1").unwrap();

        sched.collect(task("c1", false)).await.unwrap();
        sched.collect(task("c1", true)).await.unwrap();

        // Fixed window: the deadline never moved
        assert_eq!(store.deadline("c1"), Some(deadline));

        sched.on_timer_fire("c1").await.unwrap();

        let launched = launcher.launched.lock();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].email_send); // last payload won

        // Cleaned up: a fresh trigger opens a new window
        assert_eq!(store.task_count(), 0);
        assert!(store.deadline("c1").is_none());
    }

    #[tokio::test]
    async fn test_timer_fire_without_task_is_a_noop() {
        let (sched, store, launcher) = scheduler(Duration::from_secs(180));

        store.arm_timer("c1", Utc::now()).await.unwrap();
        sched.on_timer_fire("c1").await.unwrap();

        assert!(launcher.launched.lock().is_empty());
        // Stale timer cleared so the scan does not refire forever
        assert!(store.deadline("c1").is_none());
    }

    #[tokio::test]
    async fn test_launch_failure_keeps_pending_task() {
        let (sched, store, launcher) = scheduler(Duration::from_secs(180));

        sched.collect(task("c1", true)).await.unwrap();
        launcher
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = sched.on_timer_fire("c1").await.unwrap_err();
        assert!(matches!(err, SchedulerError::LaunchFailed { .. }));

        // Task survives for the retried firing and sees the same payload
        assert_eq!(store.task_count(), 1);
        let kept = store.get_task("c1").await.unwrap().unwrap();
        assert!(kept.email_send);

        // Recovery: next firing succeeds and cleans up
        launcher
            .fail
            .store(false, std::sync::atomic::Ordering::SeqCst);
        sched.on_timer_fire("c1").await.unwrap();
        assert_eq!(store.task_count(), 0);
        assert_eq!(launcher.launched.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_entities_are_independent() {
        let (sched, _store, launcher) = scheduler(Duration::from_secs(180));

        sched.collect(task("c1", true)).await.unwrap();
        sched.collect(task("c2", false)).await.unwrap();

        sched.on_timer_fire("c1").await.unwrap();
        sched.on_timer_fire("c2").await.unwrap();

        let launched = launcher.launched.lock();
        assert_eq!(launched.len(), 2);
        let ids: Vec<_> = launched.iter().map(|t| t.code_id.as_str()).collect();
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"c2"));
    }

    #[tokio::test]
    async fn test_new_window_opens_after_successful_fire() {
        let (sched, store, launcher) = scheduler(Duration::from_secs(180));

        sched.collect(task("c1", false)).await.unwrap();
        sched.on_timer_fire("c1").await.unwrap();

        sched.collect(task("c1", true)).await.unwrap();
        assert!(store.deadline("c1").is_some());
        sched.on_timer_fire("c1").await.unwrap();

        assert_eq!(launcher.launched.lock().len(), 2);
    }
}
