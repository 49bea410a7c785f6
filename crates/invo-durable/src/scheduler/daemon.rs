//! Timer scan loop
//!
//! Durable deadlines live in the store; this loop scans for due ones on a
//! fixed tick and fires the scheduler for each. A firing that fails leaves
//! its timer armed, so the next tick retries it. That is the platform-retry
//! contract for alarm handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::persistence::SchedulerStore;

use super::EvaluationScheduler;

/// Configuration for the timer scan loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerDaemonConfig {
    /// Interval between due-timer scans
    #[serde(with = "duration_millis")]
    pub tick: Duration,
}

impl Default for SchedulerDaemonConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
        }
    }
}

impl SchedulerDaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan interval
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// Drives timer firings for an [`EvaluationScheduler`]
pub struct SchedulerDaemon<S: SchedulerStore> {
    scheduler: Arc<EvaluationScheduler<S>>,
    config: SchedulerDaemonConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: SchedulerStore> SchedulerDaemon<S> {
    pub fn new(
        scheduler: Arc<EvaluationScheduler<S>>,
        config: SchedulerDaemonConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            config,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signaled
    pub async fn run(mut self) {
        info!(tick_ms = self.config.tick.as_millis(), "scheduler daemon started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.scan_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick) => {}
                _ = self.shutdown_rx.changed() => {
                    debug!("shutdown signal received");
                    break;
                }
            }
        }

        info!("scheduler daemon stopped");
    }

    /// One due-timer scan; firing errors are logged and left for the next tick
    pub async fn scan_once(&self) {
        let due = match self.scheduler.store().due_timers(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-timer scan failed");
                return;
            }
        };

        for entity_id in due {
            if let Err(e) = self.scheduler.on_timer_fire(&entity_id).await {
                error!(entity_id, error = %e, "timer firing failed, will retry next tick");
            }
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
