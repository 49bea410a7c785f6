//! Step trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for step failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepError {
    /// Error message
    pub message: String,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors fail the step immediately without consuming the
    /// remaining attempts.
    pub retryable: bool,
}

impl StepError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StepError {}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Execution context handed to each step attempt
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Run this step belongs to
    pub run_id: Uuid,

    /// Current attempt (1-based)
    pub attempt: u32,
}

/// A named unit of work in a workflow pipeline
///
/// Steps execute strictly in declaration order; a step does not begin until
/// the previous one has durably recorded success. The result value is
/// persisted as the step's checkpoint, so it must serialize to JSON.
///
/// # Example
///
/// ```ignore
/// use invo_durable::prelude::*;
///
/// struct SendNotification;
///
/// #[async_trait]
/// impl Step<CodeData> for SendNotification {
///     fn name(&self) -> &'static str {
///         "send_notification"
///     }
///
///     async fn execute(
///         &self,
///         ctx: &StepContext,
///         payload: &CodeData,
///     ) -> Result<serde_json::Value, StepError> {
///         // send email...
///         Ok(serde_json::json!({ "sent": true }))
///     }
/// }
/// ```
#[async_trait]
pub trait Step<P>: Send + Sync + 'static {
    /// Name of the step, used as the checkpoint key within a run
    fn name(&self) -> &'static str;

    /// Execute one attempt of the step
    ///
    /// # Errors
    ///
    /// Return [`StepError::retryable`] for transient failures that should be
    /// retried and [`StepError::non_retryable`] for permanent ones.
    async fn execute(
        &self,
        ctx: &StepContext,
        payload: &P,
    ) -> Result<serde_json::Value, StepError>;
}
