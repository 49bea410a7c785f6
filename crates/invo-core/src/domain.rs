//! Status enums and the debounced task payload

use serde::{Deserialize, Serialize};

/// External evaluation status of a generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Pending,
    Success,
}

impl std::fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Payload the scheduler debounces per code id
///
/// A later `collect` for the same code overwrites this wholesale; only the
/// payload from the last call before the timer fires reaches the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeData {
    pub code_id: String,
    pub user_id: String,
    pub status: CodeStatus,
    pub ai_generated: bool,
    pub email_send: bool,
}

/// Payment ledger row status
///
/// Transitions are monotonic: once a row reaches `Succeeded` or `Failed` no
/// event may move it back. The reconciler enforces this with conditional
/// updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    /// Paid and cancelled invoices accept no further payment transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Sent => write!(f, "sent"),
            Self::Viewed => write!(f, "viewed"),
            Self::Overdue => write!(f, "overdue"),
            Self::Paid => write!(f, "paid"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Kinds of rows in the append-only invoice audit log
///
/// The log doubles as an idempotency ledger: a `reminder_sent` row carrying a
/// given idempotency key blocks re-sending that reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceEventType {
    Viewed,
    Paid,
    ReminderSent,
    PaymentFailed,
}

impl std::fmt::Display for InvoiceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Viewed => write!(f, "viewed"),
            Self::Paid => write!(f, "paid"),
            Self::ReminderSent => write!(f, "reminder_sent"),
            Self::PaymentFailed => write!(f, "payment_failed"),
        }
    }
}
