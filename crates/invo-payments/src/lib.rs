//! Payment event reconciliation
//!
//! The payment provider is the external system of record for payment
//! attempts; the invoice ledger is the internal one. This crate reconciles
//! the two: webhook deliveries are authenticated, mapped to internal state
//! transitions, and applied exactly once per logical event no matter how
//! often the provider redelivers.

pub mod event;
pub mod notify;
pub mod reconciler;
pub mod reminder;
pub mod webhook;

pub use event::{PaymentEvent, ProviderEvent};
pub use notify::{Analytics, Notifier, NotifyError, ReminderScheduler, ResendNotifier, TracingAnalytics};
pub use reconciler::{PaymentReconciler, ReconcileError};
pub use reminder::{ReminderError, ReminderOutcome, ReminderService};
pub use webhook::{verify_signature, WebhookError};
