//! Ledger store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use invo_core::InvoiceEventType;

use crate::models::{Client, Invoice, Payment, Settings};

/// Error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of a conditional payment transition
///
/// The distinction matters to the reconciler: `AlreadyTerminal` means a
/// duplicate delivery of a terminal event and is a silent no-op, while
/// `NotFound` is a reconciliation anomaly worth logging.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentUpdate {
    /// The transition was applied
    Applied(Payment),

    /// The row was already in a terminal state; nothing changed
    AlreadyTerminal(Payment),

    /// No payment row matches the identifier
    NotFound,
}

/// Store for payments, invoices and the append-only audit log
///
/// Status transitions are guarded: a payment row never leaves a terminal
/// state, and marking an invoice paid appends its audit event in the same
/// atomic unit.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Create a pending payment row linking a checkout session to an invoice
    ///
    /// This is the correlation the reconciler later resolves webhook events
    /// through; it is written at session-creation time.
    async fn create_payment(
        &self,
        invoice_id: &str,
        checkout_session_id: &str,
    ) -> Result<Payment, LedgerError>;

    /// `pending -> succeeded` by checkout session id
    ///
    /// Records the provider's payment intent id and the paid timestamp.
    async fn mark_payment_succeeded(
        &self,
        checkout_session_id: &str,
        payment_intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentUpdate, LedgerError>;

    /// `pending -> failed` by checkout session id (session lapsed)
    async fn mark_payment_failed_by_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<PaymentUpdate, LedgerError>;

    /// `pending -> failed` by payment intent id (attempt failed)
    async fn mark_payment_failed_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentUpdate, LedgerError>;

    /// Fetch an invoice
    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, LedgerError>;

    /// Transition an invoice to `paid` and append the `paid` audit event
    /// as one atomic unit
    ///
    /// Returns `false` without touching anything when the invoice is already
    /// in a terminal state. The audit row is only ever written alongside the
    /// transition, so a duplicate event can never double-append.
    async fn mark_invoice_paid(
        &self,
        invoice_id: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, LedgerError>;

    /// Append a row to the audit log
    async fn append_invoice_event(
        &self,
        invoice_id: &str,
        event_type: InvoiceEventType,
        metadata: serde_json::Value,
    ) -> Result<(), LedgerError>;

    /// Whether a `reminder_sent` event carrying this idempotency key exists
    async fn has_reminder_event(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, LedgerError>;

    /// Audit events for an invoice, oldest first
    async fn list_invoice_events(
        &self,
        invoice_id: &str,
    ) -> Result<Vec<crate::models::InvoiceEvent>, LedgerError>;

    /// Fetch a client
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, LedgerError>;

    /// Fetch a user's business settings
    async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, LedgerError>;
}

/// Store for generated code rows
#[async_trait]
pub trait CodeStore: Send + Sync + 'static {
    /// Finalize a code after evaluation: `pending -> success`, generation and
    /// notification flags set
    async fn mark_code_evaluated(&self, code_id: &str) -> Result<(), LedgerError>;
}
