//! Reminder sending with idempotency-key suppression
//!
//! A reminder is recorded in the audit log with the idempotency key that
//! produced it. A second request for the same `(invoice, key)` pair finds the
//! record and sends nothing, so redeliveries and overlapping schedules cannot
//! double-email a client.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use invo_core::InvoiceEventType;
use invo_storage::{LedgerError, LedgerStore};

use crate::notify::{Notifier, NotifyError};

/// What a reminder request resulted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Reminder sent and recorded
    Sent,

    /// Already sent under this idempotency key
    Suppressed,

    /// Invoice missing, settled, or client has no email address
    NotApplicable,
}

/// Errors from reminder sending
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Sends invoice reminders exactly once per idempotency key
pub struct ReminderService<L: LedgerStore> {
    ledger: Arc<L>,
    notifier: Arc<dyn Notifier>,
}

impl<L: LedgerStore> ReminderService<L> {
    pub fn new(ledger: Arc<L>, notifier: Arc<dyn Notifier>) -> Self {
        Self { ledger, notifier }
    }

    /// Send a reminder for an invoice unless the key was already used
    #[instrument(skip(self))]
    pub async fn send_reminder(
        &self,
        invoice_id: &str,
        reminder_type: &str,
        idempotency_key: &str,
    ) -> Result<ReminderOutcome, ReminderError> {
        if self
            .ledger
            .has_reminder_event(invoice_id, idempotency_key)
            .await?
        {
            info!(invoice_id, idempotency_key, "reminder already sent, suppressing");
            return Ok(ReminderOutcome::Suppressed);
        }

        let Some(invoice) = self.ledger.get_invoice(invoice_id).await? else {
            warn!(invoice_id, "invoice not found for reminder");
            return Ok(ReminderOutcome::NotApplicable);
        };

        if invoice.status.is_terminal() {
            info!(invoice_id, "invoice settled, reminder not applicable");
            return Ok(ReminderOutcome::NotApplicable);
        }

        let client = self.ledger.get_client(&invoice.client_id).await?;
        let Some(email) = client.and_then(|c| c.email) else {
            warn!(invoice_id, "client has no email, reminder not applicable");
            return Ok(ReminderOutcome::NotApplicable);
        };

        self.notifier
            .send_reminder(&email, &invoice.invoice_number, invoice.total, &invoice.currency)
            .await?;

        // Record after the send: a crash in between re-sends rather than
        // silently dropping, and the provider-side duplicate is harmless
        self.ledger
            .append_invoice_event(
                invoice_id,
                InvoiceEventType::ReminderSent,
                serde_json::json!({
                    "reminder_type": reminder_type,
                    "idempotency_key": idempotency_key,
                }),
            )
            .await?;

        info!(invoice_id, idempotency_key, "reminder sent and recorded");
        Ok(ReminderOutcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use invo_core::InvoiceStatus;
    use invo_storage::{Client, InMemoryLedger, Invoice};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        reminders: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_receipt(
            &self,
            _to: &str,
            _invoice_number: &str,
            _business_name: &str,
            _total: f64,
            _currency: &str,
            _paid_at: DateTime<Utc>,
        ) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn send_reminder(
            &self,
            to: &str,
            _invoice_number: &str,
            _total: f64,
            _currency: &str,
        ) -> Result<(), NotifyError> {
            self.reminders.lock().push(to.to_string());
            Ok(())
        }
    }

    fn seed(ledger: &InMemoryLedger, status: InvoiceStatus, email: Option<&str>) {
        ledger.insert_invoice(Invoice {
            id: "i1".to_string(),
            user_id: "u1".to_string(),
            client_id: "cl1".to_string(),
            invoice_number: "INV-001".to_string(),
            status,
            total: 125.0,
            currency: "USD".to_string(),
        });
        ledger.insert_client(Client {
            id: "cl1".to_string(),
            name: "Acme Bikes".to_string(),
            email: email.map(str::to_string),
        });
    }

    fn service() -> (
        ReminderService<InMemoryLedger>,
        Arc<InMemoryLedger>,
        Arc<RecordingNotifier>,
    ) {
        let ledger = Arc::new(InMemoryLedger::new());
        let notifier = Arc::new(RecordingNotifier::default());
        (
            ReminderService::new(ledger.clone(), notifier.clone()),
            ledger,
            notifier,
        )
    }

    #[tokio::test]
    async fn test_first_send_records_and_second_suppresses() {
        let (service, ledger, notifier) = service();
        seed(&ledger, InvoiceStatus::Overdue, Some("billing@acme.test"));

        let first = service.send_reminder("i1", "overdue", "K-1").await.unwrap();
        assert_eq!(first, ReminderOutcome::Sent);

        let second = service.send_reminder("i1", "overdue", "K-1").await.unwrap();
        assert_eq!(second, ReminderOutcome::Suppressed);

        // One email, one audit row
        assert_eq!(notifier.reminders.lock().len(), 1);
        assert_eq!(ledger.event_count(), 1);
    }

    #[tokio::test]
    async fn test_different_keys_send_again() {
        let (service, ledger, notifier) = service();
        seed(&ledger, InvoiceStatus::Overdue, Some("billing@acme.test"));

        service.send_reminder("i1", "due", "K-1").await.unwrap();
        service.send_reminder("i1", "overdue", "K-2").await.unwrap();

        assert_eq!(notifier.reminders.lock().len(), 2);
        assert_eq!(ledger.event_count(), 2);
    }

    #[tokio::test]
    async fn test_paid_invoice_gets_no_reminder() {
        let (service, ledger, notifier) = service();
        seed(&ledger, InvoiceStatus::Paid, Some("billing@acme.test"));

        let outcome = service.send_reminder("i1", "due", "K-1").await.unwrap();
        assert_eq!(outcome, ReminderOutcome::NotApplicable);
        assert!(notifier.reminders.lock().is_empty());
        assert_eq!(ledger.event_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_email_is_not_applicable() {
        let (service, ledger, notifier) = service();
        seed(&ledger, InvoiceStatus::Sent, None);

        let outcome = service.send_reminder("i1", "due", "K-1").await.unwrap();
        assert_eq!(outcome, ReminderOutcome::NotApplicable);
        assert!(notifier.reminders.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_not_applicable() {
        let (service, _ledger, _notifier) = service();
        let outcome = service.send_reminder("nope", "due", "K-1").await.unwrap();
        assert_eq!(outcome, ReminderOutcome::NotApplicable);
    }
}
