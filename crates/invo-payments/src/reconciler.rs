//! Payment event reconciler
//!
//! Applies authenticated provider events to the ledger. Every transition is
//! safe to apply twice: payment rows never leave a terminal state, the
//! invoice-paid transition and its audit row commit as one unit and only
//! once, and side effects fire only on the delivery that actually performed
//! the transition.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use invo_storage::{LedgerError, LedgerStore, PaymentUpdate};

use crate::event::{PaymentEvent, ProviderEvent};
use crate::notify::{Analytics, Notifier, ReminderScheduler};

/// Errors from reconciliation
///
/// Only ledger unavailability surfaces as an error; reconciliation anomalies
/// (unknown session, missing invoice) are logged with correlation data and
/// acknowledged, since redelivery cannot repair them.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Maps provider events onto ledger state transitions
pub struct PaymentReconciler<L: LedgerStore> {
    ledger: Arc<L>,
    notifier: Arc<dyn Notifier>,
    analytics: Arc<dyn Analytics>,
    reminders: Arc<dyn ReminderScheduler>,
}

impl<L: LedgerStore> PaymentReconciler<L> {
    pub fn new(
        ledger: Arc<L>,
        notifier: Arc<dyn Notifier>,
        analytics: Arc<dyn Analytics>,
        reminders: Arc<dyn ReminderScheduler>,
    ) -> Self {
        Self {
            ledger,
            notifier,
            analytics,
            reminders,
        }
    }

    /// Apply one verified event
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    pub async fn apply(&self, event: &ProviderEvent) -> Result<(), ReconcileError> {
        match &event.event {
            PaymentEvent::CheckoutCompleted {
                checkout_session_id,
                payment_intent_id,
                invoice_id,
                amount_total,
            } => {
                self.apply_checkout_completed(
                    &event.event_id,
                    checkout_session_id,
                    payment_intent_id.as_deref(),
                    invoice_id.as_deref(),
                    *amount_total,
                )
                .await
            }
            PaymentEvent::CheckoutExpired {
                checkout_session_id,
            } => {
                self.apply_checkout_expired(&event.event_id, checkout_session_id)
                    .await
            }
            PaymentEvent::PaymentFailed {
                payment_intent_id,
                failure_message,
            } => {
                self.apply_payment_failed(
                    &event.event_id,
                    payment_intent_id,
                    failure_message.as_deref(),
                )
                .await
            }
            PaymentEvent::Unhandled => {
                info!("unhandled event kind, acknowledging");
                Ok(())
            }
        }
    }

    async fn apply_checkout_completed(
        &self,
        event_id: &str,
        checkout_session_id: &str,
        payment_intent_id: Option<&str>,
        metadata_invoice_id: Option<&str>,
        amount_total: Option<i64>,
    ) -> Result<(), ReconcileError> {
        let now = Utc::now();
        let intent = payment_intent_id.unwrap_or_default();

        let update = self
            .ledger
            .mark_payment_succeeded(checkout_session_id, intent, now)
            .await?;

        let payment = match update {
            PaymentUpdate::Applied(payment) => {
                info!(payment_id = %payment.id, "payment marked succeeded");
                Some(payment)
            }
            PaymentUpdate::AlreadyTerminal(payment) => {
                info!(payment_id = %payment.id, "payment already terminal, duplicate delivery");
                Some(payment)
            }
            PaymentUpdate::NotFound => {
                warn!(event_id, checkout_session_id, "no payment row for session");
                None
            }
        };

        // The session's metadata carries the invoice id; the payment row is
        // the fallback correlation
        let Some(invoice_id) = metadata_invoice_id
            .map(str::to_string)
            .or_else(|| payment.as_ref().map(|p| p.invoice_id.clone()))
        else {
            warn!(event_id, checkout_session_id, "no invoice correlation for session");
            return Ok(());
        };

        let Some(invoice) = self.ledger.get_invoice(&invoice_id).await? else {
            warn!(event_id, invoice_id, "invoice not found");
            return Ok(());
        };

        let transitioned = self
            .ledger
            .mark_invoice_paid(
                &invoice_id,
                serde_json::json!({
                    "payment_intent": payment_intent_id,
                    "amount": amount_total,
                }),
            )
            .await?;

        if !transitioned {
            info!(invoice_id, "invoice already settled, skipping side effects");
            return Ok(());
        }

        info!(invoice_id, "invoice marked as paid");
        self.fire_paid_side_effects(&invoice, now).await;

        Ok(())
    }

    /// Best-effort hooks after the ledger commit; failures are logged and
    /// never unwind the committed state
    async fn fire_paid_side_effects(
        &self,
        invoice: &invo_storage::Invoice,
        paid_at: chrono::DateTime<Utc>,
    ) {
        if let Err(e) = self.reminders.cancel(&invoice.user_id, &invoice.id).await {
            error!(invoice_id = %invoice.id, error = %e, "reminder cancellation failed");
        }

        self.analytics
            .invoice_paid(&invoice.user_id, &invoice.id, invoice.total, &invoice.currency)
            .await;

        let client = match self.ledger.get_client(&invoice.client_id).await {
            Ok(client) => client,
            Err(e) => {
                error!(invoice_id = %invoice.id, error = %e, "client lookup for receipt failed");
                return;
            }
        };

        let Some(email) = client.and_then(|c| c.email) else {
            return;
        };

        let business_name = match self.ledger.get_settings(&invoice.user_id).await {
            Ok(settings) => settings
                .and_then(|s| s.business_name)
                .unwrap_or_else(|| "invo".to_string()),
            Err(e) => {
                error!(invoice_id = %invoice.id, error = %e, "settings lookup for receipt failed");
                "invo".to_string()
            }
        };

        if let Err(e) = self
            .notifier
            .send_receipt(
                &email,
                &invoice.invoice_number,
                &business_name,
                invoice.total,
                &invoice.currency,
                paid_at,
            )
            .await
        {
            error!(invoice_id = %invoice.id, error = %e, "receipt email failed");
        }
    }

    async fn apply_checkout_expired(
        &self,
        event_id: &str,
        checkout_session_id: &str,
    ) -> Result<(), ReconcileError> {
        match self
            .ledger
            .mark_payment_failed_by_session(checkout_session_id)
            .await?
        {
            PaymentUpdate::Applied(payment) => {
                info!(payment_id = %payment.id, "payment marked failed, session expired");
            }
            PaymentUpdate::AlreadyTerminal(payment) => {
                info!(payment_id = %payment.id, "payment already terminal, ignoring expiry");
            }
            PaymentUpdate::NotFound => {
                warn!(event_id, checkout_session_id, "no payment row for expired session");
            }
        }
        // Session lapse is not a failed attempt; the invoice stays as-is
        Ok(())
    }

    async fn apply_payment_failed(
        &self,
        event_id: &str,
        payment_intent_id: &str,
        failure_message: Option<&str>,
    ) -> Result<(), ReconcileError> {
        match self
            .ledger
            .mark_payment_failed_by_intent(payment_intent_id)
            .await?
        {
            PaymentUpdate::Applied(payment) => {
                info!(payment_id = %payment.id, "payment marked failed");
                self.ledger
                    .append_invoice_event(
                        &payment.invoice_id,
                        invo_core::InvoiceEventType::PaymentFailed,
                        serde_json::json!({
                            "payment_intent": payment_intent_id,
                            "error": failure_message,
                        }),
                    )
                    .await?;
            }
            PaymentUpdate::AlreadyTerminal(payment) => {
                info!(payment_id = %payment.id, "payment already terminal, duplicate failure event");
            }
            PaymentUpdate::NotFound => {
                warn!(event_id, payment_intent_id, "no payment row for intent");
            }
        }
        Ok(())
    }
}
