//! In-memory ledger for testing
//!
//! Same transition guards as the PostgreSQL implementation; the atomic
//! invoice-paid unit is a single write-lock critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use invo_core::{CodeStatus, InvoiceEventType, InvoiceStatus, PaymentStatus};

use crate::models::{Client, Code, Invoice, InvoiceEvent, Payment, Settings};
use crate::store::{CodeStore, LedgerError, LedgerStore, PaymentUpdate};

/// In-memory implementation of [`LedgerStore`] and [`CodeStore`]
#[derive(Default)]
pub struct InMemoryLedger {
    payments: RwLock<HashMap<String, Payment>>,
    invoices: RwLock<HashMap<String, Invoice>>,
    events: RwLock<Vec<InvoiceEvent>>,
    clients: RwLock<HashMap<String, Client>>,
    settings: RwLock<HashMap<String, Settings>>,
    codes: RwLock<HashMap<String, Code>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an invoice (for tests)
    pub fn insert_invoice(&self, invoice: Invoice) {
        self.invoices.write().insert(invoice.id.clone(), invoice);
    }

    /// Seed a client (for tests)
    pub fn insert_client(&self, client: Client) {
        self.clients.write().insert(client.id.clone(), client);
    }

    /// Seed settings (for tests)
    pub fn insert_settings(&self, settings: Settings) {
        self.settings
            .write()
            .insert(settings.user_id.clone(), settings);
    }

    /// Seed a code row (for tests)
    pub fn insert_code(&self, code: Code) {
        self.codes.write().insert(code.id.clone(), code);
    }

    /// Seed a payment row verbatim (for tests)
    pub fn insert_payment(&self, payment: Payment) {
        self.payments.write().insert(payment.id.clone(), payment);
    }

    /// Read a payment row (for assertions)
    pub fn payment(&self, payment_id: &str) -> Option<Payment> {
        self.payments.read().get(payment_id).cloned()
    }

    /// Read a payment row by checkout session (for assertions)
    pub fn payment_by_session(&self, checkout_session_id: &str) -> Option<Payment> {
        self.find_payment(|p| p.checkout_session_id == checkout_session_id)
    }

    /// Read a code row (for assertions)
    pub fn code(&self, code_id: &str) -> Option<Code> {
        self.codes.read().get(code_id).cloned()
    }

    /// Total number of audit rows (for assertions)
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    fn find_payment<F>(&self, pred: F) -> Option<Payment>
    where
        F: Fn(&Payment) -> bool,
    {
        self.payments.read().values().find(|p| pred(p)).cloned()
    }

    fn transition_payment<F, U>(&self, pred: F, update: U) -> PaymentUpdate
    where
        F: Fn(&Payment) -> bool,
        U: Fn(&mut Payment),
    {
        let mut payments = self.payments.write();
        let Some(payment) = payments.values_mut().find(|p| pred(&**p)) else {
            return PaymentUpdate::NotFound;
        };

        if payment.status.is_terminal() {
            return PaymentUpdate::AlreadyTerminal(payment.clone());
        }

        update(payment);
        PaymentUpdate::Applied(payment.clone())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_payment(
        &self,
        invoice_id: &str,
        checkout_session_id: &str,
    ) -> Result<Payment, LedgerError> {
        let payment = Payment {
            id: Uuid::now_v7().to_string(),
            invoice_id: invoice_id.to_string(),
            checkout_session_id: checkout_session_id.to_string(),
            payment_intent_id: None,
            status: PaymentStatus::Pending,
            paid_at: None,
        };
        self.payments
            .write()
            .insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    async fn mark_payment_succeeded(
        &self,
        checkout_session_id: &str,
        payment_intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentUpdate, LedgerError> {
        Ok(self.transition_payment(
            |p| p.checkout_session_id == checkout_session_id,
            |p| {
                p.status = PaymentStatus::Succeeded;
                p.payment_intent_id = Some(payment_intent_id.to_string());
                p.paid_at = Some(paid_at);
            },
        ))
    }

    async fn mark_payment_failed_by_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<PaymentUpdate, LedgerError> {
        Ok(self.transition_payment(
            |p| p.checkout_session_id == checkout_session_id,
            |p| p.status = PaymentStatus::Failed,
        ))
    }

    async fn mark_payment_failed_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentUpdate, LedgerError> {
        Ok(self.transition_payment(
            |p| p.payment_intent_id.as_deref() == Some(payment_intent_id),
            |p| p.status = PaymentStatus::Failed,
        ))
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, LedgerError> {
        Ok(self.invoices.read().get(invoice_id).cloned())
    }

    async fn mark_invoice_paid(
        &self,
        invoice_id: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, LedgerError> {
        // Invoice update and audit append under one lock: both or neither
        let mut invoices = self.invoices.write();
        let Some(invoice) = invoices.get_mut(invoice_id) else {
            return Ok(false);
        };

        if invoice.status.is_terminal() {
            return Ok(false);
        }

        invoice.status = InvoiceStatus::Paid;
        self.events.write().push(InvoiceEvent {
            id: Uuid::now_v7().to_string(),
            invoice_id: invoice_id.to_string(),
            event_type: InvoiceEventType::Paid,
            metadata,
            created_at: Utc::now(),
        });

        Ok(true)
    }

    async fn append_invoice_event(
        &self,
        invoice_id: &str,
        event_type: InvoiceEventType,
        metadata: serde_json::Value,
    ) -> Result<(), LedgerError> {
        self.events.write().push(InvoiceEvent {
            id: Uuid::now_v7().to_string(),
            invoice_id: invoice_id.to_string(),
            event_type,
            metadata,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn has_reminder_event(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self.events.read().iter().any(|e| {
            e.invoice_id == invoice_id
                && e.event_type == InvoiceEventType::ReminderSent
                && e.metadata.to_string().contains(idempotency_key)
        }))
    }

    async fn list_invoice_events(
        &self,
        invoice_id: &str,
    ) -> Result<Vec<InvoiceEvent>, LedgerError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, LedgerError> {
        Ok(self.clients.read().get(client_id).cloned())
    }

    async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, LedgerError> {
        Ok(self.settings.read().get(user_id).cloned())
    }
}

#[async_trait]
impl CodeStore for InMemoryLedger {
    async fn mark_code_evaluated(&self, code_id: &str) -> Result<(), LedgerError> {
        let mut codes = self.codes.write();
        if let Some(code) = codes.get_mut(code_id) {
            code.status = CodeStatus::Success;
            code.ai_generated = true;
            code.email_send = true;
            code.updated_at = Utc::now();
        }
        Ok(())
    }
}
