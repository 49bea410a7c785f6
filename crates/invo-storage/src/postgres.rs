//! PostgreSQL ledger implementation
//!
//! Tables (created by the deployment's migration step):
//!
//! ```text
//! payments       (id TEXT PRIMARY KEY, invoice_id TEXT NOT NULL,
//!                 stripe_checkout_session_id TEXT NOT NULL UNIQUE,
//!                 stripe_payment_intent_id TEXT, status TEXT NOT NULL,
//!                 paid_at TIMESTAMPTZ)
//! invoices       (id TEXT PRIMARY KEY, user_id TEXT NOT NULL,
//!                 client_id TEXT NOT NULL, invoice_number TEXT NOT NULL,
//!                 status TEXT NOT NULL, total DOUBLE PRECISION NOT NULL,
//!                 currency TEXT NOT NULL,
//!                 updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW())
//! invoice_events (id TEXT PRIMARY KEY, invoice_id TEXT NOT NULL,
//!                 event_type TEXT NOT NULL, metadata JSONB NOT NULL,
//!                 created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())
//! clients        (id TEXT PRIMARY KEY, name TEXT NOT NULL, email TEXT)
//! settings       (user_id TEXT PRIMARY KEY, business_name TEXT,
//!                 email_from_name TEXT)
//! codes          (id TEXT PRIMARY KEY, user_id TEXT NOT NULL,
//!                 status TEXT NOT NULL, ai_generated BOOLEAN NOT NULL,
//!                 email_send BOOLEAN NOT NULL,
//!                 updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW())
//! ```
//!
//! Payment transitions are conditional on `status = 'pending'`, which is
//! what serializes out-of-order webhook redeliveries for the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use invo_core::{InvoiceEventType, InvoiceStatus, PaymentStatus};

use crate::models::{Client, Invoice, InvoiceEvent, Payment, Settings};
use crate::store::{CodeStore, LedgerError, LedgerStore, PaymentUpdate};

/// PostgreSQL-backed [`LedgerStore`] and [`CodeStore`]
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a new ledger with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a ledger from a connection URL
    pub async fn from_url(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn payment_from_row(row: &sqlx::postgres::PgRow) -> Result<Payment, LedgerError> {
        let status: String = row.get("status");
        Ok(Payment {
            id: row.get("id"),
            invoice_id: row.get("invoice_id"),
            checkout_session_id: row.get("stripe_checkout_session_id"),
            payment_intent_id: row.get("stripe_payment_intent_id"),
            status: parse_payment_status(&status)?,
            paid_at: row.get("paid_at"),
        })
    }

    async fn find_payment(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Payment>, LedgerError> {
        // `column` is one of two compile-time constants, never user input
        let query = format!(
            "SELECT id, invoice_id, stripe_checkout_session_id, stripe_payment_intent_id, \
             status, paid_at FROM payments WHERE {column} = $1"
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        row.map(|r| Self::payment_from_row(&r)).transpose()
    }

    /// Resolve a conditional update that matched no pending row into
    /// `AlreadyTerminal` or `NotFound`
    async fn resolve_unmatched(
        &self,
        column: &str,
        value: &str,
    ) -> Result<PaymentUpdate, LedgerError> {
        match self.find_payment(column, value).await? {
            Some(payment) => Ok(PaymentUpdate::AlreadyTerminal(payment)),
            None => Ok(PaymentUpdate::NotFound),
        }
    }
}

fn parse_payment_status(raw: &str) -> Result<PaymentStatus, LedgerError> {
    match raw {
        "pending" => Ok(PaymentStatus::Pending),
        "succeeded" => Ok(PaymentStatus::Succeeded),
        "failed" => Ok(PaymentStatus::Failed),
        other => Err(LedgerError::Database(format!(
            "unexpected payment status: {other}"
        ))),
    }
}

fn parse_invoice_status(raw: &str) -> Result<InvoiceStatus, LedgerError> {
    match raw {
        "draft" => Ok(InvoiceStatus::Draft),
        "sent" => Ok(InvoiceStatus::Sent),
        "viewed" => Ok(InvoiceStatus::Viewed),
        "overdue" => Ok(InvoiceStatus::Overdue),
        "paid" => Ok(InvoiceStatus::Paid),
        "cancelled" => Ok(InvoiceStatus::Cancelled),
        other => Err(LedgerError::Database(format!(
            "unexpected invoice status: {other}"
        ))),
    }
}

fn parse_event_type(raw: &str) -> Result<InvoiceEventType, LedgerError> {
    match raw {
        "viewed" => Ok(InvoiceEventType::Viewed),
        "paid" => Ok(InvoiceEventType::Paid),
        "reminder_sent" => Ok(InvoiceEventType::ReminderSent),
        "payment_failed" => Ok(InvoiceEventType::PaymentFailed),
        other => Err(LedgerError::Database(format!(
            "unexpected event type: {other}"
        ))),
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    #[instrument(skip(self))]
    async fn create_payment(
        &self,
        invoice_id: &str,
        checkout_session_id: &str,
    ) -> Result<Payment, LedgerError> {
        let id = Uuid::now_v7().to_string();
        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, stripe_checkout_session_id, status)
            VALUES ($1, $2, $3, 'pending')
            "#,
        )
        .bind(&id)
        .bind(invoice_id)
        .bind(checkout_session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create payment: {}", e);
            LedgerError::Database(e.to_string())
        })?;

        Ok(Payment {
            id,
            invoice_id: invoice_id.to_string(),
            checkout_session_id: checkout_session_id.to_string(),
            payment_intent_id: None,
            status: PaymentStatus::Pending,
            paid_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn mark_payment_succeeded(
        &self,
        checkout_session_id: &str,
        payment_intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentUpdate, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'succeeded', stripe_payment_intent_id = $2, paid_at = $3
            WHERE stripe_checkout_session_id = $1 AND status = 'pending'
            RETURNING id, invoice_id, stripe_checkout_session_id,
                      stripe_payment_intent_id, status, paid_at
            "#,
        )
        .bind(checkout_session_id)
        .bind(payment_intent_id)
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(PaymentUpdate::Applied(Self::payment_from_row(&r)?)),
            None => {
                self.resolve_unmatched("stripe_checkout_session_id", checkout_session_id)
                    .await
            }
        }
    }

    #[instrument(skip(self))]
    async fn mark_payment_failed_by_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<PaymentUpdate, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed'
            WHERE stripe_checkout_session_id = $1 AND status = 'pending'
            RETURNING id, invoice_id, stripe_checkout_session_id,
                      stripe_payment_intent_id, status, paid_at
            "#,
        )
        .bind(checkout_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(PaymentUpdate::Applied(Self::payment_from_row(&r)?)),
            None => {
                self.resolve_unmatched("stripe_checkout_session_id", checkout_session_id)
                    .await
            }
        }
    }

    #[instrument(skip(self))]
    async fn mark_payment_failed_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentUpdate, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed'
            WHERE stripe_payment_intent_id = $1 AND status = 'pending'
            RETURNING id, invoice_id, stripe_checkout_session_id,
                      stripe_payment_intent_id, status, paid_at
            "#,
        )
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(PaymentUpdate::Applied(Self::payment_from_row(&r)?)),
            None => {
                self.resolve_unmatched("stripe_payment_intent_id", payment_intent_id)
                    .await
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, client_id, invoice_number, status, total, currency
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        row.map(|r| {
            let status: String = r.get("status");
            Ok(Invoice {
                id: r.get("id"),
                user_id: r.get("user_id"),
                client_id: r.get("client_id"),
                invoice_number: r.get("invoice_number"),
                status: parse_invoice_status(&status)?,
                total: r.get("total"),
                currency: r.get("currency"),
            })
        })
        .transpose()
    }

    #[instrument(skip(self, metadata))]
    async fn mark_invoice_paid(
        &self,
        invoice_id: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, LedgerError> {
        // Invoice transition and audit append commit together or not at all
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid', updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('paid', 'cancelled')
            RETURNING id
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        if updated.is_none() {
            tx.rollback()
                .await
                .map_err(|e| LedgerError::Database(e.to_string()))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO invoice_events (id, invoice_id, event_type, metadata)
            VALUES ($1, $2, 'paid', $3)
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(invoice_id)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(true)
    }

    #[instrument(skip(self, metadata))]
    async fn append_invoice_event(
        &self,
        invoice_id: &str,
        event_type: InvoiceEventType,
        metadata: serde_json::Value,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO invoice_events (id, invoice_id, event_type, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(invoice_id)
        .bind(event_type.to_string())
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn has_reminder_event(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS present FROM invoice_events
            WHERE invoice_id = $1
              AND event_type = 'reminder_sent'
              AND metadata::text LIKE '%' || $2 || '%'
            LIMIT 1
            "#,
        )
        .bind(invoice_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn list_invoice_events(
        &self,
        invoice_id: &str,
    ) -> Result<Vec<InvoiceEvent>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, event_type, metadata, created_at
            FROM invoice_events
            WHERE invoice_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let event_type: String = r.get("event_type");
                Ok(InvoiceEvent {
                    id: r.get("id"),
                    invoice_id: r.get("invoice_id"),
                    event_type: parse_event_type(&event_type)?,
                    metadata: r.get("metadata"),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, LedgerError> {
        let row = sqlx::query("SELECT id, name, email FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(row.map(|r| Client {
            id: r.get("id"),
            name: r.get("name"),
            email: r.get("email"),
        }))
    }

    #[instrument(skip(self))]
    async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, LedgerError> {
        let row = sqlx::query(
            "SELECT user_id, business_name, email_from_name FROM settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(row.map(|r| Settings {
            user_id: r.get("user_id"),
            business_name: r.get("business_name"),
            email_from_name: r.get("email_from_name"),
        }))
    }
}

#[async_trait]
impl CodeStore for PostgresLedger {
    #[instrument(skip(self))]
    async fn mark_code_evaluated(&self, code_id: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE codes
            SET status = 'success', ai_generated = TRUE, email_send = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(code_id)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(())
    }
}
