//! Side-effect collaborators
//!
//! Receipts, reminders, analytics and reminder cancellation are best-effort:
//! the reconciler fires them after the ledger commit and logs failures
//! without rolling anything back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

/// Error type for notification sends
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("email send failed: {0}")]
    Send(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Send(err.to_string())
    }
}

/// Outbound email sender
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Payment receipt after an invoice is paid
    #[allow(clippy::too_many_arguments)]
    async fn send_receipt(
        &self,
        to: &str,
        invoice_number: &str,
        business_name: &str,
        total: f64,
        currency: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), NotifyError>;

    /// Due/overdue reminder for an unpaid invoice
    async fn send_reminder(
        &self,
        to: &str,
        invoice_number: &str,
        total: f64,
        currency: &str,
    ) -> Result<(), NotifyError>;
}

/// Fire-and-forget analytics sink
#[async_trait]
pub trait Analytics: Send + Sync + 'static {
    async fn invoice_paid(&self, user_id: &str, invoice_id: &str, amount: f64, currency: &str);
}

/// Cancels scheduled reminders for an invoice once it no longer needs them
#[async_trait]
pub trait ReminderScheduler: Send + Sync + 'static {
    async fn cancel(&self, user_id: &str, invoice_id: &str) -> Result<(), NotifyError>;
}

/// Resend-backed [`Notifier`]
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendNotifier {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    async fn send(&self, to: &str, subject: &str, html: String) -> Result<(), NotifyError> {
        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Send(format!("resend returned {status}: {body}")));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_receipt(
        &self,
        to: &str,
        invoice_number: &str,
        business_name: &str,
        total: f64,
        currency: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let subject = format!("Payment received for invoice {invoice_number}");
        let html = format!(
            "<p>{business_name} received your payment of {total:.2} {currency} \
             for invoice {invoice_number} on {}.</p>",
            paid_at.format("%Y-%m-%d")
        );
        self.send(to, &subject, html).await
    }

    async fn send_reminder(
        &self,
        to: &str,
        invoice_number: &str,
        total: f64,
        currency: &str,
    ) -> Result<(), NotifyError> {
        let subject = format!("Reminder: invoice {invoice_number} is awaiting payment");
        let html = format!(
            "<p>Invoice {invoice_number} for {total:.2} {currency} is still unpaid.</p>"
        );
        self.send(to, &subject, html).await
    }
}

/// Analytics sink that records events to the log stream
#[derive(Default)]
pub struct TracingAnalytics;

#[async_trait]
impl Analytics for TracingAnalytics {
    async fn invoice_paid(&self, user_id: &str, invoice_id: &str, amount: f64, currency: &str) {
        info!(user_id, invoice_id, amount, currency, "analytics: invoice paid");
    }
}
