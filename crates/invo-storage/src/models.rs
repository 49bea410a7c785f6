//! Ledger row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invo_core::{CodeStatus, InvoiceEventType, InvoiceStatus, PaymentStatus};

/// One payment attempt, linked 1:1 to a checkout session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub checkout_session_id: String,

    /// Assigned by the provider once the payment is attempted
    pub payment_intent_id: Option<String>,

    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Invoice row, as much of it as the async core needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub total: f64,
    pub currency: String,
}

/// Append-only audit log row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceEvent {
    pub id: String,
    pub invoice_id: String,
    pub event_type: InvoiceEventType,

    /// Opaque structured payload; also searched for idempotency keys
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

/// Client contact details, for receipts and reminders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// Per-user business settings used in outbound email
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub user_id: String,
    pub business_name: Option<String>,
    pub email_from_name: Option<String>,
}

/// Generated code row the evaluation workflow finalizes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Code {
    pub id: String,
    pub user_id: String,
    pub status: CodeStatus,
    pub ai_generated: bool,
    pub email_send: bool,
    pub updated_at: DateTime<Utc>,
}
