//! Provider event model
//!
//! Only the contract this system needs from the payment provider: an event
//! id, a type string, and the handful of object fields each handled kind
//! carries. Everything else the provider sends maps to `Unhandled`, which the
//! reconciler acknowledges without acting on.

use std::collections::HashMap;

use serde::Deserialize;

use crate::webhook::WebhookError;

/// A verified, parsed provider event
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    /// Provider-assigned event id, for correlation in logs
    pub event_id: String,

    /// Raw event type string
    pub event_type: String,

    pub event: PaymentEvent,
}

/// Internal mapping of the provider event kinds this system acts on
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    /// `checkout.session.completed`
    CheckoutCompleted {
        checkout_session_id: String,
        payment_intent_id: Option<String>,
        /// `invoice_id` metadata set at session-creation time
        invoice_id: Option<String>,
        /// Amount in the smallest currency unit
        amount_total: Option<i64>,
    },

    /// `checkout.session.expired`
    CheckoutExpired { checkout_session_id: String },

    /// `payment_intent.payment_failed`
    PaymentFailed {
        payment_intent_id: String,
        failure_message: Option<String>,
    },

    /// Any other event kind; received and ignored
    Unhandled,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawCheckoutSession {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    amount_total: Option<i64>,
}

#[derive(Deserialize)]
struct RawPaymentIntent {
    id: String,
    #[serde(default)]
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    #[serde(default)]
    message: Option<String>,
}

impl ProviderEvent {
    /// Parse a verified raw body into a provider event
    ///
    /// Unknown event types parse successfully as [`PaymentEvent::Unhandled`];
    /// only a body that is not an event envelope at all is an error.
    pub fn parse(payload: &str) -> Result<Self, WebhookError> {
        let raw: RawEvent = serde_json::from_str(payload)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let event = match raw.event_type.as_str() {
            "checkout.session.completed" => {
                let session: RawCheckoutSession = serde_json::from_value(raw.data.object)
                    .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                PaymentEvent::CheckoutCompleted {
                    checkout_session_id: session.id,
                    payment_intent_id: session.payment_intent,
                    invoice_id: session.metadata.get("invoice_id").cloned(),
                    amount_total: session.amount_total,
                }
            }
            "checkout.session.expired" => {
                let session: RawCheckoutSession = serde_json::from_value(raw.data.object)
                    .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                PaymentEvent::CheckoutExpired {
                    checkout_session_id: session.id,
                }
            }
            "payment_intent.payment_failed" => {
                let intent: RawPaymentIntent = serde_json::from_value(raw.data.object)
                    .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                PaymentEvent::PaymentFailed {
                    payment_intent_id: intent.id,
                    failure_message: intent.last_payment_error.and_then(|e| e.message),
                }
            }
            _ => PaymentEvent::Unhandled,
        };

        Ok(Self {
            event_id: raw.id,
            event_type: raw.event_type,
            event,
        })
    }
}
