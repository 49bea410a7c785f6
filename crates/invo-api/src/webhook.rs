//! Stripe webhook endpoint
//!
//! `POST /api/webhook/stripe` with the raw body and the `stripe-signature`
//! header. Responds 400 with an error body on a missing or invalid
//! signature, 200 `{"received": true}` for everything that verified,
//! including event kinds the reconciler does not act on.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use invo_payments::{verify_signature, PaymentReconciler, ProviderEvent, WebhookError};
use invo_storage::LedgerStore;

/// State for the webhook routes
pub struct WebhookState<L: LedgerStore> {
    pub reconciler: Arc<PaymentReconciler<L>>,
    pub webhook_secret: String,
}

impl<L: LedgerStore> Clone for WebhookState<L> {
    fn clone(&self) -> Self {
        Self {
            reconciler: self.reconciler.clone(),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}

/// Build the webhook router
pub fn webhook_router<L: LedgerStore>(state: WebhookState<L>) -> Router {
    Router::new()
        .route("/api/webhook/stripe", post(stripe_webhook::<L>))
        .with_state(state)
}

async fn stripe_webhook<L: LedgerStore>(
    State(state): State<WebhookState<L>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("missing stripe signature header");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing signature" })),
        );
    };

    if let Err(e) = verify_signature(
        &body,
        signature,
        &state.webhook_secret,
        Utc::now().timestamp(),
    ) {
        error!(error = %e, "webhook verification failed");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid signature" })),
        );
    }

    let event = match ProviderEvent::parse(&body) {
        Ok(event) => event,
        Err(WebhookError::MalformedPayload(e)) => {
            error!(error = %e, "webhook payload did not parse as an event");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid payload" })),
            );
        }
        Err(e) => {
            error!(error = %e, "webhook rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid signature" })),
            );
        }
    };

    info!(event_id = %event.event_id, event_type = %event.event_type, "received stripe webhook");

    if let Err(e) = state.reconciler.apply(&event).await {
        // Ledger unavailable: a 5xx prompts the provider to redeliver
        error!(event_id = %event.event_id, error = %e, "reconciliation failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Internal error" })),
        );
    }

    (StatusCode::OK, Json(json!({ "received": true })))
}
