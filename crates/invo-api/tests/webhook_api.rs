//! Webhook endpoint behavior against the in-memory ledger

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use sha2::Sha256;
use tower::ServiceExt;

use invo_api::webhook::{webhook_router, WebhookState};
use invo_core::InvoiceStatus;
use invo_payments::{
    Analytics, Notifier, NotifyError, PaymentReconciler, ReminderScheduler,
};
use invo_storage::{Client, InMemoryLedger, Invoice, LedgerStore};

const SECRET: &str = "whsec_test_secret";

fn sign(payload: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let key = SECRET.strip_prefix("whsec_").unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[derive(Default)]
struct RecordingNotifier {
    receipts: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_receipt(
        &self,
        to: &str,
        _invoice_number: &str,
        _business_name: &str,
        _total: f64,
        _currency: &str,
        _paid_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.receipts.lock().push(to.to_string());
        Ok(())
    }

    async fn send_reminder(
        &self,
        _to: &str,
        _invoice_number: &str,
        _total: f64,
        _currency: &str,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Default)]
struct NullAnalytics;

#[async_trait]
impl Analytics for NullAnalytics {
    async fn invoice_paid(&self, _user_id: &str, _invoice_id: &str, _amount: f64, _currency: &str) {}
}

#[derive(Default)]
struct NullReminders;

#[async_trait]
impl ReminderScheduler for NullReminders {
    async fn cancel(&self, _user_id: &str, _invoice_id: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

struct Fixture {
    ledger: Arc<InMemoryLedger>,
    notifier: Arc<RecordingNotifier>,
    app: axum::Router,
}

fn fixture() -> Fixture {
    let ledger = Arc::new(InMemoryLedger::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let reconciler = Arc::new(PaymentReconciler::new(
        ledger.clone(),
        notifier.clone(),
        Arc::new(NullAnalytics),
        Arc::new(NullReminders),
    ));
    let app = webhook_router(WebhookState {
        reconciler,
        webhook_secret: SECRET.to_string(),
    });
    Fixture {
        ledger,
        notifier,
        app,
    }
}

async fn seed(ledger: &InMemoryLedger) {
    ledger.insert_invoice(Invoice {
        id: "i1".to_string(),
        user_id: "u1".to_string(),
        client_id: "cl1".to_string(),
        invoice_number: "INV-001".to_string(),
        status: InvoiceStatus::Sent,
        total: 125.0,
        currency: "USD".to_string(),
    });
    ledger.insert_client(Client {
        id: "cl1".to_string(),
        name: "Acme Bikes".to_string(),
        email: Some("billing@acme.test".to_string()),
    });
    ledger.create_payment("i1", "cs_1").await.unwrap();
}

fn completed_payload() -> String {
    serde_json::json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_1",
                "payment_intent": "pi_1",
                "amount_total": 12500,
                "metadata": { "invoice_id": "i1" }
            }
        }
    })
    .to_string()
}

fn webhook_request(payload: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhook/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let f = fixture();
    let response = f
        .app
        .oneshot(webhook_request(&completed_payload(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Missing signature");
}

#[tokio::test]
async fn bad_signature_is_rejected_without_state_changes() {
    let f = fixture();
    seed(&f.ledger).await;

    let response = f
        .app
        .oneshot(webhook_request(&completed_payload(), Some("t=1,v1=bogus")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let invoice = f.ledger.get_invoice("i1").await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Sent);
    assert!(f.notifier.receipts.lock().is_empty());
}

#[tokio::test]
async fn valid_completed_event_settles_the_invoice() {
    let f = fixture();
    seed(&f.ledger).await;

    let payload = completed_payload();
    let response = f
        .app
        .oneshot(webhook_request(&payload, Some(&sign(&payload))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["received"], true);

    let invoice = f.ledger.get_invoice("i1").await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(
        *f.notifier.receipts.lock(),
        vec!["billing@acme.test".to_string()]
    );
}

#[tokio::test]
async fn unrecognized_event_kind_is_acknowledged() {
    let f = fixture();

    let payload = serde_json::json!({
        "id": "evt_2",
        "type": "customer.subscription.updated",
        "data": { "object": { "id": "sub_1" } }
    })
    .to_string();

    let response = f
        .app
        .oneshot(webhook_request(&payload, Some(&sign(&payload))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["received"], true);
}

#[tokio::test]
async fn signed_garbage_body_is_a_bad_request() {
    let f = fixture();

    let payload = "{\"not\": \"an event\"}";
    let response = f
        .app
        .oneshot(webhook_request(payload, Some(&sign(payload))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
