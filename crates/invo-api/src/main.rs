// Invo async core server
// Decision: the platform queue binding is stood in for locally by an
// in-memory transport fed through POST /internal/queue

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invo_core::AppConfig;
use invo_durable::{
    EvaluationScheduler, InMemoryTransport, InboundMessage, PostgresDurableStore, QueueConsumer,
    SchedulerDaemon, SchedulerDaemonConfig,
};
use invo_payments::{PaymentReconciler, ResendNotifier, TracingAnalytics};
use invo_storage::PostgresLedger;

use invo_api::evaluation::{
    code_evaluation_workflow, CodeEvaluationLauncher, LoggingEvaluationNotifier,
    SimulatedContentGenerator,
};
use invo_api::queue;
use invo_api::webhook::{webhook_router, WebhookState};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Local stand-in for the platform queue binding: accepts a raw message body
/// and enqueues it for the consumer loop
async fn enqueue(
    State(transport): State<Arc<InMemoryTransport>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    transport.push(InboundMessage {
        id: uuid::Uuid::now_v7().to_string(),
        body,
    });
    StatusCode::ACCEPTED
}

/// No-op reminder cancellation until the reminder scheduler service ships
struct LoggingReminderScheduler;

#[async_trait::async_trait]
impl invo_payments::ReminderScheduler for LoggingReminderScheduler {
    async fn cancel(&self, user_id: &str, invoice_id: &str) -> Result<(), invo_payments::NotifyError> {
        tracing::info!(user_id, invoice_id, "cancelling scheduled reminders");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "invo_api=info,invo_durable=info,invo_payments=info,invo_storage=info,tower_http=info"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let pool = PgPool::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let durable_store = Arc::new(PostgresDurableStore::new(pool.clone()));
    let ledger = Arc::new(PostgresLedger::new(pool));

    // Evaluation pipeline behind the debounce scheduler
    let launcher = Arc::new(CodeEvaluationLauncher::new(
        code_evaluation_workflow(
            Arc::new(SimulatedContentGenerator),
            Arc::new(LoggingEvaluationNotifier),
            ledger.clone(),
        ),
        durable_store.clone(),
    ));
    let scheduler = Arc::new(EvaluationScheduler::new(
        durable_store.clone(),
        launcher,
        config.debounce_interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let daemon = SchedulerDaemon::new(
        scheduler.clone(),
        SchedulerDaemonConfig::default(),
        shutdown_rx.clone(),
    );
    tokio::spawn(daemon.run());

    // Queue consumer over the local transport
    let transport = Arc::new(InMemoryTransport::new());
    let consumer = Arc::new(QueueConsumer::new(scheduler));
    tokio::spawn(queue::run_consumer_loop(
        consumer,
        transport.clone(),
        shutdown_rx.clone(),
    ));

    // Payment reconciliation
    let notifier: Arc<dyn invo_payments::Notifier> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendNotifier::new(key.clone(), config.email_from.clone())),
        None => {
            tracing::warn!("RESEND_API_KEY not set, receipts and reminders will fail");
            Arc::new(ResendNotifier::new(String::new(), config.email_from.clone()))
        }
    };
    let reconciler = Arc::new(PaymentReconciler::new(
        ledger,
        notifier,
        Arc::new(TracingAnalytics),
        Arc::new(LoggingReminderScheduler),
    ));

    let app = Router::new()
        .route("/health", get(health))
        .route("/internal/queue", post(enqueue))
        .with_state(transport)
        .merge(webhook_router(WebhookState {
            reconciler,
            webhook_secret: config.stripe_webhook_secret.clone(),
        }))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "invo api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server error")?;

    Ok(())
}
