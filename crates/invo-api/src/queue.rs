//! Queue drive loop
//!
//! Pulls batches off the transport, runs them through the consumer, and
//! settles each message with the consumer's disposition. Batches are
//! processed one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use invo_durable::{QueueConsumer, QueueTransport, SchedulerStore};

/// Maximum messages pulled per batch
const BATCH_SIZE: usize = 10;

/// Idle wait between empty polls
const IDLE_WAIT: Duration = Duration::from_millis(200);

/// Run the consumer against a transport until shutdown
pub async fn run_consumer_loop<S, T>(
    consumer: Arc<QueueConsumer<S>>,
    transport: Arc<T>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: SchedulerStore,
    T: QueueTransport,
{
    info!("queue consumer loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let batch = transport.receive_batch(BATCH_SIZE).await;

        if batch.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_WAIT) => {}
                _ = shutdown_rx.changed() => {
                    debug!("shutdown signal received");
                    break;
                }
            }
            continue;
        }

        let dispositions = consumer.process_batch(&batch).await;
        for (message, disposition) in batch.iter().zip(dispositions) {
            transport.settle(&message.id, disposition).await;
        }
    }

    info!("queue consumer loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use invo_core::CodeData;
    use invo_durable::{
        EvaluationScheduler, InMemorySchedulerStore, InMemoryTransport, InboundMessage,
        WorkflowLauncher, WorkflowRunError,
    };

    struct NoopLauncher;

    #[async_trait]
    impl WorkflowLauncher for NoopLauncher {
        async fn launch(&self, _task: &CodeData) -> Result<(), WorkflowRunError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loop_drains_and_settles() {
        let store = Arc::new(InMemorySchedulerStore::new());
        let scheduler = Arc::new(EvaluationScheduler::new(
            store.clone(),
            Arc::new(NoopLauncher),
            Duration::from_secs(180),
        ));
        let consumer = Arc::new(QueueConsumer::new(scheduler));
        let transport = Arc::new(InMemoryTransport::new());

        transport.push(InboundMessage {
            id: "m1".to_string(),
            body: serde_json::json!({
                "type": "CODE_GENERATED",
                "codeId": "c1",
                "userId": "u1",
                "code": "x",
                "status": "pending",
                "aiGenerated": false,
                "emailSend": true,
            }),
        });

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_consumer_loop(consumer, transport.clone(), rx));

        // Give the loop a moment to drain the message
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .unwrap();

        assert_eq!(transport.pending(), 0);
        assert!(store.get_task("c1").await.unwrap().is_some());
    }
}
