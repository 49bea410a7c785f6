//! Queue consumer
//!
//! Drains batches of inbound messages, validates each against the tagged
//! queue schema, and feeds recognized messages to the scheduler. Messages
//! that fail validation are acknowledged anyway: an unparseable body never
//! becomes parseable through redelivery, and retrying it forever would wedge
//! the queue. Dispatch failures (store unavailable) request redelivery.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{error, info, instrument};

use invo_core::QueueMessage;

use crate::persistence::SchedulerStore;
use crate::scheduler::EvaluationScheduler;

/// What the transport should do with a message after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue
    Ack,

    /// Redeliver the message later
    Retry,
}

/// A raw message as handed over by the transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Transport-assigned delivery id
    pub id: String,

    /// Raw JSON body
    pub body: serde_json::Value,
}

/// Message transport the consumer drains
///
/// The real transport is platform-managed; this trait is the seam the
/// consumer needs from it. [`InMemoryTransport`] backs tests and local runs.
#[async_trait]
pub trait QueueTransport: Send + Sync + 'static {
    /// Receive up to `max` messages (may return fewer, or none)
    async fn receive_batch(&self, max: usize) -> Vec<InboundMessage>;

    /// Apply the consumer's decision for a delivery
    async fn settle(&self, id: &str, disposition: Disposition);
}

/// Validates and dispatches inbound queue messages
pub struct QueueConsumer<S: SchedulerStore> {
    scheduler: Arc<EvaluationScheduler<S>>,
}

impl<S: SchedulerStore> QueueConsumer<S> {
    pub fn new(scheduler: Arc<EvaluationScheduler<S>>) -> Self {
        Self { scheduler }
    }

    /// Process one batch sequentially, returning a disposition per message
    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub async fn process_batch(&self, batch: &[InboundMessage]) -> Vec<Disposition> {
        info!(count = batch.len(), "processing message batch");

        let mut dispositions = Vec::with_capacity(batch.len());
        for message in batch {
            dispositions.push(self.process_message(message).await);
        }
        dispositions
    }

    async fn process_message(&self, message: &InboundMessage) -> Disposition {
        let parsed: QueueMessage = match serde_json::from_value(message.body.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Permanently undeliverable; drop rather than poison the queue
                error!(
                    message_id = %message.id,
                    error = %e,
                    body = %message.body,
                    "invalid message format, dropping"
                );
                return Disposition::Ack;
            }
        };

        match parsed {
            QueueMessage::CodeGenerated {
                code_id,
                user_id,
                status,
                ai_generated,
                email_send,
                ..
            } => {
                info!(%code_id, "scheduling evaluation for generated code");

                let task = invo_core::CodeData {
                    code_id,
                    user_id,
                    status,
                    ai_generated,
                    email_send,
                };

                match self.scheduler.collect(task).await {
                    Ok(()) => Disposition::Ack,
                    Err(e) => {
                        error!(message_id = %message.id, error = %e, "collect failed, requesting redelivery");
                        Disposition::Retry
                    }
                }
            }
        }
    }
}

/// Channel-backed transport for tests and local runs
///
/// Retried messages go to the back of the queue.
#[derive(Default)]
pub struct InMemoryTransport {
    queue: Mutex<VecDeque<InboundMessage>>,
    in_flight: Mutex<Vec<InboundMessage>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message for delivery
    pub fn push(&self, message: InboundMessage) {
        self.queue.lock().push_back(message);
    }

    /// Messages waiting for delivery (for assertions)
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn receive_batch(&self, max: usize) -> Vec<InboundMessage> {
        let mut queue = self.queue.lock();
        let take = max.min(queue.len());
        let batch: Vec<_> = queue.drain(..take).collect();
        self.in_flight.lock().extend(batch.iter().cloned());
        batch
    }

    async fn settle(&self, id: &str, disposition: Disposition) {
        let mut in_flight = self.in_flight.lock();
        let Some(pos) = in_flight.iter().position(|m| m.id == id) else {
            return;
        };
        let message = in_flight.remove(pos);
        if disposition == Disposition::Retry {
            self.queue.lock().push_back(message);
        }
    }
}
