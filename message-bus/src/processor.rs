//! Module processor interface and in-memory implementation

use crate::metrics::{MESSAGE_PROCESS_DURATION, MESSAGE_PROCESS_TOTAL, PROCESSOR_LOOKUP_TOTAL};
use crate::{Error, Message, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Hands messages over to the bus
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process `message` received on `channel_id`.
    ///
    /// Synchronous (best-effort) messages yield the response; asynchronous
    /// messages yield `None` once the bus has accepted them. Messages
    /// submitted under `transaction` are only published when that
    /// transaction commits.
    async fn process(
        &self,
        channel_id: &str,
        message: Message,
        transaction: Option<Uuid>,
    ) -> Result<Option<Message>>;
}

/// Resolves the module processor, which may not be available yet at startup
#[async_trait]
pub trait ProcessorLocator: Send + Sync {
    /// Look up the processor
    async fn locate(&self) -> Result<Arc<dyn MessageProcessor>>;
}

/// Locator over a fixed (possibly absent) processor
pub struct StaticLocator {
    processor: Option<Arc<dyn MessageProcessor>>,
}

impl StaticLocator {
    /// Locator that always finds `processor`
    pub fn new(processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            processor: Some(processor),
        }
    }

    /// Locator that never finds a processor
    pub fn unavailable() -> Self {
        Self { processor: None }
    }
}

#[async_trait]
impl ProcessorLocator for StaticLocator {
    async fn locate(&self) -> Result<Arc<dyn MessageProcessor>> {
        match &self.processor {
            Some(p) => {
                PROCESSOR_LOOKUP_TOTAL.with_label_values(&["found"]).inc();
                Ok(p.clone())
            }
            None => {
                PROCESSOR_LOOKUP_TOTAL
                    .with_label_values(&["unavailable"])
                    .inc();
                Err(Error::Unavailable("no module processor bound".to_string()))
            }
        }
    }
}

/// A message accepted by the in-memory processor
#[derive(Debug, Clone)]
pub struct Received {
    /// Channel the message was submitted on
    pub channel_id: String,
    /// The message
    pub message: Message,
}

/// In-memory processor
///
/// Records accepted messages and answers synchronous ones with an echo
/// of the request document. Asynchronous messages submitted within a
/// transaction are held back until [`InMemoryProcessor::publish`] or
/// dropped by [`InMemoryProcessor::discard`]. Failures can be queued to
/// exercise the rollback paths of callers.
#[derive(Default)]
pub struct InMemoryProcessor {
    received: Mutex<Vec<Received>>,
    staged: Mutex<HashMap<Uuid, Vec<Received>>>,
    failures: Mutex<VecDeque<(bool, String)>>,
}

impl InMemoryProcessor {
    /// Create new processor
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next submission
    pub fn fail_next(&self, retryable: bool, reason: impl Into<String>) {
        self.failures.lock().push_back((retryable, reason.into()));
    }

    /// Messages accepted so far
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    /// Number of accepted messages
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    /// Number of messages waiting for their transaction to end
    pub fn pending(&self) -> usize {
        self.staged.lock().values().map(Vec::len).sum()
    }

    /// Publish the messages staged under `transaction`
    pub fn publish(&self, transaction: Uuid) -> usize {
        let staged = self.staged.lock().remove(&transaction).unwrap_or_default();
        let published = staged.len();
        self.received.lock().extend(staged);
        debug!(tx = %transaction, published, "Staged messages published");
        published
    }

    /// Drop the messages staged under `transaction`
    pub fn discard(&self, transaction: Uuid) -> usize {
        let discarded = self
            .staged
            .lock()
            .remove(&transaction)
            .map_or(0, |staged| staged.len());
        debug!(tx = %transaction, discarded, "Staged messages discarded");
        discarded
    }
}

#[async_trait]
impl MessageProcessor for InMemoryProcessor {
    async fn process(
        &self,
        channel_id: &str,
        message: Message,
        transaction: Option<Uuid>,
    ) -> Result<Option<Message>> {
        let delivery = message.delivery.code();
        let timer = MESSAGE_PROCESS_DURATION
            .with_label_values(&[delivery])
            .start_timer();

        if let Some((retryable, reason)) = self.failures.lock().pop_front() {
            MESSAGE_PROCESS_TOTAL
                .with_label_values(&[delivery, "failure"])
                .inc();
            return Err(Error::Processing { retryable, reason });
        }

        debug!(
            channel_id = %channel_id,
            message_id = %message.id,
            "Message accepted"
        );

        let response = if message.delivery.is_synchronous() {
            let mut response = Message::response_to(&message);
            response.document = message.document.clone();
            Some(response)
        } else {
            None
        };

        let received = Received {
            channel_id: channel_id.to_string(),
            message,
        };
        match transaction {
            Some(tx) if response.is_none() => {
                self.staged.lock().entry(tx).or_default().push(received);
            }
            _ => self.received.lock().push(received),
        }

        MESSAGE_PROCESS_TOTAL
            .with_label_values(&[delivery, "success"])
            .inc();
        timer.observe_duration();

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, DeliverySemantics, Header};
    use crate::Payload;

    fn message(delivery: DeliverySemantics) -> Message {
        Message::new(
            Header::new("P1", "S1", "P2", "S2", Action::new("Order", "urn:a")),
            delivery,
        )
        .with_document(Payload::xml("<?xml version=\"1.0\"?><order/>", "test"))
    }

    #[tokio::test]
    async fn test_async_message_has_no_response() {
        let processor = InMemoryProcessor::new();
        let result = processor
            .process("ch-1", message(DeliverySemantics::ExactlyOnce), None)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(processor.count(), 1);
        assert_eq!(processor.received()[0].channel_id, "ch-1");
    }

    #[tokio::test]
    async fn test_sync_message_echoes_document() {
        let processor = InMemoryProcessor::new();
        let request = message(DeliverySemantics::BestEffort);
        let request_id = request.id;

        let response = processor.process("ch-1", request, None).await.unwrap().unwrap();

        assert_eq!(response.ref_to_message_id, Some(request_id));
        assert!(response.document_text().contains("<order/>"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let processor = InMemoryProcessor::new();
        processor.fail_next(true, "bus down");

        let err = processor
            .process("ch-1", message(DeliverySemantics::ExactlyOnce), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(processor.count(), 0);

        processor
            .process("ch-1", message(DeliverySemantics::ExactlyOnce), None)
            .await
            .unwrap();
        assert_eq!(processor.count(), 1);
    }

    #[tokio::test]
    async fn test_transactional_message_waits_for_publish() {
        let processor = InMemoryProcessor::new();
        let committed = Uuid::new_v4();
        let aborted = Uuid::new_v4();

        processor
            .process("ch-1", message(DeliverySemantics::ExactlyOnce), Some(committed))
            .await
            .unwrap();
        processor
            .process("ch-1", message(DeliverySemantics::ExactlyOnce), Some(aborted))
            .await
            .unwrap();
        assert_eq!(processor.count(), 0);
        assert_eq!(processor.pending(), 2);

        assert_eq!(processor.discard(aborted), 1);
        assert_eq!(processor.publish(committed), 1);
        assert_eq!(processor.count(), 1);
        assert_eq!(processor.pending(), 0);
    }

    #[tokio::test]
    async fn test_sync_message_is_not_staged() {
        let processor = InMemoryProcessor::new();
        let response = processor
            .process(
                "ch-1",
                message(DeliverySemantics::BestEffort),
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap();

        assert!(response.is_some());
        assert_eq!(processor.count(), 1);
        assert_eq!(processor.pending(), 0);
    }

    #[tokio::test]
    async fn test_static_locator() {
        let found = StaticLocator::new(Arc::new(InMemoryProcessor::new()));
        assert!(found.locate().await.is_ok());

        let missing = StaticLocator::unavailable();
        assert!(matches!(missing.locate().await, Err(Error::Unavailable(_))));
    }
}
