//! Message Bus Module
//!
//! The boundary between the orchestration core and the messaging-platform
//! adapter. Inbound messages flow from the adapter into the orchestrator;
//! results, progress and busy notices flow back out.
//!
//! ```text
//! ┌─────────────┐  inbound   ┌──────────────┐
//! │   Adapter   │──────────>│ Orchestrator │
//! │   (Slack)   │<──────────│   workers    │
//! └─────────────┘  outbound  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use herald::bus::{InboundMessage, MessageBus};
//!
//! # tokio_test::block_on(async {
//! let bus = MessageBus::new();
//! bus.publish_inbound(InboundMessage::new("T1", "C1", "hi")).await.unwrap();
//! let received = bus.consume_inbound().await.unwrap();
//! assert_eq!(received.text, "hi");
//! # });
//! ```

pub mod message;

pub use message::{DeliveryPayload, InboundMessage, OutboundKind, OutboundMessage, ThreadRef};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::error::{HeraldError, Result};

/// Default buffer size for message channels
const DEFAULT_BUFFER_SIZE: usize = 100;

/// Sink for everything the core sends back to users.
///
/// Implemented by the platform adapter; [`MessageBus`] implements it by
/// publishing [`OutboundMessage`]s.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver a final result (text or file) to a thread.
    async fn deliver_result(
        &self,
        workspace_id: &str,
        thread: &ThreadRef,
        payload: DeliveryPayload,
    ) -> Result<()>;

    /// Deliver an intermediate progress update.
    async fn deliver_progress(&self, workspace_id: &str, thread: &ThreadRef, text: &str)
        -> Result<()>;

    /// Tell the user their request was not admitted.
    async fn deliver_busy(&self, workspace_id: &str, thread: &ThreadRef, text: &str) -> Result<()> {
        self.deliver_result(workspace_id, thread, DeliveryPayload::text(text))
            .await
    }
}

/// Two async MPSC channels: inbound (adapter → core) and outbound (core → adapter).
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<OutboundMessage>>>,
}

impl MessageBus {
    /// Creates a new `MessageBus` with the default buffer size (100).
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a new `MessageBus` with a custom buffer size.
    ///
    /// # Arguments
    /// * `buffer_size` - The maximum number of messages buffered per direction
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        }
    }

    /// Publishes an inbound message.
    ///
    /// # Errors
    /// Returns `HeraldError::BusClosed` if the receiver has been dropped.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| HeraldError::BusClosed)
    }

    /// Consumes the next inbound message, or `None` once all senders are gone.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Publishes an outbound message.
    ///
    /// # Errors
    /// Returns `HeraldError::BusClosed` if the receiver has been dropped.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| HeraldError::BusClosed)
    }

    /// Consumes the next outbound message.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Returns a sender for inbound messages, for adapters running on their own task.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Delivery for MessageBus {
    async fn deliver_result(
        &self,
        workspace_id: &str,
        thread: &ThreadRef,
        payload: DeliveryPayload,
    ) -> Result<()> {
        self.publish_outbound(OutboundMessage::new(
            workspace_id,
            thread,
            OutboundKind::Result,
            payload,
        ))
        .await
    }

    async fn deliver_progress(
        &self,
        workspace_id: &str,
        thread: &ThreadRef,
        text: &str,
    ) -> Result<()> {
        self.publish_outbound(OutboundMessage::new(
            workspace_id,
            thread,
            OutboundKind::Progress,
            DeliveryPayload::text(text),
        ))
        .await
    }

    async fn deliver_busy(&self, workspace_id: &str, thread: &ThreadRef, text: &str) -> Result<()> {
        self.publish_outbound(OutboundMessage::new(
            workspace_id,
            thread,
            OutboundKind::Busy,
            DeliveryPayload::text(text),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbound_roundtrip() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("T1", "C1", "hello"))
            .await
            .unwrap();
        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.workspace_id, "T1");
        assert_eq!(msg.text, "hello");
    }

    #[tokio::test]
    async fn test_delivery_kinds() {
        let bus = MessageBus::new();
        let thread = ThreadRef::in_thread("C1", "99");

        bus.deliver_progress("T1", &thread, "step 1").await.unwrap();
        bus.deliver_result("T1", &thread, DeliveryPayload::text("done"))
            .await
            .unwrap();
        bus.deliver_busy("T1", &thread, "hang tight").await.unwrap();

        let kinds: Vec<OutboundKind> = vec![
            bus.consume_outbound().await.unwrap().kind,
            bus.consume_outbound().await.unwrap().kind,
            bus.consume_outbound().await.unwrap().kind,
        ];
        assert_eq!(
            kinds,
            vec![
                OutboundKind::Progress,
                OutboundKind::Result,
                OutboundKind::Busy
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_after_receiver_dropped_is_bus_closed() {
        let (tx, rx) = mpsc::channel::<OutboundMessage>(1);
        drop(rx);
        let bus = MessageBus {
            outbound_tx: tx,
            ..MessageBus::new()
        };
        let err = bus
            .deliver_progress("T1", &ThreadRef::new("C1"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::BusClosed));
    }
}
