//! The unit of work that flows through the queue.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::bus::{InboundMessage, ThreadRef};
use crate::routing::Classification;

/// An admitted inbound message plus its routing decision.
///
/// Immutable after construction. Owned by the queue until dispatch, then by
/// the worker that dequeued it.
#[derive(Debug, Clone)]
pub struct Request {
    pub workspace_id: String,
    pub thread_ref: ThreadRef,
    pub text: String,
    pub arrival: DateTime<Utc>,
    pub trace_id: String,
    pub in_active_thread: bool,
    pub classification: Classification,
}

impl Request {
    /// Build a request from an inbound message, assigning a fresh trace id.
    pub fn from_inbound(msg: &InboundMessage, classification: Classification) -> Self {
        Self {
            workspace_id: msg.workspace_id.clone(),
            thread_ref: msg.thread_ref.clone(),
            text: msg.text.clone(),
            arrival: Utc::now(),
            trace_id: Uuid::new_v4().to_string(),
            in_active_thread: msg.in_active_thread,
            classification,
        }
    }

    /// Whether this request should run as a background task.
    pub fn is_background(&self) -> bool {
        self.classification.is_background()
    }
}
