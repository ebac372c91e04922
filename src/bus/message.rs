//! Message types exchanged with the messaging-platform adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a reply goes: a channel and, optionally, a thread within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef {
    pub channel: String,
    pub thread_ts: Option<String>,
}

impl ThreadRef {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            thread_ts: None,
        }
    }

    pub fn in_thread(channel: &str, thread_ts: &str) -> Self {
        Self {
            channel: channel.to_string(),
            thread_ts: Some(thread_ts.to_string()),
        }
    }
}

impl std::fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.thread_ts {
            Some(ts) => write!(f, "{}/{}", self.channel, ts),
            None => f.write_str(&self.channel),
        }
    }
}

/// A normalized message from the platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub workspace_id: String,
    pub thread_ref: ThreadRef,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Reply inside a thread that already has bot context.
    pub in_active_thread: bool,
}

impl InboundMessage {
    /// Create a top-level message received now.
    ///
    /// # Example
    /// ```
    /// use herald::bus::InboundMessage;
    ///
    /// let msg = InboundMessage::new("T123", "C456", "hi");
    /// assert_eq!(msg.thread_ref.channel, "C456");
    /// assert!(!msg.in_active_thread);
    /// ```
    pub fn new(workspace_id: &str, channel: &str, text: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            thread_ref: ThreadRef::new(channel),
            text: text.to_string(),
            timestamp: Utc::now(),
            in_active_thread: false,
        }
    }

    /// Mark the message as a reply inside an existing thread with context.
    pub fn with_thread(mut self, thread_ts: &str) -> Self {
        self.thread_ref.thread_ts = Some(thread_ts.to_string());
        self.in_active_thread = true;
        self
    }
}

/// Body of a delivered result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DeliveryPayload {
    Text(String),
    File { name: String, content: String },
}

impl DeliveryPayload {
    pub fn text(s: impl Into<String>) -> Self {
        DeliveryPayload::Text(s.into())
    }

    /// Short human-readable form, used for console output and logs.
    pub fn preview(&self) -> &str {
        match self {
            DeliveryPayload::Text(t) => t,
            DeliveryPayload::File { name, .. } => name,
        }
    }
}

/// What an outbound message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// Final answer (or partial/failure report).
    Result,
    /// Intermediate status for a long-running task.
    Progress,
    /// Backpressure notice: the request was not admitted.
    Busy,
}

/// A message for the platform adapter to post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub workspace_id: String,
    pub thread_ref: ThreadRef,
    pub kind: OutboundKind,
    pub payload: DeliveryPayload,
}

impl OutboundMessage {
    pub fn new(
        workspace_id: &str,
        thread_ref: &ThreadRef,
        kind: OutboundKind,
        payload: DeliveryPayload,
    ) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            thread_ref: thread_ref.clone(),
            kind,
            payload,
        }
    }

    /// Text reply to an inbound message, in the same thread.
    pub fn reply_to(msg: &InboundMessage, kind: OutboundKind, text: &str) -> Self {
        Self::new(
            &msg.workspace_id,
            &msg.thread_ref,
            kind,
            DeliveryPayload::text(text),
        )
    }
}
