//! Error types for Herald
//!
//! This module defines the error taxonomy used throughout the orchestration core.
//! Components below the agent loop (queue, rate limiter, task manager) surface
//! these as typed results; the agent loop converts them into recovery actions.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured classification of LLM gateway failures.
///
/// Lets the agent loop pick a recovery action without string matching.
#[derive(Debug)]
pub enum ProviderError {
    /// 401/403: invalid API key or authentication failure
    Auth(String),
    /// 429: rate limit or quota exceeded
    RateLimit(String),
    /// 402: payment required or billing issue
    Billing(String),
    /// 500/502/503/504: server-side errors
    ServerError(String),
    /// 400: malformed request
    InvalidRequest(String),
    /// 404: model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Upstream is overloaded, retry with backoff
    Overloaded(String),
    /// Request structure rejected by the model, do not retry
    Format(String),
    /// 413 or a context-length complaint: the payload does not fit the model window
    ContextTooLarge(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Format(msg) => write!(f, "Format error: {}", msg),
            ProviderError::ContextTooLarge(msg) => write!(f, "Context too large: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if this error is transient and the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
                | ProviderError::Overloaded(_)
        )
    }

    /// Returns `true` if the request failed because the transcript is too large.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, ProviderError::ContextTooLarge(_))
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Format(_) => Some(400),
            ProviderError::ContextTooLarge(_) => Some(413),
            ProviderError::Timeout(_) | ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for HeraldError {
    fn from(err: ProviderError) -> Self {
        HeraldError::ProviderTyped(err)
    }
}

// ============================================================================
// Failure kinds (input to the recovery ladder)
// ============================================================================

/// Coarse reason an execution step failed.
///
/// The recovery ladder picks a different rung for capacity problems
/// (go cheaper/faster) than for difficulty problems (go more capable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upstream is saturated: rate limits, overload, 5xx, timeouts.
    Capacity,
    /// The model could not make progress: turn budget exhausted, malformed output.
    Difficulty,
    /// The transcript no longer fits the model's context window.
    ContextOverflow,
    /// Retrying cannot help: auth, billing, missing model.
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Capacity => write!(f, "capacity"),
            FailureKind::Difficulty => write!(f, "difficulty"),
            FailureKind::ContextOverflow => write!(f, "context_overflow"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for Herald operations.
#[derive(Error, Debug)]
pub enum HeraldError {
    /// Router or fast path could not classify the input. Callers fall back to the default tier.
    #[error("Classification error: {0}")]
    Classification(String),

    /// The queue is over its depth threshold. Surfaced as backpressure, never dropped.
    #[error("Admission rejected: queue depth {depth} exceeds threshold {threshold}")]
    AdmissionRejected { depth: usize, threshold: usize },

    /// A token bucket stayed empty for longer than the bounded wait.
    #[error("Rate limited on bucket {bucket} (retry after {retry_after_ms}ms)")]
    RateLimited { bucket: String, retry_after_ms: u64 },

    /// A tool call failed at the execution layer.
    #[error("Tool error: {0}")]
    ToolExecution(String),

    /// The transcript no longer fits the model's context window.
    #[error("Context too large: {0}")]
    ContextTooLarge(String),

    /// The task deadline passed while it was still running.
    #[error("Task timed out: {0}")]
    TaskTimedOut(String),

    /// Every recovery step was exhausted.
    #[error("Task failed: {0}")]
    FatalTaskFailure(String),

    /// A workspace already runs the maximum number of background tasks.
    #[error("Workspace {workspace} already has {limit} running tasks")]
    TaskLimit { workspace: String, limit: usize },

    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Untyped provider errors (transport failures, unparsable responses)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for recovery decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Resource not found (tasks, tools, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Message bus channel closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HeraldError {
    /// Returns `true` if this error means the model payload is too large.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            HeraldError::ContextTooLarge(_) => true,
            HeraldError::ProviderTyped(pe) => pe.is_context_overflow(),
            _ => false,
        }
    }

    /// Classify this error for the recovery ladder.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            HeraldError::ContextTooLarge(_) => FailureKind::ContextOverflow,
            HeraldError::RateLimited { .. } | HeraldError::Http(_) => FailureKind::Capacity,
            HeraldError::ProviderTyped(pe) => match pe {
                ProviderError::ContextTooLarge(_) => FailureKind::ContextOverflow,
                ProviderError::RateLimit(_)
                | ProviderError::Overloaded(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_) => FailureKind::Capacity,
                ProviderError::Auth(_)
                | ProviderError::Billing(_)
                | ProviderError::ModelNotFound(_)
                | ProviderError::InvalidRequest(_) => FailureKind::Fatal,
                ProviderError::Format(_) | ProviderError::Unknown(_) => FailureKind::Difficulty,
            },
            HeraldError::Provider(_)
            | HeraldError::ToolExecution(_)
            | HeraldError::Classification(_)
            | HeraldError::Json(_) => FailureKind::Difficulty,
            _ => FailureKind::Fatal,
        }
    }
}

/// A specialized `Result` type for Herald operations.
pub type Result<T> = std::result::Result<T, HeraldError>;
