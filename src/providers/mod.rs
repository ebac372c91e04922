//! Providers module - the LLM gateway seam.
//!
//! Defines the `LLMProvider` trait the agent loop talks to, the
//! OpenAI-compatible gateway client, and the helpers that turn gateway
//! failures into typed [`ProviderError`]s.

pub mod error_classifier;
pub mod openai;
pub mod retry;
mod types;

use crate::error::ProviderError;

pub use error_classifier::classify_error_message;
pub use openai::OpenAICompatProvider;
pub use retry::{backoff_delay, compute_delay};
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// Parse an HTTP status code and response body into a structured [`ProviderError`].
///
/// A 400 is refined by its body: gateways report context overflow and
/// malformed tool transcripts as plain bad requests.
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        413 => ProviderError::ContextTooLarge(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 => match classify_error_message(body) {
            refined @ (ProviderError::ContextTooLarge(_) | ProviderError::Format(_)) => refined,
            _ => ProviderError::InvalidRequest(body.to_string()),
        },
        503 => match classify_error_message(body) {
            ProviderError::Overloaded(msg) => ProviderError::Overloaded(msg),
            _ => ProviderError::ServerError(body.to_string()),
        },
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => classify_error_message(&format!("HTTP {}: {}", status, body)),
    }
}
