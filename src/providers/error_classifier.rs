//! Pattern-based classification of gateway error messages.
//!
//! Checks patterns in priority order: billing, auth, context length, rate
//! limit, overloaded, timeout, format. Falls back to `Unknown`.

use crate::error::ProviderError;

/// Classify an error message string into a `ProviderError`.
pub fn classify_error_message(msg: &str) -> ProviderError {
    let lower = msg.to_lowercase();

    // Billing before auth: 402 bodies often mention the account
    if contains_any(
        &lower,
        &[
            "402",
            "payment required",
            "insufficient credits",
            "credit balance",
            "insufficient balance",
            "billing",
        ],
    ) {
        return ProviderError::Billing(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "invalid_api_key",
            "invalid api key",
            "incorrect api key",
            "invalid token",
            "authentication",
            "unauthorized",
            "forbidden",
            "access denied",
            "token has expired",
            "401",
            "403",
            "no api key found",
        ],
    ) {
        return ProviderError::Auth(msg.to_string());
    }

    // Context length before rate limit: "maximum context length ... tokens" can mention limits
    if contains_any(
        &lower,
        &[
            "context_length_exceeded",
            "maximum context length",
            "context window",
            "prompt is too long",
            "too many tokens",
            "request too large",
            "payload too large",
            "413",
        ],
    ) {
        return ProviderError::ContextTooLarge(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "rate_limit",
            "rate limit",
            "too many requests",
            "429",
            "exceeded your current quota",
            "resource has been exhausted",
            "resource_exhausted",
            "quota exceeded",
        ],
    ) {
        return ProviderError::RateLimit(msg.to_string());
    }

    if contains_any(&lower, &["overloaded_error", "overloaded", "capacity"]) {
        return ProviderError::Overloaded(msg.to_string());
    }

    if contains_any(
        &lower,
        &["timeout", "timed out", "deadline exceeded"],
    ) {
        return ProviderError::Timeout(msg.to_string());
    }

    if contains_any(
        &lower,
        &[
            "string should match pattern",
            "tool_call_id",
            "invalid request format",
            "invalid_request_error",
        ],
    ) {
        return ProviderError::Format(msg.to_string());
    }

    ProviderError::Unknown(msg.to_string())
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}
