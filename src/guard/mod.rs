//! Guards that sit between the agent loop and the outside world.
//!
//! - [`RateLimiter`]: token buckets per model tier and external API family
//! - [`MutationDeduper`]: blocks identical mutating calls inside a short window
//! - [`RepeatDetector`]: suppresses the same call repeated within one execution

pub mod idempotency;
pub mod loop_detect;
pub mod rate_limit;

pub use idempotency::MutationDeduper;
pub use loop_detect::{RepeatDetector, RepeatVerdict, REPEAT_CORRECTION};
pub use rate_limit::{classify_api_from_tool, ApiFamily, BucketKey, RateLimiter, TokenBucket};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable fingerprint of a tool call.
///
/// `serde_json` objects keep keys sorted, so argument order does not matter.
pub fn call_fingerprint(tool: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0u8]);
    hasher.update(params.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = call_fingerprint("send_email", &json!({"to": "x", "body": "y"}));
        let b = call_fingerprint("send_email", &json!({"body": "y", "to": "x"}));
        let c = call_fingerprint("send_slack", &json!({"body": "y", "to": "x"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
