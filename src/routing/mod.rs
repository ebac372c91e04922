//! Request routing: fast path, intent classification, tiers and priorities.
//!
//! Everything here is pure and synchronous so it can run on every inbound
//! message ahead of the queue.

mod fast_path;
mod intent;
mod tier;

pub use fast_path::{ConversationContext, FastPathEvaluator, FastPathReason, FastPathResult};
pub use intent::{Classification, IntentRouter, RoutingSignals};
pub use tier::{ModelTier, Priority};
