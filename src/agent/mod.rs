//! Agent module - the execution loop and its supporting state
//!
//! One admitted request becomes one [`ExecutionLoop::run`] call. The loop
//! alternates model turns and tool calls until the model answers in text,
//! recovering from failures through the [`RecoveryLadder`] instead of
//! returning errors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌─────────────┐
//! │   Request   │────>│ ExecutionLoop │────>│ LLMProvider │
//! │  (worker)   │     │               │     │  (gateway)  │
//! └─────────────┘     └───────────────┘     └─────────────┘
//!                       │     │     │
//!                       ▼     ▼     ▼
//!              RateLimiter  guards  ToolExecutor
//! ```

pub mod r#loop;
pub mod recovery;
pub mod transcript;

pub use r#loop::{
    ExecutionLoop, ExecutionOutcome, ExecutionReport, Interrupt, LoopControl, TurnState,
    PARTIAL_PREFIX,
};
pub use recovery::{RecoveryAction, RecoveryLadder};
pub use transcript::{Message, Role, ToolCall, Transcript};

/// Receives human-readable progress from a running execution.
///
/// Called at every tool-call boundary. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, text: &str);
}
