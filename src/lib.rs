//! Herald - conversational agent orchestration core
//!
//! Inbound chat messages pass a fast path, get a model tier and priority from
//! the intent router, wait in a weighted priority queue, and run on a worker
//! pool through the agent execution loop. Long jobs become background tasks
//! with status, cancellation and deadlines.

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod guard;
pub mod health;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod routing;
pub mod tasks;
pub mod tools;
pub mod utils;

pub use agent::{ExecutionLoop, ExecutionOutcome, ExecutionReport, LoopControl, ProgressSink};
pub use bus::{Delivery, DeliveryPayload, InboundMessage, MessageBus, OutboundMessage, ThreadRef};
pub use config::Config;
pub use error::{HeraldError, ProviderError, Result};
pub use guard::{BucketKey, RateLimiter};
pub use orchestrator::{InboundOutcome, Orchestrator};
pub use providers::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};
pub use queue::{Request, RequestQueue, Ticket};
pub use routing::{Classification, FastPathEvaluator, IntentRouter, ModelTier, Priority};
pub use tasks::{Task, TaskManager, TaskState, TaskStatus};
pub use tools::{ToolCategory, ToolExecutor, ToolOutput};
