//! Tools module - the tool execution seam.
//!
//! The agent loop calls tools only through [`ToolExecutor`]. Tool identity is
//! a string key: it selects the rate-limit bucket, the idempotency class, and
//! the remote endpoint, nothing more.
//!
//! # Overview
//!
//! - `ToolExecutor`: `call_tool(name, params, ctx)` plus the catalogue sent to the model
//! - `ToolRegistry`: in-process `Tool` implementations
//! - `RemoteToolExecutor`: HTTP tool service
//! - `ToolCategory`: read / write / code execution / compute, from an explicit verb table

mod registry;
pub mod remote;
mod types;

pub use registry::ToolRegistry;
pub use remote::RemoteToolExecutor;
pub use types::{Tool, ToolCategory, ToolContext, ToolOutput};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::providers::ToolDefinition;

/// Executes tool calls on behalf of the agent loop.
///
/// `Err` is reserved for failures of the execution layer itself (network,
/// upstream 5xx, rate limits). A tool that ran and reported a problem
/// returns `Ok` with [`ToolOutput::error`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call_tool(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Tool catalogue offered to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Side-effect class of a tool. Defaults to the verb table.
    fn category(&self, name: &str) -> ToolCategory {
        ToolCategory::classify(name)
    }
}

/// Echoes its `message` argument. Useful for wiring checks.
///
/// # Example
///
/// ```rust
/// use herald::tools::{EchoTool, Tool, ToolContext};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let out = EchoTool.execute(json!({"message": "Hello"}), &ToolContext::new()).await.unwrap();
/// assert_eq!(out.for_llm, "Hello");
/// # });
/// ```
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        Ok(ToolOutput::user_visible(message))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_tool_execute() {
        let out = EchoTool
            .execute(json!({"message": "Hello, World!"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(out.for_llm, "Hello, World!");
        assert_eq!(out.for_user.as_deref(), Some("Hello, World!"));
    }

    #[tokio::test]
    async fn test_echo_tool_execute_no_message() {
        let out = EchoTool
            .execute(json!({}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(out.for_llm, "(no message)");
    }

    #[test]
    fn test_echo_tool_is_read() {
        assert_eq!(EchoTool.category(), ToolCategory::Read);
        assert!(EchoTool.parameters()["properties"]["message"].is_object());
    }
}
