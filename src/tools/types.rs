//! Tool types for Herald
//!
//! The `Tool` trait for in-process tools, the `ToolOutput` returned by every
//! executor, the `ToolContext` passed alongside each call, and the
//! `ToolCategory` table that decides idempotency and heaviness.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// ToolCategory
// ============================================================================

/// What a tool does to the outside world.
///
/// Drives two decisions in the agent loop: whether identical calls may be
/// re-issued (`is_idempotent`) and whether the loop should move to a
/// code-capable tier (`is_heavy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Read-only lookups: list, search, fetch.
    Read,
    /// Anything with side effects: create, send, update, delete.
    Write,
    /// Runs user or model supplied code.
    CodeExecution,
    /// Expensive computation without external side effects.
    Compute,
}

/// Verb table for [`ToolCategory::classify`]. Checked in order per name segment,
/// so code and compute verbs win over read verbs ("run_query" executes code).
const VERB_TABLE: &[(&str, ToolCategory)] = &[
    ("run", ToolCategory::CodeExecution),
    ("execute", ToolCategory::CodeExecution),
    ("exec", ToolCategory::CodeExecution),
    ("eval", ToolCategory::CodeExecution),
    ("sandbox", ToolCategory::CodeExecution),
    ("interpreter", ToolCategory::CodeExecution),
    ("compute", ToolCategory::Compute),
    ("analyze", ToolCategory::Compute),
    ("render", ToolCategory::Compute),
    ("transcode", ToolCategory::Compute),
    ("send", ToolCategory::Write),
    ("create", ToolCategory::Write),
    ("update", ToolCategory::Write),
    ("delete", ToolCategory::Write),
    ("post", ToolCategory::Write),
    ("get", ToolCategory::Read),
    ("list", ToolCategory::Read),
    ("read", ToolCategory::Read),
    ("search", ToolCategory::Read),
    ("fetch", ToolCategory::Read),
    ("find", ToolCategory::Read),
    ("query", ToolCategory::Read),
];

impl ToolCategory {
    pub fn all() -> [ToolCategory; 4] {
        [
            ToolCategory::Read,
            ToolCategory::Write,
            ToolCategory::CodeExecution,
            ToolCategory::Compute,
        ]
    }

    /// Classify a tool by the verbs in its name.
    ///
    /// Names are split on `_`, `-`, `.` and spaces. Unknown names are
    /// treated as `Write` so an unrecognised tool is never re-issued blindly.
    ///
    /// # Example
    /// ```
    /// use herald::tools::ToolCategory;
    ///
    /// assert_eq!(ToolCategory::classify("GOOGLECALENDAR_LIST_EVENTS"), ToolCategory::Read);
    /// assert_eq!(ToolCategory::classify("gmail_send_email"), ToolCategory::Write);
    /// assert_eq!(ToolCategory::classify("code_sandbox_run"), ToolCategory::CodeExecution);
    /// assert_eq!(ToolCategory::classify("mystery"), ToolCategory::Write);
    /// ```
    pub fn classify(tool_name: &str) -> ToolCategory {
        let lower = tool_name.to_lowercase();
        let segments: Vec<&str> = lower
            .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect();

        VERB_TABLE
            .iter()
            .find(|(verb, _)| segments.iter().any(|s| s == verb))
            .map(|(_, category)| *category)
            .unwrap_or(ToolCategory::Write)
    }

    /// Safe to re-issue with identical parameters.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, ToolCategory::Read)
    }

    /// Calls that justify moving the execution to a code-capable tier.
    pub fn is_heavy(&self) -> bool {
        matches!(self, ToolCategory::CodeExecution | ToolCategory::Compute)
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::CodeExecution => write!(f, "code_execution"),
            Self::Compute => write!(f, "compute"),
        }
    }
}

// ============================================================================
// ToolOutput
// ============================================================================

/// Dual-audience tool result.
///
/// `for_llm` goes back into the transcript. `for_user` is set when the tool
/// produced something worth showing directly, such as a generated file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub for_llm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_user: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// LLM-only result. User sees nothing.
    pub fn llm_only(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            is_error: false,
        }
    }

    /// Both LLM and user see the same content.
    pub fn user_visible(content: impl Into<String>) -> Self {
        let s = content.into();
        Self {
            for_llm: s.clone(),
            for_user: Some(s),
            is_error: false,
        }
    }

    /// Error result. The model sees the error text and can try something else.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            is_error: true,
        }
    }

    /// Different content for the model and the user.
    pub fn split(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            for_user: Some(for_user.into()),
            is_error: false,
        }
    }
}

// ============================================================================
// Tool trait and context
// ============================================================================

/// An in-process tool.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use herald::tools::{Tool, ToolContext, ToolOutput};
/// use herald::error::Result;
///
/// struct ListEvents;
///
/// #[async_trait]
/// impl Tool for ListEvents {
///     fn name(&self) -> &str { "calendar_list_events" }
///     fn description(&self) -> &str { "List today's calendar events" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}})
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::llm_only("09:00 standup"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry; also the rate-limit and dedup key.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Defaults to the verb table; override when the name is misleading.
    fn category(&self) -> ToolCategory {
        ToolCategory::classify(self.name())
    }
}

/// Who a tool call is running for.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolContext {
    pub workspace_id: Option<String>,
    pub channel: Option<String>,
    pub thread_ts: Option<String>,
    pub trace_id: Option<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace_id: &str) -> Self {
        self.workspace_id = Some(workspace_id.to_string());
        self
    }

    /// Set the channel and, optionally, the thread.
    ///
    /// # Example
    /// ```
    /// use herald::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_channel("C123", Some("1700.5"));
    /// assert_eq!(ctx.channel.as_deref(), Some("C123"));
    /// ```
    pub fn with_channel(mut self, channel: &str, thread_ts: Option<&str>) -> Self {
        self.channel = Some(channel.to_string());
        self.thread_ts = thread_ts.map(str::to_string);
        self
    }

    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_verb_table() {
        let cases = [
            ("calendar_list_events", ToolCategory::Read),
            ("GOOGLESHEETS_GET_VALUES", ToolCategory::Read),
            ("web_search", ToolCategory::Read),
            ("gmail_send_email", ToolCategory::Write),
            ("sheets_update_values", ToolCategory::Write),
            ("deploy_script", ToolCategory::Write),
            ("code_sandbox_run", ToolCategory::CodeExecution),
            ("run_query", ToolCategory::CodeExecution),
            ("python-exec", ToolCategory::CodeExecution),
            ("image_render", ToolCategory::Compute),
            ("", ToolCategory::Write),
        ];
        for (name, expected) in cases {
            assert_eq!(ToolCategory::classify(name), expected, "tool {}", name);
        }
    }

    #[test]
    fn test_verbs_match_whole_segments_only() {
        // "gettysburg" contains "get" but is not a verb segment
        assert_eq!(ToolCategory::classify("gettysburg_notes"), ToolCategory::Write);
        assert_eq!(ToolCategory::classify("runbook_publish"), ToolCategory::Write);
    }

    #[test]
    fn test_category_flags() {
        assert!(ToolCategory::Read.is_idempotent());
        assert!(!ToolCategory::Write.is_idempotent());
        assert!(!ToolCategory::CodeExecution.is_idempotent());
        assert!(ToolCategory::CodeExecution.is_heavy());
        assert!(ToolCategory::Compute.is_heavy());
        assert!(!ToolCategory::Read.is_heavy());
    }

    #[test]
    fn test_tool_output_constructors() {
        let out = ToolOutput::user_visible("done");
        assert_eq!(out.for_user.as_deref(), Some("done"));
        assert!(!out.is_error);

        let out = ToolOutput::error("boom");
        assert!(out.is_error);
        assert!(out.for_user.is_none());

        let out = ToolOutput::split("{\"rows\": 42}", "42 rows synced");
        assert_ne!(Some(out.for_llm.as_str()), out.for_user.as_deref());
    }

    #[test]
    fn test_tool_output_deserializes_minimal() {
        let out: ToolOutput = serde_json::from_str(r#"{"for_llm": "ok"}"#).unwrap();
        assert_eq!(out, ToolOutput::llm_only("ok"));
    }

    #[test]
    fn test_context_builder() {
        let ctx = ToolContext::new()
            .with_workspace("T1")
            .with_channel("C1", None)
            .with_trace_id("abc");
        assert_eq!(ctx.workspace_id.as_deref(), Some("T1"));
        assert!(ctx.thread_ts.is_none());
        assert_eq!(ctx.trace_id.as_deref(), Some("abc"));
    }
}
