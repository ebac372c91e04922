//! Conversation transcript for one execution.
//!
//! A transcript lives only as long as the execution that owns it. Nothing
//! here is persisted.

use serde::{Deserialize, Serialize};

/// Placeholder left behind when an old tool result is dropped from context.
pub const TRIMMED_PLACEHOLDER: &str = "[trimmed: earlier tool output removed to fit context]";

/// A single message in the model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Call this message answers (tool results only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a user message.
    ///
    /// # Example
    /// ```
    /// use herald::agent::{Message, Role};
    ///
    /// let msg = Message::user("summarize the incident channel");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result answering `tool_call_id`.
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(Role::Assistant, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|tc| !tc.is_empty())
            .unwrap_or(false)
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A tool call recorded in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// Ordered messages for one execution.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Start a transcript with a system prompt and the user's request.
    pub fn new(system_prompt: &str, user_text: &str) -> Self {
        let mut messages = Vec::with_capacity(8);
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.push(Message::user(user_text));
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Rough token estimate (4 characters per token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| {
                let calls: usize = m
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|c| c.name.len() + c.arguments.len())
                    .sum();
                (m.content.len() + calls) / 4 + 4
            })
            .sum()
    }

    /// Replace the content of all but the `keep_recent` most recent tool
    /// results with a placeholder. Returns how many results were trimmed.
    ///
    /// Tool call ids stay in place so the transcript remains well formed.
    pub fn trim_tool_results(&mut self, keep_recent: usize) -> usize {
        let positions: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_tool_result() && m.content != TRIMMED_PLACEHOLDER)
            .map(|(i, _)| i)
            .collect();

        let trim_count = positions.len().saturating_sub(keep_recent);
        for &i in &positions[..trim_count] {
            self.messages[i].content = TRIMMED_PLACEHOLDER.to_string();
        }
        trim_count
    }

    /// Text of the most recent assistant message with content, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }

    /// Contents of every untrimmed tool result, oldest first.
    pub fn tool_outputs(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.is_tool_result() && m.content != TRIMMED_PLACEHOLDER)
            .map(|m| m.content.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::tool_result("call_1", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.is_tool_result());

        let msg = Message::assistant_with_tools("", vec![ToolCall::new("c", "search", "{}")]);
        assert!(msg.has_tool_calls());
        assert!(!Message::assistant("hi").has_tool_calls());
    }

    #[test]
    fn test_transcript_skips_empty_system_prompt() {
        let t = Transcript::new("", "hello");
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].role, Role::User);
    }

    #[test]
    fn test_trim_keeps_most_recent_results() {
        let mut t = Transcript::new("sys", "go");
        for i in 0..4 {
            t.push(Message::assistant_with_tools(
                "",
                vec![ToolCall::new(&format!("c{}", i), "search", "{}")],
            ));
            t.push(Message::tool_result(&format!("c{}", i), &"x".repeat(400)));
        }
        let before = t.estimated_tokens();

        assert_eq!(t.trim_tool_results(2), 2);
        assert!(t.estimated_tokens() < before);
        assert_eq!(t.tool_outputs().len(), 2);
        // Ids survive so the pairing with calls stays valid.
        let ids: Vec<_> = t
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3"]);

        assert_eq!(t.trim_tool_results(2), 0);
    }

    #[test]
    fn test_last_assistant_text() {
        let mut t = Transcript::new("sys", "go");
        assert!(t.last_assistant_text().is_none());
        t.push(Message::assistant("draft answer"));
        t.push(Message::assistant_with_tools("", vec![]));
        assert_eq!(t.last_assistant_text(), Some("draft answer"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(serde_json::to_value(Role::Tool).unwrap(), "tool");
    }
}
