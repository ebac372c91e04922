//! OpenAI-compatible chat completions gateway.
//!
//! Any endpoint that speaks the `/chat/completions` wire format works: the
//! hosted OpenAI API, an internal LLM proxy, or a local model server. One
//! provider instance serves every tier; the agent loop picks the model id.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::agent::Message;
//! use herald::providers::{ChatOptions, LLMProvider, OpenAICompatProvider};
//!
//! async fn example() {
//!     let provider = OpenAICompatProvider::new("sk-xxx", "https://llm-proxy.internal/v1");
//!     let response = provider
//!         .chat(vec![Message::user("Hello!")], vec![], Some("gpt-4o-mini"), ChatOptions::new())
//!         .await
//!         .unwrap();
//!     println!("{}", response.content);
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{Message, Role};
use crate::config::GatewayConfig;
use crate::error::{HeraldError, ProviderError, Result};

use super::{
    parse_provider_error, ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition,
    Usage,
};

const DEFAULT_MODEL: &str = "gpt-4o";

// ============================================================================
// Wire Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    /// Null for assistant turns that only carry tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCallRequest {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ============================================================================
// Wire Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallResponse>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallResponse {
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

/// Client for an OpenAI-compatible gateway.
pub struct OpenAICompatProvider {
    api_key: String,
    api_base: String,
    client: Client,
}

impl OpenAICompatProvider {
    /// Create a provider for `api_base` (trailing slash removed).
    ///
    /// # Example
    /// ```
    /// use herald::providers::{LLMProvider, OpenAICompatProvider};
    ///
    /// let provider = OpenAICompatProvider::new("sk-xxx", "https://proxy.local/v1/");
    /// assert_eq!(provider.name(), "openai-compat");
    /// ```
    pub fn new(api_key: &str, api_base: &str) -> Self {
        Self::with_client(api_key, api_base, Client::new())
    }

    /// Create a provider with a custom HTTP client (timeouts, proxies).
    pub fn with_client(api_key: &str, api_base: &str, client: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Build from the `gateway` config section.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            HeraldError::Config(
                "gateway.api_key is not set (HERALD_GATEWAY_API_KEY)".to_string(),
            )
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(api_key, &config.api_base, client))
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };

            let tool_calls = msg.tool_calls.map(|tcs| {
                tcs.into_iter()
                    .map(|tc| WireToolCallRequest {
                        id: tc.id,
                        r#type: "function",
                        function: WireFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect::<Vec<_>>()
            });

            WireMessage {
                role,
                content: if msg.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(msg.content)
                },
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<WireTool> {
    tools
        .into_iter()
        .map(|t| WireTool {
            r#type: "function",
            function: WireFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

fn convert_response(response: ChatResponse) -> LLMResponse {
    let (content, tool_calls) = match response.choices.into_iter().next() {
        Some(choice) => {
            let calls: Vec<LLMToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| LLMToolCall::new(&tc.id, &tc.function.name, &tc.function.arguments))
                .collect();
            (choice.message.content.unwrap_or_default(), calls)
        }
        None => (String::new(), Vec::new()),
    };

    let llm_response = LLMResponse::with_tools(&content, tool_calls);
    match response.usage {
        Some(u) => llm_response.with_usage(Usage::new(u.prompt_tokens, u.completion_tokens)),
        None => llm_response,
    }
}

/// Map a transport failure onto the provider taxonomy.
fn transport_error(err: reqwest::Error) -> HeraldError {
    let pe = if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_connect() {
        ProviderError::ServerError(format!("connection failed: {}", err))
    } else {
        ProviderError::Unknown(err.to_string())
    };
    HeraldError::ProviderTyped(pe)
}

/// Prefer the structured error message when the body has one.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<WireErrorResponse>(body) {
        Ok(parsed) => match parsed.error.code {
            Some(code) => format!("{} ({})", parsed.error.message, code),
            None => parsed.error.message,
        },
        Err(_) => body.to_string(),
    }
}

// ============================================================================
// LLMProvider Implementation
// ============================================================================

#[async_trait]
impl LLMProvider for OpenAICompatProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.unwrap_or(DEFAULT_MODEL);
        let request = ChatRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            tools: if tools.is_empty() {
                None
            } else {
                Some(convert_tools(tools))
            },
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop: options.stop,
        };

        debug!(model = model, messages = request.messages.len(), "Gateway request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = error_detail(&body);
            return Err(parse_provider_error(status.as_u16(), &detail).into());
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            HeraldError::ProviderTyped(ProviderError::Format(format!(
                "unparsable gateway response: {}",
                e
            )))
        })?;

        let converted = convert_response(parsed);
        debug!(
            model = model,
            tool_calls = converted.tool_calls.len(),
            total_tokens = converted.usage.map(|u| u.total_tokens).unwrap_or(0),
            "Gateway response"
        );
        Ok(converted)
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "openai-compat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolCall;

    #[test]
    fn test_provider_trims_base() {
        let provider = OpenAICompatProvider::new("k", "https://proxy.local/v1/");
        assert_eq!(provider.api_base(), "https://proxy.local/v1");
        assert_eq!(provider.default_model(), "gpt-4o");
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = GatewayConfig::default();
        assert!(matches!(
            OpenAICompatProvider::from_config(&config),
            Err(HeraldError::Config(_))
        ));

        let config = GatewayConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(OpenAICompatProvider::from_config(&config).is_ok());
    }

    #[test]
    fn test_convert_messages_with_tool_calls() {
        let messages = vec![
            Message::user("find it"),
            Message::assistant_with_tools("", vec![ToolCall::new("call_1", "search", "{}")]),
            Message::tool_result("call_1", "found"),
        ];
        let converted = convert_messages(messages);

        assert_eq!(converted[0].role, "user");
        assert!(converted[1].content.is_none());
        assert_eq!(converted[1].tool_calls.as_ref().unwrap()[0].r#type, "function");
        assert_eq!(converted[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_request_omits_empty_optionals() {
        let request = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: convert_messages(vec![Message::user("hi")]),
            tools: None,
            max_tokens: Some(256),
            temperature: None,
            stop: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("max_tokens"));
        assert!(!json.contains("tools"));
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn test_convert_tools() {
        let tools = vec![ToolDefinition::new(
            "search",
            "Search the web",
            serde_json::json!({"type": "object"}),
        )];
        let json = serde_json::to_value(convert_tools(tools)).unwrap();
        assert_eq!(json[0]["type"], "function");
        assert_eq!(json[0]["function"]["name"], "search");
    }

    #[test]
    fn test_convert_response_tool_calls_and_usage() {
        let body = r#"{
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "call_9", "type": "function", "function": {"name": "calendar_list_events", "arguments": "{\"day\":\"today\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let response = convert_response(parsed);

        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls[0].name, "calendar_list_events");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_convert_response_empty_choices() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let response = convert_response(parsed);
        assert!(response.content.is_empty());
        assert!(!response.has_tool_calls());
    }

    #[test]
    fn test_error_detail_prefers_structured_message() {
        let body = r#"{"error": {"message": "maximum context length exceeded", "code": "context_length_exceeded"}}"#;
        assert_eq!(
            error_detail(body),
            "maximum context length exceeded (context_length_exceeded)"
        );
        assert_eq!(error_detail("plain text"), "plain text");
    }

    #[test]
    fn test_context_error_body_maps_to_overflow() {
        let body = r#"{"error": {"message": "too long", "code": "context_length_exceeded"}}"#;
        let err: HeraldError = parse_provider_error(400, &error_detail(body)).into();
        assert!(err.is_context_overflow());
    }
}
