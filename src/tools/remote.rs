//! HTTP client for an external tool-execution service.
//!
//! The service exposes its catalogue at `GET {base_url}/tools` and runs a
//! tool at `POST {base_url}/tools/{name}/execute` with a body of
//! `{"params": ..., "workspace_id": ...}`. Responses follow
//! `{"successful": bool, "data": ..., "error": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ToolServiceConfig;
use crate::error::{HeraldError, Result};
use crate::providers::ToolDefinition;

use super::{ToolContext, ToolExecutor, ToolOutput};

/// Fallback wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    successful: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

/// [`ToolExecutor`] backed by the remote tool service.
pub struct RemoteToolExecutor {
    base_url: String,
    api_key: Option<String>,
    client: Client,
    definitions: Vec<ToolDefinition>,
}

impl RemoteToolExecutor {
    /// Create an executor with an empty catalogue.
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            client,
            definitions: Vec::new(),
        })
    }

    /// Build from config and fetch the tool catalogue.
    pub async fn connect(config: &ToolServiceConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            HeraldError::Config("tool_service.base_url is not set".to_string())
        })?;
        let mut executor = Self::new(
            base_url,
            config.api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )?;
        executor.refresh().await?;
        Ok(executor)
    }

    /// Re-fetch the tool catalogue.
    pub async fn refresh(&mut self) -> Result<usize> {
        let response = self
            .authorized(self.client.get(format!("{}/tools", self.base_url)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HeraldError::ToolExecution(format!(
                "tool catalogue request failed ({}): {}",
                status, body
            )));
        }
        let catalog: CatalogResponse = response.json().await?;
        self.definitions = catalog.tools;
        info!(base_url = %self.base_url, tools = self.definitions.len(), "Loaded remote tool catalogue");
        Ok(self.definitions.len())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

fn execute_url(base_url: &str, tool: &str) -> String {
    format!("{}/tools/{}/execute", base_url, tool)
}

/// Turn a service response body into a tool result.
fn convert_execute_response(response: ExecuteResponse) -> ToolOutput {
    if response.successful {
        let text = match response.data {
            Value::String(s) => s,
            Value::Null => "(no output)".to_string(),
            other => other.to_string(),
        };
        ToolOutput::llm_only(text)
    } else {
        ToolOutput::error(
            response
                .error
                .unwrap_or_else(|| "tool reported failure without detail".to_string()),
        )
    }
}

fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1_000))
        .unwrap_or(DEFAULT_RETRY_AFTER_MS)
}

#[async_trait]
impl ToolExecutor for RemoteToolExecutor {
    async fn call_tool(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let body = ExecuteRequest {
            params: &params,
            workspace_id: ctx.workspace_id.as_deref(),
            trace_id: ctx.trace_id.as_deref(),
        };
        debug!(tool = name, "Remote tool call");

        let response = self
            .authorized(self.client.post(execute_url(&self.base_url, name)))
            .json(&body)
            .send()
            .await
            .map_err(|e| HeraldError::ToolExecution(format!("{}: {}", name, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = retry_after_ms(response.headers());
            warn!(tool = name, retry_after_ms, "Tool service rate limited");
            return Err(HeraldError::RateLimited {
                bucket: format!("tool:{}", name),
                retry_after_ms,
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(ToolOutput::error(format!("Tool not found: {}", name)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HeraldError::ToolExecution(format!(
                "{} failed ({}): {}",
                name, status, text
            )));
        }

        let parsed: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| HeraldError::ToolExecution(format!("{}: bad response: {}", name, e)))?;
        Ok(convert_execute_response(parsed))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}
