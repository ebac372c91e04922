//! Configuration type definitions for Herald
//!
//! Every struct implements serde traits for JSON and carries the documented
//! defaults, so a partial (or missing) config file is always valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::routing::ModelTier;

/// Main configuration struct for Herald
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backing model per tier
    pub models: ModelsConfig,
    /// Fast-path and intent router thresholds
    pub routing: RoutingConfig,
    /// Priority request queue and worker pool
    pub queue: QueueConfig,
    /// Token bucket overrides and bounded wait
    pub rate_limits: RateLimitConfig,
    /// Background task manager limits
    pub tasks: TasksConfig,
    /// Agent execution loop budgets
    pub agent: AgentConfig,
    /// LLM gateway client
    pub gateway: GatewayConfig,
    /// Remote tool execution service
    pub tool_service: ToolServiceConfig,
    /// Health endpoint
    pub health: HealthConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// Models
// ============================================================================

/// A backing model and the size of its context window in tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    pub context_window: usize,
}

impl ModelSpec {
    pub fn new(model: &str, context_window: usize) -> Self {
        Self {
            model: model.to_string(),
            context_window,
        }
    }
}

/// Model identifiers for each tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub fast: ModelSpec,
    pub default: ModelSpec,
    pub code: ModelSpec,
    pub frontier: ModelSpec,
    pub heavy: ModelSpec,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: ModelSpec::new("gpt-4o-mini", 32_000),
            default: ModelSpec::new("gpt-4o", 128_000),
            code: ModelSpec::new("gpt-4.1", 200_000),
            frontier: ModelSpec::new("o3", 200_000),
            heavy: ModelSpec::new("gpt-4.1-long", 1_000_000),
        }
    }
}

impl ModelsConfig {
    /// Model spec backing the given tier.
    pub fn spec_for(&self, tier: ModelTier) -> &ModelSpec {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Default => &self.default,
            ModelTier::Code => &self.code,
            ModelTier::Frontier => &self.frontier,
            ModelTier::Heavy => &self.heavy,
        }
    }

    /// Model identifier backing the given tier.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        &self.spec_for(tier).model
    }

    /// Context window of the given tier in tokens.
    pub fn context_window(&self, tier: ModelTier) -> usize {
        self.spec_for(tier).context_window
    }

    fn spec_for_mut(&mut self, tier: ModelTier) -> &mut ModelSpec {
        match tier {
            ModelTier::Fast => &mut self.fast,
            ModelTier::Default => &mut self.default,
            ModelTier::Code => &mut self.code,
            ModelTier::Frontier => &mut self.frontier,
            ModelTier::Heavy => &mut self.heavy,
        }
    }

    pub(crate) fn set_model(&mut self, tier: ModelTier, model: String) {
        self.spec_for_mut(tier).model = model;
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Messages longer than this (in characters) route to the frontier tier.
    pub frontier_length_threshold: usize,
    /// Messages longer than this are never fast-pathed.
    pub fast_path_max_len: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            frontier_length_threshold: 600,
            fast_path_max_len: 80,
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Dispatch credits per lane in one weighted round-robin cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneWeights {
    pub high: u32,
    pub normal: u32,
    pub low: u32,
}

impl Default for LaneWeights {
    fn default() -> Self {
        Self {
            high: 4,
            normal: 2,
            low: 1,
        }
    }
}

impl LaneWeights {
    /// Total dispatches in one full cycle.
    pub fn cycle_len(&self) -> u32 {
        self.high + self.normal + self.low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Total queued requests above which `enqueue` rejects.
    pub max_depth: usize,
    /// Total queued requests at which the queue reports itself busy.
    pub busy_depth: usize,
    /// Largest fraction of worker slots one workspace may hold at once.
    pub workspace_fraction: f64,
    /// Weighted round-robin credits.
    pub weights: LaneWeights,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_depth: 200,
            busy_depth: 50,
            workspace_fraction: 0.5,
            weights: LaneWeights::default(),
        }
    }
}

impl QueueConfig {
    /// In-flight cap per workspace: `ceil(workers * fraction)`, at least 1.
    pub fn workspace_slot_cap(&self) -> usize {
        let cap = (self.workers as f64 * self.workspace_fraction).ceil() as usize;
        cap.clamp(1, self.workers.max(1))
    }
}

// ============================================================================
// Rate limits
// ============================================================================

/// Size and refill rate of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl BucketConfig {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Longest `acquire` may wait before reporting rate-limited.
    pub max_wait_ms: u64,
    /// Per-bucket overrides keyed like `model:code` or `api:calendar`.
    /// Buckets without an entry use built-in defaults.
    pub buckets: HashMap<String, BucketConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 5_000,
            buckets: HashMap::new(),
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Non-terminal background tasks allowed per workspace.
    pub max_running_per_workspace: usize,
    /// Wall-clock deadline of a background task.
    pub timeout_secs: u64,
    /// How long terminal tasks stay queryable.
    pub retention_secs: u64,
    /// Interval between garbage-collection sweeps.
    pub gc_interval_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_running_per_workspace: 5,
            timeout_secs: 600,
            retention_secs: 3_600,
            gc_interval_secs: 60,
        }
    }
}

// ============================================================================
// Agent loop
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on model turns per execution.
    pub max_turns: u32,
    /// Identical tool calls allowed before the next one is suppressed.
    pub max_tool_repeats: u32,
    /// Window in which an identical mutating call is treated as a duplicate.
    pub dedup_window_ms: u64,
    /// Most recent tool results kept intact when trimming the transcript.
    pub keep_recent_tool_results: usize,
    /// Silent retries before the ladder moves to a tier change.
    pub max_retries: u32,
    /// Base backoff between retries.
    pub retry_base_ms: u64,
    /// Backoff cap.
    pub retry_max_ms: u64,
    /// Completion token cap per model call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// System message prepended to every execution.
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            max_tool_repeats: 3,
            dedup_window_ms: 5_000,
            keep_recent_tool_results: 2,
            max_retries: 3,
            retry_base_ms: 500,
            retry_max_ms: 8_000,
            max_tokens: 4_096,
            temperature: 0.3,
            system_prompt: "You are a workspace assistant. Use the available tools when a request needs external data.".to_string(),
        }
    }
}

// ============================================================================
// External services
// ============================================================================

/// OpenAI-compatible LLM gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// Remote tool execution service. Unset `base_url` means local tools only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServiceConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ToolServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// Compact single-line text, grep-friendly
    #[default]
    Component,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Append JSON logs to this file instead of stdout.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Component,
            file: None,
        }
    }
}
