//! Configuration management for Herald
//!
//! Configuration is loaded from `~/.herald/config.json` with environment
//! variable overrides of the form `HERALD_SECTION_KEY`.

mod types;
pub mod validate;

pub use types::*;

use crate::error::Result;
use crate::routing::ModelTier;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Herald configuration directory path (~/.herald)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".herald")
    }

    /// Returns the path to the config file (~/.herald/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Values that fail to parse are ignored and the file/default value stays.
    fn apply_env_overrides(&mut self) {
        // Models
        for tier in ModelTier::all() {
            let key = format!("HERALD_MODELS_{}_MODEL", tier.as_str().to_uppercase());
            if let Ok(val) = std::env::var(&key) {
                self.models.set_model(tier, val);
            }
        }

        // Queue
        if let Ok(val) = std::env::var("HERALD_QUEUE_WORKERS") {
            if let Ok(v) = val.parse() {
                self.queue.workers = v;
            }
        }
        if let Ok(val) = std::env::var("HERALD_QUEUE_MAX_DEPTH") {
            if let Ok(v) = val.parse() {
                self.queue.max_depth = v;
            }
        }
        if let Ok(val) = std::env::var("HERALD_QUEUE_BUSY_DEPTH") {
            if let Ok(v) = val.parse() {
                self.queue.busy_depth = v;
            }
        }
        if let Ok(val) = std::env::var("HERALD_QUEUE_WORKSPACE_FRACTION") {
            if let Ok(v) = val.parse() {
                self.queue.workspace_fraction = v;
            }
        }

        // Rate limits
        if let Ok(val) = std::env::var("HERALD_RATE_LIMITS_MAX_WAIT_MS") {
            if let Ok(v) = val.parse() {
                self.rate_limits.max_wait_ms = v;
            }
        }

        // Tasks
        if let Ok(val) = std::env::var("HERALD_TASKS_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.tasks.timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("HERALD_TASKS_MAX_RUNNING_PER_WORKSPACE") {
            if let Ok(v) = val.parse() {
                self.tasks.max_running_per_workspace = v;
            }
        }

        // Agent
        if let Ok(val) = std::env::var("HERALD_AGENT_MAX_TURNS") {
            if let Ok(v) = val.parse() {
                self.agent.max_turns = v;
            }
        }

        // Gateway
        if let Ok(val) = std::env::var("HERALD_GATEWAY_API_BASE") {
            self.gateway.api_base = val;
        }
        if let Ok(val) = std::env::var("HERALD_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(val);
        }

        // Tool service
        if let Ok(val) = std::env::var("HERALD_TOOL_SERVICE_BASE_URL") {
            self.tool_service.base_url = Some(val);
        }
        if let Ok(val) = std::env::var("HERALD_TOOL_SERVICE_API_KEY") {
            self.tool_service.api_key = Some(val);
        }

        // Health
        if let Ok(val) = std::env::var("HERALD_HEALTH_ENABLED") {
            if let Ok(v) = val.parse() {
                self.health.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("HERALD_HEALTH_PORT") {
            if let Ok(v) = val.parse() {
                self.health.port = v;
            }
        }

        // Logging
        if let Ok(val) = std::env::var("HERALD_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }
}
