//! Status command handler.

use anyhow::{Context, Result};

use herald::config::Config;
use herald::guard::{BucketKey, RateLimiter};
use herald::routing::ModelTier;

/// Show the effective configuration summary.
pub(crate) fn cmd_status() -> Result<()> {
    let config = Config::load().with_context(|| "Failed to load configuration")?;

    println!("Herald Status");
    println!("=============");
    println!();

    let config_path = Config::path();
    println!(
        "Config:     {} {}",
        config_path.display(),
        if config_path.exists() { "" } else { "(defaults)" }
    );
    println!("Gateway:    {}", config.gateway.api_base);
    println!(
        "API key:    {}",
        if config.gateway.api_key.is_some() { "set" } else { "not set" }
    );
    println!(
        "Tools:      {}",
        config
            .tool_service
            .base_url
            .as_deref()
            .unwrap_or("local only")
    );
    println!();

    println!("Queue");
    println!("-----");
    println!("  Workers:            {}", config.queue.workers);
    println!("  Per-workspace cap:  {}", config.queue.workspace_slot_cap());
    println!(
        "  Busy / max depth:   {} / {}",
        config.queue.busy_depth, config.queue.max_depth
    );
    println!(
        "  Lane weights:       high={} normal={} low={}",
        config.queue.weights.high, config.queue.weights.normal, config.queue.weights.low
    );
    println!(
        "  Background tasks:   {} per workspace, {}s deadline",
        config.tasks.max_running_per_workspace, config.tasks.timeout_secs
    );
    println!();

    println!("Models");
    println!("------");
    for tier in ModelTier::all() {
        let spec = config.models.spec_for(tier);
        println!(
            "  {:<9} {:<20} {:>9} tokens",
            tier.as_str(),
            spec.model,
            spec.context_window
        );
    }
    println!();

    println!("Rate limits (max wait {}ms)", config.rate_limits.max_wait_ms);
    println!("-----------");
    let limiter = RateLimiter::new(&config.rate_limits);
    for key in BucketKey::all() {
        println!("  {:<16} {:>6.0} tokens", key.to_string(), limiter.available(key));
    }
    println!();

    println!(
        "Health:     {}",
        if config.health.enabled {
            format!("http://{}:{}/health", config.health.host, config.health.port)
        } else {
            "disabled".to_string()
        }
    );
    Ok(())
}
