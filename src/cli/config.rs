//! Config show/check command handlers.

use anyhow::{Context, Result};

use herald::config::validate::{validate_config, validate_semantics, DiagnosticLevel};
use herald::config::Config;

use super::ConfigAction;

pub(crate) fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load().with_context(|| "Failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
        }
        ConfigAction::Check => cmd_check()?,
    }
    Ok(())
}

/// Effective config with secrets masked.
fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if config.gateway.api_key.is_some() {
        config.gateway.api_key = Some("***".to_string());
    }
    if config.tool_service.api_key.is_some() {
        config.tool_service.api_key = Some("***".to_string());
    }
    config
}

fn cmd_check() -> Result<()> {
    let config_path = Config::path();
    println!("Config file: {}", config_path.display());

    let mut diagnostics = Vec::new();
    if config_path.exists() {
        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let raw: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                println!("[ERROR] Invalid JSON: {}", e);
                return Ok(());
            }
        };
        diagnostics.extend(validate_config(&raw));
    } else {
        println!("[OK] No config file found (using defaults)");
    }

    let config = Config::load().with_context(|| "Failed to load configuration")?;
    diagnostics.extend(validate_semantics(&config));

    for diag in &diagnostics {
        println!("{}", diag);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count();
    let warnings = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Warn)
        .count();

    if errors == 0 && warnings == 0 {
        println!("\nConfiguration looks good!");
    } else {
        println!("\nFound {} error(s), {} warning(s)", errors, warnings);
    }
    Ok(())
}
