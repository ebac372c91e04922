//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod classify;
pub mod config;
pub mod serve;
pub mod status;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "herald")]
#[command(version)]
#[command(about = "Conversational agent orchestration core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool with a stdin console as the inbound channel
    Serve {
        /// Worker pool size (overrides queue.workers)
        #[arg(long)]
        workers: Option<usize>,
        /// Serve /health and /ready on this port (overrides health.port)
        #[arg(long)]
        health_port: Option<u16>,
    },
    /// Show how a message would be routed, without calling any model
    Classify {
        /// Message text
        text: String,
        /// Treat the message as a reply inside an active thread
        #[arg(long)]
        thread: bool,
    },
    /// Show the effective configuration summary
    Status,
    /// Inspect or validate the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Validate the configuration file
    Check,
}

pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Load config early so the logging settings apply to every command; fall
    // back to defaults if the file is missing or unreadable.
    let logging_cfg = herald::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    herald::utils::logging::init_logging(&logging_cfg)?;

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Serve {
            workers,
            health_port,
        }) => {
            serve::cmd_serve(workers, health_port).await?;
        }
        Some(Commands::Classify { text, thread }) => {
            classify::cmd_classify(&text, thread)?;
        }
        Some(Commands::Status) => {
            status::cmd_status()?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action)?;
        }
        Some(Commands::Version) => {
            println!("herald {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from(["herald", "serve", "--workers", "4", "--health-port", "9191"])
            .unwrap();
        match cli.command {
            Some(Commands::Serve {
                workers,
                health_port,
            }) => {
                assert_eq!(workers, Some(4));
                assert_eq!(health_port, Some(9191));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_classify_thread_flag() {
        let cli = Cli::try_parse_from(["herald", "classify", "hi there", "--thread"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Classify { ref text, thread: true }) if text == "hi there"
        ));
    }
}
