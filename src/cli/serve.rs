//! Serve command handler: worker pool plus a stdin console.
//!
//! Each console line becomes an inbound message for the `local` workspace.
//! `/status <id>`, `/cancel <id>` and `/tasks` query background tasks;
//! `/quit` (or Ctrl+C) shuts down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use herald::bus::{Delivery, InboundMessage, MessageBus, OutboundKind};
use herald::config::Config;
use herald::health::start_health_server;
use herald::orchestrator::Orchestrator;
use herald::providers::{LLMProvider, OpenAICompatProvider};
use herald::tools::{EchoTool, RemoteToolExecutor, ToolExecutor, ToolRegistry};

const CONSOLE_WORKSPACE: &str = "local";
const CONSOLE_CHANNEL: &str = "console";

/// One parsed console line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Message(String),
    Status(String),
    Cancel(String),
    Tasks,
    Quit,
    Empty,
    Usage(&'static str),
}

pub(crate) fn parse_console_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ConsoleCommand::Message(line.to_string());
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    match (cmd, arg.is_empty()) {
        ("status", false) => ConsoleCommand::Status(arg.to_string()),
        ("status", true) => ConsoleCommand::Usage("/status <task-id>"),
        ("cancel", false) => ConsoleCommand::Cancel(arg.to_string()),
        ("cancel", true) => ConsoleCommand::Usage("/cancel <task-id>"),
        ("tasks", _) => ConsoleCommand::Tasks,
        ("quit" | "exit", _) => ConsoleCommand::Quit,
        _ => ConsoleCommand::Message(line.to_string()),
    }
}

/// Start the orchestrator and drive it from stdin until EOF, `/quit` or Ctrl+C.
pub(crate) async fn cmd_serve(workers: Option<usize>, health_port: Option<u16>) -> Result<()> {
    let mut config = Config::load().with_context(|| "Failed to load configuration")?;
    if let Some(n) = workers {
        config.queue.workers = n.max(1);
    }
    if let Some(port) = health_port {
        config.health.enabled = true;
        config.health.port = port;
    }

    let provider: Arc<dyn LLMProvider> = Arc::new(
        OpenAICompatProvider::from_config(&config.gateway)
            .with_context(|| "Failed to create gateway client")?,
    );
    let tools: Arc<dyn ToolExecutor> = match &config.tool_service.base_url {
        Some(url) => {
            info!(url = %url, "Using remote tool service");
            Arc::new(
                RemoteToolExecutor::connect(&config.tool_service)
                    .await
                    .with_context(|| "Failed to connect to tool service")?,
            )
        }
        None => {
            let mut registry = ToolRegistry::new();
            registry.register(Box::new(EchoTool));
            Arc::new(registry)
        }
    };

    let bus = Arc::new(MessageBus::new());
    let delivery: Arc<dyn Delivery> = bus.clone();
    let orch = Arc::new(Orchestrator::new(&config, provider, tools, delivery));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let health_handle = if config.health.enabled {
        match start_health_server(&config.health.host, config.health.port, orch.health_state()).await
        {
            Ok(handle) => {
                info!(port = config.health.port, "Health endpoints available at /health and /ready");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Failed to start health server (non-fatal)");
                None
            }
        }
    } else {
        None
    };

    let services = orch.spawn_background_services(shutdown_rx.clone());
    let workers = orch.spawn_workers(orch.worker_count());
    let bus_handle = {
        let orch = Arc::clone(&orch);
        let bus = Arc::clone(&bus);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { orch.run_bus(bus, rx).await })
    };
    let printer = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(msg) = bus.consume_outbound().await {
                let tag = match msg.kind {
                    OutboundKind::Result => "herald",
                    OutboundKind::Progress => "progress",
                    OutboundKind::Busy => "busy",
                };
                println!("[{}] {}", tag, msg.payload.preview());
            }
        })
    };

    println!(
        "Herald is running with {} workers. Type a message, /status <id>, /cancel <id>, /tasks or /quit.",
        orch.worker_count()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.with_context(|| "Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_console_line(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Quit => break,
            ConsoleCommand::Usage(usage) => println!("usage: {}", usage),
            ConsoleCommand::Message(text) => {
                let msg = InboundMessage::new(CONSOLE_WORKSPACE, CONSOLE_CHANNEL, &text);
                bus.publish_inbound(msg)
                    .await
                    .with_context(|| "Inbound channel closed")?;
            }
            ConsoleCommand::Status(id) => match orch.task_status(&id) {
                Ok(status) => println!("[status] {} {}", status.state, status.progress_text),
                Err(e) => println!("[status] {}", e),
            },
            ConsoleCommand::Cancel(id) => match orch.cancel_task(&id) {
                Ok(state) => println!("[cancel] {} is now {}", id, state),
                Err(e) => println!("[cancel] {}", e),
            },
            ConsoleCommand::Tasks => {
                let tasks = orch.active_tasks(CONSOLE_WORKSPACE);
                if tasks.is_empty() {
                    println!("[tasks] none running");
                }
                for task in tasks {
                    println!("[tasks] {} {} {}", task.id, task.state, task.progress_text);
                }
            }
        }
    }

    println!();
    println!("Shutting down...");

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), bus_handle).await;
    orch.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), join_all(workers)).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), join_all(services)).await;
    // Let the printer drain what the workers delivered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    if let Some(handle) = health_handle {
        handle.abort();
    }

    println!("Herald stopped.");
    Ok(())
}
