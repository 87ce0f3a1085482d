//! Machine Sentry - scheduled machine-condition forecasting
//!
//! Pulls telemetry, forecasts the next horizon with a pretrained model,
//! scores the forecast against operating limits and raises alerts.
//!
//! # Usage
//!
//! ```bash
//! # Replay the bundled dataset against a local model server
//! cargo run --release
//!
//! # Explicit config, JSON logs
//! ./machine-sentry --config /etc/machine-sentry/sentry_config.toml --log-json
//!
//! # In-process ONNX model
//! cargo run --release --features onnx
//! ```
//!
//! # Environment Variables
//!
//! - `SENTRY_CONFIG`: Path to the machine config (default: ./sentry_config.toml)
//! - `SENTRY_SERVER_ADDR`: HTTP bind address (default: 0.0.0.0:8080)
//! - `SENTRY_CORS_ORIGINS`: Comma-separated allowed CORS origins
//! - `INFERENCE_INTERVAL_SECS`: Seconds between inference cycles
//! - `INFLUX_TOKEN`: InfluxDB API token
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use machine_sentry::api::{create_app, ApiState};
use machine_sentry::config::MachineConfig;
use machine_sentry::pipeline::{build_source, SchedulerOrchestrator};
use machine_sentry::{notify, oracle};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "machine-sentry")]
#[command(about = "Scheduled forecasting and anomaly alerting for machine telemetry")]
#[command(version)]
struct CliArgs {
    /// Path to a machine config file (overrides SENTRY_CONFIG and ./sentry_config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Orchestrator,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Orchestrator => write!(f, "Orchestrator"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the orchestrator: pre-fill, run both loops, stop on cancel.
fn spawn_orchestrator(
    task_set: &mut JoinSet<Result<TaskName>>,
    orchestrator: Arc<SchedulerOrchestrator>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Orchestrator] Task starting");
        orchestrator.start(&cancel_token).await;
        cancel_token.cancelled().await;
        orchestrator.stop().await;
        Ok(TaskName::Orchestrator)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks observe the cancellation and finish.
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("🔒 Supervisor: Task {} stopped", task_name),
            Ok(Err(e)) => error!("🔒 Supervisor: Task failed during shutdown: {}", e),
            Err(e) => error!("🔒 Supervisor: Task panicked during shutdown: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let mut config = match &args.config {
        Some(path) => {
            let mut config = MachineConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => MachineConfig::load(),
    };
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Machine Sentry - Machine Condition Forecasting");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "Machine: {} | Context: {} | Horizon: {} | Interval: {}s",
        config.machine.id,
        config.inference.context_length,
        config.inference.prediction_length,
        config.inference.interval_secs
    );

    let source = build_source(&config.telemetry, &config.machine.id).context("Failed to create telemetry source")?;
    let oracle = oracle::build_oracle(&config.oracle, &config.inference)
        .await
        .context("Failed to load forecasting model")?;
    let notifier = notify::build_dispatcher(&config.notification).context("Failed to create alert dispatcher")?;
    info!(
        "📡 Source: {} | 🧠 Oracle: {} | 📧 Alerts: {}",
        source.source_name(),
        oracle.oracle_name(),
        notifier.dispatcher_name()
    );

    let orchestrator = Arc::new(
        SchedulerOrchestrator::from_config(&config, source, oracle, notifier)
            .context("Failed to build inference pipeline")?,
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;
    info!("🌐 API listening on http://{}/api/v1", config.server.addr);
    let app = create_app(ApiState::new(Arc::clone(&orchestrator), config.machine.id.clone()));

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_orchestrator(&mut task_set, orchestrator, cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await
}
