use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use heartrisk_service::{
    build_app_state, config::HeartRiskServiceConfig, cors_layer, run_server,
    ASSISTANT_API_KEY_ENV,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};
use tracing_appender::{
    non_blocking,
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime},
    prelude::*,
    EnvFilter, Registry,
};

/// The directory where the logs are stored.
const LOGS: &str = "./logs";
/// The log file name.
const LOG_FILE: &str = "heartrisk-node.log";

/// Command line arguments for the heart risk node
#[derive(Parser)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config_path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = setup_logging(LOGS).context("Failed to setup logging")?;
    dotenv().ok();

    let args = Args::parse();
    let config = HeartRiskServiceConfig::load(&args.config_path)
        .with_context(|| format!("Failed to load configuration from {}", args.config_path))?;

    info!(
        target = "heartrisk-node",
        event = "starting",
        model_artifact_path = %config.model_artifact_path.display(),
        "Starting heart risk node"
    );

    let api_key = std::env::var(ASSISTANT_API_KEY_ENV).ok();
    let app_state = build_app_state(&config, api_key).inspect_err(|e| {
        error!(
            target = "heartrisk-node",
            event = "startup_failed",
            error = %e,
            "Failed to initialize the service"
        );
    })?;
    let cors = cors_layer(&config.allowed_origins)?;

    let tcp_listener = TcpListener::bind(&config.service_bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.service_bind_address))?;

    info!(
        target = "heartrisk-node",
        event = "service_listening",
        bind_address = config.service_bind_address,
        "Heart risk service is listening"
    );

    let (shutdown_sender, mut shutdown_receiver) = watch::channel(false);
    let server_handle = tokio::spawn(run_server(app_state, cors, tcp_listener, shutdown_sender));

    let result = server_handle.await?;
    if let Err(e) = &result {
        error!(
            target = "heartrisk-node",
            event = "server_error",
            error = %e,
            "Server terminated with an error"
        );
    }
    if *shutdown_receiver.borrow_and_update() {
        info!(target = "heartrisk-node", event = "shutdown", "Heart risk node stopped");
    }
    result
}

/// Configure logging with JSON formatting, file output, and console output
///
/// The returned guard flushes the file writer when dropped and must be held for the
/// lifetime of the process.
fn setup_logging<P: AsRef<Path>>(log_dir: P) -> Result<WorkerGuard> {
    // Set up file appender with rotation
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE);

    // Create a non-blocking writer
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    // Create JSON formatter for file output
    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_appender);

    // Create console formatter for development
    let console_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(FmtSpan::ENTER);

    // Create filter from environment variable or default to info
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,heartrisk_service=debug"));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(guard)
}
