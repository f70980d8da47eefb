//! mccr-cli - Remote services runner
//!
//! Drives one remote operation against a simulated card reader and prints
//! the outcome. Useful to exercise the controller outside a GUI.
//!
//! # Usage
//!
//! ```bash
//! mccr-cli --service firmware --latency-ms 2000
//! mccr-cli --config config/remote-services.toml --cancel-after-ms 500
//! mccr-cli --hang --timeout-ms 3000
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mccr_core::{OperationInfo, OperationObserver, OperationParams, OperationResult};
use mccr_remote::{
    RemoteOperationController, RemoteService, RemoteServicesConfig, SimulatedOutcome,
    SimulatedSession,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mccr-cli")]
#[command(about = "Run a remote services operation against a simulated card reader")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Remote service to run (key_injection, firmware_update, configuration_update)
    #[arg(short, long)]
    service: Option<RemoteService>,

    /// Remote services endpoint passed to the reader
    #[arg(long)]
    endpoint: Option<String>,

    /// Request payload (JSON)
    #[arg(long, default_value = "{}")]
    payload: String,

    /// Simulated operation duration in milliseconds
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Make the simulated reader fail with this message
    #[arg(long, conflicts_with = "hang")]
    fail: Option<String>,

    /// Make the simulated reader never answer
    #[arg(long)]
    hang: bool,

    /// Operation deadline in milliseconds (0 disables it)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Cancel the operation after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Logs controller notifications the way a page would surface them
struct ConsoleObserver;

impl OperationObserver for ConsoleObserver {
    fn on_operation_started(&self, operation: &OperationInfo) {
        info!(
            operation_id = %operation.id,
            "{} in progress, trigger disabled",
            operation.service.label()
        );
    }

    fn on_operation_finished(&self, operation: &OperationInfo, result: &OperationResult) {
        match result {
            OperationResult::Success { .. } => {
                info!(operation_id = %operation.id, "{} finished", operation.service.label())
            }
            OperationResult::Failure { kind, message } => warn!(
                operation_id = %operation.id,
                %kind,
                "{} failed: {}",
                operation.service.label(),
                message
            ),
        }
    }
}

fn load_config(args: &Args) -> Result<RemoteServicesConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            info!("Loading config from: {}", path);
            RemoteServicesConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path))?
        }
        None => RemoteServicesConfig::default(),
    };

    // Command-line options override the file
    if let Some(service) = args.service {
        config.controller.service = service;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.controller.operation_timeout_ms = timeout_ms;
    }
    if let Some(latency_ms) = args.latency_ms {
        config.simulator.latency_ms = latency_ms;
    }
    if args.hang {
        config.simulator.outcome = SimulatedOutcome::Hang;
    } else if let Some(ref message) = args.fail {
        config.simulator.outcome = SimulatedOutcome::DeviceError {
            code: 0x01,
            message: message.clone(),
        };
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose {
        "mccr_cli=debug,mccr_remote=debug"
    } else {
        "mccr_cli=info,mccr_remote=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("Invalid --payload JSON")?;
    let mut params = OperationParams::new(payload);
    if let Some(ref endpoint) = args.endpoint {
        params = params.with_endpoint(endpoint.clone());
    }

    let session = Arc::new(SimulatedSession::new(&config.simulator));
    let controller = RemoteOperationController::new(session, config.controller.clone());
    controller.subscribe(Arc::new(ConsoleObserver));

    info!(
        reader = %controller.session_id(),
        service = %controller.service(),
        "Starting remote operation"
    );
    let handle = controller.start_operation(params)?;

    if let Some(delay_ms) = args.cancel_after_ms {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        match controller.cancel_operation() {
            Ok(()) => info!("Cancellation requested"),
            Err(e) => warn!(error = %e, "Nothing to cancel"),
        }
    }

    let result = handle.wait().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
