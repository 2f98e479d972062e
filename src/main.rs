//! vhost-proxy
//!
//! Virtual-host reverse proxy for many deployments behind shared ports.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                     VHOST PROXY                       │
//!                     │                                                      │
//!   host configs ─────┼─▶ config ──▶ routing::ports ──▶ routing::table       │
//!   (JSON, watched)   │                                        │             │
//!                     │                                        ▼             │
//!   Client ───────────┼─▶ http::server (per port, SNI on TLS) ─┼─▶ forward ──┼──▶ Backend
//!                     │          │                             │             │   instances
//!                     │          ▼                             │             │
//!                     │   registry::controller ──▶ registry::store            │
//!                     │                                │                     │
//!                     │                                ▼                     │
//!                     │                        health::monitor ──▶ MonitorFatal
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vhost_proxy::config::loader::load_settings;
use vhost_proxy::lifecycle::{start, Shutdown, StartupOptions};
use vhost_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "vhost-proxy")]
#[command(about = "Multi-host reverse proxy", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, default_value = "vhost-proxy.toml")]
    settings: PathBuf,

    /// Also serve every planned backend instance from this process
    #[arg(long)]
    instances: bool,

    /// Run the deploy smoke test after bring-up
    #[arg(long, requires = "instances")]
    deploy: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli.settings) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("vhost-proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&settings.observability, settings.environment);
    tracing::info!(
        settings = %cli.settings.display(),
        environment = %settings.environment,
        deployments = settings.deploys.len(),
        "vhost-proxy v0.1.0 starting"
    );

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let options = StartupOptions {
        serve_instances: cli.instances,
        deploy: cli.deploy,
    };
    let running = match start(settings, options, &shutdown).await {
        Ok(running) => running,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let signals = shutdown.clone();
    tokio::spawn(async move { signals.trigger_on_signal().await });

    match running.wait(&shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(fatal) => {
            tracing::error!(error = %fatal, "Health monitor escalated; exiting for supervisor restart");
            ExitCode::FAILURE
        }
    }
}
