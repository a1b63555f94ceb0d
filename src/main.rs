//! Service gateway (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   SERVICE GATEWAY                     │
//!                    │                                                       │
//!   TCP connection   │  ┌──────────┐   ┌──────────┐   http1   ┌───────────┐  │
//!  ──────────────────┼─▶│ listener │──▶│  demux   │──────────▶│  primary  │  │
//!                    │  │ (permit) │   │  (peek)  │           │  router   │  │
//!                    │  └──────────┘   └────┬─────┘           └─────┬─────┘  │
//!                    │                      │ http2                 │ /grpc/…│
//!                    │                      ▼                       ▼        │
//!                    │                ┌─────────────────────────────────┐    │
//!                    │                │         gateway router          │    │
//!                    │                └─────────────────────────────────┘    │
//!                    │                                                       │
//!                    │  ┌─────────────────────────────────────────────────┐  │
//!                    │  │ kernel: modules → phases → context → teardown   │  │
//!                    │  │ config (hot reload) · logging · metrics · health│  │
//!                    │  └─────────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use service_gateway::config::load_config;
use service_gateway::kernel::KernelContext;
use service_gateway::lifecycle::{launch, Termination};
use service_gateway::modules;
use service_gateway::observability::{logging, LogShipper};

#[derive(Parser)]
#[command(name = "service-gateway")]
#[command(about = "Multi-protocol service gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Server {
        #[arg(short, long, default_value = "config/config.toml")]
        config: PathBuf,
    },
    /// Validate a configuration file and exit
    Check {
        #[arg(short, long, default_value = "config/config.toml")]
        config: PathBuf,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => serve(&config).await,
        Commands::Check { config } => check(&config),
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

fn check(path: &Path) -> ExitCode {
    match load_config(path) {
        Ok(config) => {
            println!(
                "{}: OK (listener {}, gateway prefix {})",
                path.display(),
                config.listener.bind_address,
                config.gateway.normalized_prefix()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}

async fn serve(path: &Path) -> ExitCode {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let shipper = if config.log_shipping.enabled {
        match LogShipper::start(&config.log_shipping) {
            Ok(shipper) => Some(shipper),
            Err(e) => {
                eprintln!("Failed to start log shipping: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let logging = match logging::init(&config, shipper.as_ref().map(LogShipper::writer)) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        mode = config.mode.as_str(),
        bind_address = %config.listener.bind_address,
        "service-gateway starting"
    );
    if let Some(shipper) = &shipper {
        tracing::info!(endpoint = %shipper.endpoint(), "Log shipping enabled");
    }

    let mut ctx = KernelContext::new(config).with_config_path(path);

    let reload = logging.clone();
    ctx.on_config_change(move |config| reload.apply(config));
    ctx.add_log_sink(logging);
    if let Some(shipper) = shipper {
        ctx.add_auxiliary_client(shipper);
    }
    for module in modules::registered() {
        ctx.register_boxed(module);
    }

    // Before the port is bound, so an early SIGTERM still drains.
    let termination = match Termination::install() {
        Ok(termination) => termination,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let kernel = match launch(ctx).await {
        Ok(kernel) => kernel,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let report = kernel.run_until(termination.recv()).await;
    for failure in &report.failures {
        tracing::warn!(step = failure.step, hook = %failure.target, error = %failure.error, "Teardown step failed");
    }
    ExitCode::SUCCESS
}
