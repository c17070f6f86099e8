//! pubsub-dns binary entry point.

use clap::Parser;
use pubsub_dns::{telemetry, Config, DnsServer};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Authoritative DNS server fed by pub/sub record events.
#[derive(Parser, Debug)]
#[command(name = "pubsub-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "pubsub-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config: Config = match config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("PUBSUB_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize())
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("failed to initialize telemetry: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        config_file = %args.config.display(),
        address = %config.dns.address,
        zones = ?config.dns.zones,
        "starting pubsub-dns"
    );

    if !config.bus.addresses.is_empty() {
        // Bus clients are provided by the embedding deployment; the bare
        // binary serves stored and inline records only.
        warn!(
            addresses = ?config.bus.addresses,
            "bus addresses configured but no bus client is linked into this binary"
        );
    }

    // Cancel on SIGINT/SIGTERM for a graceful shutdown.
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("signal received, stopping");
        signal_token.cancel();
    });

    let server = DnsServer::new(config);
    match server.run(Vec::new(), token).await {
        Ok(()) => {
            info!("pubsub-dns shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "DNS server error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
