//! Leader elector
//!
//! Runs one candidate for a Kubernetes Lease based election and serves the
//! current holder over HTTP.

use anyhow::Result;
use clap::Parser;
use elector::{logging, Elector, ElectorConfig, ElectorError, LogFormat};
use elector_types::ElectionKey;
use std::{net::SocketAddr, process, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Invalid flags or environment
const EXIT_CONFIG: i32 = 1;
/// The store client could not be created
const EXIT_CLIENT: i32 = 2;
/// The candidate could not resolve its identity
const EXIT_CANDIDATE: i32 = 3;
/// Any other failure after startup
const EXIT_RUNTIME: i32 = 4;

#[derive(Parser, Debug)]
#[clap(
    name = "elector",
    version,
    about = "Leader election for Kubernetes workloads"
)]
struct Args {
    /// Name of the election
    #[clap(long, env = "ELECTOR_ELECTION")]
    election: Option<String>,

    /// Namespace of the election
    #[clap(long, env = "ELECTOR_ELECTION_NAMESPACE")]
    election_namespace: Option<String>,

    /// Address of the election API
    #[clap(long = "http", env = "ELECTOR_HTTP", default_value = "0.0.0.0:27070")]
    election_address: SocketAddr,

    /// Address of the health probes
    #[clap(long, env = "ELECTOR_PROBE_ADDRESS", default_value = "0.0.0.0:28080")]
    probe_address: SocketAddr,

    /// Address of the metrics endpoint
    #[clap(long, env = "ELECTOR_METRICS_ADDRESS", default_value = "0.0.0.0:29090")]
    metrics_address: SocketAddr,

    /// Name to stand as (defaults to the host name)
    #[clap(long, env = "ELECTOR_IDENTITY")]
    identity: Option<String>,

    /// Seconds between safety-net reconciliations
    #[clap(long = "resync-interval", env = "ELECTOR_RESYNC_INTERVAL", default_value = "60")]
    resync_interval_secs: u64,

    /// Seconds before retrying a failed reconciliation
    #[clap(long = "retry-interval", env = "ELECTOR_RETRY_INTERVAL", default_value = "10")]
    retry_interval_secs: u64,

    /// Deadline for a single store call, in seconds
    #[clap(long = "store-timeout", env = "ELECTOR_STORE_TIMEOUT", default_value = "2")]
    store_timeout_secs: u64,

    /// Log format: text or json
    #[clap(long, env = "ELECTOR_LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Log level: trace, debug, info, warn or error
    #[clap(long, env = "ELECTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> elector::Result<ElectorConfig> {
        let log_format: LogFormat = self.log_format.parse()?;
        let config = ElectorConfig {
            election: ElectionKey::new(
                self.election_namespace.unwrap_or_default(),
                self.election.unwrap_or_default(),
            ),
            identity: self.identity,
            election_address: self.election_address,
            probe_address: self.probe_address,
            metrics_address: self.metrics_address,
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            log_format,
            log_level: self.log_level,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt signal"),
        _ = terminate => info!("Received terminate signal"),
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("elector: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    if let Err(e) = logging::init(config.log_format, &config.log_level) {
        eprintln!("elector: {}", e);
        process::exit(EXIT_CONFIG);
    }

    info!("Starting elector");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let elector = match Elector::connect(config).await {
        Ok(elector) => elector,
        Err(e @ ElectorError::Setup(_)) => {
            error!(error = %e, "Unable to determine candidate identity");
            process::exit(EXIT_CANDIDATE);
        }
        Err(e @ ElectorError::Config(_)) => {
            error!(error = %e, "Invalid configuration");
            process::exit(EXIT_CONFIG);
        }
        Err(e) => {
            error!(error = %e, "Unable to create store client");
            process::exit(EXIT_CLIENT);
        }
    };
    info!(identity = elector.identity(), "Candidate identity");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match elector.run(cancel).await {
        Ok(()) => {}
        Err(e @ ElectorError::Setup(_)) => {
            error!(error = %e, "Candidate setup failed");
            process::exit(EXIT_CANDIDATE);
        }
        Err(e) => {
            error!(error = %e, "Elector error");
            process::exit(EXIT_RUNTIME);
        }
    }

    info!("Elector stopped");
    Ok(())
}
