use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pakt_kube::KubeStore;

#[derive(Parser, Debug)]
#[command(name = "paktctl", version, about = "Wait for cluster package convergence")]
struct Cli {
    /// Seconds between poll attempts
    #[arg(long = "interval-secs", global = true, env = "PAKT_INTERVAL_SECS", default_value_t = 2)]
    interval_secs: u64,

    /// Overall wall-clock budget in seconds
    #[arg(long = "timeout-secs", global = true, env = "PAKT_TIMEOUT_SECS", default_value_t = 120)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait until exactly one provider is installed and healthy
    Installed,
    /// Wait until a package upgrade has swapped the active revision
    Transition {
        /// Package identity the upgrade installed
        #[arg(long = "new-package")]
        new_package: String,
        /// Package identity being replaced
        #[arg(long = "old-package")]
        old_package: String,
    },
    /// Wait until no providers remain
    Deleted,
}

fn init_tracing() {
    let env = std::env::var("PAKT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PAKT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid PAKT_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let interval = Duration::from_secs(cli.interval_secs);
    let timeout = Duration::from_secs(cli.timeout_secs);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling wait");
                cancel.cancel();
            }
        });
    }

    let store = KubeStore::try_default().await?;

    let res = match cli.command {
        Commands::Installed => {
            pakt_wait::wait_for_all_providers_installed(&cancel, &store, interval, timeout).await
        }
        Commands::Transition { new_package, old_package } => {
            pakt_wait::wait_for_revision_transition(&cancel, &store, &new_package, &old_package, interval, timeout)
                .await
        }
        Commands::Deleted => {
            pakt_wait::wait_for_all_providers_deleted(&cancel, &store, interval, timeout).await
        }
    };

    match res {
        Ok(()) => {
            info!("converged");
            Ok(())
        }
        Err(e) => {
            eprintln!("wait failed: {}", e);
            std::process::exit(1);
        }
    }
}
