//! Account pool maintainer
//!
//! Single-binary service that keeps the shared account pool usable:
//! 1. Reports pool size against the configured bounds
//! 2. Refreshes expiring id tokens (respecting the refresh cooldown)
//! 3. Retires accounts whose quota is exhausted or whose tokens are dead
//! 4. Purges long-expired accounts
//!
//! See `cli` for the run modes.

mod admin;
mod cli;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use account_pool::{AccountStore, Maintainer, QuotaClient, spawn_maintenance};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use token_auth::RefreshClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::cli::Mode;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let mode = Mode::from_args(std::env::args().skip(1))?;
    info!(?mode, "starting pool-maintainer");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let config_path = Config::resolve_path();
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        database = %config.storage.path.display(),
        min_pool_size = config.pool.min_size,
        max_pool_size = config.pool.max_size,
        api_keys = config.refresh.api_keys.len(),
        proxy = config.http.proxy.is_some(),
        admin_addr = ?config.admin.listen_addr,
        "configuration loaded"
    );

    let settings = config.settings();
    let http = config
        .http
        .build_client()
        .context("failed to build HTTP client")?;

    let store = AccountStore::open(
        &config.storage.path,
        Duration::from_secs(config.storage.timeout_secs),
    )
    .await
    .with_context(|| {
        format!(
            "failed to open account database {}",
            config.storage.path.display()
        )
    })?;

    let refresher = RefreshClient::new(
        http.clone(),
        config.refresh.endpoint.clone(),
        config.refresh.api_keys.clone(),
        Duration::from_secs(config.refresh.timeout_secs),
    )
    .context("failed to build refresh client")?;
    let quota = QuotaClient::new(
        http,
        &config.quota.endpoint,
        Duration::from_secs(config.quota.timeout_secs),
    );

    let maintainer = Arc::new(Maintainer::new(
        store.clone(),
        Arc::new(refresher),
        Arc::new(quota),
        &settings,
    ));

    let result = run_mode(mode, &config, maintainer, prometheus).await;

    store.close().await;
    info!("shutdown complete");
    result
}

async fn run_mode(
    mode: Mode,
    config: &Config,
    maintainer: Arc<Maintainer>,
    prometheus: PrometheusHandle,
) -> Result<()> {
    match mode {
        Mode::Status => {
            let report = maintainer.health_report().await?;
            print!("{}", cli::render_report(&report));
        }
        Mode::Verify => {
            let summary = maintainer.verify_all().await?;
            print!("{}", cli::render_summary(&summary));
        }
        Mode::Purge => {
            let days = maintainer.settings().manual_retention_days;
            let deleted = maintainer.purge(days).await?;
            println!("purged {deleted} accounts expired for over {days} days");
        }
        Mode::Interactive => {
            let shutdown = cancel_on_signal();
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            cli::interactive(&maintainer, stdin, &mut stdout, &shutdown).await?;
        }
        Mode::Run => {
            let shutdown = cancel_on_signal();
            run_service(config, maintainer, prometheus, &shutdown).await?;
        }
    }
    Ok(())
}

/// Run the maintenance loop (and the admin listener, if configured) until
/// `shutdown` fires. The in-flight cycle always completes.
async fn run_service(
    config: &Config,
    maintainer: Arc<Maintainer>,
    prometheus: PrometheusHandle,
    shutdown: &CancellationToken,
) -> Result<()> {
    let admin_handle = match config.admin.listen_addr {
        Some(addr) => {
            let app = admin::build_admin_router(
                AdminState::new(maintainer.reporter().clone(), prometheus),
                config.admin.max_connections,
            );
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {addr}"))?;
            info!(addr = %addr, "admin listener ready");

            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
            }))
        }
        None => None,
    };

    if let Err(e) = spawn_maintenance(maintainer, shutdown.clone()).await {
        error!(error = %e, "maintenance task panicked");
    }

    if let Some(handle) = admin_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "admin listener error"),
            Err(e) => error!(error = %e, "admin listener task panicked"),
        }
    }
    Ok(())
}

/// Token cancelled on the first SIGINT/SIGTERM.
fn cancel_on_signal() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
    shutdown
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
