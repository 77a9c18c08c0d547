// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `brokerlink serve` command implementation.
//!
//! Wires storage, the vault, the broker adapters, quota tracking and the
//! session manager together, restores saved sessions, starts the workers
//! and serves the API until SIGINT or SIGTERM.

use std::sync::Arc;

use brokerlink_config::BrokerlinkConfig;
use brokerlink_core::{BrokerlinkError, Clock, SystemClock};
use brokerlink_gateway::{GatewayState, start_server};
use brokerlink_prometheus::PrometheusExporter;
use brokerlink_quota::{QuotaTracker, SqliteQuotaStore};
use brokerlink_security::{RedactingMakeWriter, SecretRegistry};
use brokerlink_session::{SessionManager, spawn_workers};
use brokerlink_storage::Database;
use brokerlink_vault::{CredentialVault, key_provider_from_config};
use tracing::{info, warn};

use crate::shutdown;

/// Run the server until a shutdown signal arrives.
pub async fn run_serve(config: BrokerlinkConfig) -> Result<(), BrokerlinkError> {
    let secrets = SecretRegistry::new();
    init_tracing(&config.log.level, secrets.clone());

    let exporter = match PrometheusExporter::install() {
        Ok(exporter) => Some(exporter),
        Err(e) => {
            warn!(error = %e, "metrics exporter unavailable");
            None
        }
    };

    let db = Database::open_with_config(&config.storage).await?;
    info!(path = %config.storage.database_path, "database opened");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let key_provider = key_provider_from_config(&config.vault);
    let vault = Arc::new(CredentialVault::open(db.clone(), &key_provider, clock.clone(), secrets).await?);

    let adapters = brokerlink_broker::build_adapters(
        &config.brokers,
        &config.quota,
        config.session.token_ttl(),
        clock.clone(),
    )?;
    let quota = Arc::new(QuotaTracker::from_config(
        &config.quota,
        Arc::new(SqliteQuotaStore::new(db.clone())),
        clock.clone(),
    )?);

    let manager = SessionManager::new(adapters, vault, quota, clock, &config.session);
    manager.restore_sessions().await?;

    let cancel = shutdown::install_signal_handler();
    let workers = spawn_workers(&manager, cancel.clone());

    // Auto-login runs in the background so the API is reachable while
    // slow brokers back off.
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.auto_login_all().await {
                warn!(error = %e, "auto-login at startup failed");
            }
        });
    }

    let render = exporter.map(|exporter| {
        Arc::new(move || exporter.render()) as Arc<dyn Fn() -> String + Send + Sync>
    });
    let state = GatewayState::new(manager, &config.server, render);
    let served = start_server(&config.server, state, cancel.clone()).await;

    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "worker task ended abnormally");
        }
    }
    db.close().await?;
    info!("brokerlink serve shutdown complete");
    served
}

/// Initializes the tracing subscriber. Every line passes through the
/// redacting writer before it reaches stderr.
fn init_tracing(log_level: &str, secrets: SecretRegistry) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("brokerlink={log_level},tower_http={log_level},warn")));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(RedactingMakeWriter::new(secrets))
        .try_init();
    if installed.is_err() {
        eprintln!("brokerlink: tracing subscriber already installed");
    }
}
