//! flexchan-bot: auto-scaling voice rooms.
//!
//! Members joining a lobby get a room of their own, created next to the
//! lobby; rooms are deleted again once they empty. Gateway events and admin
//! requests arrive over the relay (see `relay`), everything else goes through
//! the REST API.
//!
//! Requires FLEXCHAN_TOKEN (or --token).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flexchan_core::store::RegistryStore;
use flexchan_core::{listener, LifecycleManager};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use flexchan_bot::config::BotConfig;
use flexchan_bot::db::SqliteStore;
use flexchan_bot::relay::Relay;
use flexchan_bot::rest::RestPlatform;
use flexchan_bot::voice::VoiceStates;

/// Membership notifications buffered between the relay and the listener.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (FLEXCHAN_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("FLEXCHAN_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "flexchan_bot=info,flexchan_core=info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = BotConfig::parse();
    let listen_addr = config.validate()?;

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening registry {}", config.db_path.display()))?,
    );

    let voice = Arc::new(VoiceStates::new());
    let rest = Arc::new(RestPlatform::new(
        &config.api_base,
        config.token.clone(),
        Arc::clone(&voice),
    ));
    let manager = Arc::new(
        LifecycleManager::new(store.clone(), rest.clone(), rest)
            .with_lobby_prefix(config.lobby_prefix.clone()),
    );

    tracing::info!(
        listen = %listen_addr,
        db = %config.db_path.display(),
        api = %config.api_base,
        "Starting flexchan-bot"
    );

    if config.skip_reconcile {
        tracing::info!("Skipping startup reconciliation");
    } else {
        reconcile_all(&manager, store.as_ref()).await?;
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let listener_task = tokio::spawn(listener::run_until(Arc::clone(&manager), rx, async {
        let _ = stop_rx.await;
    }));

    let relay = Arc::new(Relay::new(manager, voice, tx));
    let (_, mut relay_task) = relay.start(&listen_addr.to_string()).await?;

    tracing::info!("Bot running. Ctrl+C to stop.");
    let relay_result = tokio::select! {
        res = &mut relay_task => Some(res.context("relay task panicked").and_then(|r| r)),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            None
        }
    };
    if relay_result.is_none() {
        relay_task.abort();
    }

    // Stop taking notifications, then let started handlers finish.
    let _ = stop_tx.send(());
    let stats = listener_task.await.context("membership listener panicked")?;
    tracing::info!(handled = stats.handled, failed = stats.failed, "Stopped");
    relay_result.unwrap_or(Ok(()))
}

/// Sweep every stored workspace. A failing workspace is logged and skipped.
/// Occupancy is unknown until the relay delivers each workspace's voice
/// snapshot, so this pass only prunes vanished rooms and defers the rest.
async fn reconcile_all(manager: &LifecycleManager, store: &dyn RegistryStore) -> Result<()> {
    let workspaces = store.workspaces().await.context("listing stored workspaces")?;
    for workspace_id in workspaces {
        match manager.reconcile(&workspace_id).await {
            Ok(report) => tracing::info!(
                workspace = %workspace_id,
                reclaimed = report.reclaimed,
                pruned = report.pruned,
                refreshed = report.refreshed,
                stale = report.stale,
                deferred = report.deferred,
                "Startup sweep done"
            ),
            Err(e) => tracing::error!(workspace = %workspace_id, error = %e, "Startup sweep failed"),
        }
    }
    Ok(())
}
