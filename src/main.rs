mod config;
mod gateway;
mod poller;
mod relay;
mod store;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::gateway::telegram::TelegramGateway;
use crate::poller::SyncPoller;
use crate::relay::{Relay, Remote};
use crate::store::MessageStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tgrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Listen: {}:{}", config.server.bind, config.server.port);
    info!("  Chat: {:?}", config.telegram.chat_id);
    info!("  Command prefix: {:?}", config.telegram.command_prefix);

    let store = MessageStore::open(&config.storage.database_path)?;

    let remote = match config.telegram.credentials() {
        Some((token, chat_id)) => {
            let gateway = TelegramGateway::new(token, config.telegram.poll_timeout())?;
            Some(Remote {
                gateway: Arc::new(gateway),
                chat_id,
            })
        }
        None => {
            warn!(
                "TELEGRAM_BOT_TOKEN or TELEGRAM_GROUP_CHAT_ID not set; \
                 running in store-only mode without Telegram polling"
            );
            None
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);

    let poller = remote.clone().map(|remote| {
        let poller = SyncPoller::new(remote.gateway, store.clone(), remote.chat_id)
            .with_command_prefix(config.telegram.command_prefix.clone())
            .with_intervals(
                config.telegram.idle_interval(),
                config.telegram.error_backoff(),
            );
        tokio::spawn(poller.run(stop_rx.clone()))
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop everything, so hold it
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    let relay = Arc::new(Relay::new(store, remote, &config.relay));
    web::serve(relay, &config.server.bind, config.server.port, stop_rx).await?;

    if let Some(handle) = poller {
        handle.await.context("Poller task panicked")?;
    }

    Ok(())
}
