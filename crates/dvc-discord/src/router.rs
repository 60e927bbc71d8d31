use std::sync::Arc;

use anyhow::Context as _;
use serenity::Client;
use tracing::{error, info};

use dvc_core::{
    config::Config,
    lifecycle::{EventGate, LifecycleManager, Stores},
};

use crate::handlers;

/// State shared by every gateway event.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub stores: Stores,
    /// Opened once the cache is ready and reconciliation has run. Events that
    /// arrive earlier wait in its backlog.
    pub events: EventGate,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, stores: Stores) -> Self {
        Self {
            cfg,
            stores,
            events: EventGate::new(),
        }
    }

    pub fn manager(&self) -> Option<&Arc<LifecycleManager>> {
        self.events.manager()
    }

    /// Stop event processing and flush every store.
    pub async fn shutdown(&self) -> dvc_core::Result<()> {
        match self.manager() {
            Some(mgr) => mgr.shutdown().await,
            None => self.stores.flush().await,
        }
    }
}

pub async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let stores = Stores::open(&cfg)
        .await
        .context("failed to open data stores")?;
    info!(data_dir = %cfg.data_dir.display(), prefix = %cfg.command_prefix, "stores loaded");

    let state = Arc::new(AppState::new(cfg.clone(), stores));

    let mut client = Client::builder(&cfg.discord_token, handlers::intents())
        .event_handler(handlers::Handler::new(state.clone()))
        .await
        .context("failed to build discord client")?;
    let shard_manager = client.shard_manager.clone();

    let stopped = tokio::select! {
        res = client.start() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    let flushed = state.shutdown().await;
    shard_manager.shutdown_all().await;
    if let Err(e) = &flushed {
        error!(error = %e, "failed to flush stores on shutdown");
    }
    stopped.context("discord client stopped")?;
    flushed?;

    info!("stopped");
    Ok(())
}
