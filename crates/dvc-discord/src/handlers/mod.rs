//! Gateway event handlers.
//!
//! Each handler translates a serenity event into core terms and hands it to
//! the [`EventGate`](dvc_core::lifecycle::EventGate), which queues it until the
//! manager has reconciled. Serenity runs every event on its own task; ordering
//! per channel is the core's job.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    Context, EventHandler, GatewayIntents, Guild, GuildChannel, GuildId, Message, Ready,
    UnavailableGuild, VoiceState,
};
use tracing::{debug, error, info, warn};

use dvc_core::{
    domain,
    lifecycle::{LifecycleManager, PlatformEvent},
};

use crate::{router::AppState, DiscordPlatform};

mod commands;
mod voice;

pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
}

pub struct Handler {
    state: Arc<AppState>,
}

impl Handler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected to gateway");
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        if self.state.manager().is_some() {
            debug!("cache ready again; manager already running");
            return;
        }

        let platform = Arc::new(DiscordPlatform::new(ctx.http.clone(), ctx.cache.clone()));
        let mgr = Arc::new(LifecycleManager::new(
            self.state.cfg.clone(),
            self.state.stores.clone(),
            platform,
        ));

        match mgr.reconcile().await {
            Ok(report) => info!(guilds = guilds.len(), ?report, "startup reconciliation done"),
            Err(e) => error!(error = %e, "startup reconciliation failed"),
        }

        if !self.state.events.open(mgr).await {
            warn!("lifecycle manager was installed concurrently");
        }
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        voice::handle_voice_state(&self.state.events, old, new).await;
    }

    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        self.state
            .events
            .dispatch(PlatformEvent::ChannelDeleted {
                guild: domain::GuildId(channel.guild_id.get()),
                channel: domain::ChannelId(channel.id.get()),
            })
            .await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Outages also arrive as guild deletes; only a real removal purges state.
        if incomplete.unavailable {
            warn!(guild = %incomplete.id, "guild became unavailable");
            return;
        }
        self.state
            .events
            .dispatch(PlatformEvent::GuildRemoved {
                guild: domain::GuildId(incomplete.id.get()),
            })
            .await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        commands::handle_message(&ctx, &msg, &self.state).await;
    }
}
