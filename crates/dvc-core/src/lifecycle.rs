//! Channel lifecycle: trigger join → rate check → naming → create → active →
//! emptying → deleted.
//!
//! The manager owns every persisted store and the rate limiter. Gateway events
//! arrive concurrently; the rate limiter mutex linearizes creation requests and
//! a per-channel lock serializes everything that touches one managed channel.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use rand::seq::IndexedRandom;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    domain::{BanRecord, ChannelId, GuildId, ManagedChannel, Placement, TriggerConfig, UserId},
    naming::{self, RenderContext},
    platform::{ChannelSpec, Grants, OverwriteTarget, Platform, VoiceChannel},
    rate_limit::{RateDecision, RateLimiter},
    store::{JsonFile, JsonStore},
    Result,
};

/// Inbound platform events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    VoiceJoin {
        guild: GuildId,
        channel: ChannelId,
        actor: UserId,
    },
    VoiceLeave {
        guild: GuildId,
        channel: ChannelId,
        actor: UserId,
    },
    ChannelDeleted {
        guild: GuildId,
        channel: ChannelId,
    },
    GuildRemoved {
        guild: GuildId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    NotTrigger,
    Banned,
    RateLimited {
        retry_after: Duration,
        escalated: bool,
    },
    /// Trigger vanished or the platform refused the channel; nothing was written.
    Aborted,
    Created {
        channel: ChannelId,
        name: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotManaged,
    Occupied,
    OwnerReassigned { to: UserId },
    Deleted,
    /// Platform refused the delete; the record stays for the next reconciliation.
    DeleteFailed,
    /// The channel no longer exists on the platform; the record was dropped.
    Pruned,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub migrated_configs: usize,
    pub migrated_bans: usize,
    pub stale_triggers: usize,
    pub deleted: usize,
    pub pruned: usize,
    pub reassigned: usize,
    pub created: usize,
}

/// Trigger settings after falling back to the trigger channel and built-in defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub name_template: String,
    pub user_limit: Option<u32>,
    pub bitrate: Option<u32>,
    pub category_id: Option<ChannelId>,
    pub position: Placement,
}

pub fn resolve_settings(
    config: &TriggerConfig,
    trigger: &VoiceChannel,
    default_name: &str,
) -> EffectiveSettings {
    EffectiveSettings {
        name_template: config
            .name_template
            .clone()
            .unwrap_or_else(|| default_name.to_string()),
        user_limit: config.user_limit.or(trigger.user_limit),
        bitrate: config.bitrate.or(trigger.bitrate),
        category_id: config.category_id.or(trigger.category_id),
        position: config.position.unwrap_or_default(),
    }
}

/// Random new owner among `candidates`. Must stay synchronous: the
/// thread-local rng is not `Send`.
fn pick_owner(candidates: &[UserId]) -> Option<UserId> {
    candidates.choose(&mut rand::rng()).copied()
}

/// All persisted state, one JSON document each.
#[derive(Clone, Debug)]
pub struct Stores {
    /// trigger channel id → config
    pub configs: Arc<JsonStore<TriggerConfig>>,
    /// managed channel id → record
    pub channels: Arc<JsonStore<ManagedChannel>>,
    /// guild id → blacklisted words
    pub blacklists: Arc<JsonStore<Vec<String>>>,
    /// `guild:actor` → ban
    pub bans: Arc<JsonStore<BanRecord>>,
}

impl Stores {
    pub async fn open(cfg: &Config) -> Result<Self> {
        Ok(Self {
            configs: Arc::new(JsonFile::open(cfg.configs_file()).await?),
            channels: Arc::new(JsonFile::open(cfg.channels_file()).await?),
            blacklists: Arc::new(JsonFile::open(cfg.blacklists_file()).await?),
            bans: Arc::new(JsonFile::open(cfg.bans_file()).await?),
        })
    }

    /// Save every store, reporting the first failure after trying all of them.
    pub async fn flush(&self) -> Result<()> {
        let results = [
            self.configs.save().await,
            self.channels.save().await,
            self.blacklists.save().await,
            self.bans.save().await,
        ];
        results.into_iter().collect()
    }
}

/// Save a store after a mutation. Failures are logged; the mirror stays
/// authoritative and the next save retries.
pub(crate) async fn persist<V>(store: &JsonStore<V>)
where
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    if let Err(e) = store.save().await {
        error!(path = %store.path().display(), error = %e, "failed to persist store");
    }
}

#[derive(Default)]
pub struct ChannelLocks {
    inner: Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

impl ChannelLocks {
    const PRUNE_ABOVE: usize = 256;

    pub async fn lock_channel(&self, channel: ChannelId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > Self::PRUNE_ABOVE {
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            map.entry(channel)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Front door for platform events.
///
/// Until a reconciled manager is installed, events are queued; installing the
/// manager replays them in arrival order.
#[derive(Default)]
pub struct EventGate {
    manager: OnceCell<Arc<LifecycleManager>>,
    backlog: Mutex<Vec<PlatformEvent>>,
}

impl EventGate {
    const MAX_BACKLOG: usize = 10_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn manager(&self) -> Option<&Arc<LifecycleManager>> {
        self.manager.get()
    }

    pub async fn dispatch(&self, event: PlatformEvent) {
        if let Some(mgr) = self.manager() {
            mgr.handle(event).await;
            return;
        }

        let mut backlog = self.backlog.lock().await;
        // Installed while we waited for the backlog lock.
        if let Some(mgr) = self.manager() {
            drop(backlog);
            mgr.handle(event).await;
            return;
        }
        if backlog.len() >= Self::MAX_BACKLOG {
            warn!(?event, "startup backlog full; dropping event");
            return;
        }
        backlog.push(event);
    }

    /// Install `mgr` and replay what queued up. Returns false if a manager was
    /// already installed.
    pub async fn open(&self, mgr: Arc<LifecycleManager>) -> bool {
        let pending = {
            let mut backlog = self.backlog.lock().await;
            if self.manager.set(mgr.clone()).is_err() {
                return false;
            }
            std::mem::take(&mut *backlog)
        };
        if !pending.is_empty() {
            info!(events = pending.len(), "replaying events received during startup");
        }
        mgr.replay(pending).await;
        true
    }
}

pub struct LifecycleManager {
    cfg: Arc<Config>,
    stores: Stores,
    platform: Arc<dyn Platform>,
    rate_limiter: Mutex<RateLimiter>,
    channel_locks: ChannelLocks,
    shutdown: CancellationToken,
}

impl LifecycleManager {
    pub fn new(cfg: Arc<Config>, stores: Stores, platform: Arc<dyn Platform>) -> Self {
        let rate_limiter = RateLimiter::new(cfg.rate_limit_window, cfg.rate_limit_ban_threshold);
        Self {
            cfg,
            stores,
            platform,
            rate_limiter: Mutex::new(rate_limiter),
            channel_locks: ChannelLocks::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub async fn managed(&self, channel: ChannelId) -> Option<ManagedChannel> {
        self.stores.channels.get(&channel.key()).await
    }

    pub async fn is_banned(&self, guild: GuildId, actor: UserId) -> bool {
        self.stores
            .bans
            .contains_key(&BanRecord::key(guild, actor))
            .await
    }

    /// Dispatch one platform event. Failures stay inside the event's own flow.
    pub async fn handle(&self, event: PlatformEvent) {
        if self.shutdown.is_cancelled() {
            debug!(?event, "ignoring event during shutdown");
            return;
        }

        let res = match event {
            PlatformEvent::VoiceJoin {
                guild,
                channel,
                actor,
            } => self.on_voice_join(guild, channel, actor).await.map(|_| ()),
            PlatformEvent::VoiceLeave {
                guild,
                channel,
                actor,
            } => self.on_voice_leave(guild, channel, actor).await.map(|_| ()),
            PlatformEvent::ChannelDeleted { guild, channel } => {
                self.on_channel_deleted(guild, channel).await
            }
            PlatformEvent::GuildRemoved { guild } => self.on_guild_removed(guild).await,
        };

        match res {
            Err(e) if e.is_operator_visible() => error!(?event, error = %e, "event handling failed"),
            Err(e) => warn!(?event, error = %e, "event handling failed"),
            Ok(()) => {}
        }
    }

    /// Handle events that arrived before this manager was installed. A join is
    /// only honored if the actor is still in that channel.
    pub async fn replay(&self, events: Vec<PlatformEvent>) {
        for event in events {
            if let PlatformEvent::VoiceJoin {
                guild,
                channel,
                actor,
            } = event
            {
                let still_there = self
                    .platform
                    .voice_channel(guild, channel)
                    .await
                    .is_some_and(|c| c.contains(actor));
                if !still_there {
                    debug!(?event, "skipping stale join");
                    continue;
                }
            }
            self.handle(event).await;
        }
    }

    // ============== Join ==============

    pub async fn on_voice_join(
        &self,
        guild: GuildId,
        channel: ChannelId,
        actor: UserId,
    ) -> Result<JoinOutcome> {
        let Some(config) = self.stores.configs.get(&channel.key()).await else {
            return Ok(JoinOutcome::NotTrigger);
        };

        if self.is_banned(guild, actor).await {
            debug!(%actor, %channel, "banned actor joined trigger");
            return Ok(JoinOutcome::Banned);
        }

        // Check + record as one step: a duplicate join for the same actor
        // cannot slip past between the two.
        let decision = self.rate_limiter.lock().await.check_and_record(actor);
        if let RateDecision::Denied {
            retry_after,
            escalate,
        } = decision
        {
            return Ok(self.reject_rate_limited(guild, actor, retry_after, escalate).await);
        }

        let Some(trigger) = self.platform.voice_channel(guild, channel).await else {
            info!(%guild, %channel, "trigger channel vanished before creation");
            return Ok(JoinOutcome::Aborted);
        };

        let settings = resolve_settings(&config, &trigger, &self.cfg.default_name_template);
        let name = self.render_name(guild, actor, &settings).await;

        let spec = ChannelSpec {
            user_limit: settings.user_limit,
            bitrate: settings.bitrate,
            category_id: settings.category_id,
            position: settings.position.resolve(trigger.position),
            rtc_region: trigger.rtc_region.clone(),
            video_quality: trigger.video_quality,
            inherit_overwrites_from: Some(channel),
            owner: Some(actor),
            ..ChannelSpec::voice(guild, name.clone())
        };

        let created = match self.platform.create_channel(spec).await {
            Ok(id) => id,
            Err(e) => {
                warn!(%guild, trigger = %channel, %actor, error = %e, "channel creation rejected");
                return Ok(JoinOutcome::Aborted);
            }
        };

        let record = ManagedChannel {
            channel_id: created,
            owner_id: actor,
            trigger_channel_id: channel,
            guild_id: guild,
            created_at: Utc::now(),
        };
        self.stores.channels.set(created.key(), record).await;
        persist(&self.stores.channels).await;
        info!(%guild, channel = %created, owner = %actor, %name, "created managed channel");

        // Best-effort: the channel stays valid for the actor to join manually.
        if let Err(e) = self.platform.move_member(guild, actor, Some(created)).await {
            warn!(%guild, channel = %created, %actor, error = %e, "failed to move member into new channel");
        }

        Ok(JoinOutcome::Created {
            channel: created,
            name,
        })
    }

    async fn reject_rate_limited(
        &self,
        guild: GuildId,
        actor: UserId,
        retry_after: Duration,
        escalate: bool,
    ) -> JoinOutcome {
        if escalate {
            self.ban(guild, actor, "repeated trigger joins while rate limited")
                .await;
        }

        let text = format!(
            "You are being rate limited. Try again in `{:.2}` seconds.",
            retry_after.as_secs_f64()
        );
        if let Err(e) = self.platform.send_direct_message(actor, &text).await {
            debug!(%actor, error = %e, "could not deliver rate-limit notice");
        }

        JoinOutcome::RateLimited {
            retry_after,
            escalated: escalate,
        }
    }

    async fn render_name(
        &self,
        guild: GuildId,
        actor: UserId,
        settings: &EffectiveSettings,
    ) -> String {
        let user = self
            .platform
            .display_name(guild, actor)
            .await
            .unwrap_or_else(|| actor.to_string());

        let position = if settings.name_template.contains("@position") {
            self.managed_in_category(guild, settings.category_id).await + 1
        } else {
            0
        };

        let blacklist = self
            .stores
            .blacklists
            .get(&guild.key())
            .await
            .unwrap_or_default();

        naming::render(
            &settings.name_template,
            &RenderContext {
                user: &user,
                position,
                blacklist: &blacklist,
            },
        )
    }

    /// Live managed channels in `category`. Best-effort under concurrent creations.
    async fn managed_in_category(&self, guild: GuildId, category: Option<ChannelId>) -> usize {
        let managed: HashSet<ChannelId> = self
            .stores
            .channels
            .values()
            .await
            .into_iter()
            .map(|r| r.channel_id)
            .collect();

        self.platform
            .voice_channels(guild)
            .await
            .iter()
            .filter(|c| c.category_id == category && managed.contains(&c.id))
            .count()
    }

    // ============== Leave ==============

    pub async fn on_voice_leave(
        &self,
        guild: GuildId,
        channel: ChannelId,
        actor: UserId,
    ) -> Result<LeaveOutcome> {
        let _guard = self.channel_locks.lock_channel(channel).await;

        let Some(record) = self.managed(channel).await else {
            return Ok(LeaveOutcome::NotManaged);
        };

        let Some(live) = self.platform.voice_channel(guild, channel).await else {
            self.prune(channel, "managed channel missing on leave").await;
            return Ok(LeaveOutcome::Pruned);
        };

        // The platform view is newer than the event: the leaver may be back.
        if live.is_empty() {
            return Ok(self.delete_managed(&record).await);
        }
        if live.contains(actor) {
            debug!(%channel, %actor, "leaver is connected again");
        }

        if !live.contains(record.owner_id) {
            if let Some(to) = pick_owner(&live.occupants) {
                self.assign_owner(&record, to).await;
                return Ok(LeaveOutcome::OwnerReassigned { to });
            }
        }

        Ok(LeaveOutcome::Occupied)
    }

    async fn delete_managed(&self, record: &ManagedChannel) -> LeaveOutcome {
        match self.platform.delete_channel(record.channel_id).await {
            Ok(()) => {
                self.stores.channels.delete(&record.channel_id.key()).await;
                persist(&self.stores.channels).await;
                info!(guild = %record.guild_id, channel = %record.channel_id, "deleted empty managed channel");
                LeaveOutcome::Deleted
            }
            Err(e) => {
                warn!(guild = %record.guild_id, channel = %record.channel_id, error = %e, "failed to delete empty managed channel");
                LeaveOutcome::DeleteFailed
            }
        }
    }

    async fn prune(&self, channel: ChannelId, why: &str) {
        if self.stores.channels.delete(&channel.key()).await.is_some() {
            info!(%channel, reason = why, "pruned stale managed channel record");
            persist(&self.stores.channels).await;
        }
    }

    /// Record `to` as owner and move the owner grant over. Permission changes
    /// are best-effort; the record is the source of truth.
    async fn assign_owner(&self, record: &ManagedChannel, to: UserId) {
        let previous = record.owner_id;
        let updated = ManagedChannel {
            owner_id: to,
            ..record.clone()
        };
        self.stores
            .channels
            .set(record.channel_id.key(), updated)
            .await;
        persist(&self.stores.channels).await;
        info!(channel = %record.channel_id, from = %previous, %to, "channel ownership reassigned");

        if let Err(e) = self
            .platform
            .set_permission_overwrite(
                record.guild_id,
                record.channel_id,
                OverwriteTarget::Member(to),
                Grants::owner(),
            )
            .await
        {
            warn!(channel = %record.channel_id, user = %to, error = %e, "failed to grant owner permissions");
        }

        if previous != to {
            if let Err(e) = self
                .platform
                .set_permission_overwrite(
                    record.guild_id,
                    record.channel_id,
                    OverwriteTarget::Member(previous),
                    Grants::revoke_owner(),
                )
                .await
            {
                debug!(channel = %record.channel_id, user = %previous, error = %e, "failed to revoke previous owner permissions");
            }
        }
    }

    // ============== Ownership commands ==============

    /// Hand ownership from the current owner to another occupant.
    pub async fn transfer_ownership(
        &self,
        guild: GuildId,
        channel: ChannelId,
        from: UserId,
        to: UserId,
    ) -> Result<()> {
        let _guard = self.channel_locks.lock_channel(channel).await;

        let record = self
            .managed(channel)
            .await
            .ok_or_else(|| crate::Error::command("This is not a managed voice channel."))?;
        if record.owner_id != from {
            return Err(crate::Error::PermissionDenied(format!(
                "only the owner (<@{}>) can transfer this channel",
                record.owner_id
            )));
        }
        if from == to {
            return Err(crate::Error::command("You already own this channel."));
        }

        let live = self
            .platform
            .voice_channel(guild, channel)
            .await
            .ok_or_else(|| crate::Error::InconsistentState(format!("channel {channel} is gone")))?;
        if !live.contains(to) {
            return Err(crate::Error::command("This member is not in your voice channel."));
        }

        self.assign_owner(&record, to).await;
        Ok(())
    }

    /// Take ownership of a channel whose owner is no longer connected to it.
    pub async fn claim(&self, guild: GuildId, channel: ChannelId, actor: UserId) -> Result<()> {
        let _guard = self.channel_locks.lock_channel(channel).await;

        let record = self
            .managed(channel)
            .await
            .ok_or_else(|| crate::Error::command("This is not a managed voice channel."))?;
        if record.owner_id == actor {
            return Err(crate::Error::command("You already own this channel."));
        }

        let live = self
            .platform
            .voice_channel(guild, channel)
            .await
            .ok_or_else(|| crate::Error::InconsistentState(format!("channel {channel} is gone")))?;
        if !live.contains(actor) {
            return Err(crate::Error::command("You have to be in the voice channel to claim it."));
        }
        if live.contains(record.owner_id) {
            return Err(crate::Error::command(format!(
                "You cannot claim the ownership because the owner is still in your voice channel. (<@{}>)",
                record.owner_id
            )));
        }

        self.assign_owner(&record, actor).await;
        Ok(())
    }

    // ============== Removal ==============

    pub async fn on_channel_deleted(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        let _guard = self.channel_locks.lock_channel(channel).await;
        let key = channel.key();

        if self.stores.channels.delete(&key).await.is_some() {
            debug!(%guild, %channel, "managed channel deleted");
            persist(&self.stores.channels).await;
        }

        if self.stores.configs.delete(&key).await.is_some() {
            let orphans = self
                .stores
                .channels
                .remove_where(|_, r| r.trigger_channel_id == channel)
                .await;
            info!(%guild, trigger = %channel, orphans = orphans.len(), "trigger channel deleted");
            persist(&self.stores.configs).await;
            if !orphans.is_empty() {
                persist(&self.stores.channels).await;
            }
        }

        Ok(())
    }

    pub async fn on_guild_removed(&self, guild: GuildId) -> Result<()> {
        let configs = self
            .stores
            .configs
            .remove_where(|_, c| c.guild_id == Some(guild))
            .await;
        let channels = self
            .stores
            .channels
            .remove_where(|_, r| r.guild_id == guild)
            .await;
        let blacklist = self.stores.blacklists.delete(&guild.key()).await;
        let bans = self
            .stores
            .bans
            .remove_where(|_, b| b.guild_id == guild)
            .await;

        info!(
            %guild,
            triggers = configs.len(),
            channels = channels.len(),
            bans = bans.len(),
            "guild removed; purged its state"
        );

        if !configs.is_empty() {
            persist(&self.stores.configs).await;
        }
        if !channels.is_empty() {
            persist(&self.stores.channels).await;
        }
        if blacklist.is_some() {
            persist(&self.stores.blacklists).await;
        }
        if !bans.is_empty() {
            persist(&self.stores.bans).await;
        }
        Ok(())
    }

    // ============== Bans ==============

    async fn ban(&self, guild: GuildId, actor: UserId, reason: &str) {
        let record = BanRecord {
            guild_id: guild,
            banned_at: Utc::now(),
            reason: reason.to_string(),
        };
        self.stores
            .bans
            .set(BanRecord::key(guild, actor), record)
            .await;
        warn!(%guild, %actor, reason, "actor banned by rate-limit escalation");
        persist(&self.stores.bans).await;
    }

    /// Lift the actor's ban in `guild`. Returns false if there was none.
    pub async fn unban(&self, guild: GuildId, actor: UserId) -> bool {
        if self
            .stores
            .bans
            .delete(&BanRecord::key(guild, actor))
            .await
            .is_none()
        {
            return false;
        }
        self.rate_limiter.lock().await.forget(actor);
        persist(&self.stores.bans).await;
        true
    }

    // ============== Startup / shutdown ==============

    /// Bring persisted state in line with what the platform reports. Must run
    /// before events are accepted.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            migrated_configs: self
                .stores
                .configs
                .update(|m| {
                    m.values_mut()
                        .map(TriggerConfig::migrate_legacy)
                        .filter(|&changed| changed)
                        .count()
                })
                .await,
            migrated_bans: self.migrate_ban_keys().await,
            ..ReconcileReport::default()
        };

        let guilds: HashSet<GuildId> = self.platform.guilds().await.into_iter().collect();
        let mut live: HashMap<ChannelId, VoiceChannel> = HashMap::new();
        for guild in &guilds {
            for ch in self.platform.voice_channels(*guild).await {
                live.insert(ch.id, ch);
            }
        }

        for record in self.stores.channels.values().await {
            if !guilds.contains(&record.guild_id) {
                // Guild unavailable right now; judge it when it comes back.
                continue;
            }
            match live.get(&record.channel_id) {
                None => {
                    self.prune(record.channel_id, "missing on startup").await;
                    report.pruned += 1;
                }
                Some(ch) if ch.is_empty() => {
                    if self.delete_managed(&record).await == LeaveOutcome::Deleted {
                        report.deleted += 1;
                    }
                }
                Some(ch) if !ch.contains(record.owner_id) => {
                    if let Some(to) = pick_owner(&ch.occupants) {
                        self.assign_owner(&record, to).await;
                        report.reassigned += 1;
                    }
                }
                Some(_) => {}
            }
        }

        for (key, config) in self.stores.configs.entries().await {
            let Ok(id) = key.parse::<u64>().map(ChannelId) else {
                continue;
            };
            match live.get(&id) {
                Some(ch) if config.guild_id.is_none() => {
                    let config = TriggerConfig {
                        guild_id: Some(ch.guild_id),
                        ..config
                    };
                    self.stores.configs.set(key, config).await;
                }
                None if config.guild_id.is_some_and(|g| guilds.contains(&g)) => {
                    self.stores.configs.delete(&key).await;
                    report.stale_triggers += 1;
                }
                _ => {}
            }
        }
        persist(&self.stores.configs).await;

        // Members sitting in a trigger while we were away get their channel now.
        let mut occupied_triggers: Vec<&VoiceChannel> = Vec::new();
        for ch in live.values() {
            if !ch.is_empty() && self.stores.configs.contains_key(&ch.id.key()).await {
                occupied_triggers.push(ch);
            }
        }
        for ch in occupied_triggers {
            for &occupant in &ch.occupants {
                match self.on_voice_join(ch.guild_id, ch.id, occupant).await {
                    Ok(JoinOutcome::Created { .. }) => report.created += 1,
                    Ok(_) => {}
                    Err(e) => warn!(channel = %ch.id, user = %occupant, error = %e, "startup join failed"),
                }
            }
        }

        info!(?report, "reconciliation finished");
        Ok(report)
    }

    /// Re-key bans stored under a bare actor id to `guild:actor`.
    async fn migrate_ban_keys(&self) -> usize {
        let migrated = self
            .stores
            .bans
            .mutate(|m| {
                let legacy: Vec<String> = m.keys().filter(|k| !k.contains(':')).cloned().collect();
                for key in &legacy {
                    let Some(ban) = m.remove(key) else {
                        continue;
                    };
                    match key.parse::<u64>() {
                        Ok(actor) => {
                            m.insert(BanRecord::key(ban.guild_id, UserId(actor)), ban);
                        }
                        Err(_) => warn!(key = %key, "dropping ban with an unreadable key"),
                    }
                }
                let n = legacy.len();
                (n, n > 0)
            })
            .await;
        if migrated > 0 {
            persist(&self.stores.bans).await;
        }
        migrated
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting events and flush every store.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.stores.flush().await
    }
}
