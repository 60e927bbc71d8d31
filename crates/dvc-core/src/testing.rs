//! In-memory [`Platform`] used by the lifecycle and command tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    config::Config,
    domain::{ChannelId, GuildId, UserId},
    errors::Error,
    lifecycle::{LifecycleManager, Stores},
    platform::{
        Category, ChannelEdit, ChannelKind, ChannelSpec, Grants, OverwriteTarget, Platform,
        VideoQuality, VoiceChannel,
    },
    Result,
};

#[derive(Default)]
struct State {
    guilds: Vec<GuildId>,
    voice: BTreeMap<ChannelId, VoiceChannel>,
    categories: BTreeMap<ChannelId, (GuildId, Category)>,
    names: HashMap<UserId, String>,
    next_id: u64,

    created: Vec<ChannelSpec>,
    edits: Vec<(ChannelId, ChannelEdit)>,
    deletes: Vec<ChannelId>,
    moves: Vec<(UserId, Option<ChannelId>)>,
    overwrites: Vec<(ChannelId, OverwriteTarget, Grants)>,
    dms: Vec<(UserId, String)>,

    reject_create: bool,
    reject_delete: bool,
    reject_move: bool,
    category_gate: Option<Gate>,
}

/// Parks a platform call until the test releases it.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl State {
    fn disconnect(&mut self, user: UserId) {
        for ch in self.voice.values_mut() {
            ch.occupants.retain(|u| *u != user);
        }
    }
}

pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_guild(&self, guild: GuildId) {
        self.with(|s| s.guilds.push(guild));
    }

    pub fn add_category(&self, guild: GuildId, id: ChannelId, name: &str) {
        self.with(|s| {
            s.categories.insert(
                id,
                (
                    guild,
                    Category {
                        id,
                        name: name.to_string(),
                    },
                ),
            )
        });
    }

    pub fn add_voice(
        &self,
        guild: GuildId,
        id: ChannelId,
        name: &str,
        category: Option<ChannelId>,
        position: u16,
    ) {
        self.with(|s| {
            s.voice.insert(
                id,
                VoiceChannel {
                    id,
                    guild_id: guild,
                    name: name.to_string(),
                    category_id: category,
                    position,
                    bitrate: Some(64_000),
                    user_limit: None,
                    rtc_region: None,
                    video_quality: None,
                    occupants: Vec::new(),
                },
            )
        });
    }

    pub fn set_name(&self, user: UserId, name: &str) {
        self.with(|s| s.names.insert(user, name.to_string()));
    }

    /// Connect `user` to `channel`, leaving whatever channel they were in.
    pub fn connect(&self, user: UserId, channel: ChannelId) {
        self.with(|s| {
            s.disconnect(user);
            if let Some(ch) = s.voice.get_mut(&channel) {
                ch.occupants.push(user);
            }
        });
    }

    pub fn disconnect(&self, user: UserId) {
        self.with(|s| s.disconnect(user));
    }

    pub fn set_voice_options(
        &self,
        channel: ChannelId,
        rtc_region: Option<&str>,
        video_quality: Option<VideoQuality>,
    ) {
        self.with(|s| {
            if let Some(ch) = s.voice.get_mut(&channel) {
                ch.rtc_region = rtc_region.map(str::to_string);
                ch.video_quality = video_quality;
            }
        });
    }

    pub fn occupants(&self, channel: ChannelId) -> Vec<UserId> {
        self.with(|s| {
            s.voice
                .get(&channel)
                .map(|c| c.occupants.clone())
                .unwrap_or_default()
        })
    }

    pub fn has_channel(&self, channel: ChannelId) -> bool {
        self.with(|s| s.voice.contains_key(&channel) || s.categories.contains_key(&channel))
    }

    pub fn channel(&self, channel: ChannelId) -> Option<VoiceChannel> {
        self.with(|s| s.voice.get(&channel).cloned())
    }

    pub fn reject_create(&self, on: bool) {
        self.with(|s| s.reject_create = on);
    }

    pub fn reject_delete(&self, on: bool) {
        self.with(|s| s.reject_delete = on);
    }

    pub fn reject_move(&self, on: bool) {
        self.with(|s| s.reject_move = on);
    }

    /// Every later `category` lookup signals `entered` and waits for `release`.
    pub fn hold_category_lookups(&self) -> Gate {
        let gate = Gate::default();
        self.with(|s| s.category_gate = Some(gate.clone()));
        gate
    }

    pub fn created_specs(&self) -> Vec<ChannelSpec> {
        self.with(|s| s.created.clone())
    }

    pub fn edits(&self) -> Vec<(ChannelId, ChannelEdit)> {
        self.with(|s| s.edits.clone())
    }

    pub fn deletes(&self) -> Vec<ChannelId> {
        self.with(|s| s.deletes.clone())
    }

    pub fn moves(&self) -> Vec<(UserId, Option<ChannelId>)> {
        self.with(|s| s.moves.clone())
    }

    pub fn overwrites(&self) -> Vec<(ChannelId, OverwriteTarget, Grants)> {
        self.with(|s| s.overwrites.clone())
    }

    pub fn direct_messages(&self) -> Vec<(UserId, String)> {
        self.with(|s| s.dms.clone())
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn guilds(&self) -> Vec<GuildId> {
        self.with(|s| s.guilds.clone())
    }

    async fn voice_channels(&self, guild: GuildId) -> Vec<VoiceChannel> {
        self.with(|s| {
            s.voice
                .values()
                .filter(|c| c.guild_id == guild)
                .cloned()
                .collect()
        })
    }

    async fn voice_channel(&self, guild: GuildId, channel: ChannelId) -> Option<VoiceChannel> {
        self.with(|s| s.voice.get(&channel).filter(|c| c.guild_id == guild).cloned())
    }

    async fn category(&self, guild: GuildId, channel: ChannelId) -> Option<Category> {
        if let Some(gate) = self.with(|s| s.category_gate.clone()) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.with(|s| {
            s.categories
                .get(&channel)
                .filter(|(g, _)| *g == guild)
                .map(|(_, c)| c.clone())
        })
    }

    async fn display_name(&self, _guild: GuildId, user: UserId) -> Option<String> {
        self.with(|s| s.names.get(&user).cloned())
    }

    async fn create_channel(&self, spec: ChannelSpec) -> Result<ChannelId> {
        self.with(|s| {
            if s.reject_create {
                return Err(Error::PlatformRejected("Missing Permissions".to_string()));
            }
            s.next_id += 1;
            let id = ChannelId(s.next_id);
            match spec.kind {
                ChannelKind::Category => {
                    s.categories.insert(
                        id,
                        (
                            spec.guild_id,
                            Category {
                                id,
                                name: spec.name.clone(),
                            },
                        ),
                    );
                }
                ChannelKind::Voice => {
                    let position = spec.position.unwrap_or_else(|| {
                        s.voice
                            .values()
                            .filter(|c| c.category_id == spec.category_id)
                            .map(|c| c.position + 1)
                            .max()
                            .unwrap_or(0)
                    });
                    s.voice.insert(
                        id,
                        VoiceChannel {
                            id,
                            guild_id: spec.guild_id,
                            name: spec.name.clone(),
                            category_id: spec.category_id,
                            position,
                            bitrate: spec.bitrate,
                            user_limit: spec.user_limit,
                            rtc_region: spec.rtc_region.clone(),
                            video_quality: spec.video_quality,
                            occupants: Vec::new(),
                        },
                    );
                }
            }
            s.created.push(spec);
            Ok(id)
        })
    }

    async fn edit_channel(&self, channel: ChannelId, edit: ChannelEdit) -> Result<()> {
        self.with(|s| {
            let ch = s
                .voice
                .get_mut(&channel)
                .ok_or_else(|| Error::PlatformRejected("Unknown Channel".to_string()))?;
            if let Some(name) = &edit.name {
                ch.name = name.clone();
            }
            if let Some(limit) = edit.user_limit {
                ch.user_limit = Some(limit);
            }
            s.edits.push((channel, edit));
            Ok(())
        })
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<()> {
        self.with(|s| {
            if s.reject_delete {
                return Err(Error::PlatformRejected("Missing Permissions".to_string()));
            }
            if s.voice.remove(&channel).is_none() && s.categories.remove(&channel).is_none() {
                return Err(Error::PlatformRejected("Unknown Channel".to_string()));
            }
            s.deletes.push(channel);
            Ok(())
        })
    }

    async fn move_member(
        &self,
        _guild: GuildId,
        user: UserId,
        channel: Option<ChannelId>,
    ) -> Result<()> {
        self.with(|s| {
            if s.reject_move {
                return Err(Error::PlatformRejected("Target user is not connected to voice.".to_string()));
            }
            s.disconnect(user);
            if let Some(ch) = channel.and_then(|c| s.voice.get_mut(&c)) {
                ch.occupants.push(user);
            }
            s.moves.push((user, channel));
            Ok(())
        })
    }

    async fn set_permission_overwrite(
        &self,
        _guild: GuildId,
        channel: ChannelId,
        target: OverwriteTarget,
        grants: Grants,
    ) -> Result<()> {
        self.with(|s| s.overwrites.push((channel, target, grants)));
        Ok(())
    }

    async fn send_direct_message(&self, user: UserId, text: &str) -> Result<()> {
        self.with(|s| s.dms.push((user, text.to_string())));
        Ok(())
    }
}

/// Manager over fresh stores in a temp dir. Keep the dir alive for the test.
pub async fn harness(platform: Arc<FakePlatform>) -> (tempfile::TempDir, LifecycleManager) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Arc::new(Config::with_data_dir(dir.path()));
    let stores = Stores::open(&cfg).await.unwrap();
    (dir, LifecycleManager::new(cfg, stores, platform))
}
