//! Discord adapter (serenity).
//!
//! This crate implements the `dvc-core` [`Platform`] port over the Discord
//! gateway cache and HTTP API, and routes gateway events into the core.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    Cache, ChannelType, CreateChannel, CreateMessage, EditChannel, GuildChannel, Http,
    PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, VideoQualityMode,
};
use tracing::debug;

pub mod handlers;
pub mod router;

use dvc_core::{
    domain::{ChannelId, GuildId, UserId},
    errors::Error,
    platform::{
        Category, ChannelEdit, ChannelKind, ChannelSpec, Flag, Grants, OverwriteTarget,
        Permission, Platform, VideoQuality, VoiceChannel,
    },
    Result,
};

#[derive(Clone)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    fn dc_guild(id: GuildId) -> serenity::all::GuildId {
        serenity::all::GuildId::new(id.0)
    }

    fn dc_channel(id: ChannelId) -> serenity::all::ChannelId {
        serenity::all::ChannelId::new(id.0)
    }

    fn dc_user(id: UserId) -> serenity::all::UserId {
        serenity::all::UserId::new(id.0)
    }

    fn map_err(e: serenity::Error) -> Error {
        Error::PlatformRejected(e.to_string())
    }

    fn cached_channel(&self, guild: GuildId, channel: ChannelId) -> Option<GuildChannel> {
        let guild = self.cache.guild(Self::dc_guild(guild))?;
        guild.channels.get(&Self::dc_channel(channel)).cloned()
    }

    fn overwrite_kind(guild: GuildId, target: OverwriteTarget) -> PermissionOverwriteType {
        match target {
            OverwriteTarget::Member(user) => PermissionOverwriteType::Member(Self::dc_user(user)),
            // The @everyone role shares the guild's id.
            OverwriteTarget::Everyone => PermissionOverwriteType::Role(RoleId::new(guild.0)),
        }
    }

    /// Overwrites for a new channel: the source channel's, plus the owner grant.
    fn initial_overwrites(&self, spec: &ChannelSpec) -> Vec<PermissionOverwrite> {
        let mut overwrites = spec
            .inherit_overwrites_from
            .and_then(|src| self.cached_channel(spec.guild_id, src))
            .map(|c| c.permission_overwrites)
            .unwrap_or_default();

        if let Some(owner) = spec.owner {
            let kind = Self::overwrite_kind(spec.guild_id, OverwriteTarget::Member(owner));
            let existing = overwrites
                .iter()
                .position(|o| o.kind == kind)
                .map(|i| overwrites.remove(i));
            overwrites.push(merge_overwrite(existing, kind, &Grants::owner()));
        }
        overwrites
    }
}

fn permission_bits(p: Permission) -> Permissions {
    match p {
        Permission::ManageChannel => Permissions::MANAGE_CHANNELS,
        Permission::ViewChannel => Permissions::VIEW_CHANNEL,
        Permission::Connect => Permissions::CONNECT,
        Permission::Speak => Permissions::SPEAK,
    }
}

/// Apply `grants` on top of an existing overwrite (or an empty one).
fn merge_overwrite(
    existing: Option<PermissionOverwrite>,
    kind: PermissionOverwriteType,
    grants: &Grants,
) -> PermissionOverwrite {
    let (mut allow, mut deny) = existing
        .map(|o| (o.allow, o.deny))
        .unwrap_or((Permissions::empty(), Permissions::empty()));

    for (p, flag) in grants.iter() {
        let bits = permission_bits(p);
        match flag {
            Flag::Allow => {
                allow.insert(bits);
                deny.remove(bits);
            }
            Flag::Deny => {
                deny.insert(bits);
                allow.remove(bits);
            }
            Flag::Inherit => {
                allow.remove(bits);
                deny.remove(bits);
            }
        }
    }

    PermissionOverwrite { allow, deny, kind }
}

fn video_quality(mode: VideoQualityMode) -> Option<VideoQuality> {
    match mode {
        VideoQualityMode::Auto => Some(VideoQuality::Auto),
        VideoQualityMode::Full => Some(VideoQuality::Full),
        _ => None,
    }
}

fn video_quality_mode(quality: VideoQuality) -> VideoQualityMode {
    match quality {
        VideoQuality::Auto => VideoQualityMode::Auto,
        VideoQuality::Full => VideoQualityMode::Full,
    }
}

fn snapshot(guild: &serenity::all::Guild, ch: &GuildChannel) -> VoiceChannel {
    let occupants = guild
        .voice_states
        .values()
        .filter(|v| v.channel_id == Some(ch.id))
        .map(|v| UserId(v.user_id.get()))
        .collect();

    VoiceChannel {
        id: ChannelId(ch.id.get()),
        guild_id: GuildId(ch.guild_id.get()),
        name: ch.name.clone(),
        category_id: ch.parent_id.map(|p| ChannelId(p.get())),
        position: ch.position,
        bitrate: ch.bitrate,
        user_limit: ch.user_limit,
        rtc_region: ch.rtc_region.clone(),
        video_quality: ch.video_quality_mode.and_then(video_quality),
        occupants,
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn guilds(&self) -> Vec<GuildId> {
        self.cache
            .guilds()
            .into_iter()
            .map(|g| GuildId(g.get()))
            .collect()
    }

    async fn voice_channels(&self, guild: GuildId) -> Vec<VoiceChannel> {
        let Some(g) = self.cache.guild(Self::dc_guild(guild)) else {
            return Vec::new();
        };
        g.channels
            .values()
            .filter(|c| c.kind == ChannelType::Voice)
            .map(|c| snapshot(&g, c))
            .collect()
    }

    async fn voice_channel(&self, guild: GuildId, channel: ChannelId) -> Option<VoiceChannel> {
        let g = self.cache.guild(Self::dc_guild(guild))?;
        g.channels
            .get(&Self::dc_channel(channel))
            .filter(|c| c.kind == ChannelType::Voice)
            .map(|c| snapshot(&g, c))
    }

    async fn category(&self, guild: GuildId, channel: ChannelId) -> Option<Category> {
        self.cached_channel(guild, channel)
            .filter(|c| c.kind == ChannelType::Category)
            .map(|c| Category {
                id: channel,
                name: c.name,
            })
    }

    async fn display_name(&self, guild: GuildId, user: UserId) -> Option<String> {
        let cached = self.cache.guild(Self::dc_guild(guild)).and_then(|g| {
            g.members
                .get(&Self::dc_user(user))
                .map(|m| m.display_name().to_string())
        });
        if cached.is_some() {
            return cached;
        }

        match Self::dc_guild(guild)
            .member(&self.http, Self::dc_user(user))
            .await
        {
            Ok(m) => Some(m.display_name().to_string()),
            Err(e) => {
                debug!(%guild, %user, error = %e, "member lookup failed");
                None
            }
        }
    }

    async fn create_channel(&self, spec: ChannelSpec) -> Result<ChannelId> {
        let kind = match spec.kind {
            ChannelKind::Voice => ChannelType::Voice,
            ChannelKind::Category => ChannelType::Category,
        };
        let mut builder = CreateChannel::new(spec.name.clone()).kind(kind);
        if let Some(category) = spec.category_id {
            builder = builder.category(Self::dc_channel(category));
        }
        if let Some(position) = spec.position {
            builder = builder.position(position);
        }
        if let Some(bitrate) = spec.bitrate {
            builder = builder.bitrate(bitrate);
        }
        if let Some(limit) = spec.user_limit {
            builder = builder.user_limit(limit);
        }
        if let Some(region) = spec.rtc_region.clone() {
            builder = builder.rtc_region(region);
        }
        if let Some(quality) = spec.video_quality {
            builder = builder.video_quality_mode(video_quality_mode(quality));
        }
        let overwrites = self.initial_overwrites(&spec);
        if !overwrites.is_empty() {
            builder = builder.permissions(overwrites);
        }

        let created = Self::dc_guild(spec.guild_id)
            .create_channel(&self.http, builder)
            .await
            .map_err(Self::map_err)?;
        Ok(ChannelId(created.id.get()))
    }

    async fn edit_channel(&self, channel: ChannelId, edit: ChannelEdit) -> Result<()> {
        let mut builder = EditChannel::new();
        if let Some(name) = edit.name {
            builder = builder.name(name);
        }
        if let Some(limit) = edit.user_limit {
            builder = builder.user_limit(limit);
        }
        Self::dc_channel(channel)
            .edit(&self.http, builder)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<()> {
        Self::dc_channel(channel)
            .delete(&self.http)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn move_member(
        &self,
        guild: GuildId,
        user: UserId,
        channel: Option<ChannelId>,
    ) -> Result<()> {
        let g = Self::dc_guild(guild);
        let u = Self::dc_user(user);
        match channel {
            Some(ch) => g.move_member(&self.http, u, Self::dc_channel(ch)).await,
            None => g.disconnect_member(&self.http, u).await,
        }
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn set_permission_overwrite(
        &self,
        guild: GuildId,
        channel: ChannelId,
        target: OverwriteTarget,
        grants: Grants,
    ) -> Result<()> {
        let kind = Self::overwrite_kind(guild, target);
        let existing = self.cached_channel(guild, channel).and_then(|c| {
            c.permission_overwrites
                .into_iter()
                .find(|o| o.kind == kind)
        });
        let had_overwrite = existing.is_some();
        let merged = merge_overwrite(existing, kind, &grants);

        let ch = Self::dc_channel(channel);
        if merged.allow.is_empty() && merged.deny.is_empty() {
            if had_overwrite {
                ch.delete_permission(&self.http, kind)
                    .await
                    .map_err(Self::map_err)?;
            }
            return Ok(());
        }
        ch.create_permission(&self.http, merged)
            .await
            .map_err(Self::map_err)
    }

    async fn send_direct_message(&self, user: UserId, text: &str) -> Result<()> {
        Self::dc_user(user)
            .direct_message(&self.http, CreateMessage::new().content(text))
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> PermissionOverwriteType {
        PermissionOverwriteType::Member(serenity::all::UserId::new(id))
    }

    #[test]
    fn owner_grant_merges_into_existing_overwrite() {
        let existing = PermissionOverwrite {
            allow: Permissions::STREAM,
            deny: Permissions::CONNECT,
            kind: member(1),
        };
        let merged = merge_overwrite(Some(existing), member(1), &Grants::owner());

        assert!(merged.allow.contains(Permissions::STREAM));
        assert!(merged.allow.contains(
            Permissions::MANAGE_CHANNELS
                | Permissions::VIEW_CHANNEL
                | Permissions::CONNECT
                | Permissions::SPEAK
        ));
        assert!(merged.deny.is_empty());
    }

    #[test]
    fn inherit_clears_both_sides() {
        let existing = PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::CONNECT | Permissions::VIEW_CHANNEL,
            kind: member(2),
        };
        let merged = merge_overwrite(
            Some(existing),
            member(2),
            &Grants::new().inherit(Permission::Connect),
        );
        assert_eq!(merged.deny, Permissions::VIEW_CHANNEL);
        assert!(merged.allow.is_empty());
    }

    #[test]
    fn video_quality_maps_both_ways() {
        for q in [VideoQuality::Auto, VideoQuality::Full] {
            assert_eq!(video_quality(video_quality_mode(q)), Some(q));
        }
    }

    #[test]
    fn everyone_targets_the_guild_role() {
        let kind = DiscordPlatform::overwrite_kind(GuildId(42), OverwriteTarget::Everyone);
        assert_eq!(kind, PermissionOverwriteType::Role(RoleId::new(42)));
    }
}
