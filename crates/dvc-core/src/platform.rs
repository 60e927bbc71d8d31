use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, GuildId, UserId},
    Result,
};

/// Snapshot of a voice channel as the platform currently sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub category_id: Option<ChannelId>,
    pub position: u16,
    pub bitrate: Option<u32>,
    pub user_limit: Option<u32>,
    /// Voice region override; `None` is automatic.
    pub rtc_region: Option<String>,
    pub video_quality: Option<VideoQuality>,
    /// Members currently connected, in no particular order.
    pub occupants: Vec<UserId>,
}

impl VoiceChannel {
    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.occupants.contains(&user)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Category {
    pub id: ChannelId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoQuality {
    Auto,
    /// 720p
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Voice,
    Category,
}

/// Everything needed to create a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub guild_id: GuildId,
    pub kind: ChannelKind,
    pub name: String,
    pub category_id: Option<ChannelId>,
    /// `None` lets the platform pick (appended at the end).
    pub position: Option<u16>,
    pub bitrate: Option<u32>,
    pub user_limit: Option<u32>,
    pub rtc_region: Option<String>,
    pub video_quality: Option<VideoQuality>,
    /// Copy the permission overwrites of this channel onto the new one.
    pub inherit_overwrites_from: Option<ChannelId>,
    /// Member that receives [`Grants::owner`] on the new channel.
    pub owner: Option<UserId>,
}

impl ChannelSpec {
    pub fn category(guild_id: GuildId, name: impl Into<String>) -> Self {
        Self {
            guild_id,
            kind: ChannelKind::Category,
            name: name.into(),
            category_id: None,
            position: None,
            bitrate: None,
            user_limit: None,
            rtc_region: None,
            video_quality: None,
            inherit_overwrites_from: None,
            owner: None,
        }
    }

    pub fn voice(guild_id: GuildId, name: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Voice,
            ..Self::category(guild_id, name)
        }
    }
}

/// Partial channel edit; `None` fields stay as they are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelEdit {
    pub name: Option<String>,
    pub user_limit: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverwriteTarget {
    Member(UserId),
    /// The guild-wide default role.
    Everyone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    ManageChannel,
    ViewChannel,
    Connect,
    Speak,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flag {
    Allow,
    Deny,
    /// Remove the explicit setting (fall back to role/category permissions).
    Inherit,
}

/// Per-permission changes merged into a target's existing overwrite.
/// Permissions not mentioned keep their current setting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Grants(BTreeMap<Permission, Flag>);

impl Grants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elevated control granted to a channel owner.
    pub fn owner() -> Self {
        Self::new()
            .allow(Permission::ManageChannel)
            .allow(Permission::ViewChannel)
            .allow(Permission::Connect)
            .allow(Permission::Speak)
    }

    /// Undo [`Grants::owner`]'s management right.
    pub fn revoke_owner() -> Self {
        Self::new().inherit(Permission::ManageChannel)
    }

    pub fn allow(self, p: Permission) -> Self {
        self.with(p, Flag::Allow)
    }

    pub fn deny(self, p: Permission) -> Self {
        self.with(p, Flag::Deny)
    }

    pub fn inherit(self, p: Permission) -> Self {
        self.with(p, Flag::Inherit)
    }

    pub fn with(mut self, p: Permission, flag: Flag) -> Self {
        self.0.insert(p, flag);
        self
    }

    pub fn get(&self, p: Permission) -> Option<Flag> {
        self.0.get(&p).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Permission, Flag)> + '_ {
        self.0.iter().map(|(p, f)| (*p, *f))
    }
}

/// Hexagonal port for the chat platform (Discord today).
///
/// Queries read the adapter's view of current state; commands are single
/// attempts and report rejection as an error.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Guilds currently available to the bot.
    async fn guilds(&self) -> Vec<GuildId>;
    async fn voice_channels(&self, guild: GuildId) -> Vec<VoiceChannel>;
    async fn voice_channel(&self, guild: GuildId, channel: ChannelId) -> Option<VoiceChannel>;
    async fn category(&self, guild: GuildId, channel: ChannelId) -> Option<Category>;
    async fn display_name(&self, guild: GuildId, user: UserId) -> Option<String>;

    async fn create_channel(&self, spec: ChannelSpec) -> Result<ChannelId>;
    async fn edit_channel(&self, channel: ChannelId, edit: ChannelEdit) -> Result<()>;
    async fn delete_channel(&self, channel: ChannelId) -> Result<()>;
    /// Move a connected member; `None` disconnects them.
    async fn move_member(
        &self,
        guild: GuildId,
        user: UserId,
        channel: Option<ChannelId>,
    ) -> Result<()>;
    async fn set_permission_overwrite(
        &self,
        guild: GuildId,
        channel: ChannelId,
        target: OverwriteTarget,
        grants: Grants,
    ) -> Result<()>;
    async fn send_direct_message(&self, user: UserId, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_grants_cover_control_permissions() {
        let g = Grants::owner();
        assert_eq!(g.get(Permission::ManageChannel), Some(Flag::Allow));
        assert_eq!(g.get(Permission::Speak), Some(Flag::Allow));
        assert_eq!(g.iter().count(), 4);

        let r = Grants::revoke_owner();
        assert_eq!(r.get(Permission::ManageChannel), Some(Flag::Inherit));
        assert_eq!(r.get(Permission::Connect), None);
    }

    #[test]
    fn later_flags_replace_earlier_ones() {
        let g = Grants::new()
            .deny(Permission::Connect)
            .inherit(Permission::Connect);
        assert_eq!(g.get(Permission::Connect), Some(Flag::Inherit));
    }
}
