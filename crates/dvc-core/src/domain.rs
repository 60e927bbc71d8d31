use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Key used in the persisted JSON documents.
            pub fn key(self) -> String {
                self.0.to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// Platform user (actor) id.
    UserId
);
snowflake!(
    /// Platform channel id (voice channel, text channel or category).
    ChannelId
);
snowflake!(
    /// Platform guild (server) id.
    GuildId
);

/// Where a generated channel is placed relative to its trigger channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Top,
    #[default]
    Bottom,
    Above,
    Below,
}

impl Placement {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "top" => Some(Self::Top),
            "bottom" => Some(Self::Bottom),
            "above" => Some(Self::Above),
            "below" => Some(Self::Below),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Above => "above",
            Self::Below => "below",
        }
    }

    /// Concrete platform position for a channel created next to `trigger_position`.
    ///
    /// `None` lets the platform append the channel at the end of its category.
    pub fn resolve(self, trigger_position: u16) -> Option<u16> {
        match self {
            Self::Top => Some(0),
            Self::Above => Some(trigger_position),
            Self::Below => Some(trigger_position.saturating_add(1)),
            Self::Bottom => None,
        }
    }
}

/// Per-trigger configuration. Only explicitly configured fields are stored;
/// everything else is resolved at naming time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,

    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub name_template: Option<String>,
    #[serde(default, rename = "limit", skip_serializing_if = "Option::is_none")]
    pub user_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(default, rename = "category", skip_serializing_if = "Option::is_none")]
    pub category_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Placement>,

    /// Pre-`position` flag written by old versions; migrated on startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<bool>,
}

impl TriggerConfig {
    pub fn for_guild(guild_id: GuildId) -> Self {
        Self {
            guild_id: Some(guild_id),
            ..Self::default()
        }
    }

    /// Rewrite the legacy `top` flag into `position`. Returns true if changed.
    pub fn migrate_legacy(&mut self) -> bool {
        let Some(top) = self.top.take() else {
            return false;
        };
        if self.position.is_none() {
            self.position = Some(if top {
                Placement::Top
            } else {
                Placement::Bottom
            });
        }
        true
    }
}

/// Record of one auto-created channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedChannel {
    pub channel_id: ChannelId,
    pub owner_id: UserId,
    pub trigger_channel_id: ChannelId,
    pub guild_id: GuildId,
    pub created_at: DateTime<Utc>,
}

/// Actor banned by rate-limit escalation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub guild_id: GuildId,
    pub banned_at: DateTime<Utc>,
    pub reason: String,
}

impl BanRecord {
    /// Store key. Bans only apply in the guild that issued them.
    pub fn key(guild: GuildId, actor: UserId) -> String {
        format!("{guild}:{actor}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_resolves_relative_to_trigger() {
        assert_eq!(Placement::Top.resolve(4), Some(0));
        assert_eq!(Placement::Above.resolve(4), Some(4));
        assert_eq!(Placement::Below.resolve(4), Some(5));
        assert_eq!(Placement::Bottom.resolve(4), None);
        assert_eq!(Placement::parse(" Below "), Some(Placement::Below));
        assert_eq!(Placement::parse("middle"), None);
    }

    #[test]
    fn ban_keys_are_scoped_to_the_guild() {
        assert_eq!(BanRecord::key(GuildId(1), UserId(9)), "1:9");
        assert_ne!(
            BanRecord::key(GuildId(1), UserId(9)),
            BanRecord::key(GuildId(2), UserId(9))
        );
    }

    #[test]
    fn trigger_config_omits_unset_fields() {
        let cfg = TriggerConfig::for_guild(GuildId(7));
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(json, r#"{"guild_id":7}"#);
    }

    #[test]
    fn legacy_top_flag_is_migrated() {
        let mut cfg: TriggerConfig = serde_json::from_str(r#"{"top":true,"limit":5}"#).unwrap();
        assert!(cfg.migrate_legacy());
        assert_eq!(cfg.position, Some(Placement::Top));
        assert_eq!(cfg.user_limit, Some(5));
        assert!(cfg.top.is_none());
        assert!(!cfg.migrate_legacy());

        let mut cfg: TriggerConfig = serde_json::from_str(r#"{"top":false}"#).unwrap();
        cfg.migrate_legacy();
        assert_eq!(cfg.position, Some(Placement::Bottom));
    }
}
