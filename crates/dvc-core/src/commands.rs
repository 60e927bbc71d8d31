//! Text commands.
//!
//! The adapter strips the prefix and hands the rest of the message to
//! [`dispatch`] together with what it knows about the invoker. Every command is
//! declared once in [`COMMANDS`] with its requirement; the requirement is
//! checked before the handler runs.

use tracing::{info, warn};

use crate::{
    domain::{ChannelId, GuildId, ManagedChannel, Placement, TriggerConfig, UserId},
    errors::Error,
    lifecycle::{persist, resolve_settings, LifecycleManager},
    naming,
    platform::{ChannelEdit, ChannelSpec, Grants, OverwriteTarget, Permission},
    Result,
};

pub const SETUP_CATEGORY_NAME: &str = "Dynamic Voice Channels";
pub const SETUP_TRIGGER_NAME: &str = "join me";

const NAME_CHARS: std::ops::RangeInclusive<usize> = 2..=naming::MAX_NAME_LEN;
const USER_LIMIT: std::ops::RangeInclusive<u32> = 0..=99;
const BITRATE: std::ops::RangeInclusive<u32> = 8_000..=384_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Anyone,
    /// Invoker is connected to a managed channel.
    InVoice,
    /// Invoker is connected to a managed channel and owns it.
    ChannelOwner,
    ManageGuild,
    Administrator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Setup,
    Add,
    Remove,
    Clear,
    List,
    Set,
    Blacklist,
    Unban,
    Name,
    Limit,
    Lock,
    Unlock,
    Hide,
    Unhide,
    Kick,
    Reject,
    Permit,
    Transfer,
    Claim,
    Help,
}

#[derive(Debug)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub summary: &'static str,
    pub requirement: Requirement,
}

macro_rules! command {
    ($kind:ident, $name:literal, [$($alias:literal),*], $usage:literal, $summary:literal, $req:ident) => {
        CommandSpec {
            kind: CommandKind::$kind,
            name: $name,
            aliases: &[$($alias),*],
            usage: $usage,
            summary: $summary,
            requirement: Requirement::$req,
        }
    };
}

pub static COMMANDS: &[CommandSpec] = &[
    command!(Setup, "setup", [], "setup", "Create a category with a trigger channel", Administrator),
    command!(Add, "add", [], "add <channel>", "Register a voice channel as trigger", Administrator),
    command!(Remove, "remove", ["rm"], "remove <channel>", "Unregister a trigger", Administrator),
    command!(Clear, "clear", [], "clear", "Unregister every trigger", Administrator),
    command!(List, "list", ["triggers"], "list", "Show triggers and their settings", Administrator),
    command!(
        Set,
        "set",
        ["edit"],
        "set <channel> <name|limit|bitrate|category|position> <value|reset>",
        "Change a trigger setting",
        Administrator
    ),
    command!(
        Blacklist,
        "blacklist",
        ["bl"],
        "blacklist <add|remove|clear|show> [word]",
        "Manage words masked in channel names",
        ManageGuild
    ),
    command!(Unban, "unban", [], "unban <user>", "Lift a rate-limit ban", Administrator),
    command!(Name, "name", ["rename"], "name <text>", "Rename your channel", ChannelOwner),
    command!(Limit, "limit", [], "limit <0-99>", "Set your channel's user limit", ChannelOwner),
    command!(Lock, "lock", [], "lock", "Stop others from joining", ChannelOwner),
    command!(Unlock, "unlock", [], "unlock", "Let everyone join again", ChannelOwner),
    command!(Hide, "hide", [], "hide", "Hide your channel", ChannelOwner),
    command!(Unhide, "unhide", ["show"], "unhide", "Make your channel visible", ChannelOwner),
    command!(Kick, "kick", [], "kick <user>", "Disconnect a member", ChannelOwner),
    command!(Reject, "reject", ["block"], "reject <user>", "Deny a member access", ChannelOwner),
    command!(Permit, "permit", ["allow"], "permit <user>", "Allow a member to join", ChannelOwner),
    command!(Transfer, "transfer", ["give"], "transfer <user>", "Hand over ownership", ChannelOwner),
    command!(Claim, "claim", [], "claim", "Take over a channel whose owner left", InVoice),
    command!(Help, "help", [], "help", "List commands", Anyone),
];

pub fn lookup(word: &str) -> Option<&'static CommandSpec> {
    let word = word.to_lowercase();
    COMMANDS
        .iter()
        .find(|c| c.name == word || c.aliases.contains(&word.as_str()))
}

/// Guild permissions of the invoker, as resolved by the adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub administrator: bool,
    pub manage_guild: bool,
}

#[derive(Clone, Debug)]
pub struct CommandContext {
    pub guild: GuildId,
    pub actor: UserId,
    /// Voice channel the invoker is connected to, if any.
    pub voice_channel: Option<ChannelId>,
    pub capabilities: Capabilities,
    pub prefix: String,
}

/// Run one command line (prefix already stripped).
///
/// Returns `None` when the first word is not a known command.
pub async fn dispatch(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    line: &str,
) -> Option<Result<String>> {
    let mut words = line.split_whitespace();
    let spec = lookup(words.next()?)?;
    let args: Vec<&str> = words.collect();

    let res = match authorize(mgr, ctx, spec.requirement).await {
        Ok(managed) => run(mgr, ctx, spec, &args, managed).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &res {
        if !matches!(e, Error::Command(_) | Error::PermissionDenied(_)) {
            warn!(command = spec.name, guild = %ctx.guild, actor = %ctx.actor, error = %e, "command failed");
        }
    }
    Some(res)
}

/// Text shown to the invoker for a failed command.
pub fn reply_for(err: &Error) -> String {
    match err {
        Error::Command(msg) => msg.clone(),
        Error::PermissionDenied(msg) => format!("You can't do that: {msg}."),
        Error::PlatformRejected(msg) => format!("Discord rejected the request: {msg}"),
        _ => "Something went wrong. Try again later.".to_string(),
    }
}

async fn authorize(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    requirement: Requirement,
) -> Result<Option<ManagedChannel>> {
    let caps = ctx.capabilities;
    match requirement {
        Requirement::Anyone => Ok(None),
        Requirement::Administrator if caps.administrator => Ok(None),
        Requirement::Administrator => Err(Error::PermissionDenied(
            "this command needs the Administrator permission".to_string(),
        )),
        Requirement::ManageGuild if caps.manage_guild || caps.administrator => Ok(None),
        Requirement::ManageGuild => Err(Error::PermissionDenied(
            "this command needs the Manage Server permission".to_string(),
        )),
        Requirement::InVoice | Requirement::ChannelOwner => {
            let managed = match ctx.voice_channel {
                Some(ch) => mgr.managed(ch).await,
                None => None,
            };
            let Some(managed) = managed else {
                return Err(Error::command(
                    "You have to be in a dynamic voice channel to use this command.",
                ));
            };
            if requirement == Requirement::ChannelOwner && managed.owner_id != ctx.actor {
                return Err(Error::PermissionDenied(
                    "you are not the owner of this voice channel".to_string(),
                ));
            }
            Ok(Some(managed))
        }
    }
}

async fn run(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    spec: &CommandSpec,
    args: &[&str],
    managed: Option<ManagedChannel>,
) -> Result<String> {
    let usage = || Error::command(format!("Usage: `{}{}`", ctx.prefix, spec.usage));

    // Voice commands always carry the invoker's managed channel.
    let owned = || {
        managed
            .clone()
            .ok_or_else(|| Error::InconsistentState("voice command without a channel".to_string()))
    };

    match spec.kind {
        CommandKind::Setup => setup(mgr, ctx).await,
        CommandKind::Add => add_trigger(mgr, ctx, parse_channel(args.first().ok_or_else(usage)?)).await,
        CommandKind::Remove => remove_trigger(mgr, ctx, parse_channel(args.first().ok_or_else(usage)?)).await,
        CommandKind::Clear => clear_triggers(mgr, ctx).await,
        CommandKind::List => list_triggers(mgr, ctx).await,
        CommandKind::Set => match args {
            [channel, field, value @ ..] if !value.is_empty() => {
                set_field(mgr, ctx, parse_channel(channel), field, &value.join(" ")).await
            }
            _ => Err(usage()),
        },
        CommandKind::Blacklist => blacklist(mgr, ctx, args).await.map_err(|e| match e {
            Error::Command(m) if m.is_empty() => usage(),
            e => e,
        }),
        CommandKind::Unban => {
            let user = parse_user(args.first().ok_or_else(usage)?).ok_or_else(usage)?;
            if mgr.unban(ctx.guild, user).await {
                info!(guild = %ctx.guild, %user, by = %ctx.actor, "ban lifted");
                Ok(format!("<@{user}> can create channels again."))
            } else {
                Err(Error::command(format!("<@{user}> is not banned.")))
            }
        }
        CommandKind::Name => rename(mgr, ctx, &owned()?, &args.join(" ")).await,
        CommandKind::Limit => {
            let limit = args
                .first()
                .and_then(|a| a.parse::<u32>().ok())
                .filter(|l| USER_LIMIT.contains(l))
                .ok_or_else(usage)?;
            mgr.platform()
                .edit_channel(
                    owned()?.channel_id,
                    ChannelEdit {
                        user_limit: Some(limit),
                        ..ChannelEdit::default()
                    },
                )
                .await?;
            Ok(if limit == 0 {
                "Removed the user limit.".to_string()
            } else {
                format!("Set the user limit to {limit}.")
            })
        }
        CommandKind::Lock => {
            everyone(mgr, &owned()?, Grants::new().deny(Permission::Connect)).await?;
            Ok("Locked the channel.".to_string())
        }
        CommandKind::Unlock => {
            everyone(mgr, &owned()?, Grants::new().inherit(Permission::Connect)).await?;
            Ok("Unlocked the channel.".to_string())
        }
        CommandKind::Hide => {
            everyone(mgr, &owned()?, Grants::new().deny(Permission::ViewChannel)).await?;
            Ok("The channel is hidden now.".to_string())
        }
        CommandKind::Unhide => {
            everyone(mgr, &owned()?, Grants::new().inherit(Permission::ViewChannel)).await?;
            Ok("The channel is visible again.".to_string())
        }
        CommandKind::Kick | CommandKind::Reject | CommandKind::Permit | CommandKind::Transfer => {
            let target = args.first().and_then(|a| parse_user(a)).ok_or_else(usage)?;
            member_action(mgr, ctx, spec.kind, &owned()?, target).await
        }
        CommandKind::Claim => {
            let record = owned()?;
            mgr.claim(ctx.guild, record.channel_id, ctx.actor).await?;
            Ok(format!("<@{}> now owns this channel.", ctx.actor))
        }
        CommandKind::Help => Ok(help(&ctx.prefix)),
    }
}

// ============== Trigger administration ==============

async fn trigger_count(mgr: &LifecycleManager, guild: GuildId) -> usize {
    mgr.stores()
        .configs
        .read(|m| m.values().filter(|c| c.guild_id == Some(guild)).count())
        .await
}

async fn ensure_trigger_capacity(mgr: &LifecycleManager, guild: GuildId) -> Result<()> {
    let max = mgr.config().max_triggers_per_guild;
    if trigger_count(mgr, guild).await >= max {
        return Err(Error::command(format!(
            "This server already has the maximum of {max} trigger channels."
        )));
    }
    Ok(())
}

async fn setup(mgr: &LifecycleManager, ctx: &CommandContext) -> Result<String> {
    ensure_trigger_capacity(mgr, ctx.guild).await?;

    let platform = mgr.platform();
    let category = platform
        .create_channel(ChannelSpec::category(ctx.guild, SETUP_CATEGORY_NAME))
        .await?;
    let trigger = platform
        .create_channel(ChannelSpec {
            category_id: Some(category),
            ..ChannelSpec::voice(ctx.guild, SETUP_TRIGGER_NAME)
        })
        .await?;

    mgr.stores()
        .configs
        .set(trigger.key(), TriggerConfig::for_guild(ctx.guild))
        .await;
    persist(&mgr.stores().configs).await;
    info!(guild = %ctx.guild, %trigger, by = %ctx.actor, "trigger channel set up");

    Ok(format!("Created <#{trigger}>. Join it to get your own voice channel."))
}

async fn add_trigger(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    channel: Option<ChannelId>,
) -> Result<String> {
    let channel = channel.ok_or_else(|| Error::command("Mention a voice channel or give its id."))?;
    if mgr.platform().voice_channel(ctx.guild, channel).await.is_none() {
        return Err(Error::command("That is not a voice channel in this server."));
    }
    if mgr.managed(channel).await.is_some() {
        return Err(Error::command("A dynamic voice channel can't be a trigger."));
    }
    if mgr.stores().configs.contains_key(&channel.key()).await {
        return Err(Error::command(format!("<#{channel}> is already a trigger channel.")));
    }
    ensure_trigger_capacity(mgr, ctx.guild).await?;

    mgr.stores()
        .configs
        .set(channel.key(), TriggerConfig::for_guild(ctx.guild))
        .await;
    persist(&mgr.stores().configs).await;
    info!(guild = %ctx.guild, trigger = %channel, by = %ctx.actor, "trigger added");
    Ok(format!("<#{channel}> is now a trigger channel."))
}

async fn guild_trigger(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    channel: Option<ChannelId>,
) -> Result<(ChannelId, TriggerConfig)> {
    let channel = channel.ok_or_else(|| Error::command("Mention a voice channel or give its id."))?;
    match mgr.stores().configs.get(&channel.key()).await {
        Some(cfg) if cfg.guild_id.is_none() || cfg.guild_id == Some(ctx.guild) => Ok((channel, cfg)),
        _ => Err(Error::command(format!("<#{channel}> is not a trigger channel."))),
    }
}

async fn remove_trigger(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    channel: Option<ChannelId>,
) -> Result<String> {
    let (channel, _) = guild_trigger(mgr, ctx, channel).await?;
    mgr.stores().configs.delete(&channel.key()).await;
    persist(&mgr.stores().configs).await;
    info!(guild = %ctx.guild, trigger = %channel, by = %ctx.actor, "trigger removed");
    Ok(format!("<#{channel}> is no longer a trigger channel."))
}

async fn clear_triggers(mgr: &LifecycleManager, ctx: &CommandContext) -> Result<String> {
    let removed = mgr
        .stores()
        .configs
        .remove_where(|_, c| c.guild_id == Some(ctx.guild))
        .await;
    if removed.is_empty() {
        return Ok("There are no trigger channels to remove.".to_string());
    }
    persist(&mgr.stores().configs).await;
    info!(guild = %ctx.guild, count = removed.len(), by = %ctx.actor, "triggers cleared");
    Ok(format!("Removed {} trigger channel(s).", removed.len()))
}

async fn list_triggers(mgr: &LifecycleManager, ctx: &CommandContext) -> Result<String> {
    let triggers: Vec<(String, TriggerConfig)> = mgr
        .stores()
        .configs
        .entries()
        .await
        .into_iter()
        .filter(|(_, c)| c.guild_id == Some(ctx.guild))
        .collect();
    if triggers.is_empty() {
        return Ok(format!(
            "No trigger channels yet. Use `{}setup` or `{}add <channel>`.",
            ctx.prefix, ctx.prefix
        ));
    }

    let mut lines = Vec::with_capacity(triggers.len());
    for (key, cfg) in triggers {
        let Ok(id) = key.parse::<u64>().map(ChannelId) else {
            continue;
        };
        let Some(trigger) = mgr.platform().voice_channel(ctx.guild, id).await else {
            lines.push(format!("<#{id}> (missing)"));
            continue;
        };
        let s = resolve_settings(&cfg, &trigger, &mgr.config().default_name_template);
        let limit = match s.user_limit {
            None | Some(0) => "none".to_string(),
            Some(n) => n.to_string(),
        };
        let bitrate = s
            .bitrate
            .map(|b| format!("{}kbps", b / 1000))
            .unwrap_or_else(|| "default".to_string());
        let category = s
            .category_id
            .map(|c| format!("<#{c}>"))
            .unwrap_or_else(|| "none".to_string());
        lines.push(format!(
            "<#{id}>: name `{}`, limit {limit}, bitrate {bitrate}, category {category}, position {}",
            s.name_template,
            s.position.as_str()
        ));
    }
    Ok(lines.join("\n"))
}

/// One validated trigger setting change.
#[derive(Clone, Debug, PartialEq, Eq)]
enum SettingChange {
    Name(Option<String>),
    Limit(Option<u32>),
    Bitrate(Option<u32>),
    Category(Option<ChannelId>),
    Position(Option<Placement>),
}

impl SettingChange {
    fn apply(self, cfg: &mut TriggerConfig) {
        match self {
            Self::Name(v) => cfg.name_template = v,
            Self::Limit(v) => cfg.user_limit = v,
            Self::Bitrate(v) => cfg.bitrate = v,
            Self::Category(v) => cfg.category_id = v,
            Self::Position(v) => cfg.position = v,
        }
    }
}

async fn parse_setting(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    field: &str,
    value: &str,
) -> Result<SettingChange> {
    let reset = value.eq_ignore_ascii_case("reset");
    let change = match field {
        "name" if reset => SettingChange::Name(None),
        "name" => {
            if !NAME_CHARS.contains(&value.chars().count()) {
                return Err(Error::command("Names must be 2 to 100 characters long."));
            }
            SettingChange::Name(Some(value.to_string()))
        }
        "limit" if reset => SettingChange::Limit(None),
        "limit" => {
            let limit = value
                .parse::<u32>()
                .ok()
                .filter(|l| USER_LIMIT.contains(l))
                .ok_or_else(|| Error::command("The limit must be a number from 0 to 99."))?;
            SettingChange::Limit(Some(limit))
        }
        "bitrate" if reset => SettingChange::Bitrate(None),
        "bitrate" => {
            let bitrate = value
                .parse::<u32>()
                .ok()
                .filter(|b| BITRATE.contains(b))
                .ok_or_else(|| Error::command("The bitrate must be from 8000 to 384000."))?;
            SettingChange::Bitrate(Some(bitrate))
        }
        "category" if reset => SettingChange::Category(None),
        "category" => {
            let category = parse_channel(value)
                .ok_or_else(|| Error::command("Give the category's id."))?;
            if mgr.platform().category(ctx.guild, category).await.is_none() {
                return Err(Error::command("That category doesn't exist in this server."));
            }
            SettingChange::Category(Some(category))
        }
        "position" if reset => SettingChange::Position(None),
        "position" => {
            let position = Placement::parse(value)
                .ok_or_else(|| Error::command("Position must be top, bottom, above or below."))?;
            SettingChange::Position(Some(position))
        }
        _ => {
            return Err(Error::command(
                "Unknown setting. Use name, limit, bitrate, category or position.",
            ))
        }
    };
    Ok(change)
}

async fn set_field(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    channel: Option<ChannelId>,
    field: &str,
    value: &str,
) -> Result<String> {
    let (channel, _) = guild_trigger(mgr, ctx, channel).await?;
    let field = field.to_lowercase();
    let change = parse_setting(mgr, ctx, &field, value).await?;
    let reset = value.eq_ignore_ascii_case("reset");

    // Validation awaited the platform; the trigger may be gone by now.
    let key = channel.key();
    let applied = mgr
        .stores()
        .configs
        .mutate(|m| match m.get_mut(&key) {
            Some(cfg) => {
                change.apply(cfg);
                cfg.guild_id.get_or_insert(ctx.guild);
                (true, true)
            }
            None => (false, false),
        })
        .await;
    if !applied {
        return Err(Error::command(format!("<#{channel}> is no longer a trigger channel.")));
    }
    persist(&mgr.stores().configs).await;

    Ok(if reset {
        format!("Reset `{field}` for <#{channel}>.")
    } else {
        format!("Set `{field}` for <#{channel}> to `{value}`.")
    })
}

async fn blacklist(mgr: &LifecycleManager, ctx: &CommandContext, args: &[&str]) -> Result<String> {
    let store = &mgr.stores().blacklists;
    let key = ctx.guild.key();

    let (action, word) = match args {
        [action] => (action.to_lowercase(), None),
        [action, rest @ ..] => (action.to_lowercase(), Some(rest.join(" "))),
        // Empty message: caller swaps in the usage line.
        [] => return Err(Error::command("")),
    };

    // Edits happen inside one store mutation so concurrent ones can't drop each other.
    match (action.as_str(), word) {
        ("add", Some(word)) => {
            let added = store
                .mutate(|m| {
                    let words = m.entry(key).or_default();
                    if words.iter().any(|w| w.eq_ignore_ascii_case(&word)) {
                        return (false, false);
                    }
                    words.push(word.clone());
                    (true, true)
                })
                .await;
            if !added {
                return Err(Error::command(format!("`{word}` is already blacklisted.")));
            }
            persist(store).await;
            Ok(format!("Added `{word}` to the blacklist."))
        }
        ("remove", Some(word)) => {
            let removed = store
                .mutate(|m| {
                    let Some(words) = m.get_mut(&key) else {
                        return (false, false);
                    };
                    let before = words.len();
                    words.retain(|w| !w.eq_ignore_ascii_case(&word));
                    let removed = words.len() != before;
                    if words.is_empty() {
                        m.remove(&key);
                    }
                    (removed, removed)
                })
                .await;
            if !removed {
                return Err(Error::command(format!("`{word}` is not blacklisted.")));
            }
            persist(store).await;
            Ok(format!("Removed `{word}` from the blacklist."))
        }
        ("clear", None) => {
            if store.delete(&key).await.is_some() {
                persist(store).await;
            }
            Ok("Cleared the blacklist.".to_string())
        }
        ("show", None) => {
            let words = store.get(&key).await.unwrap_or_default();
            Ok(if words.is_empty() {
                "The blacklist is empty.".to_string()
            } else {
                let list: Vec<String> = words.iter().map(|w| format!("`{w}`")).collect();
                format!("Blacklisted words: {}", list.join(", "))
            })
        }
        _ => Err(Error::command("")),
    }
}

// ============== Owner commands ==============

async fn rename(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    record: &ManagedChannel,
    text: &str,
) -> Result<String> {
    if !NAME_CHARS.contains(&text.chars().count()) {
        return Err(Error::command("Names must be 2 to 100 characters long."));
    }
    let blacklist = mgr
        .stores()
        .blacklists
        .get(&ctx.guild.key())
        .await
        .unwrap_or_default();
    let name = naming::truncate(naming::censor(text, &blacklist));

    mgr.platform()
        .edit_channel(
            record.channel_id,
            ChannelEdit {
                name: Some(name.clone()),
                ..ChannelEdit::default()
            },
        )
        .await?;
    Ok(format!("Renamed the channel to `{name}`."))
}

async fn everyone(mgr: &LifecycleManager, record: &ManagedChannel, grants: Grants) -> Result<()> {
    mgr.platform()
        .set_permission_overwrite(
            record.guild_id,
            record.channel_id,
            OverwriteTarget::Everyone,
            grants,
        )
        .await
}

async fn member_action(
    mgr: &LifecycleManager,
    ctx: &CommandContext,
    kind: CommandKind,
    record: &ManagedChannel,
    target: UserId,
) -> Result<String> {
    if target == ctx.actor {
        return Err(Error::command("You can't do that to yourself."));
    }
    let platform = mgr.platform();
    let present = platform
        .voice_channel(ctx.guild, record.channel_id)
        .await
        .is_some_and(|c| c.contains(target));

    match kind {
        CommandKind::Kick => {
            if !present {
                return Err(Error::command("This member is not in your voice channel."));
            }
            platform.move_member(ctx.guild, target, None).await?;
            Ok(format!("Kicked <@{target}>."))
        }
        CommandKind::Reject => {
            platform
                .set_permission_overwrite(
                    ctx.guild,
                    record.channel_id,
                    OverwriteTarget::Member(target),
                    Grants::new().deny(Permission::Connect),
                )
                .await?;
            if present {
                platform.move_member(ctx.guild, target, None).await?;
            }
            Ok(format!("<@{target}> can no longer join."))
        }
        CommandKind::Permit => {
            platform
                .set_permission_overwrite(
                    ctx.guild,
                    record.channel_id,
                    OverwriteTarget::Member(target),
                    Grants::new()
                        .allow(Permission::Connect)
                        .allow(Permission::ViewChannel),
                )
                .await?;
            Ok(format!("<@{target}> can join now."))
        }
        CommandKind::Transfer => {
            mgr.transfer_ownership(ctx.guild, record.channel_id, ctx.actor, target)
                .await?;
            Ok(format!("<@{target}> now owns this channel."))
        }
        _ => Err(Error::InconsistentState(format!("{kind:?} is not a member action"))),
    }
}

fn help(prefix: &str) -> String {
    COMMANDS
        .iter()
        .map(|c| format!("`{prefix}{}`: {}", c.usage, c.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============== Argument parsing ==============

fn parse_id(arg: &str, opening: &[&str]) -> Option<u64> {
    if let Some(inner) = arg.strip_prefix('<').and_then(|a| a.strip_suffix('>')) {
        let inner = opening.iter().find_map(|o| inner.strip_prefix(o))?;
        return inner.parse().ok().filter(|id| *id != 0);
    }
    arg.parse().ok().filter(|id| *id != 0)
}

/// `<#id>` or a raw id.
pub fn parse_channel(arg: &str) -> Option<ChannelId> {
    parse_id(arg, &["#"]).map(ChannelId)
}

/// `<@id>`, `<@!id>` or a raw id.
pub fn parse_user(arg: &str) -> Option<UserId> {
    parse_id(arg, &["@!", "@"]).map(UserId)
}
