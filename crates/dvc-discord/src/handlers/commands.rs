use serenity::all::{Context, GuildId, Member, Message, Permissions, UserId};
use tracing::{debug, warn};

use dvc_core::{
    commands::{dispatch, reply_for, Capabilities, CommandContext},
    domain,
};

use crate::router::AppState;

/// Discord's message length limit, in characters.
const MAX_MESSAGE_LEN: usize = 2000;

pub(crate) async fn handle_message(ctx: &Context, msg: &Message, state: &AppState) {
    if msg.author.bot {
        return;
    }
    let Some(guild) = msg.guild_id else {
        return;
    };
    let Some(line) = msg.content.strip_prefix(state.cfg.command_prefix.as_str()) else {
        return;
    };
    let Some(mgr) = state.manager() else {
        debug!("command before startup finished; ignoring");
        return;
    };

    let Some(invocation) = command_context(ctx, guild, msg.author.id, &state.cfg.command_prefix).await
    else {
        return;
    };

    let Some(res) = dispatch(mgr, &invocation, line).await else {
        return;
    };
    let text = match res {
        Ok(text) => text,
        Err(e) => reply_for(&e),
    };

    for chunk in split_message(&text, MAX_MESSAGE_LEN) {
        if let Err(e) = msg.channel_id.say(&ctx.http, chunk).await {
            warn!(channel = %msg.channel_id, error = %e, "failed to send reply");
            break;
        }
    }
}

async fn command_context(
    ctx: &Context,
    guild: GuildId,
    user: UserId,
    prefix: &str,
) -> Option<CommandContext> {
    let cached: Option<Member> = ctx
        .cache
        .guild(guild)
        .and_then(|g| g.members.get(&user).cloned());
    let member = match cached {
        Some(m) => m,
        None => match guild.member(&ctx.http, user).await {
            Ok(m) => m,
            Err(e) => {
                debug!(%guild, %user, error = %e, "could not resolve command author");
                return None;
            }
        },
    };

    let g = ctx.cache.guild(guild)?;
    let perms = g.member_permissions(&member);
    let voice_channel = g
        .voice_states
        .get(&user)
        .and_then(|v| v.channel_id)
        .map(|c| domain::ChannelId(c.get()));

    Some(CommandContext {
        guild: domain::GuildId(guild.get()),
        actor: domain::UserId(user.get()),
        voice_channel,
        capabilities: Capabilities {
            administrator: perms.contains(Permissions::ADMINISTRATOR),
            manage_guild: perms.contains(Permissions::MANAGE_GUILD),
        },
        prefix: prefix.to_string(),
    })
}

/// Split on line boundaries; single lines longer than `limit` are hard-cut.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();

    for line in text.lines() {
        let mut line = line.to_string();
        while line.chars().count() > limit {
            let head: String = line.chars().take(limit).collect();
            line = line.chars().skip(limit).collect();
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            out.push(head);
        }

        let needed = cur.chars().count() + line.chars().count() + usize::from(!cur.is_empty());
        if needed > limit && !cur.is_empty() {
            out.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push('\n');
        }
        cur.push_str(&line);
    }

    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_message() {
        assert_eq!(split_message("a\nb", 2000), vec!["a\nb".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries_under_limit() {
        let line = "x".repeat(30);
        let text = vec![line.as_str(); 10].join("\n");

        let chunks = split_message(&text, 100);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn overlong_line_is_cut() {
        let text = "y".repeat(250);
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }
}
