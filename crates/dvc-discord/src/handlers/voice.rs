use serenity::all::VoiceState;

use dvc_core::{
    domain::{ChannelId, GuildId, UserId},
    lifecycle::{EventGate, PlatformEvent},
};

#[derive(Clone, Copy, Debug)]
struct VoiceChange {
    guild: GuildId,
    actor: UserId,
    before: Option<ChannelId>,
    after: Option<ChannelId>,
    is_bot: bool,
}

impl VoiceChange {
    fn from_states(old: Option<&VoiceState>, new: &VoiceState) -> Option<Self> {
        Some(Self {
            guild: GuildId(new.guild_id?.get()),
            actor: UserId(new.user_id.get()),
            before: old.and_then(|o| o.channel_id).map(|c| ChannelId(c.get())),
            after: new.channel_id.map(|c| ChannelId(c.get())),
            is_bot: new.member.as_ref().is_some_and(|m| m.user.bot),
        })
    }

    /// Mute, deafen and similar updates keep the channel and produce nothing. A
    /// move produces the leave first so the old channel is judged before the
    /// new one is populated.
    fn events(self) -> Vec<PlatformEvent> {
        if self.before == self.after {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(channel) = self.before {
            events.push(PlatformEvent::VoiceLeave {
                guild: self.guild,
                channel,
                actor: self.actor,
            });
        }
        // Bots never get channels of their own.
        if let Some(channel) = self.after.filter(|_| !self.is_bot) {
            events.push(PlatformEvent::VoiceJoin {
                guild: self.guild,
                channel,
                actor: self.actor,
            });
        }
        events
    }
}

pub(crate) async fn handle_voice_state(
    events: &EventGate,
    old: Option<VoiceState>,
    new: VoiceState,
) {
    let Some(change) = VoiceChange::from_states(old.as_ref(), &new) else {
        return;
    };
    for event in change.events() {
        events.dispatch(event).await;
    }
}
