use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Rate Limiter (Sliding Window) ==============

#[derive(Clone, Copy, Debug)]
struct WindowEntry {
    last_request_at: Instant,
    violation_count: u32,
}

/// Outcome of [`RateLimiter::check_and_record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied {
        retry_after: Duration,
        /// Set exactly once per `ban_threshold` consecutive denials.
        escalate: bool,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-actor sliding-window throttle for channel-creation requests.
///
/// Every request (accepted or not) moves the actor's window, so an actor that
/// keeps hammering the trigger stays throttled until they back off for a full
/// window. Consecutive denials are counted; reaching the ban threshold reports
/// an escalation and starts counting again from zero.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    window: Duration,
    ban_threshold: u32,
    entries: HashMap<UserId, WindowEntry>,
}

#[cfg(test)]
#[derive(Clone, Copy, Debug)]
struct RateLimitStatus {
    violation_count: u32,
    retry_after: Option<Duration>,
}

impl RateLimiter {
    /// Expired entries are swept once the map grows past this.
    const PRUNE_ABOVE: usize = 256;

    pub fn new(window: Duration, ban_threshold: u32) -> Self {
        Self {
            window,
            ban_threshold: ban_threshold.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn check_and_record(&mut self, actor: UserId) -> RateDecision {
        self.check_and_record_at(actor, Instant::now())
    }

    pub fn check_and_record_at(&mut self, actor: UserId, now: Instant) -> RateDecision {
        if self.entries.len() > Self::PRUNE_ABOVE {
            self.prune(now);
        }

        let Some(entry) = self.entries.get_mut(&actor) else {
            self.entries.insert(
                actor,
                WindowEntry {
                    last_request_at: now,
                    violation_count: 0,
                },
            );
            return RateDecision::Allowed;
        };

        let elapsed = now.saturating_duration_since(entry.last_request_at);
        entry.last_request_at = now;

        if elapsed >= self.window {
            entry.violation_count = 0;
            return RateDecision::Allowed;
        }

        entry.violation_count += 1;
        let escalate = entry.violation_count >= self.ban_threshold;
        if escalate {
            entry.violation_count = 0;
        }

        RateDecision::Denied {
            retry_after: self.window - elapsed,
            escalate,
        }
    }

    #[cfg(test)]
    fn status_at(&self, actor: UserId, now: Instant) -> RateLimitStatus {
        let Some(entry) = self.entries.get(&actor) else {
            return RateLimitStatus {
                violation_count: 0,
                retry_after: None,
            };
        };
        let elapsed = now.saturating_duration_since(entry.last_request_at);
        RateLimitStatus {
            violation_count: entry.violation_count,
            retry_after: self.window.checked_sub(elapsed).filter(|d| !d.is_zero()),
        }
    }

    /// Drop entries whose window has fully elapsed; they behave like absent ones.
    fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_request_at) < window);
        before - self.entries.len()
    }

    pub fn forget(&mut self, actor: UserId) {
        self.entries.remove(&actor);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.len()
    }
}
