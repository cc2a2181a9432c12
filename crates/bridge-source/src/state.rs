//! Shared, concurrently-readable registry of discovered guilds. Owned by
//! [`crate::SourceClient`] and handed (behind an `Arc`) to the gateway tasks
//! so dispatched events can be resolved to friendly names without a round
//! trip back through the client.

use bridge_common::GuildRecord;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keyed by guild id (the gateway's dispatch payloads carry ids, not names).
#[derive(Default)]
pub struct GuildRegistry {
    pub guilds: DashMap<String, GuildRecord>,
    dropped_messages: AtomicU64,
}

impl GuildRegistry {
    pub fn new() -> Self {
        Self {
            guilds: DashMap::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Called by the gateway loop when the ingress channel is at capacity.
    pub fn record_dropped_message(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Drains the drop counter back to zero, returning the count since the
    /// last call. Intended for the orchestrator's stats refresh.
    pub fn take_dropped_messages(&self) -> u64 {
        self.dropped_messages.swap(0, Ordering::Relaxed)
    }

    pub fn active_guild_count(&self) -> usize {
        self.guilds
            .iter()
            .filter(|g| g.value().status == bridge_common::GuildStatus::Active)
            .count()
    }

    pub fn total_guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Resolves `(guild_name, channel_name)` for a dispatched gateway event,
    /// or `None` if the guild/channel was never discovered (e.g. a channel
    /// this bridge doesn't mirror).
    pub fn resolve_names(&self, guild_id: &str, channel_id: &str) -> Option<(String, String)> {
        let guild = self.guilds.get(guild_id)?;
        let channel = guild.channels.get(channel_id)?;
        Some((guild.guild_name.clone(), channel.channel_name.clone()))
    }

    pub fn total_channel_count(&self) -> usize {
        self.guilds.iter().map(|g| g.value().channels.len()).sum()
    }

    pub fn accessible_channel_count(&self) -> usize {
        self.guilds
            .iter()
            .map(|g| g.value().accessible_channel_count() as usize)
            .sum()
    }
}
