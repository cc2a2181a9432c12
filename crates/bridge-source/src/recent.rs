//! Bounded recent-history pulls for a single channel, rate-limited and
//! converted into validated [`bridge_common::Message`]s.

use crate::config::SourceConfig;
use crate::rest::RestClient;
use crate::state::GuildRegistry;
use crate::SourceError;
use bridge_common::Message;
use bridge_ratelimit::RateLimiter;
use chrono::{DateTime, Utc};
use tracing::warn;

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fetches up to `limit` (capped by `max_history_messages`) recent messages
/// from `channel_id`, returning them sorted ascending by timestamp.
/// Payloads that fail [`Message::new`] validation are skipped and logged,
/// not fatal to the pull.
pub async fn get_recent_messages(
    rest: &RestClient,
    limiter: &RateLimiter,
    registry: &GuildRegistry,
    config: &SourceConfig,
    guild_id: &str,
    channel_id: &str,
    limit: u32,
) -> Result<Vec<Message>, SourceError> {
    let (guild_name, channel_name) = registry
        .resolve_names(guild_id, channel_id)
        .ok_or_else(|| SourceError::UnknownChannel(channel_id.to_string()))?;

    {
        let guild = registry
            .guilds
            .get(guild_id)
            .ok_or_else(|| SourceError::UnknownChannel(channel_id.to_string()))?;
        let channel = guild
            .channels
            .get(channel_id)
            .ok_or_else(|| SourceError::UnknownChannel(channel_id.to_string()))?;
        if !channel.http_accessible {
            return Err(SourceError::ChannelNotAccessible(channel_id.to_string()));
        }
    }

    let key = format!("messages_{channel_id}");
    limiter
        .wait_if_needed_default(&key)
        .await
        .map_err(SourceError::RateLimited)?;

    let effective_limit = limit.min(config.max_history_messages);
    let raw = rest
        .channel_messages(channel_id, effective_limit)
        .await
        .map_err(SourceError::Rest)?;

    let newest = raw.first().and_then(|m| parse_timestamp(&m.timestamp));

    let mut messages = Vec::with_capacity(raw.len());
    for item in raw {
        let Some(timestamp) = parse_timestamp(&item.timestamp) else {
            warn!(message_id = %item.id, "skipping message: unparseable timestamp");
            continue;
        };
        match Message::new(
            &item.content,
            timestamp,
            &guild_name,
            &channel_name,
            &item.author.username,
            Some(item.id.clone()),
            Some(channel_id.to_string()),
            Some(guild_id.to_string()),
        ) {
            Ok(message) => messages.push(message),
            Err(err) => warn!(message_id = %item.id, error = %err, "skipping invalid message"),
        }
    }
    messages.sort_by_key(|m| m.timestamp);

    if let Some(mut guild) = registry.guilds.get_mut(guild_id) {
        if let Some(channel) = guild.channels.get_mut(channel_id) {
            channel.message_count += messages.len() as u64;
            if let Some(newest) = newest {
                channel.last_message_time = Some(newest);
            }
        }
    }

    Ok(messages)
}
