//! Shared types for the Discord-to-Telegram forwarding bridge.
//!
//! Holds the data model (messages, guild/channel records, rolled-up stats)
//! used by every other crate in the workspace. Nothing in here talks to the
//! network or to disk.

pub mod logging;

use chrono::{DateTime, Utc};
use once_regex::mention_regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

mod once_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    pub fn mention_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"<@!?\d+>|<#\d+>|<@&\d+>").expect("valid mention regex"))
    }

    pub fn name_strip_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"[^\w\s\-.]").expect("valid name strip regex"))
    }
}

/// Errors raised while validating or normalizing a [`Message`].
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum MessageError {
    #[error("message content is empty after normalization")]
    EmptyContent,
    #[error("message content exceeds {0} characters after normalization")]
    ContentTooLong(usize),
    #[error("message timestamp is in the future")]
    FutureTimestamp,
    #[error("{field} is empty after stripping disallowed characters")]
    EmptyField { field: &'static str },
    #[error("{field} is not a 17-19 digit snowflake: {value}")]
    InvalidSnowflake { field: &'static str, value: String },
}

const MAX_CONTENT_LEN: usize = 4000;

/// Replaces source mention tokens with readable placeholders and trims
/// whitespace. Idempotent: `normalize_content(&normalize_content(x)) ==
/// normalize_content(x)`.
pub fn normalize_content(raw: &str) -> String {
    let replaced = once_regex::mention_regex().replace_all(raw, |caps: &regex::Captures| {
        let m = &caps[0];
        if m.starts_with("<@&") {
            "[Role]"
        } else if m.starts_with("<#") {
            "[Channel]"
        } else {
            "[User]"
        }
    });
    replaced.trim().to_string()
}

/// Strips characters outside `[A-Za-z0-9_ \-.]` and trims whitespace.
pub fn clean_name(raw: &str) -> String {
    once_regex::name_strip_regex()
        .replace_all(raw, "")
        .trim()
        .to_string()
}

fn validate_snowflake(field: &'static str, value: &str) -> Result<(), MessageError> {
    let len = value.len();
    if !(17..=19).contains(&len) || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(MessageError::InvalidSnowflake {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// A single forwarded message, immutable once constructed. The only way to
/// build one is [`Message::new`], which performs every normalization and
/// validation step in one place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub guild_name: String,
    pub channel_name: String,
    pub author: String,
    pub message_id: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub translated_content: Option<String>,
    pub attachments: Vec<String>,
    pub embeds: Vec<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub sink_message_id: Option<i64>,
}

impl Message {
    /// Constructs and validates a message. Normalizes `content` (mention
    /// replacement + trim) and `guild_name`/`channel_name`/`author`
    /// (character stripping + trim); rejects the result if any become empty,
    /// if the content is too long, or if `timestamp` is in the future.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_content: &str,
        timestamp: DateTime<Utc>,
        raw_guild_name: &str,
        raw_channel_name: &str,
        raw_author: &str,
        message_id: Option<String>,
        channel_id: Option<String>,
        guild_id: Option<String>,
    ) -> Result<Self, MessageError> {
        if timestamp > Utc::now() {
            return Err(MessageError::FutureTimestamp);
        }

        let content = normalize_content(raw_content);
        if content.is_empty() {
            return Err(MessageError::EmptyContent);
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(MessageError::ContentTooLong(MAX_CONTENT_LEN));
        }

        let guild_name = clean_name(raw_guild_name);
        if guild_name.is_empty() {
            return Err(MessageError::EmptyField { field: "guild_name" });
        }
        let channel_name = clean_name(raw_channel_name);
        if channel_name.is_empty() {
            return Err(MessageError::EmptyField {
                field: "channel_name",
            });
        }
        let author = clean_name(raw_author);
        if author.is_empty() {
            return Err(MessageError::EmptyField { field: "author" });
        }

        if let Some(ref id) = channel_id {
            validate_snowflake("channel_id", id)?;
        }
        if let Some(ref id) = guild_id {
            validate_snowflake("guild_id", id)?;
        }

        Ok(Self {
            content,
            timestamp,
            guild_name,
            channel_name,
            author,
            message_id,
            channel_id,
            guild_id,
            translated_content: None,
            attachments: Vec::new(),
            embeds: Vec::new(),
            processed_at: None,
            sink_message_id: None,
        })
    }

    /// Renders the message the way the sink expects it: an optional guild
    /// banner, the channel, an optional timestamp, the author, then the
    /// content, one per line.
    pub fn to_sink_text(&self, show_timestamp: bool, show_guild: bool) -> String {
        let mut lines = Vec::with_capacity(5);
        if show_guild {
            lines.push(format!("🏰 **{}**", self.guild_name));
        }
        lines.push(format!("📢 #{}", self.channel_name));
        if show_timestamp {
            lines.push(format!(
                "📅 {}",
                self.timestamp.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.push(format!("👤 {}", self.author));
        lines.push(format!("💬 {}", self.content));
        lines.join("\n")
    }
}

/// A single channel tracked within a [`GuildRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub channel_name: String,
    pub category_id: Option<String>,
    pub http_accessible: bool,
    pub stream_accessible: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub error_count: u32,
}

impl ChannelRecord {
    pub fn new(channel_id: String, channel_name: String, category_id: Option<String>) -> Self {
        Self {
            channel_id,
            channel_name,
            category_id,
            http_accessible: false,
            stream_accessible: false,
            last_checked: None,
            message_count: 0,
            last_message_time: None,
            error_count: 0,
        }
    }

    /// A channel is accessible iff either access method has been confirmed.
    pub fn is_accessible(&self) -> bool {
        self.http_accessible || self.stream_accessible
    }
}

/// Lifecycle state of a [`GuildRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuildStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

/// Everything known about one source guild: its channels, sync state, and
/// the sink-side topic it has been mapped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRecord {
    pub guild_name: String,
    pub guild_id: String,
    pub channels: HashMap<String, ChannelRecord>,
    pub max_channels: u32,
    pub status: GuildStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub sink_topic_id: Option<i64>,
    pub topic_created_at: Option<DateTime<Utc>>,
    pub total_messages: u64,
    pub active_channels: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

impl GuildRecord {
    pub fn new(guild_name: String, guild_id: String, max_channels: u32) -> Self {
        Self {
            guild_name,
            guild_id,
            channels: HashMap::new(),
            max_channels,
            status: GuildStatus::Pending,
            last_sync: None,
            error_message: None,
            sink_topic_id: None,
            topic_created_at: None,
            total_messages: 0,
            active_channels: 0,
            last_activity: None,
        }
    }

    /// Inserts a channel, enforcing `|channels| <= max_channels`.
    pub fn add_channel(&mut self, channel: ChannelRecord) -> Result<(), MessageError> {
        if self.channels.len() as u32 >= self.max_channels
            && !self.channels.contains_key(&channel.channel_id)
        {
            // Caller already capped discovery at max_channels_per_server; this
            // is the invariant's last line of defense.
            return Err(MessageError::EmptyField {
                field: "channel_id",
            });
        }
        self.channels.insert(channel.channel_id.clone(), channel);
        self.recompute_status();
        Ok(())
    }

    pub fn accessible_channels(&self) -> impl Iterator<Item = &ChannelRecord> {
        self.channels.values().filter(|c| c.is_accessible())
    }

    pub fn accessible_channel_count(&self) -> u32 {
        self.accessible_channels().count() as u32
    }

    /// Recomputes `active_channels` and `status` from the current channel map.
    pub fn recompute_status(&mut self) {
        self.active_channels = self.accessible_channel_count();
        self.status = if self.active_channels > 0 {
            GuildStatus::Active
        } else {
            GuildStatus::Inactive
        };
    }
}

/// Rolled-up operational counters, refreshed periodically by the
/// orchestrator's stats task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SystemStats {
    pub servers_total: u32,
    pub servers_active: u32,
    pub channels_total: u32,
    pub channels_accessible: u32,
    pub messages_processed_today: u64,
    pub messages_processed_total: u64,
    pub memory_usage_mb: f64,
    pub uptime_seconds: u64,
    pub source_requests_last_hour: u64,
    pub sink_requests_last_hour: u64,
    pub errors_last_hour: u32,
    pub last_error: Option<String>,
}

impl SystemStats {
    /// Pure function of `(errors_last_hour, memory_usage_mb,
    /// channels_accessible)`, clamped to `[0, 100]`.
    pub fn health_score(&self) -> f64 {
        let mut score = 100.0;
        score -= (5.0 * self.errors_last_hour as f64).min(50.0);
        if self.memory_usage_mb > 1500.0 {
            score -= 20.0;
        }
        if self.channels_accessible == 0 {
            score -= 30.0;
        }
        score.max(0.0)
    }

    /// A banner string derived from the health score.
    pub fn status_banner(&self) -> &'static str {
        let score = self.health_score();
        if score >= 90.0 {
            "🟢 EXCELLENT"
        } else if score >= 70.0 {
            "🟡 GOOD"
        } else if score >= 50.0 {
            "🟠 DEGRADED"
        } else {
            "🔴 CRITICAL"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn normalize_content_replaces_mentions() {
        assert_eq!(normalize_content("<@!123>   "), "[User]");
        assert_eq!(normalize_content("<#1>  "), "[Channel]");
        assert_eq!(normalize_content("<@&99>"), "[Role]");
    }

    #[test]
    fn normalize_content_is_idempotent() {
        let once = normalize_content("hello <@!123> world");
        let twice = normalize_content(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn message_rejects_empty_after_normalization() {
        let err = Message::new(
            "   ",
            Utc::now(),
            "Guild",
            "general",
            "alice",
            None,
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err, MessageError::EmptyContent);
    }

    #[test]
    fn message_accepts_mention_only_content() {
        let msg = Message::new(
            "<@!123>   ",
            Utc::now(),
            "Guild",
            "general",
            "alice",
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(msg.content, "[User]");
    }

    #[test]
    fn message_rejects_future_timestamp() {
        let future = Utc::now() + Duration::seconds(120);
        let err = Message::new("hi", future, "Guild", "general", "alice", None, None, None)
            .unwrap_err();
        assert_eq!(err, MessageError::FutureTimestamp);
    }

    #[test]
    fn health_score_is_bounded() {
        let stats = SystemStats {
            errors_last_hour: 1000,
            memory_usage_mb: 5000.0,
            channels_accessible: 0,
            ..Default::default()
        };
        assert_eq!(stats.health_score(), 0.0);

        let healthy = SystemStats {
            channels_accessible: 10,
            ..Default::default()
        };
        assert_eq!(healthy.health_score(), 100.0);
    }

    #[test]
    fn guild_channel_count_invariant() {
        let mut guild = GuildRecord::new("g".into(), "12345678901234567".into(), 1);
        guild
            .add_channel(ChannelRecord::new("1".into(), "a".into(), None))
            .unwrap();
        assert!(guild
            .add_channel(ChannelRecord::new("2".into(), "b".into(), None))
            .is_err());
        assert!(guild.channels.len() as u32 <= guild.max_channels);
    }
}
