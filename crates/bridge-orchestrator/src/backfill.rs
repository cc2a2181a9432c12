//! The one-time recent-history pull run at start-up, before the gateway
//! stream and long-poller take over steady-state delivery.

use crate::stats::StatsHandle;
use bridge_common::{GuildStatus, Message};
use bridge_sink::SinkClient;
use bridge_source::SourceClient;
use tracing::warn;

/// For each active guild, pulls a share of `max_history_messages` from each
/// accessible channel, concatenates per guild, sorts ascending, and hands
/// the result to the sink's batch send. Per-channel failures are logged and
/// skipped; they never abort the overall backfill.
pub async fn initial_backfill(
    source: &SourceClient,
    sink: &SinkClient,
    max_history_messages: u32,
    stats: &StatsHandle,
) {
    let registry = source.registry();
    let targets: Vec<(String, Vec<String>)> = registry
        .guilds
        .iter()
        .filter(|g| g.value().status == GuildStatus::Active)
        .map(|g| {
            let channel_ids: Vec<String> = g
                .value()
                .accessible_channels()
                .map(|c| c.channel_id.clone())
                .collect();
            (g.key().clone(), channel_ids)
        })
        .collect();

    for (guild_id, channel_ids) in targets {
        if channel_ids.is_empty() {
            continue;
        }
        let per_channel_limit =
            (max_history_messages / channel_ids.len() as u32).min(10).max(1);

        let mut batch: Vec<Message> = Vec::new();
        for channel_id in &channel_ids {
            match source
                .get_recent_messages(&guild_id, channel_id, per_channel_limit)
                .await
            {
                Ok(messages) => batch.extend(messages),
                Err(err) => {
                    warn!(guild_id = %guild_id, channel_id = %channel_id, error = %err, "backfill pull failed for channel");
                }
            }
        }
        batch.sort_by_key(|m| m.timestamp);

        if batch.is_empty() {
            continue;
        }
        let delivered = sink.send_batch(&batch).await;
        stats.record_processed(delivered as u64);
    }
}
