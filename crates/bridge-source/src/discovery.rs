//! Guild/channel discovery: turns the raw REST listing into
//! [`bridge_common::GuildRecord`]s in the shared [`GuildRegistry`].

use crate::config::SourceConfig;
use crate::rest::{RestClient, RestError};
use crate::state::GuildRegistry;
use bridge_common::{ChannelRecord, GuildRecord, GuildStatus};
use tracing::{info, warn};

/// Re-discovers every guild visible to `rest`, capped at
/// `config.max_servers`, and rewrites the registry's entries in place.
/// Channels of an unrecognized guild from a previous run are replaced
/// wholesale rather than merged, since discovery is the single source of
/// truth for membership.
pub async fn discover(
    rest: &RestClient,
    registry: &GuildRegistry,
    config: &SourceConfig,
) -> Result<(), RestError> {
    let guilds = rest.my_guilds().await?;

    for guild in guilds.into_iter().take(config.max_servers as usize) {
        let mut record = GuildRecord::new(
            bridge_common::clean_name(&guild.name),
            guild.id.clone(),
            config.max_channels_per_server,
        );

        let channels = match rest.guild_channels(&guild.id).await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(guild_id = %guild.id, error = %err, "guild channel listing failed");
                record.status = GuildStatus::Error;
                record.error_message = Some(err.to_string());
                record.last_sync = Some(chrono::Utc::now());
                registry.guilds.insert(guild.id, record);
                continue;
            }
        };

        let candidates = channels
            .into_iter()
            .filter(|c| c.is_candidate_type() && c.name_matches_announcement_pattern())
            .take(config.max_channels_per_server as usize);

        for channel in candidates {
            let http_accessible = rest.probe_channel(&channel.id).await;
            let mut channel_record = ChannelRecord::new(
                channel.id.clone(),
                bridge_common::clean_name(&channel.name),
                channel.parent_id.clone(),
            );
            channel_record.http_accessible = http_accessible;
            channel_record.last_checked = Some(chrono::Utc::now());

            if record.add_channel(channel_record).is_err() {
                break;
            }
        }

        record.recompute_status();
        record.last_sync = Some(chrono::Utc::now());
        info!(
            guild = %record.guild_name,
            channels = record.channels.len(),
            active = record.status == GuildStatus::Active,
            "discovered guild"
        );
        registry.guilds.insert(guild.id, record);
    }

    Ok(())
}
