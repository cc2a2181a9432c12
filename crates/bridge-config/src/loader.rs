//! Configuration loader: file discovery plus environment variable overrides.

use crate::{BridgeConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "bridge.toml",
    "./config/config.toml",
    "/etc/bridge/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Loads defaults, overlays a discovered TOML file if any, applies
    /// environment overrides, then validates the result.
    pub fn load(&self) -> Result<BridgeConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "loading configuration from file");
                BridgeConfig::from_file(&path)?
            }
            None => BridgeConfig::default(),
        };

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("BRIDGE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut BridgeConfig) {
        if let Ok(val) = env::var("BRIDGE_SOURCE_TOKENS") {
            config.source_tokens = val
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("BRIDGE_SINK_BOT_TOKEN") {
            config.sink_bot_token = val;
        }
        if let Ok(val) = env::var("BRIDGE_SINK_CHAT_ID") {
            if let Ok(id) = val.parse() {
                config.sink_chat_id = id;
            }
        }
        if let Ok(val) = env::var("BRIDGE_KV_URL") {
            config.kv_url = Some(val);
        }
        if let Ok(val) = env::var("BRIDGE_DATA_DIR") {
            config.data_dir = val;
        }

        apply_bool_override(&mut config.use_topics, "BRIDGE_USE_TOPICS");
        apply_bool_override(&mut config.show_timestamps, "BRIDGE_SHOW_TIMESTAMPS");
        apply_bool_override(
            &mut config.show_server_in_message,
            "BRIDGE_SHOW_SERVER_IN_MESSAGE",
        );

        apply_parsed_override(
            &mut config.max_channels_per_server,
            "BRIDGE_MAX_CHANNELS_PER_SERVER",
        );
        apply_parsed_override(&mut config.max_total_channels, "BRIDGE_MAX_TOTAL_CHANNELS");
        apply_parsed_override(&mut config.max_servers, "BRIDGE_MAX_SERVERS");
        apply_parsed_override(
            &mut config.discord_rate_limit_per_second,
            "BRIDGE_DISCORD_RATE_LIMIT_PER_SECOND",
        );
        apply_parsed_override(
            &mut config.telegram_rate_limit_per_minute,
            "BRIDGE_TELEGRAM_RATE_LIMIT_PER_MINUTE",
        );
        apply_parsed_override(&mut config.max_message_length, "BRIDGE_MAX_MESSAGE_LENGTH");
        apply_parsed_override(&mut config.message_batch_size, "BRIDGE_MESSAGE_BATCH_SIZE");
        apply_parsed_override(
            &mut config.max_history_messages,
            "BRIDGE_MAX_HISTORY_MESSAGES",
        );
        apply_parsed_override(&mut config.message_ttl_seconds, "BRIDGE_MESSAGE_TTL_SECONDS");
        apply_parsed_override(
            &mut config.websocket_reconnect_delay_seconds,
            "BRIDGE_WEBSOCKET_RECONNECT_DELAY_SECONDS",
        );
        apply_parsed_override(
            &mut config.websocket_max_retries,
            "BRIDGE_WEBSOCKET_MAX_RETRIES",
        );
        apply_parsed_override(
            &mut config.cleanup_interval_minutes,
            "BRIDGE_CLEANUP_INTERVAL_MINUTES",
        );
        apply_parsed_override(&mut config.cache_ttl_seconds, "BRIDGE_CACHE_TTL_SECONDS");
        apply_parsed_override(
            &mut config.health_check_interval_seconds,
            "BRIDGE_HEALTH_CHECK_INTERVAL_SECONDS",
        );
        apply_parsed_override(&mut config.admin_http_port, "BRIDGE_ADMIN_HTTP_PORT");
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_bool_override(target: &mut bool, var: &str) {
    if let Ok(val) = env::var(var) {
        *target = val == "true" || val == "1";
    }
}

fn apply_parsed_override<T: std::str::FromStr>(target: &mut T, var: &str) {
    if let Ok(val) = env::var(var) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_config_file_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "sink_chat_id = 1\n").unwrap();

        let loader = ConfigLoader::with_path(&path);
        assert_eq!(loader.find_config_file(), Some(path));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/path/config.toml");
        assert!(loader.find_config_file().is_none());
    }
}
