//! Configuration loading: typed defaults, optional TOML file, then
//! environment variable overrides, then boundary validation. Nothing here
//! panics — every failure mode is a [`ConfigError`] returned to the caller.

mod loader;

pub use loader::ConfigLoader;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub source_tokens: Vec<String>,
    pub sink_bot_token: String,
    pub sink_chat_id: i64,
    pub kv_url: Option<String>,
    pub data_dir: String,

    pub use_topics: bool,
    pub show_timestamps: bool,
    pub show_server_in_message: bool,

    pub max_channels_per_server: u32,
    pub max_total_channels: u32,
    pub max_servers: u32,

    pub discord_rate_limit_per_second: f64,
    pub telegram_rate_limit_per_minute: u32,

    pub max_message_length: u32,
    pub message_batch_size: u32,
    pub max_history_messages: u32,
    pub message_ttl_seconds: u64,

    pub websocket_reconnect_delay_seconds: u64,
    pub websocket_max_retries: u32,

    pub cleanup_interval_minutes: u64,
    pub cache_ttl_seconds: u64,
    pub health_check_interval_seconds: u64,

    pub admin_http_port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            source_tokens: Vec::new(),
            sink_bot_token: String::new(),
            sink_chat_id: 0,
            kv_url: None,
            data_dir: ".".to_string(),

            use_topics: true,
            show_timestamps: true,
            show_server_in_message: true,

            max_channels_per_server: 10,
            max_total_channels: 50,
            max_servers: 10,

            discord_rate_limit_per_second: 2.0,
            telegram_rate_limit_per_minute: 20,

            max_message_length: 4000,
            message_batch_size: 10,
            max_history_messages: 100,
            message_ttl_seconds: 86_400,

            websocket_reconnect_delay_seconds: 30,
            websocket_max_retries: 5,

            cleanup_interval_minutes: 5,
            cache_ttl_seconds: 300,
            health_check_interval_seconds: 60,

            admin_http_port: 8080,
        }
    }
}

macro_rules! require_range {
    ($errs:ident, $field:expr, $name:literal, $lo:expr, $hi:expr) => {
        if !($lo..=$hi).contains(&$field) {
            $errs.push(format!(
                "{} must be between {} and {} (got {})",
                $name, $lo, $hi, $field
            ));
        }
    };
}

impl BridgeConfig {
    /// Loads configuration the standard way: defaults, then an optional
    /// TOML file, then environment overrides, then validation.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Checks every boundary named in the spec, plus the cross-field
    /// `max_total_channels <= max_channels_per_server * max_servers`
    /// invariant. Collects every violation before returning, rather than
    /// failing on the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.source_tokens.is_empty() {
            errors.push("at least one source token is required".to_string());
        }
        for token in &self.source_tokens {
            if token.len() < 50 {
                errors.push(format!(
                    "source token '{}...' is shorter than the minimum 50 characters",
                    &token[..token.len().min(10)]
                ));
            }
        }
        if self.sink_chat_id == 0 {
            errors.push("sink_chat_id must not be 0".to_string());
        }

        require_range!(errors, self.max_channels_per_server, "max_channels_per_server", 1, 20);
        require_range!(errors, self.max_total_channels, "max_total_channels", 10, 100);
        require_range!(errors, self.max_servers, "max_servers", 1, 15);
        require_range!(
            errors,
            self.discord_rate_limit_per_second,
            "discord_rate_limit_per_second",
            0.5,
            10.0
        );
        require_range!(
            errors,
            self.telegram_rate_limit_per_minute,
            "telegram_rate_limit_per_minute",
            5,
            100
        );
        require_range!(errors, self.max_message_length, "max_message_length", 1000, 4096);
        require_range!(errors, self.message_batch_size, "message_batch_size", 1, 50);
        require_range!(errors, self.max_history_messages, "max_history_messages", 10, 500);
        require_range!(errors, self.message_ttl_seconds, "message_ttl_seconds", 3600, 604_800);
        require_range!(
            errors,
            self.websocket_reconnect_delay_seconds,
            "websocket_reconnect_delay_seconds",
            5,
            300
        );
        require_range!(errors, self.websocket_max_retries, "websocket_max_retries", 1, 10);
        require_range!(errors, self.cleanup_interval_minutes, "cleanup_interval_minutes", 1, 60);
        require_range!(errors, self.cache_ttl_seconds, "cache_ttl_seconds", 60, 3600);
        require_range!(
            errors,
            self.health_check_interval_seconds,
            "health_check_interval_seconds",
            10,
            300
        );

        let theoretical_max = self.max_channels_per_server * self.max_servers;
        if self.max_total_channels > theoretical_max {
            errors.push(format!(
                "max_total_channels ({}) cannot exceed max_channels_per_server * max_servers ({})",
                self.max_total_channels, theoretical_max
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_token() -> String {
        "x".repeat(60)
    }

    #[test]
    fn default_config_fails_validation_without_tokens() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        let config = BridgeConfig {
            source_tokens: vec![valid_token()],
            sink_chat_id: -1001234567890,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_total_channels_exceeding_product() {
        let config = BridgeConfig {
            source_tokens: vec![valid_token()],
            sink_chat_id: 1,
            max_channels_per_server: 5,
            max_servers: 5,
            max_total_channels: 30,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_out_of_range_message_ttl() {
        let config = BridgeConfig {
            source_tokens: vec![valid_token()],
            sink_chat_id: 1,
            message_ttl_seconds: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_round_trips_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "source_tokens = [\"{}\"]\nsink_chat_id = 42\n",
                valid_token()
            ),
        )
        .unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.source_tokens.len(), 1);
        assert_eq!(config.sink_chat_id, 42);
        assert!(config.validate().is_ok());
    }
}
