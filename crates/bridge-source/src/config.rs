//! The subset of the root configuration the source client needs to run
//! independently of how the binary assembles it.

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub max_servers: u32,
    pub max_channels_per_server: u32,
    pub max_history_messages: u32,
    pub websocket_reconnect_delay_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_servers: 10,
            max_channels_per_server: 10,
            max_history_messages: 100,
            websocket_reconnect_delay_seconds: 30,
        }
    }
}
