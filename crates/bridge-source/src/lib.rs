//! Source-side client for the bridge: session fan-out, guild/channel
//! discovery, bounded recent-history pulls, and the real-time gateway
//! stream.

pub mod config;
pub mod discovery;
pub mod gateway;
pub mod recent;
pub mod rest;
pub mod session;
pub mod state;

pub use config::SourceConfig;
pub use rest::RestError;
pub use session::{Session, SessionError};
pub use state::GuildRegistry;

use bridge_common::Message;
use bridge_ratelimit::RateLimiter;
use session::SessionRotation;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error("channel {0} was never discovered")]
    UnknownChannel(String),
    #[error("channel {0} is not HTTP-accessible")]
    ChannelNotAccessible(String),
    #[error(transparent)]
    RateLimited(#[from] bridge_ratelimit::RateLimiterError),
}

/// Owns the validated sessions, the discovered-guild registry, and the
/// gateway tasks. Construction (`init`) only validates tokens; callers run
/// [`SourceClient::discover`] separately before pulling messages.
pub struct SourceClient {
    sessions: Vec<Arc<Session>>,
    rotation: SessionRotation,
    registry: Arc<GuildRegistry>,
    config: SourceConfig,
    limiter: Arc<RateLimiter>,
    gateway_handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl SourceClient {
    pub async fn init(
        tokens: &[String],
        config: SourceConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let sessions = session::init_sessions(tokens)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();
        Ok(Self {
            sessions,
            rotation: SessionRotation::new(),
            registry: Arc::new(GuildRegistry::new()),
            config,
            limiter,
            gateway_handles: AsyncMutex::new(Vec::new()),
        })
    }

    pub fn valid_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn registry(&self) -> Arc<GuildRegistry> {
        self.registry.clone()
    }

    fn next_session(&self) -> &Arc<Session> {
        let idx = self.rotation.next_index(self.sessions.len());
        &self.sessions[idx]
    }

    /// Re-runs discovery using the first valid session, per the spec's
    /// "session selection for calls that don't require a specific token"
    /// rule — discovery itself always uses session 0, only recent-pull
    /// rotation is round-robin.
    pub async fn discover(&self) -> Result<(), SourceError> {
        let session = &self.sessions[0];
        discovery::discover(&session.rest, &self.registry, &self.config).await?;
        Ok(())
    }

    pub async fn get_recent_messages(
        &self,
        guild_id: &str,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, SourceError> {
        let session = self.next_session();
        recent::get_recent_messages(
            &session.rest,
            &self.limiter,
            &self.registry,
            &self.config,
            guild_id,
            channel_id,
            limit,
        )
        .await
    }

    /// Spawns one independent gateway reconnect loop per session. `ingress`
    /// is the orchestrator's bounded queue sender.
    pub async fn spawn_gateway_tasks(
        &self,
        ingress: mpsc::Sender<Message>,
        running: watch::Receiver<bool>,
    ) {
        let reconnect_delay =
            std::time::Duration::from_secs(self.config.websocket_reconnect_delay_seconds);
        let mut handles = self.gateway_handles.lock().await;
        for session in &self.sessions {
            let session = session.clone();
            let registry = self.registry.clone();
            let ingress = ingress.clone();
            let running = running.clone();
            handles.push(tokio::spawn(async move {
                gateway::run_gateway_loop(session, registry, ingress, reconnect_delay, running)
                    .await;
            }));
        }
    }

    pub fn dropped_message_count(&self) -> u64 {
        self.registry.take_dropped_messages()
    }

    pub fn total_channel_count(&self) -> usize {
        self.registry.total_channel_count()
    }

    pub fn accessible_channel_count(&self) -> usize {
        self.registry.accessible_channel_count()
    }

    pub fn active_guild_count(&self) -> usize {
        self.registry.active_guild_count()
    }

    pub fn total_guild_count(&self) -> usize {
        self.registry.total_guild_count()
    }

    /// Closes all gateway connections and HTTP sessions. Gateway tasks are
    /// expected to have already observed `running = false` on the shared
    /// watch channel; this just awaits their exit, suppressing individual
    /// task failures the way the orchestrator's stop sequence does for every
    /// other background task.
    pub async fn shutdown(&self) {
        let mut handles = self.gateway_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_rotation_is_round_robin_across_three_tokens() {
        let rotation = SessionRotation::new();
        let picks: Vec<usize> = (0..6).map(|_| rotation.next_index(3)).collect();
        let mut counts = [0usize; 3];
        for p in picks {
            counts[p] += 1;
        }
        assert_eq!(counts, [2, 2, 2]);
    }
}
