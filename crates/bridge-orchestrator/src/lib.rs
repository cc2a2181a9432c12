//! Wires the source and sink clients into a running pipeline: initial
//! backfill, the bounded ingress queue and its drain loops, and the
//! periodic reconciliation/cleanup/stats/health background tasks.

pub mod backfill;
pub mod config;
mod error;
pub mod stats;
pub mod tasks;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use stats::StatsHandle;

use bridge_common::{GuildStatus, Message, SystemStats};
use bridge_ratelimit::RateLimiter;
use bridge_sink::SinkClient;
use bridge_source::SourceClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::info;

/// A read-only snapshot of one discovered guild, for the admin `/status`
/// endpoint. Deliberately thinner than `bridge_common::GuildRecord` — it
/// omits the channel map, which the admin surface has no use for.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GuildSummary {
    pub guild_name: String,
    pub status: GuildStatus,
    pub channels_total: u32,
    pub channels_accessible: u32,
    pub total_messages: u64,
    pub sink_topic_id: Option<i64>,
    pub last_activity: Option<DateTime<Utc>>,
}

pub struct Orchestrator {
    source: Arc<SourceClient>,
    sink: Arc<SinkClient>,
    source_limiter: Arc<RateLimiter>,
    sink_limiter: Arc<RateLimiter>,
    config: OrchestratorConfig,
    stats: Arc<StatsHandle>,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
    ingress_tx: mpsc::Sender<Message>,
    ingress_rx: AsyncMutex<Option<mpsc::Receiver<Message>>>,
    batch_queue: Arc<AsyncMutex<Vec<Message>>>,
    task_handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<SourceClient>,
        sink: Arc<SinkClient>,
        source_limiter: Arc<RateLimiter>,
        sink_limiter: Arc<RateLimiter>,
        config: OrchestratorConfig,
    ) -> Self {
        let (running_tx, running_rx) = watch::channel(true);
        let (ingress_tx, ingress_rx) = mpsc::channel(config::INGRESS_QUEUE_CAPACITY);
        Self {
            source,
            sink,
            source_limiter,
            sink_limiter,
            config,
            stats: Arc::new(StatsHandle::new()),
            running_tx,
            running_rx,
            ingress_tx,
            ingress_rx: AsyncMutex::new(Some(ingress_rx)),
            batch_queue: Arc::new(AsyncMutex::new(Vec::new())),
            task_handles: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> SystemStats {
        self.stats.snapshot()
    }

    /// Mirrors `tasks::health_check`'s predicate so the admin HTTP surface
    /// can answer `/healthz` without waiting for the next periodic tick.
    pub fn is_healthy(&self) -> bool {
        self.source.valid_session_count() >= 1
            && self.sink.poller_running()
            && self.ingress_queue_depth() < config::HEALTHY_QUEUE_CEILING
    }

    pub fn ingress_queue_depth(&self) -> usize {
        config::INGRESS_QUEUE_CAPACITY - self.ingress_tx.capacity()
    }

    /// Per-guild summary for the admin `/status` endpoint. Read-only; never
    /// touched by the pipeline itself.
    pub fn guild_summaries(&self) -> Vec<GuildSummary> {
        self.source
            .registry()
            .guilds
            .iter()
            .map(|entry| {
                let guild = entry.value();
                GuildSummary {
                    guild_name: guild.guild_name.clone(),
                    status: guild.status,
                    channels_total: guild.channels.len() as u32,
                    channels_accessible: guild.active_channels,
                    total_messages: guild.total_messages,
                    sink_topic_id: guild.sink_topic_id,
                    last_activity: guild.last_activity,
                }
            })
            .collect()
    }

    /// Pushes a pre-batched list of messages onto the alternative fast path;
    /// flushed by `batch_drain` once `message_batch_size` is reached or on
    /// its unconditional interval.
    pub async fn push_batch(&self, messages: Vec<Message>) {
        let mut queue = self.batch_queue.lock().await;
        queue.extend(messages);
        if queue.len() >= self.config.message_batch_size {
            let batch = std::mem::take(&mut *queue);
            drop(queue);
            let delivered = self.sink.send_batch(&batch).await;
            self.stats.record_processed(delivered as u64);
        }
    }

    /// Spawns every background task, then runs the initial backfill. If the
    /// backfill itself fails outright (sub-service init is expected to have
    /// already happened by the time this is called) the orchestrator is
    /// still left running — only per-channel pull failures are swallowed,
    /// per the spec's error policy.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let ingress_rx = self
            .ingress_rx
            .lock()
            .await
            .take()
            .expect("start() called more than once");

        let mut handles = self.task_handles.lock().await;

        handles.push(tokio::spawn(tasks::ingress_drain(
            ingress_rx,
            self.sink.clone(),
            self.stats.clone(),
            self.running_rx.clone(),
        )));
        handles.push(tokio::spawn(tasks::batch_drain(
            self.batch_queue.clone(),
            self.sink.clone(),
            self.stats.clone(),
            self.running_rx.clone(),
        )));
        handles.push(tokio::spawn(tasks::periodic_sync(
            self.source.clone(),
            self.sink.clone(),
            self.stats.clone(),
            self.running_rx.clone(),
        )));
        handles.push(tokio::spawn(tasks::cleanup(
            self.source_limiter.clone(),
            self.sink_limiter.clone(),
            self.stats.clone(),
            Duration::from_secs(self.config.cleanup_interval_minutes * 60),
            self.running_rx.clone(),
        )));
        handles.push(tokio::spawn(tasks::stats_refresh(
            self.source.clone(),
            self.sink.clone(),
            self.stats.clone(),
            self.running_rx.clone(),
        )));
        handles.push(tokio::spawn(tasks::health_check(
            self.source.clone(),
            self.sink.clone(),
            self.ingress_tx.clone(),
            Duration::from_secs(self.config.health_check_interval_seconds),
            self.running_rx.clone(),
        )));
        drop(handles);

        self.source
            .spawn_gateway_tasks(self.ingress_tx.clone(), self.running_rx.clone())
            .await;

        {
            let sink = self.sink.clone();
            let running = self.running_rx.clone();
            let mut handles = self.task_handles.lock().await;
            handles.push(tokio::spawn(async move {
                sink.run_long_poller(running).await;
            }));
        }

        info!("running initial backfill");
        backfill::initial_backfill(
            &self.source,
            &self.sink,
            self.config.max_history_messages,
            &self.stats,
        )
        .await;

        Ok(())
    }

    /// Flips `running` to false, awaits every background task (suppressing
    /// individual failures), then tears down both sub-services: closes all
    /// gateway connections and HTTP sessions, stops the poller, and persists
    /// the sink blob one final time.
    pub async fn stop(&self) {
        let _ = self.running_tx.send(false);

        let mut handles = self.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.source.shutdown().await;
        if let Err(err) = self.sink.flush().await {
            tracing::warn!(error = %err, "final sink persistence failed during shutdown");
        }
    }
}
