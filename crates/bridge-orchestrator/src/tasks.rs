//! The orchestrator's long-running background loops. Each takes the shared
//! handles it needs plus a `watch::Receiver<bool>` and exits as soon as it
//! observes `running == false` at its next suspension point.

use crate::config::{
    BATCH_FLUSH_INTERVAL, BUCKET_MAX_AGE, HEALTHY_QUEUE_CEILING, INGRESS_DEQUEUE_TIMEOUT,
    INGRESS_QUEUE_CAPACITY, PERIODIC_SYNC_ERROR_BACKOFF, PERIODIC_SYNC_INTERVAL,
    STATS_REFRESH_INTERVAL,
};
use crate::stats::StatsHandle;
use bridge_common::Message;
use bridge_ratelimit::RateLimiter;
use bridge_sink::SinkClient;
use bridge_source::SourceClient;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{info, warn};

/// Drains the bounded ingress channel one message at a time, delivering each
/// via a single `sink.send`. A 1 s recv timeout lets the loop notice
/// shutdown promptly even with no traffic.
pub async fn ingress_drain(
    mut ingress_rx: mpsc::Receiver<Message>,
    sink: Arc<SinkClient>,
    stats: Arc<StatsHandle>,
    mut running: watch::Receiver<bool>,
) {
    while *running.borrow() {
        let next = tokio::time::timeout(INGRESS_DEQUEUE_TIMEOUT, ingress_rx.recv()).await;
        match next {
            Ok(Some(message)) => match sink.send(&message).await {
                Ok(true) => stats.record_processed(1),
                Ok(false) => stats.record_error("sink delivery failed"),
                Err(err) => stats.record_error(err.to_string()),
            },
            Ok(None) => break,
            Err(_) => continue,
        }
    }
}

/// Secondary path for callers that already have a batch in hand. Flushes
/// when `batch_size` is reached or every `BATCH_FLUSH_INTERVAL` if
/// non-empty, whichever comes first.
pub async fn batch_drain(
    batch_queue: Arc<AsyncMutex<Vec<Message>>>,
    sink: Arc<SinkClient>,
    stats: Arc<StatsHandle>,
    mut running: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(BATCH_FLUSH_INTERVAL);
    while *running.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                flush_batch(&batch_queue, &sink, &stats).await;
            }
            _ = running.changed() => {}
        }
    }
    flush_batch(&batch_queue, &sink, &stats).await;
}

async fn flush_batch(
    batch_queue: &AsyncMutex<Vec<Message>>,
    sink: &SinkClient,
    stats: &StatsHandle,
) {
    let batch = {
        let mut guard = batch_queue.lock().await;
        if guard.is_empty() {
            return;
        }
        std::mem::take(&mut *guard)
    };
    let delivered = sink.send_batch(&batch).await;
    stats.record_processed(delivered as u64);
}

/// Re-runs discovery, prunes dead sink topics, and refreshes stats every
/// `PERIODIC_SYNC_INTERVAL`. A failure at any step backs off for
/// `PERIODIC_SYNC_ERROR_BACKOFF` before the next attempt rather than
/// spinning.
pub async fn periodic_sync(
    source: Arc<SourceClient>,
    sink: Arc<SinkClient>,
    stats: Arc<StatsHandle>,
    mut running: watch::Receiver<bool>,
) {
    while *running.borrow() {
        tokio::select! {
            _ = tokio::time::sleep(PERIODIC_SYNC_INTERVAL) => {}
            _ = running.changed() => { continue; }
        }
        if !*running.borrow() {
            break;
        }

        match source.discover().await {
            Ok(()) => {
                sink.clean_invalid_topics().await;
                refresh_gauges(&source, &sink, &stats);
            }
            Err(err) => {
                warn!(error = %err, "periodic sync failed, backing off");
                stats.record_error(err.to_string());
                tokio::select! {
                    _ = tokio::time::sleep(PERIODIC_SYNC_ERROR_BACKOFF) => {}
                    _ = running.changed() => {}
                }
            }
        }
    }
}

/// Evicts stale rate-limiter buckets and rolls the daily counters at a
/// calendar day boundary.
pub async fn cleanup(
    source_limiter: Arc<RateLimiter>,
    sink_limiter: Arc<RateLimiter>,
    stats: Arc<StatsHandle>,
    interval: std::time::Duration,
    mut running: watch::Receiver<bool>,
) {
    let mut last_day = Utc::now().date_naive();
    while *running.borrow() {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = running.changed() => { continue; }
        }
        if !*running.borrow() {
            break;
        }

        source_limiter.clear_old_buckets(BUCKET_MAX_AGE);
        sink_limiter.clear_old_buckets(BUCKET_MAX_AGE);

        let today = Utc::now().date_naive();
        if today != last_day {
            stats.reset_daily_counters();
            last_day = today;
        }
    }
}

/// Refreshes the guild/channel gauges and process uptime every
/// `STATS_REFRESH_INTERVAL`.
pub async fn stats_refresh(
    source: Arc<SourceClient>,
    sink: Arc<SinkClient>,
    stats: Arc<StatsHandle>,
    mut running: watch::Receiver<bool>,
) {
    while *running.borrow() {
        tokio::select! {
            _ = tokio::time::sleep(STATS_REFRESH_INTERVAL) => {}
            _ = running.changed() => { continue; }
        }
        if !*running.borrow() {
            break;
        }
        refresh_gauges(&source, &sink, &stats);
        let dropped = source.dropped_message_count();
        if dropped > 0 {
            for _ in 0..dropped {
                stats.record_error("ingress queue full");
            }
        }
    }
}

fn refresh_gauges(source: &SourceClient, _sink: &SinkClient, stats: &StatsHandle) {
    stats.refresh_gauges(
        source.total_guild_count() as u32,
        source.active_guild_count() as u32,
        source.total_channel_count() as u32,
        source.accessible_channel_count() as u32,
    );
}

/// Healthy iff the source has at least one valid session, the sink
/// long-poller is running, and the ingress queue is under
/// `HEALTHY_QUEUE_CEILING`. Logged, never used to shut anything down.
pub async fn health_check(
    source: Arc<SourceClient>,
    sink: Arc<SinkClient>,
    ingress_tx: mpsc::Sender<Message>,
    interval: std::time::Duration,
    mut running: watch::Receiver<bool>,
) {
    while *running.borrow() {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = running.changed() => { continue; }
        }
        if !*running.borrow() {
            break;
        }

        let queue_size = INGRESS_QUEUE_CAPACITY - ingress_tx.capacity();
        let healthy = source.valid_session_count() >= 1
            && sink.poller_running()
            && queue_size < HEALTHY_QUEUE_CEILING;

        if healthy {
            info!(queue_size, "health check passed");
        } else {
            warn!(
                queue_size,
                sessions = source.valid_session_count(),
                poller_running = sink.poller_running(),
                "health check failed"
            );
        }
    }
}
