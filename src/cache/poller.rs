//! Poll Scheduler
//!
//! A single engine-wide timer that sweeps every subscribed node with one
//! batched call per tick.

use crate::cache::metrics::EngineMetrics;
use crate::cache::registry::CacheRegistry;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Periodic sweep over all subscribed nodes
pub struct PollScheduler {
    registry: Arc<CacheRegistry>,
    interval: Duration,
    metrics: Arc<EngineMetrics>,
}

impl PollScheduler {
    pub fn new(registry: Arc<CacheRegistry>, interval: Duration, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            registry,
            interval,
            metrics,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep every subscribed node now
    ///
    /// Returns the number of nodes polled. Ticks with nothing subscribed
    /// make no call.
    pub async fn poll_now(&self, allow_delete: bool) -> Result<usize> {
        let nodes = self.registry.subscribed_node_ids();
        if nodes.is_empty() {
            trace!("No subscribed nodes, skipping poll");
            self.metrics.refresh.record_skipped_tick();
            return Ok(0);
        }

        self.registry.refresh_batch(&nodes, allow_delete).await?;
        Ok(nodes.len())
    }

    /// Run the timer until `shutdown` is cancelled
    ///
    /// The first sweep happens one interval after start.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Poll scheduler started");
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.poll_now(false).await {
                            Ok(0) => {}
                            Ok(polled) => debug!(polled, "Scheduled poll complete"),
                            // Already logged by the registry, the next tick retries
                            Err(e) => trace!(error = %e, "Scheduled poll failed"),
                        }
                    }
                }
            }

            info!("Poll scheduler stopped");
        })
    }
}
