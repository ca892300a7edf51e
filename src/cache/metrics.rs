//! Engine Metrics
//!
//! Cache-line aligned counters, one block for cache refresh traffic and one
//! for signal handling, so the poller and the dispatcher do not contend on
//! the same line.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Refresh Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for entry refreshes and batched polls
#[repr(C, align(64))]
#[derive(Debug)]
pub struct RefreshMetrics {
    /// Single-node refreshes started
    pub refreshes: AtomicU64,
    /// Refreshes or batch slots that ended in a failure
    pub refresh_failures: AtomicU64,
    /// Batched polls issued
    pub batch_polls: AtomicU64,
    /// Nodes covered by batched polls
    pub polled_nodes: AtomicU64,
    /// Scheduler ticks skipped because nothing was subscribed
    pub skipped_ticks: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<RefreshMetrics>() <= CACHE_LINE_SIZE);

impl Default for RefreshMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self {
            refreshes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            batch_polls: AtomicU64::new(0),
            polled_nodes: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 16],
        }
    }

    #[inline]
    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_batch_poll(&self, nodes: usize) {
        self.batch_polls.fetch_add(1, Ordering::Relaxed);
        self.polled_nodes.fetch_add(nodes as u64, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }
}

// =============================================================================
// Signal Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for inbound signal handling
#[repr(C, align(64))]
#[derive(Debug)]
pub struct SignalMetrics {
    /// Signals merged into the cache
    pub signals_applied: AtomicU64,
    /// Local signals forwarded to peers
    pub signals_rebroadcast: AtomicU64,
    /// Forwarding calls that failed
    pub rebroadcast_failures: AtomicU64,
    /// Deferred confirmation fetches that failed
    pub confirmation_failures: AtomicU64,
    /// Signals lost because the receiver lagged
    pub signals_lagged: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<SignalMetrics>() <= CACHE_LINE_SIZE);

impl Default for SignalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalMetrics {
    pub fn new() -> Self {
        Self {
            signals_applied: AtomicU64::new(0),
            signals_rebroadcast: AtomicU64::new(0),
            rebroadcast_failures: AtomicU64::new(0),
            confirmation_failures: AtomicU64::new(0),
            signals_lagged: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 16],
        }
    }

    #[inline]
    pub fn record_applied(&self) {
        self.signals_applied.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_rebroadcast(&self) {
        self.signals_rebroadcast.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_rebroadcast_failure(&self) {
        self.rebroadcast_failures.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_confirmation_failure(&self) {
        self.confirmation_failures.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_lagged(&self, skipped: u64) {
        self.signals_lagged.fetch_add(skipped, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }
}

// =============================================================================
// Engine Statistics
// =============================================================================

/// Point-in-time snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub batch_polls: u64,
    pub polled_nodes: u64,
    pub skipped_ticks: u64,
    pub signals_applied: u64,
    pub signals_rebroadcast: u64,
    pub rebroadcast_failures: u64,
    pub confirmation_failures: u64,
    pub signals_lagged: u64,
}

impl EngineStatsSnapshot {
    /// Average number of nodes per batched poll
    pub fn avg_batch_size(&self) -> f64 {
        if self.batch_polls == 0 {
            0.0
        } else {
            self.polled_nodes as f64 / self.batch_polls as f64
        }
    }
}

/// Engine-wide metrics container
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub refresh: RefreshMetrics,
    pub signals: SignalMetrics,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            refreshes: self.refresh.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh.refresh_failures.load(Ordering::Relaxed),
            batch_polls: self.refresh.batch_polls.load(Ordering::Relaxed),
            polled_nodes: self.refresh.polled_nodes.load(Ordering::Relaxed),
            skipped_ticks: self.refresh.skipped_ticks.load(Ordering::Relaxed),
            signals_applied: self.signals.signals_applied.load(Ordering::Relaxed),
            signals_rebroadcast: self.signals.signals_rebroadcast.load(Ordering::Relaxed),
            rebroadcast_failures: self.signals.rebroadcast_failures.load(Ordering::Relaxed),
            confirmation_failures: self.signals.confirmation_failures.load(Ordering::Relaxed),
            signals_lagged: self.signals.signals_lagged.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<RefreshMetrics>(), CACHE_LINE_SIZE);
        assert_eq!(std::mem::align_of::<SignalMetrics>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<SignalMetrics>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_engine_snapshot() {
        let metrics = EngineMetrics::new();

        metrics.refresh.record_refresh();
        metrics.refresh.record_batch_poll(3);
        metrics.refresh.record_batch_poll(1);
        metrics.refresh.record_skipped_tick();
        metrics.signals.record_applied();
        metrics.signals.record_lagged(7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refreshes, 1);
        assert_eq!(snapshot.batch_polls, 2);
        assert_eq!(snapshot.polled_nodes, 4);
        assert_eq!(snapshot.skipped_ticks, 1);
        assert_eq!(snapshot.signals_applied, 1);
        assert_eq!(snapshot.signals_lagged, 7);
        assert!((snapshot.avg_batch_size() - 2.0).abs() < f64::EPSILON);
        assert!(metrics.refresh.last_update_ms.load(Ordering::Acquire) > 0);
    }
}
