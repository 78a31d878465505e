// Pipeline counters shared between the capture worker and observers

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the capture worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    acquired: AtomicU64,
    scheduled: AtomicU64,
    delivered: AtomicU64,
    dropped_busy: AtomicU64,
    transient_errors: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new delivered count
    pub(crate) fn record_delivered(&self) -> u64 {
        self.delivered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> PipelineMetrics {
        PipelineMetrics {
            acquired_frames: self.acquired.load(Ordering::Relaxed),
            scheduled_frames: self.scheduled.load(Ordering::Relaxed),
            delivered_frames: self.delivered.load(Ordering::Relaxed),
            dropped_frames: self.dropped_busy.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
        }
    }
}

/// Pipeline statistics reported to callers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    /// Images taken from the acquisition surface
    pub acquired_frames: u64,
    /// Frames handed to the presentation context
    pub scheduled_frames: u64,
    /// Frames that reached a sink
    pub delivered_frames: u64,
    /// Images released unread because a frame was in flight
    pub dropped_frames: u64,
    /// Images skipped because they could not be read
    pub transient_errors: u64,
}

impl PipelineMetrics {
    /// Get the frame drop percentage
    pub fn drop_percentage(&self) -> f32 {
        if self.acquired_frames == 0 {
            return 0.0;
        }
        (self.dropped_frames as f32 / self.acquired_frames as f32) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = PipelineStats::new();
        stats.record_acquired();
        stats.record_acquired();
        stats.record_scheduled();
        stats.record_dropped();
        assert_eq!(stats.record_delivered(), 1);

        let metrics = stats.snapshot();
        assert_eq!(metrics.acquired_frames, 2);
        assert_eq!(metrics.scheduled_frames, 1);
        assert_eq!(metrics.delivered_frames, 1);
        assert_eq!(metrics.dropped_frames, 1);
    }

    #[test]
    fn test_drop_percentage() {
        let metrics = PipelineMetrics {
            acquired_frames: 100,
            dropped_frames: 20,
            ..Default::default()
        };
        assert_eq!(metrics.drop_percentage(), 20.0);
        assert_eq!(PipelineMetrics::default().drop_percentage(), 0.0);
    }
}
