use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pipeline counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
#[derive(Debug, Default)]
pub struct PipelineStats {
    queries_issued: AtomicU64,
    queries_resolved: AtomicU64,
    queries_not_ready: AtomicU64,
    frames_flipped: AtomicU64,
    vsync_events: AtomicU64,
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Timestamp queries issued on any node.
    pub queries_issued: u64,
    /// Query results successfully converted to CPU time.
    pub queries_resolved: u64,
    /// Query results not ready at resolution time (sentinel written).
    pub queries_not_ready: u64,
    /// Flips that executed the full pipeline body.
    pub frames_flipped: u64,
    /// Vertical-sync interval events emitted.
    pub vsync_events: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_issued(&self) {
        self.queries_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resolved(&self) {
        self.queries_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_not_ready(&self) {
        self.queries_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flip(&self) {
        self.frames_flipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_vsync(&self) {
        self.vsync_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries_issued: self.queries_issued.swap(0, Ordering::Relaxed),
            queries_resolved: self.queries_resolved.swap(0, Ordering::Relaxed),
            queries_not_ready: self.queries_not_ready.swap(0, Ordering::Relaxed),
            frames_flipped: self.frames_flipped.swap(0, Ordering::Relaxed),
            vsync_events: self.vsync_events.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = PipelineStats::new();
        stats.record_issued();
        stats.record_issued();
        stats.record_resolved();
        stats.record_not_ready();
        stats.record_flip();
        stats.record_vsync();

        let snap = stats.snapshot();
        assert_eq!(snap.queries_issued, 2);
        assert_eq!(snap.queries_resolved, 1);
        assert_eq!(snap.queries_not_ready, 1);
        assert_eq!(snap.frames_flipped, 1);
        assert_eq!(snap.vsync_events, 1);
    }

    #[test]
    fn test_snapshot_resets() {
        let stats = PipelineStats::new();
        stats.record_issued();

        assert_eq!(stats.snapshot().queries_issued, 1);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
