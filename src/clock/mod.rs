use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::backend::{ContextHandle, GpuBackend};
use crate::store::TraceStore;

/// One correlated CPU/GPU clock reading for a node.
///
/// Converts any later raw GPU tick into CPU-comparable time by linear
/// scaling. Snapshots are recomputed per session rather than cached
/// indefinitely, because GPU clock domains drift and can reset on
/// power-state changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockSnapshot {
    pub cpu_ticks: i64,
    pub cpu_frequency: i64,
    pub gpu_ticks: u64,
    pub gpu_frequency: i64,
}

impl ClockSnapshot {
    /// Convert a raw GPU tick value to a CPU-comparable timestamp:
    /// `cpu_ticks + (gpu - gpu_ticks) * cpu_frequency / gpu_frequency`.
    ///
    /// Returns 0 if the snapshot has no GPU frequency (synchronization
    /// never succeeded).
    pub fn cpu_time_for(&self, gpu_timestamp: u64) -> i64 {
        if self.gpu_frequency <= 0 {
            return 0;
        }

        let delta = gpu_timestamp as i128 - self.gpu_ticks as i128;
        let scaled = delta * self.cpu_frequency as i128 / self.gpu_frequency as i128;
        self.cpu_ticks + scaled as i64
    }

    /// Whether synchronization produced usable frequencies.
    pub fn is_valid(&self) -> bool {
        self.cpu_frequency > 0 && self.gpu_frequency > 0
    }
}

/// Busy-poll a non-blocking read until it yields or the iteration cap
/// is exhausted. Genuine stall, but bounded: never blocks indefinitely.
pub(crate) fn spin_poll<T>(spin_limit: u64, mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..spin_limit {
        if let Some(value) = poll() {
            return Some(value);
        }
        std::hint::spin_loop();
    }
    None
}

/// Establish a CPU/GPU clock correlation for one node context.
///
/// Issues one validity query and one timestamp query back-to-back,
/// then busy-polls (bounded by `spin_limit`) until both resolve. The
/// CPU time is read immediately adjacent to the GPU timestamp read to
/// minimize skew. This is an explicit, rare, blocking operation - it
/// must stay off the steady-state per-frame path.
pub fn synchronize<B, S>(
    backend: &mut B,
    store: &S,
    context: ContextHandle,
    spin_limit: u64,
) -> Result<ClockSnapshot>
where
    B: GpuBackend,
    S: TraceStore,
{
    let validity = backend
        .create_validity_query()
        .context("creating clock-sync validity query")?;
    let timestamp = match backend.create_timestamp_query() {
        Ok(handle) => handle,
        Err(e) => {
            backend.release_query(validity);
            return Err(e.context("creating clock-sync timestamp query"));
        }
    };

    backend.begin_validity(context, validity);
    backend.issue_timestamp(context, timestamp);
    backend.end_validity(context, validity);

    let sample = spin_poll(spin_limit, || backend.poll_validity(validity));
    let gpu_ticks = spin_poll(spin_limit, || backend.poll_timestamp(timestamp));
    let cpu_ticks = store.cpu_timestamp();

    backend.release_query(timestamp);
    backend.release_query(validity);

    let (Some(sample), Some(gpu_ticks)) = (sample, gpu_ticks) else {
        warn!(spin_limit, "clock synchronization timed out waiting for GPU");
        bail!("clock synchronization queries did not resolve within spin limit");
    };

    if sample.disjoint {
        warn!("GPU clock was disjoint during synchronization window");
    }

    Ok(ClockSnapshot {
        cpu_ticks,
        cpu_frequency: store.cpu_frequency(),
        gpu_ticks,
        gpu_frequency: sample.gpu_frequency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimBackend;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_cpu_time_for_scales_delta() {
        let clock = ClockSnapshot {
            cpu_ticks: 1_000,
            cpu_frequency: 10_000_000,
            gpu_ticks: 500,
            gpu_frequency: 1_000_000,
        };

        // 100 GPU ticks at 1MHz = 100us = 1000 CPU ticks at 10MHz.
        assert_eq!(clock.cpu_time_for(600), 2_000);
        assert_eq!(clock.cpu_time_for(500), 1_000);
        // Earlier than the snapshot point maps backwards.
        assert_eq!(clock.cpu_time_for(400), 0);
    }

    #[test]
    fn test_cpu_time_for_large_values_no_overflow() {
        let clock = ClockSnapshot {
            cpu_ticks: i64::MAX / 4,
            cpu_frequency: 10_000_000,
            gpu_ticks: 0,
            gpu_frequency: 1_000_000,
        };
        // Would overflow i64 without a widened intermediate.
        let converted = clock.cpu_time_for(1 << 40);
        assert!(converted > clock.cpu_ticks);
    }

    #[test]
    fn test_invalid_snapshot_returns_zero() {
        let clock = ClockSnapshot::default();
        assert!(!clock.is_valid());
        assert_eq!(clock.cpu_time_for(12345), 0);
    }

    #[test]
    fn test_spin_poll_bounded() {
        let mut calls = 0u64;
        let result: Option<()> = spin_poll(10, || {
            calls += 1;
            None
        });
        assert!(result.is_none());
        assert_eq!(calls, 10);
    }

    #[test]
    fn test_spin_poll_returns_early() {
        let mut calls = 0u64;
        let result = spin_poll(10, || {
            calls += 1;
            (calls == 3).then_some(calls)
        });
        assert_eq!(result, Some(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_synchronize_against_sim() {
        let mut sim = SimBackend::new();
        sim.set_gpu_clock(40_000);
        sim.set_gpu_frequency(1_000_000);

        let store = MemoryStore::new(10_000_000);
        store.set_cpu_time(9_000);

        let clock = synchronize(&mut sim, &store, ContextHandle(0), 1_000).expect("sync resolves");

        assert_eq!(clock.cpu_ticks, 9_000);
        assert_eq!(clock.cpu_frequency, 10_000_000);
        assert_eq!(clock.gpu_ticks, 40_000);
        assert_eq!(clock.gpu_frequency, 1_000_000);
        assert!(clock.is_valid());
    }

    #[test]
    fn test_synchronize_times_out_when_not_ready() {
        let mut sim = SimBackend::new();
        // Results never become ready without presented frames.
        sim.set_latency_frames(1_000);

        let store = MemoryStore::new(10_000_000);
        let result = synchronize(&mut sim, &store, ContextHandle(0), 100);
        assert!(result.is_err());
    }
}
