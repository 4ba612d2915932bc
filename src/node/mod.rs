use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use crate::backend::{ContextHandle, GpuBackend, QueryHandle};
use crate::clock::{spin_poll, ClockSnapshot};
use crate::frame::FrameWindow;
use crate::query::QuerySlotRing;
use crate::store::TimestampSlot;

/// One GPU command-submission stream (queue/device context).
///
/// Owns its query ring, the per-slot write targets, the per-frame
/// validity query, and the clock snapshot used to convert its raw GPU
/// ticks. Created once at device-init time; all backend query objects
/// it owns are released through [`GpuNode::shutdown`].
pub struct GpuNode {
    pub index: usize,
    pub label: String,
    pub context: ContextHandle,
    pub ring: QuerySlotRing,
    /// Write target for each ring position; `None` means the slot has
    /// never been issued since the node (re)started.
    pub targets: Vec<Option<TimestampSlot>>,
    pub validity_query: QueryHandle,
    /// True only between a successful `begin` and its matching `end`.
    pub measurable: bool,
    pub clock: ClockSnapshot,
    pub frames: FrameWindow,
}

impl GpuNode {
    /// Create a node and its backend query objects.
    pub fn init<B: GpuBackend>(
        backend: &mut B,
        index: usize,
        label: impl Into<String>,
        context: ContextHandle,
        capacity: usize,
        frame_delay: usize,
    ) -> Result<Self> {
        let label = label.into();

        let mut handles = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let handle = backend
                .create_timestamp_query()
                .with_context(|| format!("creating timestamp queries for node '{label}'"))?;
            handles.push(handle);
        }

        let validity_query = backend
            .create_validity_query()
            .with_context(|| format!("creating validity query for node '{label}'"))?;

        debug!(node = %label, index, capacity, frame_delay, "GPU node initialized");

        Ok(Self {
            index,
            label,
            context,
            ring: QuerySlotRing::new(handles),
            targets: vec![None; capacity],
            validity_query,
            measurable: false,
            clock: ClockSnapshot::default(),
            frames: FrameWindow::new(frame_delay),
        })
    }

    /// Mark the node measurable and open its validity query for the
    /// frame. Must be paired with exactly one [`GpuNode::end`].
    pub fn begin<B: GpuBackend>(&mut self, backend: &mut B) {
        assert!(
            !self.measurable,
            "begin_frame called twice without end_frame on node '{}'",
            self.label
        );
        self.measurable = true;
        backend.begin_validity(self.context, self.validity_query);
    }

    /// Close the validity query and perform the one intentionally
    /// synchronous read of the frame: a bounded busy-poll for the
    /// validity result, used to detect GPU clock discontinuities.
    /// No-op (idempotent) when the node is not measurable.
    pub fn end<B: GpuBackend>(&mut self, backend: &mut B, spin_limit: u64) {
        if !self.measurable {
            return;
        }

        backend.end_validity(self.context, self.validity_query);

        // Best-effort read: the disjoint flag is logged, not propagated
        // into event records.
        match spin_poll(spin_limit, || backend.poll_validity(self.validity_query)) {
            Some(sample) if sample.disjoint => {
                warn!(
                    node = %self.label,
                    "GPU clock discontinuity during frame; timestamps unreliable"
                );
            }
            Some(_) => {}
            None => {
                warn!(node = %self.label, spin_limit, "validity query read timed out");
            }
        }

        self.measurable = false;
    }

    /// Allocate the next ring slot, record its write target, and issue
    /// the timestamp query on the node's command stream. Returns the
    /// slot's monotonic query index.
    pub fn capture<B: GpuBackend>(&mut self, backend: &mut B, slot: TimestampSlot) -> u64 {
        let index = self.ring.allocate();
        let position = self.ring.position(index);
        self.targets[position] = Some(slot);
        backend.issue_timestamp(self.context, self.ring.handle_at(position));
        index
    }

    /// Release every backend query object the node owns.
    pub fn shutdown<B: GpuBackend>(&mut self, backend: &mut B) {
        self.ring.release(backend);
        backend.release_query(self.validity_query);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::{BackendCall, SimBackend};
    use crate::store::EventId;

    fn test_node(sim: &mut SimBackend) -> GpuNode {
        GpuNode::init(sim, 0, "gpu0", ContextHandle(0), 8, 2).expect("node init")
    }

    #[test]
    fn test_begin_end_toggles_measurable() {
        let mut sim = SimBackend::new();
        let mut node = test_node(&mut sim);

        assert!(!node.measurable);
        node.begin(&mut sim);
        assert!(node.measurable);
        node.end(&mut sim, 100);
        assert!(!node.measurable);
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut sim = SimBackend::new();
        let mut node = test_node(&mut sim);

        node.begin(&mut sim);
        node.end(&mut sim, 100);

        sim.take_log();
        node.end(&mut sim, 100);
        assert!(sim.take_log().is_empty(), "second end made backend calls");
    }

    #[test]
    #[should_panic(expected = "begin_frame called twice")]
    fn test_double_begin_panics() {
        let mut sim = SimBackend::new();
        let mut node = test_node(&mut sim);
        node.begin(&mut sim);
        node.begin(&mut sim);
    }

    #[test]
    fn test_capture_issues_on_ring_slot() {
        let mut sim = SimBackend::new();
        let mut node = test_node(&mut sim);
        sim.take_log();

        let slot = TimestampSlot::EventStart(EventId(0));
        let index = node.capture(&mut sim, slot);

        assert_eq!(index, 0);
        assert_eq!(node.targets[0], Some(slot));

        let log = sim.take_log();
        let handle = node.ring.handle_at(0);
        assert_eq!(log, vec![BackendCall::IssueTimestamp(handle)]);
    }
}
