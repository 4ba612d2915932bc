pub mod stats;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ContextHandle, GpuBackend, PresentHandle, PresentStats};
use crate::clock::{self, ClockSnapshot};
use crate::config::TimingConfig;
use crate::node::GpuNode;
use crate::session::{SessionPhase, SessionState};
use crate::store::{TimestampSlot, TraceStore};

use self::stats::{PipelineStats, StatsSnapshot};

/// State mutated under the flip lock: the backend, every node, and the
/// previous presentation sample.
struct PipelineInner<B> {
    backend: B,
    nodes: Vec<GpuNode>,
    prev_present: Option<PresentStats>,
}

/// Orchestrates the GPU timestamp query pipeline.
///
/// Drives `begin_frame`/`end_frame`/`flip`, allocates queries for
/// frame-boundary events, resolves previously submitted ranges once
/// their frame delay has elapsed, and emits synchronized CPU timestamps
/// into the external trace store.
///
/// `flip` acquires one exclusive lock for its whole body, serializing
/// concurrent calls across nodes and threads; the other operations are
/// expected from the thread that owns the node's submission context and
/// take the same lock only briefly.
pub struct GpuTimingPipeline<B, S> {
    cfg: TimingConfig,
    session: Arc<SessionState>,
    store: Arc<S>,
    stats: PipelineStats,
    inner: Mutex<PipelineInner<B>>,
}

impl<B, S> GpuTimingPipeline<B, S>
where
    B: GpuBackend,
    S: TraceStore,
{
    /// Create a pipeline over a backend and trace store. Nodes are
    /// registered separately, one per command queue.
    pub fn new(
        backend: B,
        store: Arc<S>,
        session: Arc<SessionState>,
        cfg: TimingConfig,
    ) -> Result<Self> {
        cfg.validate().context("invalid timing config")?;

        if !backend.supports_annotation() {
            info!("backend has no annotation interface; draw-event markers disabled");
        }

        Ok(Self {
            cfg,
            session,
            store,
            stats: PipelineStats::new(),
            inner: Mutex::new(PipelineInner {
                backend,
                nodes: Vec::new(),
                prev_present: None,
            }),
        })
    }

    /// Register one command-submission context as a profiled node.
    /// Returns the node's stable index. Called at device-init time.
    pub fn register_node(&self, label: impl Into<String>, context: ContextHandle) -> Result<usize> {
        let mut inner = self.inner.lock();
        let index = inner.nodes.len();
        let node = GpuNode::init(
            &mut inner.backend,
            index,
            label,
            context,
            self.cfg.max_queries,
            self.cfg.frame_delay,
        )?;
        inner.nodes.push(node);
        Ok(index)
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Read and reset the pipeline counters.
    pub fn take_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Mark the current node measurable and open its validity query.
    /// No-op unless the session is running.
    pub fn begin_frame(&self) {
        if self.session.phase() != SessionPhase::Running {
            return;
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let node = &mut inner.nodes[self.session.current_node()];
        node.begin(&mut inner.backend);
    }

    /// Close the current node's validity query, performing the bounded
    /// blocking wait for its result. Idempotent: a no-op when the node
    /// is not measurable.
    pub fn end_frame(&self) {
        if self.session.phase() != SessionPhase::Running {
            return;
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let node = &mut inner.nodes[self.session.current_node()];
        node.end(&mut inner.backend, self.cfg.spin_limit);
    }

    /// Request a GPU timestamp capture tied to the current point in the
    /// command stream. Nothing is written synchronously; the slot's
    /// record field is populated during a later resolution pass. No-op
    /// unless the session is running and the node measurable.
    pub fn query_timestamp(&self, slot: TimestampSlot) {
        if self.session.phase() != SessionPhase::Running {
            return;
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let node = &mut inner.nodes[self.session.current_node()];
        if node.measurable {
            node.capture(&mut inner.backend, slot);
            self.stats.record_issued();
        }
    }

    /// Open a pass-through draw-event annotation with a pre-formatted
    /// label. Must nest correctly with [`Self::end_draw_event`].
    pub fn begin_draw_event(&self, label: &str) {
        self.session.push_draw_event();

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        if inner.backend.supports_annotation() {
            let context = inner.nodes[self.session.current_node()].context;
            inner.backend.begin_annotation(context, label);
        }
    }

    /// Close the innermost draw-event annotation.
    pub fn end_draw_event(&self) {
        self.session.pop_draw_event();

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        if inner.backend.supports_annotation() {
            let context = inner.nodes[self.session.current_node()].context;
            inner.backend.end_annotation(context);
        }
    }

    /// On-demand, blocking CPU/GPU clock synchronization for a node.
    /// Also refreshes the snapshot used by subsequent resolution.
    pub fn clock_synchronization(&self, node_index: usize) -> Result<ClockSnapshot> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let node = &mut inner.nodes[node_index];

        let snapshot = clock::synchronize(
            &mut inner.backend,
            &*self.store,
            node.context,
            self.cfg.spin_limit,
        )?;
        node.clock = snapshot;

        Ok(snapshot)
    }

    /// The single per-presented-frame driver. Invoke once per frame;
    /// may originate from a different thread than submission.
    pub fn flip(&self, present: PresentHandle) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let frame_number = self.session.frame_number();

        if self.session.phase() == SessionPhase::Starting {
            self.start_session(inner, frame_number);
        }

        if self.session.phase() == SessionPhase::Running && !self.session.in_draw_event() {
            self.flip_node(inner, frame_number);
            self.process_vsync(inner, present);
            self.stats.record_flip();
        }

        // Frame numbering advances even while not running, so a
        // restarted session never reuses stale frame-delay math.
        self.session.advance_frame();
    }

    /// Release every backend query object owned by the pipeline's
    /// nodes. Call at device shutdown.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        for node in &mut inner.nodes {
            node.shutdown(&mut inner.backend);
        }
        inner.nodes.clear();
        info!("GPU timing pipeline shut down");
    }

    /// First flip after the core requested a start: clear per-node
    /// frame windows from any previous session, re-establish clock
    /// correlation, and enter `Running`.
    fn start_session(&self, inner: &mut PipelineInner<B>, frame_number: u64) {
        for node in &mut inner.nodes {
            node.frames.reset();
            node.measurable = false;
            node.targets.fill(None);

            match clock::synchronize(
                &mut inner.backend,
                &*self.store,
                node.context,
                self.cfg.spin_limit,
            ) {
                Ok(snapshot) => node.clock = snapshot,
                Err(e) => {
                    // Degraded: resolution will emit sentinel values
                    // until a later synchronization succeeds.
                    warn!(node = %node.label, error = %e, "clock synchronization failed");
                    node.clock = ClockSnapshot::default();
                }
            }
        }

        self.session.set_phase(SessionPhase::Running);
        info!(frame = frame_number, "GPU profiling session running");
    }

    /// Per-frame body for the current node: close the previous frame's
    /// boundary timestamp, open the next frame's boundary event, end
    /// the validity query, then resolve the just-closed range and the
    /// frame that has aged past the delay window.
    fn flip_node(&self, inner: &mut PipelineInner<B>, frame_number: u64) {
        let node_index = self.session.current_node();
        let node = &mut inner.nodes[node_index];
        let backend = &mut inner.backend;
        let store = &*self.store;

        let capacity = node.ring.capacity() as u64;
        let depth = node.frames.depth() as u64;

        // Close the previous frame's boundary timestamp, if pending.
        if let Some(event) = node.frames.slot(frame_number).frame_event {
            if node.measurable {
                node.capture(backend, TimestampSlot::EventFinish(event));
                self.stats.record_issued();
            }
        }

        // Open the boundary event for the next frame.
        let event = store.add_frame_event();
        let tag = store.add_frame_tag();
        if node.measurable {
            node.capture(backend, TimestampSlot::EventStart(event));
            node.capture(backend, TimestampSlot::Tag(tag));
            self.stats.record_issued();
            self.stats.record_issued();
        }
        node.frames.slot_mut(frame_number + 1).frame_event = Some(event);

        let query_begin = node.frames.slot(frame_number).query_index_start;
        let query_end = node.ring.next_index();

        node.end(backend, self.cfg.spin_limit);

        // Optimistic resolution of the range the finished frame owns.
        // The range may wrap the ring, splitting into two sub-ranges.
        if let Some(begin) = query_begin {
            let count = query_end - begin;
            assert!(
                count <= capacity,
                "query ring overflow on node '{}': {count} queries in one frame; \
                 increase TimingConfig::max_queries",
                node.label
            );
            node.frames.slot_mut(frame_number).query_index_count = count as u32;

            let start_pos = (begin % capacity) as usize;
            let finish_pos = (query_end % capacity) as usize;

            if start_pos < finish_pos {
                self.resolve_timestamps(node, backend, store, start_pos, finish_pos - start_pos);
            } else if start_pos > finish_pos {
                self.resolve_timestamps(node, backend, store, start_pos, capacity as usize - start_pos);
                self.resolve_timestamps(node, backend, store, 0, finish_pos);
            }
            // start == finish after modulo: nothing to resolve.
        }

        // Resolve the frame that is now `depth` frames behind. By
        // construction its results should already be available; if the
        // backend is still not ready the slots degrade to the sentinel
        // for this pass rather than blocking.
        let aged = *node.frames.slot(frame_number + 1);
        if frame_number >= depth && aged.query_index_count > 0 {
            if let Some(start) = aged.query_index_start {
                let start_pos = (start % capacity) as usize;
                let finish_pos = start_pos + aged.query_index_count as usize;

                let first = finish_pos.min(capacity as usize) - start_pos;
                self.resolve_timestamps(node, backend, store, start_pos, first);
                if finish_pos > capacity as usize {
                    self.resolve_timestamps(node, backend, store, 0, finish_pos - capacity as usize);
                }
            }
        }

        // Claim the ring range for the next frame.
        let next = node.frames.slot_mut(frame_number + 1);
        next.query_index_start = Some(query_end);
        next.query_index_count = 0;

        debug!(
            node = %node.label,
            frame = frame_number,
            queries = query_end - query_begin.unwrap_or(query_end),
            "flip"
        );
    }

    /// Convert raw GPU ticks to CPU timestamps for one contiguous ring
    /// range and write them through the trace store. Results that are
    /// not yet available resolve to the zero sentinel for this pass;
    /// they are never retried within the pass and never block.
    fn resolve_timestamps(
        &self,
        node: &mut GpuNode,
        backend: &B,
        store: &S,
        start: usize,
        count: usize,
    ) {
        if count == 0 {
            return;
        }

        for position in start..start + count {
            let Some(target) = node.targets[position] else {
                continue;
            };

            let timestamp = match backend.poll_timestamp(node.ring.handle_at(position)) {
                Some(gpu_ticks) => {
                    self.stats.record_resolved();
                    node.clock.cpu_time_for(gpu_ticks)
                }
                None => {
                    self.stats.record_not_ready();
                    0
                }
            };

            match target {
                TimestampSlot::EventStart(id) => store.set_event_start(id, timestamp),
                TimestampSlot::EventFinish(id) => store.set_event_finish(id, timestamp),
                TimestampSlot::Tag(id) => store.set_tag_timestamp(id, timestamp),
            }
        }
    }

    /// Pair consecutive presentation samples into a vsync interval
    /// event when the present counter advanced by exactly one; any
    /// discontinuity discards the comparison.
    fn process_vsync(&self, inner: &mut PipelineInner<B>, present: PresentHandle) {
        let Some(current) = inner.backend.present_statistics(present) else {
            // A failed read breaks the pairing chain; a pre-failure
            // sample must not pair with whatever comes next.
            inner.prev_present = None;
            return;
        };

        if let Some(prev) = inner.prev_present {
            if prev.present_count + 1 == current.present_count {
                let event = self.store.add_vsync_event();
                self.store.set_event_start(event, prev.sync_cpu_ticks);
                self.store.set_event_finish(event, current.sync_cpu_ticks);
                self.stats.record_vsync();
            }
        }

        inner.prev_present = Some(current);
    }
}
