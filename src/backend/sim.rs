use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use super::{
    ContextHandle, GpuBackend, PresentHandle, PresentStats, QueryHandle, ValiditySample,
};

/// One recorded backend call, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    IssueTimestamp(QueryHandle),
    BeginValidity(QueryHandle),
    EndValidity(QueryHandle),
    /// Poll of a timestamp query; the flag records whether the result
    /// was ready.
    PollTimestamp(QueryHandle, bool),
    BeginAnnotation(String),
    EndAnnotation,
    PresentStatistics,
    /// Test-inserted marker, used to correlate backend activity with
    /// driver calls.
    Marker(String),
}

#[derive(Debug, Clone, Copy)]
struct PendingTimestamp {
    ticks: u64,
    /// Presented-frame count at which the result becomes pollable.
    ready_at: u64,
}

#[derive(Debug, Clone, Copy)]
enum SimQuery {
    Timestamp(Option<PendingTimestamp>),
    Validity {
        open: bool,
        sample: Option<ValiditySample>,
    },
    Released,
}

struct SimState {
    queries: Vec<SimQuery>,
    gpu_now: u64,
    gpu_step: u64,
    gpu_frequency: i64,
    latency_frames: u64,
    frames_presented: u64,
    disjoint: bool,
    annotation_supported: bool,
    annotation_depth: u32,
    present_script: VecDeque<PresentStats>,
    log: Vec<BackendCall>,
}

/// Deterministic simulated [`GpuBackend`].
///
/// The GPU clock is scripted: every issued timestamp captures the
/// current simulated tick value and advances it by a fixed step. Query
/// results become pollable after a configurable number of presented
/// frames, which reproduces the asynchronous readiness behavior of a
/// real device without one. Each `present_statistics` call marks one
/// presented frame.
///
/// Cloning yields another handle to the same simulated device, so a
/// test can keep one handle while the pipeline owns the other.
#[derive(Clone)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// Create a simulated device: GPU clock at 0 advancing 100 ticks
    /// per capture, 1 MHz GPU frequency, results ready immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                queries: Vec::new(),
                gpu_now: 0,
                gpu_step: 100,
                gpu_frequency: 1_000_000,
                latency_frames: 0,
                frames_presented: 0,
                disjoint: false,
                annotation_supported: true,
                annotation_depth: 0,
                present_script: VecDeque::new(),
                log: Vec::new(),
            })),
        }
    }

    /// Set the simulated GPU clock to an absolute tick value.
    pub fn set_gpu_clock(&self, ticks: u64) {
        self.state.lock().gpu_now = ticks;
    }

    /// Set the tick advance applied after each timestamp capture.
    pub fn set_gpu_step(&self, step: u64) {
        self.state.lock().gpu_step = step;
    }

    /// Set the reported GPU tick frequency.
    pub fn set_gpu_frequency(&self, frequency: i64) {
        self.state.lock().gpu_frequency = frequency;
    }

    /// Results of timestamps issued from now on become pollable only
    /// after this many further presented frames.
    pub fn set_latency_frames(&self, frames: u64) {
        self.state.lock().latency_frames = frames;
    }

    /// Mark subsequent validity samples as disjoint (clock unstable).
    pub fn set_disjoint(&self, disjoint: bool) {
        self.state.lock().disjoint = disjoint;
    }

    /// Enable or disable the annotation capability.
    pub fn set_annotation_supported(&self, supported: bool) {
        self.state.lock().annotation_supported = supported;
    }

    /// Queue one frame-statistics sample to be returned by the next
    /// `present_statistics` call.
    pub fn push_present(&self, present_count: u32, sync_cpu_ticks: i64) {
        self.state.lock().present_script.push_back(PresentStats {
            present_count,
            sync_cpu_ticks,
        });
    }

    /// Mark one presented frame without going through the pipeline.
    pub fn advance_frame(&self) {
        self.state.lock().frames_presented += 1;
    }

    /// Current annotation nesting depth.
    pub fn annotation_depth(&self) -> u32 {
        self.state.lock().annotation_depth
    }

    /// Insert a marker into the call log.
    pub fn mark(&self, label: &str) {
        self.state
            .lock()
            .log
            .push(BackendCall::Marker(label.to_string()));
    }

    /// Take and clear the recorded call log.
    pub fn take_log(&self) -> Vec<BackendCall> {
        std::mem::take(&mut self.state.lock().log)
    }

    fn create(&self, query: SimQuery) -> QueryHandle {
        let mut state = self.state.lock();
        let handle = QueryHandle(state.queries.len() as u32);
        state.queries.push(query);
        handle
    }
}

impl GpuBackend for SimBackend {
    fn create_timestamp_query(&mut self) -> Result<QueryHandle> {
        Ok(self.create(SimQuery::Timestamp(None)))
    }

    fn create_validity_query(&mut self) -> Result<QueryHandle> {
        Ok(self.create(SimQuery::Validity {
            open: false,
            sample: None,
        }))
    }

    fn release_query(&mut self, query: QueryHandle) {
        let mut state = self.state.lock();
        if let Some(slot) = state.queries.get_mut(query.0 as usize) {
            *slot = SimQuery::Released;
        }
    }

    fn issue_timestamp(&mut self, _context: ContextHandle, query: QueryHandle) {
        let mut state = self.state.lock();
        let ticks = state.gpu_now;
        state.gpu_now += state.gpu_step;
        let ready_at = state.frames_presented + state.latency_frames;
        state.log.push(BackendCall::IssueTimestamp(query));

        match state.queries.get_mut(query.0 as usize) {
            Some(SimQuery::Timestamp(pending)) => {
                *pending = Some(PendingTimestamp { ticks, ready_at });
            }
            _ => panic!("issue_timestamp on non-timestamp query {query:?}"),
        }
    }

    fn begin_validity(&mut self, _context: ContextHandle, query: QueryHandle) {
        let mut state = self.state.lock();
        state.log.push(BackendCall::BeginValidity(query));
        match state.queries.get_mut(query.0 as usize) {
            Some(SimQuery::Validity { open, sample }) => {
                *open = true;
                *sample = None;
            }
            _ => panic!("begin_validity on non-validity query {query:?}"),
        }
    }

    fn end_validity(&mut self, _context: ContextHandle, query: QueryHandle) {
        let mut state = self.state.lock();
        let result = ValiditySample {
            gpu_frequency: state.gpu_frequency,
            disjoint: state.disjoint,
        };
        state.log.push(BackendCall::EndValidity(query));
        match state.queries.get_mut(query.0 as usize) {
            Some(SimQuery::Validity { open, sample }) => {
                assert!(*open, "end_validity without begin_validity");
                *open = false;
                *sample = Some(result);
            }
            _ => panic!("end_validity on non-validity query {query:?}"),
        }
    }

    fn poll_timestamp(&self, query: QueryHandle) -> Option<u64> {
        let mut state = self.state.lock();
        let frames = state.frames_presented;

        let result = match state.queries.get(query.0 as usize) {
            Some(SimQuery::Timestamp(Some(pending))) if frames >= pending.ready_at => {
                Some(pending.ticks)
            }
            Some(SimQuery::Timestamp(_)) => None,
            _ => panic!("poll_timestamp on non-timestamp query {query:?}"),
        };

        state
            .log
            .push(BackendCall::PollTimestamp(query, result.is_some()));
        result
    }

    fn poll_validity(&self, query: QueryHandle) -> Option<ValiditySample> {
        match self.state.lock().queries.get(query.0 as usize) {
            Some(SimQuery::Validity { sample, .. }) => *sample,
            _ => panic!("poll_validity on non-validity query {query:?}"),
        }
    }

    fn supports_annotation(&self) -> bool {
        self.state.lock().annotation_supported
    }

    fn begin_annotation(&mut self, _context: ContextHandle, label: &str) {
        let mut state = self.state.lock();
        state.annotation_depth += 1;
        state
            .log
            .push(BackendCall::BeginAnnotation(label.to_string()));
    }

    fn end_annotation(&mut self, _context: ContextHandle) {
        let mut state = self.state.lock();
        assert!(
            state.annotation_depth > 0,
            "end_annotation without begin_annotation"
        );
        state.annotation_depth -= 1;
        state.log.push(BackendCall::EndAnnotation);
    }

    fn present_statistics(&mut self, _present: PresentHandle) -> Option<PresentStats> {
        let mut state = self.state.lock();
        state.frames_presented += 1;
        state.log.push(BackendCall::PresentStatistics);
        state.present_script.pop_front()
    }
}
