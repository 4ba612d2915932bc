use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Profiling session phase, driven by the profiler core.
///
/// The pipeline only issues and resolves queries while `Running`; the
/// single transition it performs itself is `Starting -> Running` on the
/// first flip of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionPhase {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl SessionPhase {
    /// Returns the canonical log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Starting),
            2 => Some(Self::Running),
            3 => Some(Self::Stopping),
            _ => None,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared profiling session state, injected by the profiler core.
///
/// The core owns the lifecycle (start/stop); the pipeline reads the
/// phase, advances the frame counter on every flip, and tracks the
/// draw-event nesting depth for its annotation pass-through. All fields
/// are atomics so the core and the submission threads never contend on
/// a lock for state reads.
#[derive(Debug, Default)]
pub struct SessionState {
    phase: AtomicU32,
    current_node: AtomicU32,
    draw_event_depth: AtomicU32,
    frame_number: AtomicU64,
}

impl SessionState {
    /// Create a new session in the `Idle` phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current profiling phase.
    pub fn phase(&self) -> SessionPhase {
        // Only set_phase values are ever stored.
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire) as u8)
            .unwrap_or(SessionPhase::Idle)
    }

    /// Set the profiling phase.
    pub fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase as u32, Ordering::Release);
    }

    /// Index of the node currently selected for submission.
    pub fn current_node(&self) -> usize {
        self.current_node.load(Ordering::Relaxed) as usize
    }

    /// Select the node for subsequent submission-path calls.
    pub fn set_current_node(&self, index: usize) {
        self.current_node.store(index as u32, Ordering::Relaxed);
    }

    /// Whether a draw-event annotation is currently open.
    pub fn in_draw_event(&self) -> bool {
        self.draw_event_depth.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn push_draw_event(&self) {
        self.draw_event_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pop_draw_event(&self) {
        let prev = self.draw_event_depth.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "end_draw_event without matching begin_draw_event");
    }

    /// Monotonic frame counter; advances on every flip, even while the
    /// session is not running, so frame numbering stays consistent
    /// across session restarts.
    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Relaxed)
    }

    pub(crate) fn advance_frame(&self) -> u64 {
        self.frame_number.fetch_add(1, Ordering::Relaxed)
    }
}
