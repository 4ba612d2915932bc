use crate::store::EventId;

/// Per-frame query bookkeeping: the slice of the query ring a frame
/// owns, plus its boundary event.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFrame {
    /// Monotonic query index of the frame's first slot; `None` until
    /// the frame has started submitting.
    pub query_index_start: Option<u64>,
    /// Number of slots the frame owns.
    pub query_index_count: u32,
    /// The frame's boundary event in the trace store.
    pub frame_event: Option<EventId>,
}

impl QueryFrame {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Window of the `D` frames currently in flight for one node.
///
/// Frames are addressed by their monotonic frame number modulo the
/// delay depth, so frame `F` and frame `F + D` share a slot - by the
/// time `F + D` claims it, `F`'s results have either been resolved or
/// are abandoned.
#[derive(Debug)]
pub struct FrameWindow {
    frames: Vec<QueryFrame>,
}

impl FrameWindow {
    /// Create a window with the given frame delay depth.
    pub fn new(depth: usize) -> Self {
        assert!(depth >= 2, "frame delay depth must be at least 2");
        Self {
            frames: vec![QueryFrame::default(); depth],
        }
    }

    /// Frame delay depth `D`.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The in-flight record for a frame number.
    pub fn slot(&self, frame_number: u64) -> &QueryFrame {
        &self.frames[(frame_number % self.frames.len() as u64) as usize]
    }

    /// Mutable in-flight record for a frame number.
    pub fn slot_mut(&mut self, frame_number: u64) -> &mut QueryFrame {
        let depth = self.frames.len() as u64;
        &mut self.frames[(frame_number % depth) as usize]
    }

    /// Clear all in-flight records. Used when a session restarts so
    /// stale index ranges never reach the resolver.
    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_shared_modulo_depth() {
        let mut window = FrameWindow::new(3);
        window.slot_mut(1).query_index_count = 7;

        assert_eq!(window.slot(1).query_index_count, 7);
        assert_eq!(window.slot(4).query_index_count, 7);
        assert_eq!(window.slot(2).query_index_count, 0);
    }

    #[test]
    fn test_reset_clears_all() {
        let mut window = FrameWindow::new(2);
        window.slot_mut(0).query_index_start = Some(42);
        window.slot_mut(1).frame_event = Some(EventId(3));

        window.reset();

        assert!(window.slot(0).query_index_start.is_none());
        assert!(window.slot(1).frame_event.is_none());
    }

    #[test]
    #[should_panic(expected = "at least 2")]
    fn test_too_shallow_depth_panics() {
        FrameWindow::new(1);
    }
}
