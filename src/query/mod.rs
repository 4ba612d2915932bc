use crate::backend::{GpuBackend, QueryHandle};

/// Fixed-capacity circular array of reusable timestamp-query handles.
///
/// Allocation hands out a monotonically increasing query index; the
/// ring position is the index modulo capacity. A slot must not be
/// re-issued before its previous result has been consumed by the
/// resolver - the pipeline asserts that a frame's active range never
/// exceeds capacity, which is the only way the ring could wrap onto
/// unconsumed slots.
pub struct QuerySlotRing {
    handles: Vec<QueryHandle>,
    next_index: u64,
}

impl QuerySlotRing {
    /// Build a ring over pre-created backend query objects.
    pub fn new(handles: Vec<QueryHandle>) -> Self {
        assert!(!handles.is_empty(), "query ring capacity must be positive");
        Self {
            handles,
            next_index: 0,
        }
    }

    /// Ring capacity (number of reusable query slots).
    pub fn capacity(&self) -> usize {
        self.handles.len()
    }

    /// Monotonic index of the next slot to be allocated.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Allocate the next slot, returning its monotonic index. The
    /// caller must issue the backend query at `handle_at(position(i))`
    /// immediately.
    pub fn allocate(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Ring position for a monotonic query index.
    pub fn position(&self, index: u64) -> usize {
        (index % self.handles.len() as u64) as usize
    }

    /// Backend query handle at a ring position.
    pub fn handle_at(&self, position: usize) -> QueryHandle {
        self.handles[position]
    }

    /// Release every query object back to the backend.
    pub fn release<B: GpuBackend>(&mut self, backend: &mut B) {
        for handle in self.handles.drain(..) {
            backend.release_query(handle);
        }
    }
}
