use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use super::{EventId, TagId, TraceStore};

/// Kind of a record held by the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    FrameEvent,
    VSyncEvent,
}

/// One event record: a timestamp pair plus its kind.
#[derive(Debug, Clone, Copy)]
pub struct EventRecord {
    pub kind: RecordKind,
    pub start: i64,
    pub finish: i64,
}

/// In-memory reference [`TraceStore`].
///
/// Serves two purposes: a deterministic harness for tests (the CPU
/// clock is advanced manually) and a minimal store for headless engine
/// integrations that have no profiler core of their own.
pub struct MemoryStore {
    events: Mutex<Vec<EventRecord>>,
    tags: Mutex<Vec<i64>>,
    cpu_ticks: AtomicI64,
    cpu_frequency: i64,
}

impl MemoryStore {
    /// Create an empty store with the given CPU tick frequency.
    pub fn new(cpu_frequency: i64) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
            cpu_ticks: AtomicI64::new(0),
            cpu_frequency,
        }
    }

    /// Set the CPU clock to an absolute tick value.
    pub fn set_cpu_time(&self, ticks: i64) {
        self.cpu_ticks.store(ticks, Ordering::Relaxed);
    }

    /// Advance the CPU clock by a tick delta.
    pub fn advance_cpu_time(&self, delta: i64) {
        self.cpu_ticks.fetch_add(delta, Ordering::Relaxed);
    }

    /// Snapshot all event records.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }

    /// Snapshot all tag timestamps.
    pub fn tags(&self) -> Vec<i64> {
        self.tags.lock().clone()
    }

    /// Number of vsync interval records.
    pub fn vsync_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == RecordKind::VSyncEvent)
            .count()
    }

    /// Drop all records. Ids handed out before a reset are invalid;
    /// the pipeline must not write through them afterwards.
    pub fn reset(&self) {
        self.events.lock().clear();
        self.tags.lock().clear();
    }

    fn push_event(&self, kind: RecordKind) -> EventId {
        let mut events = self.events.lock();
        let id = EventId(events.len() as u32);
        events.push(EventRecord {
            kind,
            start: 0,
            finish: 0,
        });
        id
    }
}

impl TraceStore for MemoryStore {
    fn add_frame_event(&self) -> EventId {
        self.push_event(RecordKind::FrameEvent)
    }

    fn add_frame_tag(&self) -> TagId {
        let mut tags = self.tags.lock();
        let id = TagId(tags.len() as u32);
        tags.push(0);
        id
    }

    fn add_vsync_event(&self) -> EventId {
        self.push_event(RecordKind::VSyncEvent)
    }

    fn set_event_start(&self, id: EventId, timestamp: i64) {
        if let Some(record) = self.events.lock().get_mut(id.0 as usize) {
            record.start = timestamp;
        }
    }

    fn set_event_finish(&self, id: EventId, timestamp: i64) {
        if let Some(record) = self.events.lock().get_mut(id.0 as usize) {
            record.finish = timestamp;
        }
    }

    fn set_tag_timestamp(&self, id: TagId, timestamp: i64) {
        if let Some(slot) = self.tags.lock().get_mut(id.0 as usize) {
            *slot = timestamp;
        }
    }

    fn cpu_timestamp(&self) -> i64 {
        self.cpu_ticks.load(Ordering::Relaxed)
    }

    fn cpu_frequency(&self) -> i64 {
        self.cpu_frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_allocation_and_writes() {
        let store = MemoryStore::new(1_000_000);
        let a = store.add_frame_event();
        let b = store.add_frame_event();
        assert_ne!(a, b);

        store.set_event_start(a, 10);
        store.set_event_finish(a, 25);

        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start, 10);
        assert_eq!(events[0].finish, 25);
        assert_eq!(events[1].start, 0);
    }

    #[test]
    fn test_tag_writes() {
        let store = MemoryStore::new(1_000_000);
        let tag = store.add_frame_tag();
        store.set_tag_timestamp(tag, 77);
        assert_eq!(store.tags(), vec![77]);
    }

    #[test]
    fn test_vsync_count() {
        let store = MemoryStore::new(1_000_000);
        store.add_frame_event();
        store.add_vsync_event();
        store.add_vsync_event();
        assert_eq!(store.vsync_count(), 2);
    }

    #[test]
    fn test_cpu_clock_is_manual() {
        let store = MemoryStore::new(10_000_000);
        assert_eq!(store.cpu_timestamp(), 0);
        store.set_cpu_time(500);
        store.advance_cpu_time(25);
        assert_eq!(store.cpu_timestamp(), 525);
        assert_eq!(store.cpu_frequency(), 10_000_000);
    }

    #[test]
    fn test_reset_drops_records() {
        let store = MemoryStore::new(1_000_000);
        let id = store.add_frame_event();
        store.reset();
        assert!(store.events().is_empty());

        // Writing through a stale id after reset is ignored.
        store.set_event_start(id, 99);
        assert!(store.events().is_empty());
    }
}
