pub mod memory;

/// Handle to an event record in the external trace store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u32);

/// Handle to a tag record in the external trace store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagId(pub u32);

/// Names one timestamp field of a trace-store record.
///
/// A `query_timestamp` call captures a GPU timestamp and defers its CPU
/// conversion to a later resolution pass; the slot token says where the
/// resolved value lands. Tokens are derived from store ids rather than
/// raw pointers, so nothing can dangle across the frame-delay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSlot {
    /// The `start` field of an event record.
    EventStart(EventId),
    /// The `finish` field of an event record.
    EventFinish(EventId),
    /// The `timestamp` field of a tag record.
    Tag(TagId),
}

/// Boundary to the external trace store that owns all event memory.
///
/// The pipeline allocates frame-boundary, tag, and vsync records here
/// and writes resolved CPU timestamps back through ids; it never owns
/// or retains record memory. The store also provides the
/// high-precision CPU time source used for clock synchronization.
pub trait TraceStore: Send + Sync {
    /// Allocate a frame-boundary event record.
    fn add_frame_event(&self) -> EventId;

    /// Allocate a frame tag record.
    fn add_frame_tag(&self) -> TagId;

    /// Allocate a vertical-sync interval event record.
    fn add_vsync_event(&self) -> EventId;

    /// Write the `start` timestamp of an event record.
    fn set_event_start(&self, id: EventId, timestamp: i64);

    /// Write the `finish` timestamp of an event record.
    fn set_event_finish(&self, id: EventId, timestamp: i64);

    /// Write the timestamp of a tag record.
    fn set_tag_timestamp(&self, id: TagId, timestamp: i64);

    /// Current CPU time in ticks of `cpu_frequency`.
    fn cpu_timestamp(&self) -> i64;

    /// CPU tick frequency (ticks per second).
    fn cpu_frequency(&self) -> i64;
}
