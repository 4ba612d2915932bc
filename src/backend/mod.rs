pub mod sim;

use anyhow::Result;

/// Opaque handle to a backend query object (timestamp or validity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub u32);

/// Opaque handle to a command-submission context (queue/device
/// context). Created and owned by the engine integration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u32);

/// Opaque handle to a presentation surface (swap chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresentHandle(pub u32);

/// Result of a resolved validity (disjoint) query.
#[derive(Debug, Clone, Copy)]
pub struct ValiditySample {
    /// GPU tick frequency observed over the measured interval.
    pub gpu_frequency: i64,
    /// True if the GPU clock had a discontinuity (e.g. a power-state
    /// change) during the interval; timestamps collected within it are
    /// unreliable.
    pub disjoint: bool,
}

/// Frame presentation statistics read at flip time.
#[derive(Debug, Clone, Copy)]
pub struct PresentStats {
    /// Number of frames presented so far.
    pub present_count: u32,
    /// CPU timestamp of the most recent vertical sync.
    pub sync_cpu_ticks: i64,
}

/// Capability interface over the native graphics API's query objects.
///
/// Implementations are swappable per backend without touching the
/// pipeline logic. All polls are non-blocking: `None` means the result
/// is not yet available, and the caller decides whether to degrade or
/// spin. Query issuance records into the context's command stream and
/// resolves asynchronously on the GPU.
pub trait GpuBackend: Send {
    /// Create a reusable timestamp query object.
    fn create_timestamp_query(&mut self) -> Result<QueryHandle>;

    /// Create a reusable validity (disjoint) query object.
    fn create_validity_query(&mut self) -> Result<QueryHandle>;

    /// Release a query object.
    fn release_query(&mut self, query: QueryHandle);

    /// Record a timestamp capture at the current point in the context's
    /// command stream.
    fn issue_timestamp(&mut self, context: ContextHandle, query: QueryHandle);

    /// Open a validity interval on the context.
    fn begin_validity(&mut self, context: ContextHandle, query: QueryHandle);

    /// Close a validity interval on the context.
    fn end_validity(&mut self, context: ContextHandle, query: QueryHandle);

    /// Non-blocking read of a timestamp query result (raw GPU ticks).
    fn poll_timestamp(&self, query: QueryHandle) -> Option<u64>;

    /// Non-blocking read of a validity query result.
    fn poll_validity(&self, query: QueryHandle) -> Option<ValiditySample>;

    /// Whether the backend exposes a draw-event annotation interface.
    /// When false, annotation calls are silently disabled.
    fn supports_annotation(&self) -> bool;

    /// Open a labeled annotation scope on the context.
    fn begin_annotation(&mut self, context: ContextHandle, label: &str);

    /// Close the innermost annotation scope on the context.
    fn end_annotation(&mut self, context: ContextHandle);

    /// Read frame presentation statistics for a surface. `None` if the
    /// backend cannot provide them for this present.
    fn present_statistics(&mut self, present: PresentHandle) -> Option<PresentStats>;
}
