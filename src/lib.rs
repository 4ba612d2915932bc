//! framescope - GPU timestamp query pipeline for real-time profiling.
//!
//! Instruments GPU command execution to produce a timeline of GPU work
//! correlated with CPU wall-clock time. Engines submit work to one or
//! more command queues ("nodes") and need to know, per frame, when each
//! queued unit of work began and ended on the GPU, in a clock domain
//! comparable to the CPU's.
//!
//! # Architecture
//! - **Query ring**: a fixed-capacity ring of reusable asynchronous
//!   timestamp queries per node.
//! - **Frame delay**: query results are resolved several frames after
//!   submission so the render thread never waits on the GPU.
//! - **Clock sync**: one correlated CPU/GPU tick-and-frequency snapshot
//!   per node converts raw GPU ticks to CPU-comparable time.
//!
//! The graphics API is abstracted behind [`backend::GpuBackend`]; event
//! records live in an external trace store behind [`store::TraceStore`].

pub mod backend;
pub mod clock;
pub mod config;
pub mod frame;
pub mod node;
pub mod pipeline;
pub mod query;
pub mod session;
pub mod store;

pub use clock::ClockSnapshot;
pub use config::TimingConfig;
pub use pipeline::GpuTimingPipeline;
pub use session::{SessionPhase, SessionState};
pub use store::{EventId, TagId, TimestampSlot};
