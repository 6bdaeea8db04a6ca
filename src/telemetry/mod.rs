//! Telemetry for the cached authorization backend.
//!
//! The backend emits structured [`BackendEvent`]s describing each call:
//! request received, cache hit or miss, remote-call latency, and the final
//! outcome. Events flow through [`TelemetrySink`] implementations, which are
//! `tower::Service<BackendEvent>`s for composability.
//!
//! Sinks are injected into the backend with an explicit lifecycle; there is
//! no module-level metric registry. Emission is best-effort: a failing sink
//! never fails an authorization call. Sink futures are awaited inline on the
//! authorization path, so implementations must resolve promptly (record and
//! return); anything slow belongs behind a channel or spawned task inside
//! the sink.

pub mod events;
pub mod sinks;

pub use events::{BackendEvent, RequestOutcome};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
