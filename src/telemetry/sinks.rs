use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

use super::events::BackendEvent;

/// A telemetry sink that consumes backend events.
///
/// The backend awaits sink futures inline on the authorization path, so
/// `poll_ready` and `call` must resolve promptly and never pend on I/O.
/// Forward slow work through a channel or a spawned task inside the sink.
pub trait TelemetrySink:
    tower::Service<BackendEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// The backend uses this for every event so a failing sink never fails an
/// authorization call. The sink future itself is awaited inline; see
/// [`TelemetrySink`] for the promptness requirement.
pub async fn emit_best_effort<S>(sink: S, event: BackendEvent)
where
    S: tower::Service<BackendEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// A no-op sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<BackendEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: BackendEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A sink that logs events through the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<BackendEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BackendEvent) -> Self::Future {
        tracing::info!(target: "quotagate::telemetry", event = %event, "backend_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A sink that stores events in memory, for tests and inspection.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<BackendEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, in emission order.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.events.lock().expect("memory sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("memory sink poisoned").is_empty()
    }

    /// Count of cache lookups that were hits / misses.
    pub fn lookup_counts(&self) -> (usize, usize) {
        let events = self.events.lock().expect("memory sink poisoned");
        let hits = events
            .iter()
            .filter(|e| matches!(e, BackendEvent::CacheLookup { hit: true }))
            .count();
        let misses = events
            .iter()
            .filter(|e| matches!(e, BackendEvent::CacheLookup { hit: false }))
            .count();
        (hits, misses)
    }
}

impl Service<BackendEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BackendEvent) -> Self::Future {
        self.events.lock().expect("memory sink poisoned").push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
