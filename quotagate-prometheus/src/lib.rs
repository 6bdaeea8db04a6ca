//! Prometheus metrics sink for `quotagate`.
//! Bring your own `prometheus::Registry`; collectors are registered and updated.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, Registry};
use quotagate::telemetry::{BackendEvent, TelemetrySink};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};

// Latency buckets, in seconds, sized for calls to the usage-tracking backend.
const BACKEND_LATENCY_BUCKETS: &[f64] =
    &[0.01, 0.02, 0.03, 0.05, 0.08, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0];

#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    total_requests: IntCounter,
    cache_hits: IntCounter,
    backend_latency: HistogramVec,
}

impl PrometheusSink {
    /// Create a sink and register collectors into the provided registry.
    ///
    /// # Errors
    /// Returns an error if a collector cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let total_requests = IntCounter::new(
            "quotagate_authorization_requests_total",
            "Total number of authorization requests handled",
        )?;
        let cache_hits = IntCounter::new(
            "quotagate_cache_hits_total",
            "Authorization requests answered from the local rate-limit cache",
        )?;
        let backend_latency = HistogramVec::new(
            HistogramOpts::new(
                "quotagate_backend_latency_seconds",
                "Request latency for calls to the remote usage-tracking backend",
            )
            .buckets(BACKEND_LATENCY_BUCKETS.to_vec()),
            &["service_id"],
        )?;
        registry.register(Box::new(total_requests.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(backend_latency.clone()))?;
        Ok(Self { registry, total_requests, cache_hits, backend_latency })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl tower_service::Service<BackendEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BackendEvent) -> Self::Future {
        match event {
            BackendEvent::RequestReceived => self.total_requests.inc(),
            BackendEvent::CacheLookup { hit: true } => self.cache_hits.inc(),
            BackendEvent::CacheLookup { hit: false } => {}
            BackendEvent::BackendLatency { service_id, elapsed } => {
                self.backend_latency
                    .with_label_values(&[service_id.as_str()])
                    .observe(elapsed.as_secs_f64());
            }
            // verdicts are visible through the request/hit counters already
            BackendEvent::Outcome(_) => {}
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}
