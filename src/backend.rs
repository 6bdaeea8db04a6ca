//! Cached authorization backend: the decision/commit protocol wrapping the
//! remote authoritative usage tracker.
//!
//! On a cache hit the verdict is produced locally by a check-then-commit
//! against the cached counters; the remote backend is only consulted on a
//! miss (or when a hit turns out to be evicted mid-flight). Local counters
//! are a lower bound on the remote truth, so a local rejection is never too
//! lenient.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{ApplyOutcome, CacheKey, Cacheable};
use crate::error::BackendError;
use crate::model::{Counter, Hierarchy, LimitCounterSet, LimitViolation, Period};
use crate::telemetry::{emit_best_effort, BackendEvent, NullSink, RequestOutcome, TelemetrySink};

/// One inbound authorize-and-report call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRepRequest {
    /// Identifier of the metered API product.
    pub service_id: String,
    /// Application or credential identifier of the caller.
    pub application_id: String,
    /// Metric hits to report, as `(metric name, delta)` pairs. A request may
    /// name the same metric more than once; deltas accumulate.
    pub metrics: Vec<(String, u64)>,
}

impl AuthRepRequest {
    pub fn new(service_id: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            application_id: application_id.into(),
            metrics: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>, delta: u64) -> Self {
        self.metrics.push((metric.into(), delta));
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.service_id.clone(), self.application_id.clone())
    }
}

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A local limit check found an exhausted window.
    Limit(LimitViolation),
    /// The remote backend denied the request.
    Remote(Option<String>),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Limit(violation) => write!(f, "{}", violation),
            Rejection::Remote(Some(reason)) => write!(f, "denied by remote backend: {}", reason),
            Rejection::Remote(None) => write!(f, "denied by remote backend"),
        }
    }
}

/// Verdict of one authorize-and-report call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRepResponse {
    pub success: bool,
    pub rejection: Option<Rejection>,
}

impl AuthRepResponse {
    pub fn authorized() -> Self {
        Self { success: true, rejection: None }
    }

    pub fn denied(rejection: Rejection) -> Self {
        Self { success: false, rejection: Some(rejection) }
    }

    /// The violating metric/window, when the denial was a local limit check.
    pub fn violation(&self) -> Option<&LimitViolation> {
        match &self.rejection {
            Some(Rejection::Limit(violation)) => Some(violation),
            _ => None,
        }
    }
}

/// Hierarchy and counter state as reported by the remote backend, before
/// local validation. The hierarchy keeps the parent -> children orientation
/// of the wire protocol.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub hierarchy: HashMap<String, Vec<String>>,
    pub counters: BTreeMap<String, BTreeMap<Period, Counter>>,
}

impl RemoteSnapshot {
    /// Validate and convert into a cacheable counter set. A cyclic hierarchy
    /// fails closed here, before anything touches the cache.
    fn into_counter_set(self) -> Result<LimitCounterSet, BackendError> {
        let hierarchy = Hierarchy::from_parents(self.hierarchy)?;
        Ok(LimitCounterSet::with_counters(hierarchy, self.counters))
    }
}

/// Outcome of one remote authorize-and-report call.
///
/// The snapshot, when present, reflects state *after* the remote backend
/// applied this request's hits, so the local cache is populated from it
/// without re-deriving the verdict.
#[derive(Debug, Clone, Default)]
pub struct RemoteResult {
    pub success: bool,
    pub rejection_reason: Option<String>,
    pub snapshot: Option<RemoteSnapshot>,
}

/// Contract the core requires from the remote authoritative backend.
///
/// Transport, signing, and response parsing live behind this trait. The call
/// must honor future cancellation: dropping it mid-flight leaves no local
/// state behind (the core only writes to the cache after a completed call).
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize_and_report(
        &self,
        request: &AuthRepRequest,
    ) -> Result<RemoteResult, BackendError>;
}

/// The cached authorization backend.
///
/// Generic over the cache ([`Cacheable`]), the remote client
/// ([`Authorizer`]), and the telemetry sink ([`TelemetrySink`]), all
/// injected at construction.
pub struct CachedBackend<C, A, T = NullSink> {
    cache: Arc<C>,
    remote: A,
    telemetry: T,
    remote_timeout: Option<Duration>,
}

impl<C, A> CachedBackend<C, A, NullSink>
where
    C: Cacheable,
    A: Authorizer,
{
    pub fn new(cache: Arc<C>, remote: A) -> Self {
        Self { cache, remote, telemetry: NullSink, remote_timeout: None }
    }
}

impl<C, A, T> CachedBackend<C, A, T>
where
    C: Cacheable,
    A: Authorizer,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Replace the telemetry sink.
    pub fn with_telemetry<T2>(self, telemetry: T2) -> CachedBackend<C, A, T2>
    where
        T2: TelemetrySink,
        T2::Future: Send + 'static,
    {
        CachedBackend {
            cache: self.cache,
            remote: self.remote,
            telemetry,
            remote_timeout: self.remote_timeout,
        }
    }

    /// Bound every remote call by `limit`; elapsed calls surface as
    /// [`BackendError::RemoteTimeout`] and leave the cache unmodified.
    pub fn with_remote_timeout(mut self, limit: Duration) -> Self {
        self.remote_timeout = Some(limit);
        self
    }

    /// Shared handle to the cache, e.g. for a background resynchronizer that
    /// refreshes entries through [`Cacheable::set`].
    pub fn cache(&self) -> Arc<C> {
        Arc::clone(&self.cache)
    }

    /// Decide whether the caller is within its limits and report its usage.
    ///
    /// Cache hit: one check-then-commit against the local entry, no remote
    /// call on either the admit or the reject path. Cache miss: one
    /// synchronous remote call whose verdict is returned directly and whose
    /// snapshot repopulates the cache. Remote failures propagate unmodified
    /// and never leave a partial cache write.
    pub async fn authorize_and_report(
        &self,
        request: &AuthRepRequest,
    ) -> Result<AuthRepResponse, BackendError> {
        self.emit(BackendEvent::RequestReceived).await;
        let key = request.cache_key();

        let Some(snapshot) = self.cache.get(&key) else {
            self.emit(BackendEvent::CacheLookup { hit: false }).await;
            return self.authorize_via_remote(request, key).await;
        };
        self.emit(BackendEvent::CacheLookup { hit: true }).await;

        let increments = merge_increments(&snapshot, &request.metrics);
        match self.cache.check_and_apply(&key, &increments) {
            ApplyOutcome::Applied => {
                self.emit(BackendEvent::Outcome(RequestOutcome::Authorized)).await;
                Ok(AuthRepResponse::authorized())
            }
            ApplyOutcome::Rejected(violation) => {
                self.emit(BackendEvent::Outcome(RequestOutcome::DeniedLocally {
                    metric: violation.metric.clone(),
                    period: violation.period,
                }))
                .await;
                Ok(AuthRepResponse::denied(Rejection::Limit(violation)))
            }
            ApplyOutcome::Missing => {
                // entry evicted between get and check_and_apply; treat as a miss
                debug!(target: "quotagate::backend", key = %key, "entry vanished mid-flight, deferring to remote");
                self.authorize_via_remote(request, key).await
            }
        }
    }

    /// The miss path: one remote call, cache population on success, and the
    /// remote verdict returned as-is.
    async fn authorize_via_remote(
        &self,
        request: &AuthRepRequest,
        key: CacheKey,
    ) -> Result<AuthRepResponse, BackendError> {
        let started = Instant::now();
        let outcome = match self.remote_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.remote.authorize_and_report(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::RemoteTimeout { limit }),
                }
            }
            None => self.remote.authorize_and_report(request).await,
        };
        self.emit(BackendEvent::BackendLatency {
            service_id: request.service_id.clone(),
            elapsed: started.elapsed(),
        })
        .await;

        let remote = outcome?;
        if remote.success {
            if let Some(snapshot) = remote.snapshot {
                // fails closed on a cyclic hierarchy, before any cache write
                let set = snapshot.into_counter_set()?;
                self.cache.set(key, set);
            }
            self.emit(BackendEvent::Outcome(RequestOutcome::Authorized)).await;
            Ok(AuthRepResponse::authorized())
        } else {
            self.emit(BackendEvent::Outcome(RequestOutcome::DeniedRemotely {
                reason: remote.rejection_reason.clone(),
            }))
            .await;
            Ok(AuthRepResponse::denied(Rejection::Remote(remote.rejection_reason)))
        }
    }

    async fn emit(&self, event: BackendEvent) {
        emit_best_effort(self.telemetry.clone(), event).await;
    }
}

/// Expand every reported metric through the hierarchy and merge the deltas
/// into one batch, so multi-metric requests commit or reject atomically.
fn merge_increments(
    snapshot: &LimitCounterSet,
    metrics: &[(String, u64)],
) -> BTreeMap<String, u64> {
    let mut merged: BTreeMap<String, u64> = BTreeMap::new();
    for (metric, delta) in metrics {
        for (name, expanded) in snapshot.propagate(metric, *delta) {
            let slot = merged.entry(name).or_insert(0);
            *slot = slot.saturating_add(expanded);
        }
    }
    merged
}
