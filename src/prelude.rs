//! Convenient re-exports for common quotagate types.
pub use crate::{
    backend::{AuthRepRequest, AuthRepResponse, Authorizer, CachedBackend, Rejection,
        RemoteResult, RemoteSnapshot},
    cache::{ApplyOutcome, CacheKey, Cacheable, LocalCache, LocalCacheConfig},
    error::BackendError,
    middleware::{AsAuthRequest, AuthorizeLayer, GatewayError},
    model::{Counter, Hierarchy, LimitCounterSet, LimitViolation, Period},
    telemetry::{BackendEvent, LogSink, MemorySink, NullSink, RequestOutcome, TelemetrySink},
};
