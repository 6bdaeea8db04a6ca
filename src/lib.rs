#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotagate
//!
//! Cached authorization backend for metered APIs: decide on the request path
//! whether a caller is within its usage limits without a synchronous round
//! trip to the authoritative usage tracker on every call.
//!
//! ## How it works
//!
//! - A concurrent, sharded **rate-limit cache** maps `{service, application}`
//!   to a snapshot of hierarchy-aware, time-windowed usage counters.
//! - On a **cache hit**, a linearizable check-then-commit against the local
//!   counters admits or rejects the request with no remote call.
//! - On a **cache miss**, the remote backend's combined authorize-and-report
//!   operation is called once; its verdict is returned directly and its
//!   counter snapshot repopulates the cache.
//!
//! Local counters are a lower bound on the remote truth, so local rejections
//! are always safe; staleness is bounded by the cache TTL, after which
//! entries repopulate from remote.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use quotagate::{AuthRepRequest, CachedBackend, LocalCache, LocalCacheConfig};
//! use std::sync::Arc;
//!
//! # use quotagate::{Authorizer, RemoteResult, BackendError};
//! # #[derive(Debug)] struct MyRemoteClient;
//! # #[async_trait::async_trait]
//! # impl Authorizer for MyRemoteClient {
//! #     async fn authorize_and_report(
//! #         &self,
//! #         _request: &AuthRepRequest,
//! #     ) -> Result<RemoteResult, BackendError> {
//! #         Ok(RemoteResult { success: true, ..RemoteResult::default() })
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(LocalCache::new(LocalCacheConfig::default()));
//!     let backend = CachedBackend::new(cache, MyRemoteClient);
//!
//!     let request = AuthRepRequest::new("my-service", "my-app").with_metric("hits", 1);
//!     let response = backend.authorize_and_report(&request).await.unwrap();
//!     assert!(response.success);
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod clock;
pub mod error;
pub mod middleware;
pub mod model;
pub mod prelude;
pub mod telemetry;

// Re-exports
pub use backend::{
    AuthRepRequest, AuthRepResponse, Authorizer, CachedBackend, Rejection, RemoteResult,
    RemoteSnapshot,
};
pub use cache::{ApplyOutcome, CacheKey, Cacheable, LocalCache, LocalCacheConfig};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::BackendError;
pub use middleware::{AsAuthRequest, AuthorizeLayer, AuthorizeService, GatewayError};
pub use model::{Counter, Hierarchy, HierarchyError, LimitCounterSet, LimitViolation, Period};
