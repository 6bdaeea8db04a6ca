//! Shared fixtures for integration tests.
//!
//! The fixture mirrors a typical remote response: metric `hits` has children
//! `example`, `sample`, and `test`; `hits` is limited to 4 per minute with a
//! current value of 1, and `test_metric` to 6 per week.

#![allow(dead_code)] // each test binary uses a subset of these helpers

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quotagate::{
    AuthRepRequest, Authorizer, BackendError, Counter, Hierarchy, LimitCounterSet, Period,
    RemoteResult, RemoteSnapshot,
};

pub const SERVICE_ID: &str = "fake";
pub const APP_ID: &str = "example";

pub fn rollup_hierarchy() -> HashMap<String, Vec<String>> {
    let mut parents = HashMap::new();
    parents.insert(
        "hits".to_string(),
        vec!["example".to_string(), "sample".to_string(), "test".to_string()],
    );
    parents
}

pub fn fake_counters() -> BTreeMap<String, BTreeMap<Period, Counter>> {
    let mut counters: BTreeMap<String, BTreeMap<Period, Counter>> = BTreeMap::new();
    counters.entry("hits".to_string()).or_default().insert(Period::Minute, Counter::new(1, 4));
    counters
        .entry("test_metric".to_string())
        .or_default()
        .insert(Period::Week, Counter::new(0, 6));
    counters
}

pub fn fake_snapshot() -> RemoteSnapshot {
    RemoteSnapshot { hierarchy: rollup_hierarchy(), counters: fake_counters() }
}

pub fn fake_counter_set() -> LimitCounterSet {
    let hierarchy = Hierarchy::from_parents(rollup_hierarchy()).expect("fixture is acyclic");
    LimitCounterSet::with_counters(hierarchy, fake_counters())
}

/// Remote backend double that returns a fixed result and counts calls.
pub struct StaticAuthorizer {
    calls: Arc<AtomicUsize>,
    result: Result<RemoteResult, BackendError>,
    delay: Option<Duration>,
}

impl StaticAuthorizer {
    pub fn new(result: Result<RemoteResult, BackendError>) -> Self {
        Self { calls: Arc::new(AtomicUsize::new(0)), result, delay: None }
    }

    /// Authorizes and hands back the standard fixture snapshot.
    pub fn granting() -> Self {
        Self::new(Ok(RemoteResult {
            success: true,
            rejection_reason: None,
            snapshot: Some(fake_snapshot()),
        }))
    }

    pub fn denying(reason: &str) -> Self {
        Self::new(Ok(RemoteResult {
            success: false,
            rejection_reason: Some(reason.to_string()),
            snapshot: None,
        }))
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Err(BackendError::unavailable(reason)))
    }

    /// Sleep before answering, for deadline tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize_and_report(
        &self,
        _request: &AuthRepRequest,
    ) -> Result<RemoteResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

pub fn request_hitting(metric: &str, delta: u64) -> AuthRepRequest {
    AuthRepRequest::new(SERVICE_ID, APP_ID).with_metric(metric, delta)
}
