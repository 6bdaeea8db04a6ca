use std::fmt;
use std::time::Duration;

use crate::model::Period;

/// Events emitted during one `authorize_and_report` call.
///
/// Every call emits exactly one `RequestReceived`, exactly one
/// `CacheLookup`, at most one `BackendLatency` (only when the remote backend
/// was consulted), and at most one `Outcome` (absent when the call errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// An authorization request entered the backend.
    RequestReceived,
    /// Result of the local cache lookup for the request's key.
    CacheLookup {
        /// Whether a live entry was found.
        hit: bool,
    },
    /// Latency of one call to the remote authoritative backend.
    BackendLatency {
        /// Service the call was made on behalf of.
        service_id: String,
        elapsed: Duration,
    },
    /// Final verdict produced for the request.
    Outcome(RequestOutcome),
}

/// The verdict of an authorization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request was admitted.
    Authorized,
    /// The request was rejected by a local limit check.
    DeniedLocally {
        /// Metric whose window was exhausted.
        metric: String,
        /// Window that was exhausted.
        period: Period,
    },
    /// The request was rejected by the remote backend's verdict.
    DeniedRemotely {
        /// Rejection reason as reported by the remote backend, if any.
        reason: Option<String>,
    },
}

impl RequestOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, RequestOutcome::Authorized)
    }
}

impl fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendEvent::RequestReceived => write!(f, "request received"),
            BackendEvent::CacheLookup { hit: true } => write!(f, "cache hit"),
            BackendEvent::CacheLookup { hit: false } => write!(f, "cache miss"),
            BackendEvent::BackendLatency { service_id, elapsed } => {
                write!(f, "remote call for service '{}' took {:?}", service_id, elapsed)
            }
            BackendEvent::Outcome(outcome) => write!(f, "{}", outcome),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Authorized => write!(f, "authorized"),
            RequestOutcome::DeniedLocally { metric, period } => {
                write!(f, "denied locally: metric '{}' per {}", metric, period)
            }
            RequestOutcome::DeniedRemotely { reason: Some(reason) } => {
                write!(f, "denied remotely: {}", reason)
            }
            RequestOutcome::DeniedRemotely { reason: None } => write!(f, "denied remotely"),
        }
    }
}
