//! Error types for the cached authorization backend.
//!
//! Only remote I/O and malformed remote data produce errors. A rejected
//! request is a normal `success = false` response, and a cache miss is "not
//! found", so neither appears here.

use std::time::Duration;

use crate::model::HierarchyError;

/// Failures surfaced by [`crate::backend::CachedBackend::authorize_and_report`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The remote backend call failed (network, non-2xx, transport error).
    /// No authorization verdict was produced and the cache was not touched.
    #[error("remote backend unavailable: {reason}")]
    RemoteUnavailable { reason: String },

    /// The remote backend call exceeded the configured deadline.
    #[error("remote backend call exceeded {limit:?}")]
    RemoteTimeout { limit: Duration },

    /// The remote backend returned a cyclic or self-referential hierarchy.
    /// Population fails closed; the cache was not touched.
    #[error("remote hierarchy is malformed: metric '{metric}' participates in a cycle")]
    MalformedHierarchy { metric: String },
}

impl BackendError {
    /// Convenience constructor for remote transport failures.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        BackendError::RemoteUnavailable { reason: reason.into() }
    }

    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, BackendError::RemoteUnavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::RemoteTimeout { .. })
    }

    pub fn is_malformed_hierarchy(&self) -> bool {
        matches!(self, BackendError::MalformedHierarchy { .. })
    }
}

impl From<HierarchyError> for BackendError {
    fn from(err: HierarchyError) -> Self {
        match err {
            HierarchyError::Cycle { metric } => BackendError::MalformedHierarchy { metric },
        }
    }
}
