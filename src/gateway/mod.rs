//! Gateway contracts for external collaborators.
//!
//! Each external system is modeled as an explicit two-call contract
//! (non-blocking submit, then poll) returning a tagged outcome, so the
//! engine's control loop stays testable without real network calls.
//! Transport-level failures surface as `GatewayError` and are treated
//! the same as a polled `Error` outcome: retryable with backoff.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::phase::{ArtifactRef, PhaseId};

/// Handle to an in-flight validation submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationHandle(pub String);

impl ValidationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Handle to an in-flight review request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewHandle(pub String);

impl ReviewHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Normalized result of polling a validation submission.
///
/// `Error` (the external system ran into infrastructure trouble) is
/// retryable; `Fail` (validation ran and found defects) requires a new
/// artifact and is never retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationStatus {
    Pending,
    Pass,
    Fail { details: String },
    Error { reason: String },
}

/// Normalized result of polling a review request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected { reason: String },
}

/// Asynchronous CI validation of a phase's artifact.
#[async_trait]
pub trait ValidationGateway: Send + Sync {
    /// Submit an artifact for validation. Non-blocking; the outcome is
    /// obtained by polling the returned handle.
    async fn submit(
        &self,
        phase: &PhaseId,
        artifact: &ArtifactRef,
    ) -> Result<ValidationHandle, GatewayError>;

    /// Poll a previously submitted validation.
    async fn poll(&self, handle: &ValidationHandle) -> Result<ValidationStatus, GatewayError>;
}

/// Human or automated review approval for a phase's artifact.
#[async_trait]
pub trait ReviewGate: Send + Sync {
    /// Request review of an artifact. Non-blocking.
    async fn request_review(
        &self,
        phase: &PhaseId,
        artifact: &ArtifactRef,
    ) -> Result<ReviewHandle, GatewayError>;

    /// Poll the approval state of a review request.
    async fn status(&self, handle: &ReviewHandle) -> Result<ReviewStatus, GatewayError>;
}

/// The version-control host. The engine creates one artifact (e.g., a
/// pull request) per `InProgress` phase entry and requests merge once
/// the review gate approves; it never implements diff or merge logic
/// itself.
#[async_trait]
pub trait ArtifactHost: Send + Sync {
    /// Open the external change object for a phase. `attempt` is the
    /// phase's retry counter, letting hosts name regenerated artifacts.
    async fn open_artifact(
        &self,
        phase: &PhaseId,
        attempt: u32,
    ) -> Result<ArtifactRef, GatewayError>;

    /// Request merge of an approved artifact.
    async fn merge(&self, artifact: &ArtifactRef) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_hashable_map_keys() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(ValidationHandle::new("run-1"), "01");
        assert_eq!(map.get(&ValidationHandle::new("run-1")), Some(&"01"));
        assert!(map.get(&ValidationHandle::new("run-2")).is_none());
    }

    #[test]
    fn test_validation_status_variants_are_distinct() {
        let fail = ValidationStatus::Fail {
            details: "3 tests failed".to_string(),
        };
        let error = ValidationStatus::Error {
            reason: "runner offline".to_string(),
        };
        assert_ne!(fail, error);
        assert!(matches!(fail, ValidationStatus::Fail { .. }));
        assert!(matches!(error, ValidationStatus::Error { .. }));
    }
}
