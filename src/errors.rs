//! Typed error hierarchy for the cadence orchestrator.
//!
//! Two top-level enums cover the two subsystems with typed failures:
//! - `StoreError` — phase store and stream-creation failures
//! - `GatewayError` — infrastructure failures reaching external systems
//!
//! Negative gate outcomes (validation `Fail`, review `Rejected`) are not
//! errors: they are ordinary phase state, carried by the outcome enums in
//! `phase.rs`.

use thiserror::Error;

use crate::phase::{PhaseId, PhaseState};

/// Errors from the phase store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Cyclic or malformed dependency declaration. Fatal at stream
    /// creation; no phase records are created.
    #[error("Invalid dependency graph: {0}")]
    InvalidGraph(String),

    /// Referenced stream or phase does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Compare-and-swap lost a race: the phase is no longer in the
    /// expected state. Always absorbed by the engine via re-read.
    #[error("Transition conflict on phase {phase}: expected {expected}, found {actual}")]
    Conflict {
        phase: PhaseId,
        expected: PhaseState,
        actual: PhaseState,
    },

    /// The requested edge does not exist in the state machine.
    #[error("Illegal transition on phase {phase}: {from} -> {to}")]
    IllegalTransition {
        phase: PhaseId,
        from: PhaseState,
        to: PhaseState,
    },

    /// The transition log could not be written or replayed.
    #[error("Transition log error: {0}")]
    Log(#[source] anyhow::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Check if this is a lost CAS race (retryable by re-reading).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Infrastructure failures reaching an external collaborator (validation
/// gateway, review gate, or VCS host). Always retryable with backoff;
/// escalated to `Abandoned` only when retries exhaust.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("External system unreachable: {0}")]
    Unreachable(String),

    #[error("Unknown handle '{0}'")]
    UnknownHandle(String),

    #[error("Malformed response from external system: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced by the orchestration engine's control loop.
///
/// `Conflict` and bounded gateway errors never appear here: the engine
/// absorbs them. What remains is store corruption or misuse.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_invalid_graph_is_matchable() {
        let err = StoreError::InvalidGraph("cycle involving [01, 02]".to_string());
        match &err {
            StoreError::InvalidGraph(msg) => assert!(msg.contains("cycle")),
            _ => panic!("Expected InvalidGraph variant"),
        }
    }

    #[test]
    fn store_error_not_found_carries_kind_and_id() {
        let err = StoreError::not_found("phase", "42");
        assert!(err.to_string().contains("phase"));
        assert!(err.to_string().contains("42"));
        assert!(!err.is_conflict());
    }

    #[test]
    fn store_error_conflict_reports_states() {
        let err = StoreError::Conflict {
            phase: "03".to_string(),
            expected: PhaseState::Pending,
            actual: PhaseState::InProgress,
        };
        assert!(err.is_conflict());
        let msg = err.to_string();
        assert!(msg.contains("pending"));
        assert!(msg.contains("in_progress"));
    }

    #[test]
    fn store_error_illegal_transition_reports_edge() {
        let err = StoreError::IllegalTransition {
            phase: "01".to_string(),
            from: PhaseState::Pending,
            to: PhaseState::Merged,
        };
        let msg = err.to_string();
        assert!(msg.contains("pending"));
        assert!(msg.contains("merged"));
    }

    #[test]
    fn engine_error_converts_from_store_error() {
        let inner = StoreError::not_found("stream", "abc");
        let engine_err: EngineError = inner.into();
        match &engine_err {
            EngineError::Store(StoreError::NotFound { kind, .. }) => {
                assert_eq!(*kind, "stream");
            }
            _ => panic!("Expected EngineError::Store(NotFound)"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::InvalidGraph("x".into()));
        assert_std_error(&GatewayError::Unreachable("down".into()));
        assert_std_error(&EngineError::Store(StoreError::not_found("phase", "1")));
    }
}
