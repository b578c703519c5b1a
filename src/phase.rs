//! Phase records and plan loading for the cadence orchestrator.
//!
//! This module provides:
//! - `PhaseRecord`, the unit of work tracked by the phase store
//! - `PhaseState` and the legal transition edges of the lifecycle
//! - `ValidationOutcome` / `ReviewOutcome` gate results
//! - `PlanFile`, the JSON format declaring a feature stream up front

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a phase, unique within its stream (e.g., "01", "api-layer").
pub type PhaseId = String;

/// Lifecycle state of a phase.
///
/// Happy path: `Pending -> InProgress -> Validating -> Reviewing -> Merged`.
/// `Validating` and `Reviewing` fall to `Failed` on negative outcomes;
/// `Failed` re-enters `InProgress` while the retry budget lasts, then
/// terminates in `Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Waiting for prerequisites to merge
    #[default]
    Pending,
    /// Claimed by the engine; artifact being produced
    InProgress,
    /// Artifact submitted for CI validation
    Validating,
    /// Validation passed; waiting on review approval
    Reviewing,
    /// Artifact merged; terminal
    Merged,
    /// Validation or review rejected the artifact
    Failed,
    /// Retry budget exhausted or stream abandoned; terminal
    Abandoned,
}

impl PhaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Validating => "validating",
            Self::Reviewing => "reviewing",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Check if the phase can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Abandoned)
    }

    /// Check if the state machine permits the edge `self -> to`.
    ///
    /// Any non-terminal state may move to `Abandoned`: the retry-exhaustion
    /// edge from `Failed`, escalated infrastructure failures, and stream
    /// abandonment all terminate through it.
    pub fn can_transition_to(&self, to: PhaseState) -> bool {
        if to == Self::Abandoned {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Validating)
                | (Self::Validating, Self::Reviewing)
                | (Self::Validating, Self::Failed)
                | (Self::Reviewing, Self::Merged)
                | (Self::Reviewing, Self::Failed)
                | (Self::Failed, Self::InProgress)
        )
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "validating" => Ok(Self::Validating),
            "reviewing" => Ok(Self::Reviewing),
            "merged" => Ok(Self::Merged),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid phase state: {}", s)),
        }
    }
}

/// Outcome of CI validation for the current artifact.
///
/// `Error` (infrastructure failure) is retryable with backoff; `Fail`
/// (validation ran and found defects) requires a new artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    #[default]
    Unset,
    Pass,
    Fail,
    Error,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review approval state for the current artifact.
///
/// Rejection returns the phase to its producing step (a new artifact),
/// never a retry of the identical artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    #[default]
    Unset,
    Pending,
    Approved,
    Rejected,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to the external change object produced by a phase
/// (e.g., a pull request identifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single micro-phase record.
///
/// Owned exclusively by the phase store; everything else holds read copies
/// and submits transition requests. The dependency list is fixed at stream
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Identifier, unique within the stream
    pub id: PhaseId,
    /// Human-readable title
    pub title: String,
    /// Phases that must be `Merged` before this one may leave `Pending`
    #[serde(default)]
    pub depends_on: Vec<PhaseId>,
    /// Current lifecycle state
    pub state: PhaseState,
    /// Reference to the produced change, set on entry to `Validating`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Validation outcome for the current artifact
    #[serde(default)]
    pub validation: ValidationOutcome,
    /// Review outcome for the current artifact
    #[serde(default)]
    pub review: ReviewOutcome,
    /// Completed retry cycles; monotonically non-decreasing
    #[serde(default)]
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhaseRecord {
    /// Create a fresh `Pending` record from a declared spec.
    pub fn from_spec(spec: &PhaseSpec, at: DateTime<Utc>) -> Self {
        Self {
            id: spec.id.clone(),
            title: spec.title.clone(),
            depends_on: spec.depends_on.clone(),
            state: PhaseState::Pending,
            artifact: None,
            validation: ValidationOutcome::Unset,
            review: ReviewOutcome::Unset,
            retries: 0,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Declared shape of a phase before any state exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Phase identifier (e.g., "01")
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Identifiers of prerequisite phases
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PhaseSpec {
    pub fn new(id: &str, title: &str, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            depends_on,
        }
    }
}

/// Stream-level state derived from the states of its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// At least one phase can still make progress
    #[default]
    Active,
    /// Every phase is `Merged`
    Complete,
    /// A phase exhausted its retries or was otherwise abandoned
    Failed,
    /// The operator abandoned the stream
    Abandoned,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a plan.json file: the full set of phases for one feature
/// stream, declared up front. The set is closed after stream creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    /// Name of the feature this stream implements
    pub feature: String,
    /// List of declared phases
    pub phases: Vec<PhaseSpec>,
}

impl PlanFile {
    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        let plan: PlanFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))?;

        Ok(plan)
    }

    /// Save a plan to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize plan to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;

        Ok(())
    }

    /// Get a declared phase by id.
    pub fn get_phase(&self, id: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.id == id)
    }
}
