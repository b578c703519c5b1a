//! Orchestration engine: the per-stream control loop.
//!
//! Each scan cycle the engine claims ready phases, opens artifacts and
//! submits them for validation, polls in-flight validation and review
//! handles, and settles failed phases against the retry budget. Every
//! state change goes through the store's compare-and-swap, so a lost
//! race surfaces as `Conflict` and simply means another evaluation
//! already advanced the phase.
//!
//! The loop never blocks on an external system: submits and polls are
//! non-blocking, outcomes that are not ready are re-polled on a later
//! cycle, and infrastructure errors back off exponentially within a
//! bounded budget before the phase is failed.

mod backoff;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, GatewayError};
use crate::gateway::{
    ArtifactHost, ReviewGate, ReviewHandle, ReviewStatus, ValidationGateway, ValidationHandle,
    ValidationStatus,
};
use crate::phase::{
    ArtifactRef, PhaseId, PhaseRecord, PhaseState, ReviewOutcome, StreamState, ValidationOutcome,
};
use crate::store::{PhaseStore, StreamId, TransitionMeta};

pub use backoff::Backoff;

/// Tunables for the control loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry budget per phase (`Failed -> InProgress` edges)
    pub max_retries: u32,
    /// Consecutive infrastructure errors tolerated per sojourn before
    /// the phase is failed (or abandoned, for submission failures)
    pub max_gateway_errors: u32,
    /// Cadence of the scan cycle
    pub poll_interval: Duration,
    /// Initial backoff delay after an infrastructure error
    pub backoff_base: Duration,
    /// Upper bound on backoff delays
    pub backoff_cap: Duration,
    /// Maximum `Validating` sojourn before a timeout is declared
    pub validation_timeout: Duration,
    /// Maximum `Reviewing` sojourn before a timeout is declared
    pub review_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_gateway_errors: 5,
            poll_interval: Duration::from_secs(1),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            validation_timeout: Duration::from_secs(30 * 60),
            review_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Set the per-phase retry budget.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the per-sojourn infrastructure error budget.
    pub fn with_max_gateway_errors(mut self, max: u32) -> Self {
        self.max_gateway_errors = max;
        self
    }

    /// Set the scan cycle cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the backoff base and cap.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Set the validation and review sojourn timeouts.
    pub fn with_timeouts(mut self, validation: Duration, review: Duration) -> Self {
        self.validation_timeout = validation;
        self.review_timeout = review;
        self
    }
}

/// Events emitted during stream orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A phase left `Pending`; the engine owns it now.
    PhaseClaimed { phase: PhaseId },
    /// The host opened an artifact for the phase.
    ArtifactOpened { phase: PhaseId, artifact: String },
    /// The artifact was submitted for validation.
    ValidationSubmitted { phase: PhaseId },
    /// Validation passed.
    ValidationPassed { phase: PhaseId },
    /// Validation ran and found defects.
    ValidationFailed { phase: PhaseId, details: String },
    /// Validation hit an infrastructure error or timed out.
    ValidationErrored { phase: PhaseId, reason: String },
    /// Review was requested for the artifact.
    ReviewRequested { phase: PhaseId },
    /// Review approved the artifact.
    ReviewApproved { phase: PhaseId },
    /// Review rejected the artifact.
    ReviewRejected { phase: PhaseId, reason: String },
    /// The artifact was merged; the phase is terminal.
    PhaseMerged { phase: PhaseId },
    /// The phase re-entered `InProgress`; a new artifact is expected.
    PhaseRetried { phase: PhaseId, retries: u32 },
    /// The phase is terminally abandoned.
    PhaseAbandoned { phase: PhaseId, reason: String },
    /// The stream reached a terminal state.
    StreamFinished { state: StreamState },
}

/// Engine-local bookkeeping for one in-flight phase. Never durable:
/// on restart, phases found mid-sojourn are resubmitted.
struct Flight {
    backoff: Backoff,
    errors: u32,
    not_before: Option<Instant>,
    sojourn_started: Instant,
    validation: Option<ValidationHandle>,
    review: Option<ReviewHandle>,
}

impl Flight {
    fn new(config: &EngineConfig) -> Self {
        Self {
            backoff: Backoff::new(config.backoff_base, config.backoff_cap),
            errors: 0,
            not_before: None,
            sojourn_started: Instant::now(),
            validation: None,
            review: None,
        }
    }

    /// Reset bookkeeping on entry to a new sojourn.
    fn begin_sojourn(&mut self) {
        self.backoff.reset();
        self.errors = 0;
        self.not_before = None;
        self.sojourn_started = Instant::now();
        self.validation = None;
        self.review = None;
    }

    fn due(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|t| now >= t)
    }

    /// Record an infrastructure error; returns true once the error
    /// budget for this sojourn is exhausted.
    fn record_error(&mut self, now: Instant, budget: u32) -> bool {
        self.errors += 1;
        self.not_before = Some(now + self.backoff.next_delay());
        self.errors >= budget
    }

    fn timed_out(&self, now: Instant, limit: Duration) -> bool {
        now.duration_since(self.sojourn_started) > limit
    }
}

/// Result of one fanned-out validation step.
enum ValidationStep {
    Resubmitted(ValidationHandle),
    Polled(ValidationStatus),
    Transport(GatewayError),
}

/// Result of one fanned-out review step.
enum ReviewStep {
    Requested(ReviewHandle),
    Polled(ReviewStatus),
    Transport(GatewayError),
}

/// The orchestration engine. One `run_stream` call drives one feature
/// stream; multiple streams run as independent calls sharing the store.
pub struct Engine {
    store: Arc<PhaseStore>,
    host: Arc<dyn ArtifactHost>,
    validation: Arc<dyn ValidationGateway>,
    review: Arc<dyn ReviewGate>,
    config: EngineConfig,
    event_tx: Option<mpsc::Sender<StreamEvent>>,
}

impl Engine {
    pub fn new(
        store: Arc<PhaseStore>,
        host: Arc<dyn ArtifactHost>,
        validation: Arc<dyn ValidationGateway>,
        review: Arc<dyn ReviewGate>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            host,
            validation,
            review,
            config,
            event_tx: None,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<StreamEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Drive a stream until it reaches a terminal state.
    pub async fn run_stream(&self, stream: StreamId) -> Result<StreamState, EngineError> {
        let mut flights: HashMap<PhaseId, Flight> = HashMap::new();
        info!(stream = %stream, "engine started");

        loop {
            let snapshot = self.store.snapshot(stream)?;
            if snapshot.state.is_terminal() {
                info!(stream = %stream, state = %snapshot.state, "stream finished");
                self.emit(StreamEvent::StreamFinished {
                    state: snapshot.state,
                })
                .await;
                return Ok(snapshot.state);
            }

            // Drop bookkeeping for phases that left their sojourn.
            flights.retain(|id, _| {
                snapshot.phase(id).is_some_and(|p| {
                    matches!(
                        p.state,
                        PhaseState::InProgress | PhaseState::Validating | PhaseState::Reviewing
                    )
                })
            });

            self.claim_ready(stream).await?;

            // Re-read so this cycle sees its own claims.
            let snapshot = self.store.snapshot(stream)?;
            self.advance_in_progress(stream, &snapshot, &mut flights)
                .await?;
            self.poll_validating(stream, &snapshot, &mut flights).await?;
            self.poll_reviewing(stream, &snapshot, &mut flights).await?;
            self.settle_failed(stream, &snapshot, &mut flights).await?;

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Claim every ready phase via `Pending -> InProgress`. A `Conflict`
    /// means another evaluation already claimed it.
    async fn claim_ready(&self, stream: StreamId) -> Result<(), EngineError> {
        for id in self.store.ready_phases(stream)? {
            match self.store.transition(
                stream,
                &id,
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            ) {
                Ok(()) => {
                    debug!(stream = %stream, phase = %id, "phase claimed");
                    self.emit(StreamEvent::PhaseClaimed { phase: id }).await;
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// For each `InProgress` phase, open an artifact and submit it for
    /// validation. Independent phases fan out concurrently; transitions
    /// are applied serially afterwards.
    async fn advance_in_progress(
        &self,
        stream: StreamId,
        snapshot: &crate::store::StreamSnapshot,
        flights: &mut HashMap<PhaseId, Flight>,
    ) -> Result<(), EngineError> {
        let now = Instant::now();
        let due: Vec<PhaseRecord> = snapshot
            .phases
            .iter()
            .filter(|p| p.state == PhaseState::InProgress)
            .filter(|p| flights.get(&p.id).is_none_or(|f| f.due(now)))
            .cloned()
            .collect();

        if due.is_empty() {
            return Ok(());
        }

        let calls = due.iter().map(|record| {
            let host = self.host.clone();
            let validation = self.validation.clone();
            let id = record.id.clone();
            let attempt = record.retries;
            async move {
                let artifact = host.open_artifact(&id, attempt).await?;
                let handle = validation.submit(&id, &artifact).await?;
                Ok::<(ArtifactRef, ValidationHandle), GatewayError>((artifact, handle))
            }
        });
        let results = join_all(calls).await;

        for (record, result) in due.iter().zip(results) {
            let flight = flights
                .entry(record.id.clone())
                .or_insert_with(|| Flight::new(&self.config));

            match result {
                Ok((artifact, handle)) => {
                    match self.store.transition(
                        stream,
                        &record.id,
                        PhaseState::InProgress,
                        PhaseState::Validating,
                        TransitionMeta::default().artifact(artifact.clone()),
                    ) {
                        Ok(()) => {
                            flight.begin_sojourn();
                            flight.validation = Some(handle);
                            self.emit(StreamEvent::ArtifactOpened {
                                phase: record.id.clone(),
                                artifact: artifact.to_string(),
                            })
                            .await;
                            self.emit(StreamEvent::ValidationSubmitted {
                                phase: record.id.clone(),
                            })
                            .await;
                        }
                        // Another cycle advanced the phase; discard this
                        // submission's outcome.
                        Err(e) if e.is_conflict() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(err) => {
                    warn!(stream = %stream, phase = %record.id, error = %err, "artifact submission failed");
                    if flight.record_error(Instant::now(), self.config.max_gateway_errors) {
                        let reason = format!("infrastructure failure: {}", err);
                        match self.store.transition(
                            stream,
                            &record.id,
                            PhaseState::InProgress,
                            PhaseState::Abandoned,
                            TransitionMeta::default().note(reason.clone()),
                        ) {
                            Ok(()) => {
                                self.emit(StreamEvent::PhaseAbandoned {
                                    phase: record.id.clone(),
                                    reason,
                                })
                                .await;
                            }
                            Err(e) if e.is_conflict() => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Poll every due `Validating` phase. Phases recovered from a
    /// replayed log have no live handle and are resubmitted.
    async fn poll_validating(
        &self,
        stream: StreamId,
        snapshot: &crate::store::StreamSnapshot,
        flights: &mut HashMap<PhaseId, Flight>,
    ) -> Result<(), EngineError> {
        let now = Instant::now();
        let due: Vec<(PhaseRecord, Option<ValidationHandle>)> = snapshot
            .phases
            .iter()
            .filter(|p| p.state == PhaseState::Validating)
            .filter(|p| flights.get(&p.id).is_none_or(|f| f.due(now)))
            .map(|p| (p.clone(), flights.get(&p.id).and_then(|f| f.validation.clone())))
            .collect();

        if due.is_empty() {
            return Ok(());
        }

        let calls = due.iter().map(|(record, handle)| {
            let validation = self.validation.clone();
            let record = record.clone();
            let handle = handle.clone();
            async move {
                match handle {
                    Some(h) => match validation.poll(&h).await {
                        Ok(status) => ValidationStep::Polled(status),
                        Err(e) => ValidationStep::Transport(e),
                    },
                    None => match &record.artifact {
                        Some(artifact) => match validation.submit(&record.id, artifact).await {
                            Ok(h) => ValidationStep::Resubmitted(h),
                            Err(e) => ValidationStep::Transport(e),
                        },
                        None => ValidationStep::Polled(ValidationStatus::Error {
                            reason: "artifact reference missing".to_string(),
                        }),
                    },
                }
            }
        });
        let results = join_all(calls).await;

        for ((record, _), step) in due.iter().zip(results) {
            let flight = flights
                .entry(record.id.clone())
                .or_insert_with(|| Flight::new(&self.config));

            match step {
                ValidationStep::Resubmitted(handle) => {
                    debug!(stream = %stream, phase = %record.id, "validation resubmitted after recovery");
                    flight.validation = Some(handle);
                    self.emit(StreamEvent::ValidationSubmitted {
                        phase: record.id.clone(),
                    })
                    .await;
                }
                ValidationStep::Polled(ValidationStatus::Pending) => {
                    if flight.timed_out(now, self.config.validation_timeout) {
                        self.emit(StreamEvent::ValidationErrored {
                            phase: record.id.clone(),
                            reason: "validation timed out".to_string(),
                        })
                        .await;
                        self.fail_validating(stream, record, flights, ValidationOutcome::Error, "validation timed out")
                            .await?;
                    }
                }
                ValidationStep::Polled(ValidationStatus::Pass) => {
                    match self.store.transition(
                        stream,
                        &record.id,
                        PhaseState::Validating,
                        PhaseState::Reviewing,
                        TransitionMeta::default()
                            .validation(ValidationOutcome::Pass)
                            .review(ReviewOutcome::Pending),
                    ) {
                        Ok(()) => {
                            self.emit(StreamEvent::ValidationPassed {
                                phase: record.id.clone(),
                            })
                            .await;
                            flight.begin_sojourn();
                            self.request_review(stream, record, flight).await;
                        }
                        Err(e) if e.is_conflict() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                ValidationStep::Polled(ValidationStatus::Fail { details }) => {
                    self.emit(StreamEvent::ValidationFailed {
                        phase: record.id.clone(),
                        details: details.clone(),
                    })
                    .await;
                    self.fail_validating(stream, record, flights, ValidationOutcome::Fail, &details)
                        .await?;
                }
                ValidationStep::Polled(ValidationStatus::Error { reason }) => {
                    self.validation_error(stream, record, flights, now, &reason)
                        .await?;
                }
                ValidationStep::Transport(err) => {
                    self.validation_error(stream, record, flights, now, &err.to_string())
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Request review for a phase that just entered `Reviewing`. A
    /// request failure is absorbed: the next cycle re-requests.
    async fn request_review(
        &self,
        stream: StreamId,
        record: &PhaseRecord,
        flight: &mut Flight,
    ) {
        let artifact = match &record.artifact {
            Some(a) => a.clone(),
            None => return,
        };
        match self.review.request_review(&record.id, &artifact).await {
            Ok(handle) => {
                flight.review = Some(handle);
                self.emit(StreamEvent::ReviewRequested {
                    phase: record.id.clone(),
                })
                .await;
            }
            Err(err) => {
                warn!(stream = %stream, phase = %record.id, error = %err, "review request failed");
                flight.record_error(Instant::now(), self.config.max_gateway_errors);
            }
        }
    }

    /// Poll every due `Reviewing` phase. Phases without a live handle
    /// (recovered, or whose review request failed) are re-requested.
    async fn poll_reviewing(
        &self,
        stream: StreamId,
        snapshot: &crate::store::StreamSnapshot,
        flights: &mut HashMap<PhaseId, Flight>,
    ) -> Result<(), EngineError> {
        let now = Instant::now();
        let due: Vec<(PhaseRecord, Option<ReviewHandle>)> = snapshot
            .phases
            .iter()
            .filter(|p| p.state == PhaseState::Reviewing)
            .filter(|p| flights.get(&p.id).is_none_or(|f| f.due(now)))
            .map(|p| (p.clone(), flights.get(&p.id).and_then(|f| f.review.clone())))
            .collect();

        if due.is_empty() {
            return Ok(());
        }

        let calls = due.iter().map(|(record, handle)| {
            let review = self.review.clone();
            let record = record.clone();
            let handle = handle.clone();
            async move {
                match handle {
                    Some(h) => match review.status(&h).await {
                        Ok(status) => ReviewStep::Polled(status),
                        Err(e) => ReviewStep::Transport(e),
                    },
                    None => match &record.artifact {
                        Some(artifact) => match review.request_review(&record.id, artifact).await {
                            Ok(h) => ReviewStep::Requested(h),
                            Err(e) => ReviewStep::Transport(e),
                        },
                        None => ReviewStep::Transport(GatewayError::MalformedResponse(
                            "artifact reference missing".to_string(),
                        )),
                    },
                }
            }
        });
        let results = join_all(calls).await;

        for ((record, _), step) in due.iter().zip(results) {
            let flight = flights
                .entry(record.id.clone())
                .or_insert_with(|| Flight::new(&self.config));

            match step {
                ReviewStep::Requested(handle) => {
                    flight.review = Some(handle);
                    self.emit(StreamEvent::ReviewRequested {
                        phase: record.id.clone(),
                    })
                    .await;
                }
                ReviewStep::Polled(ReviewStatus::Pending) => {
                    if flight.timed_out(now, self.config.review_timeout) {
                        self.fail_reviewing(stream, record, flights, None, "review timed out")
                            .await?;
                    }
                }
                ReviewStep::Polled(ReviewStatus::Approved) => {
                    self.emit(StreamEvent::ReviewApproved {
                        phase: record.id.clone(),
                    })
                    .await;
                    self.merge_approved(stream, record, flights, now).await?;
                }
                ReviewStep::Polled(ReviewStatus::Rejected { reason }) => {
                    self.emit(StreamEvent::ReviewRejected {
                        phase: record.id.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                    self.fail_reviewing(
                        stream,
                        record,
                        flights,
                        Some(ReviewOutcome::Rejected),
                        &reason,
                    )
                    .await?;
                }
                ReviewStep::Transport(err) => {
                    let exhausted = flights
                        .get_mut(&record.id)
                        .map(|f| f.record_error(now, self.config.max_gateway_errors))
                        .unwrap_or(false);
                    warn!(stream = %stream, phase = %record.id, error = %err, "review poll failed");
                    if exhausted {
                        self.fail_reviewing(stream, record, flights, None, &err.to_string())
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Merge an approved artifact; merge failures are infrastructure
    /// errors, retried with backoff within the sojourn budget.
    async fn merge_approved(
        &self,
        stream: StreamId,
        record: &PhaseRecord,
        flights: &mut HashMap<PhaseId, Flight>,
        now: Instant,
    ) -> Result<(), EngineError> {
        let artifact = match &record.artifact {
            Some(a) => a.clone(),
            None => {
                return self
                    .fail_reviewing(stream, record, flights, None, "artifact reference missing")
                    .await;
            }
        };

        match self.host.merge(&artifact).await {
            Ok(()) => {
                match self.store.transition(
                    stream,
                    &record.id,
                    PhaseState::Reviewing,
                    PhaseState::Merged,
                    TransitionMeta::default().review(ReviewOutcome::Approved),
                ) {
                    Ok(()) => {
                        info!(stream = %stream, phase = %record.id, "phase merged");
                        self.emit(StreamEvent::PhaseMerged {
                            phase: record.id.clone(),
                        })
                        .await;
                        flights.remove(&record.id);
                    }
                    Err(e) if e.is_conflict() => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(())
            }
            Err(err) => {
                warn!(stream = %stream, phase = %record.id, error = %err, "merge request failed");
                let exhausted = flights
                    .get_mut(&record.id)
                    .map(|f| f.record_error(now, self.config.max_gateway_errors))
                    .unwrap_or(false);
                if exhausted {
                    self.fail_reviewing(
                        stream,
                        record,
                        flights,
                        None,
                        &format!("merge failed: {}", err),
                    )
                    .await?;
                }
                Ok(())
            }
        }
    }

    /// Handle a retryable validation error: back off, and fail the
    /// phase once the sojourn's error budget is exhausted.
    async fn validation_error(
        &self,
        stream: StreamId,
        record: &PhaseRecord,
        flights: &mut HashMap<PhaseId, Flight>,
        now: Instant,
        reason: &str,
    ) -> Result<(), EngineError> {
        warn!(stream = %stream, phase = %record.id, reason, "validation errored");
        self.emit(StreamEvent::ValidationErrored {
            phase: record.id.clone(),
            reason: reason.to_string(),
        })
        .await;

        let exhausted = flights
            .get_mut(&record.id)
            .map(|f| f.record_error(now, self.config.max_gateway_errors))
            .unwrap_or(false);
        if exhausted {
            self.fail_validating(stream, record, flights, ValidationOutcome::Error, reason)
                .await?;
        }
        Ok(())
    }

    /// Commit `Validating -> Failed` with the given outcome.
    async fn fail_validating(
        &self,
        stream: StreamId,
        record: &PhaseRecord,
        flights: &mut HashMap<PhaseId, Flight>,
        outcome: ValidationOutcome,
        note: &str,
    ) -> Result<(), EngineError> {
        match self.store.transition(
            stream,
            &record.id,
            PhaseState::Validating,
            PhaseState::Failed,
            TransitionMeta::default().validation(outcome).note(note),
        ) {
            Ok(()) => {
                flights.remove(&record.id);
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Commit `Reviewing -> Failed`, optionally recording a review
    /// outcome (rejections) alongside the note.
    async fn fail_reviewing(
        &self,
        stream: StreamId,
        record: &PhaseRecord,
        flights: &mut HashMap<PhaseId, Flight>,
        outcome: Option<ReviewOutcome>,
        note: &str,
    ) -> Result<(), EngineError> {
        let mut meta = TransitionMeta::default().note(note);
        if let Some(outcome) = outcome {
            meta = meta.review(outcome);
        }
        match self.store.transition(
            stream,
            &record.id,
            PhaseState::Reviewing,
            PhaseState::Failed,
            meta,
        ) {
            Ok(()) => {
                flights.remove(&record.id);
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Settle `Failed` phases: retry while the budget lasts, abandon
    /// beyond it. Abandoning any phase fails the stream on the next
    /// cycle's snapshot.
    async fn settle_failed(
        &self,
        stream: StreamId,
        snapshot: &crate::store::StreamSnapshot,
        flights: &mut HashMap<PhaseId, Flight>,
    ) -> Result<(), EngineError> {
        for record in snapshot.phases.iter().filter(|p| p.state == PhaseState::Failed) {
            if record.retries < self.config.max_retries {
                match self.store.transition(
                    stream,
                    &record.id,
                    PhaseState::Failed,
                    PhaseState::InProgress,
                    TransitionMeta::default().note("retrying with new artifact"),
                ) {
                    Ok(()) => {
                        flights.remove(&record.id);
                        info!(stream = %stream, phase = %record.id, retries = record.retries + 1, "phase retried");
                        self.emit(StreamEvent::PhaseRetried {
                            phase: record.id.clone(),
                            retries: record.retries + 1,
                        })
                        .await;
                    }
                    Err(e) if e.is_conflict() => {}
                    Err(e) => return Err(e.into()),
                }
            } else {
                match self.store.transition(
                    stream,
                    &record.id,
                    PhaseState::Failed,
                    PhaseState::Abandoned,
                    TransitionMeta::default().note("retry budget exhausted"),
                ) {
                    Ok(()) => {
                        flights.remove(&record.id);
                        warn!(stream = %stream, phase = %record.id, "retry budget exhausted, phase abandoned");
                        self.emit(StreamEvent::PhaseAbandoned {
                            phase: record.id.clone(),
                            reason: "retry budget exhausted".to_string(),
                        })
                        .await;
                    }
                    Err(e) if e.is_conflict() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn emit(&self, event: StreamEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}
