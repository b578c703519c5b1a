//! Durable source of truth for phase and stream records.
//!
//! The store exclusively owns all records; other components hold read
//! snapshots and submit transition requests. `transition` is a
//! compare-and-swap on phase state: it succeeds only if the phase is
//! still in the expected source state, otherwise the caller gets
//! `Conflict` and must re-read. Every accepted transition is appended to
//! an immutable per-stream log, so current status can be reconstructed
//! deterministically by replaying the log from an empty store.

pub mod log;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::phase::{
    PhaseId, PhaseRecord, PhaseSpec, PhaseState, ReviewOutcome, StreamState, ValidationOutcome,
};
use crate::resolver::{self, StreamGraph};

pub use log::{LogRecord, TransitionLog, TransitionMeta};

/// Identifier of a feature stream.
pub type StreamId = Uuid;

/// Read-only view of one stream: derived stream state plus a copy of
/// every phase record, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub stream: StreamId,
    pub feature: String,
    pub state: StreamState,
    pub phases: Vec<PhaseRecord>,
}

impl StreamSnapshot {
    /// Get a phase record by id.
    pub fn phase(&self, id: &str) -> Option<&PhaseRecord> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Count phases in the given state.
    pub fn count_in(&self, state: PhaseState) -> usize {
        self.phases.iter().filter(|p| p.state == state).count()
    }
}

/// Internal per-stream record: the immutable graph, the live phase
/// records, and the append-only log with its optional file sink.
struct StreamRecord {
    feature: String,
    graph: StreamGraph,
    phases: Vec<PhaseRecord>,
    abandoned: bool,
    next_seq: u64,
    log: Vec<LogRecord>,
    sink: Option<TransitionLog>,
}

impl StreamRecord {
    fn derive_state(&self) -> StreamState {
        if self.abandoned {
            return StreamState::Abandoned;
        }
        if self
            .phases
            .iter()
            .any(|p| p.state == PhaseState::Abandoned)
        {
            return StreamState::Failed;
        }
        if self.phases.iter().all(|p| p.state == PhaseState::Merged) {
            return StreamState::Complete;
        }
        StreamState::Active
    }

    /// Apply an already-validated edge to the phase record.
    ///
    /// The retry edge `Failed -> InProgress` increments the retry counter
    /// and clears the artifact and both outcomes; the clearing is derived
    /// from the edge itself so that replay is deterministic.
    fn apply(
        &mut self,
        index: usize,
        from: PhaseState,
        to: PhaseState,
        meta: &TransitionMeta,
        at: DateTime<Utc>,
    ) {
        let record = &mut self.phases[index];
        record.state = to;
        record.updated_at = at;

        if let Some(artifact) = &meta.artifact {
            record.artifact = Some(artifact.clone());
        }
        if let Some(validation) = meta.validation {
            record.validation = validation;
        }
        if let Some(review) = meta.review {
            record.review = review;
        }

        if from == PhaseState::Failed && to == PhaseState::InProgress {
            record.retries += 1;
            record.artifact = None;
            record.validation = ValidationOutcome::Unset;
            record.review = ReviewOutcome::Unset;
        }
    }

    fn append_record(&mut self, record: LogRecord) -> Result<(), StoreError> {
        if let Some(sink) = self.sink.as_mut() {
            sink.append(&record).map_err(StoreError::Log)?;
        }
        self.log.push(record);
        Ok(())
    }
}

/// The phase store. Safe for concurrent use; all access is serialized
/// through an internal mutex, which is what makes the compare-and-swap
/// in `transition` yield exactly one winner per race.
pub struct PhaseStore {
    streams: Mutex<HashMap<StreamId, StreamRecord>>,
}

impl Default for PhaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<StreamId, StreamRecord>>, StoreError> {
        self.streams.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Create a stream from declared phase specs.
    ///
    /// Fails with `InvalidGraph` (creating no records) if the dependency
    /// graph contains a cycle, a duplicate id, or an unknown reference.
    pub fn create_stream(
        &self,
        feature: &str,
        specs: Vec<PhaseSpec>,
    ) -> Result<StreamId, StoreError> {
        self.create_stream_inner(feature, specs, None)
    }

    /// Create a stream whose log is also persisted to
    /// `<state_dir>/<stream-id>.jsonl`.
    pub fn create_stream_logged(
        &self,
        feature: &str,
        specs: Vec<PhaseSpec>,
        state_dir: &Path,
    ) -> Result<StreamId, StoreError> {
        self.create_stream_inner(feature, specs, Some(state_dir.to_path_buf()))
    }

    fn create_stream_inner(
        &self,
        feature: &str,
        specs: Vec<PhaseSpec>,
        state_dir: Option<PathBuf>,
    ) -> Result<StreamId, StoreError> {
        let graph = StreamGraph::build(&specs)?;

        let stream = Uuid::new_v4();
        let at = Utc::now();
        let phases: Vec<PhaseRecord> =
            specs.iter().map(|s| PhaseRecord::from_spec(s, at)).collect();

        let sink = match state_dir {
            Some(dir) => Some(
                TransitionLog::create(&Self::log_path(&dir, stream)).map_err(StoreError::Log)?,
            ),
            None => None,
        };

        let mut record = StreamRecord {
            feature: feature.to_string(),
            graph,
            phases,
            abandoned: false,
            next_seq: 1,
            log: Vec::new(),
            sink,
        };

        record.append_record(LogRecord::StreamCreated {
            stream,
            feature: feature.to_string(),
            phases: specs,
            at,
        })?;

        debug!(stream = %stream, feature, "stream created");
        self.lock()?.insert(stream, record);

        Ok(stream)
    }

    /// Path of a stream's log file under a state directory.
    pub fn log_path(state_dir: &Path, stream: StreamId) -> PathBuf {
        state_dir.join("streams").join(format!("{}.jsonl", stream))
    }

    /// Get a copy of one phase record.
    pub fn get_phase(&self, stream: StreamId, phase: &str) -> Result<PhaseRecord, StoreError> {
        let streams = self.lock()?;
        let record = streams
            .get(&stream)
            .ok_or_else(|| StoreError::not_found("stream", stream.to_string()))?;
        let index = record
            .graph
            .index_of(phase)
            .ok_or_else(|| StoreError::not_found("phase", phase))?;
        Ok(record.phases[index].clone())
    }

    /// Get a full snapshot of one stream.
    pub fn snapshot(&self, stream: StreamId) -> Result<StreamSnapshot, StoreError> {
        let streams = self.lock()?;
        let record = streams
            .get(&stream)
            .ok_or_else(|| StoreError::not_found("stream", stream.to_string()))?;
        Ok(StreamSnapshot {
            stream,
            feature: record.feature.clone(),
            state: record.derive_state(),
            phases: record.phases.clone(),
        })
    }

    /// Compute the phases eligible to start: `Pending` with every
    /// prerequisite `Merged`. Delegates to the resolver over the current
    /// committed snapshot; nothing is cached across calls.
    pub fn ready_phases(&self, stream: StreamId) -> Result<Vec<PhaseId>, StoreError> {
        let streams = self.lock()?;
        let record = streams
            .get(&stream)
            .ok_or_else(|| StoreError::not_found("stream", stream.to_string()))?;
        Ok(resolver::ready_phases(&record.graph, &record.phases))
    }

    /// Compare-and-swap transition.
    ///
    /// Succeeds only if the phase's current state equals `from`; a lost
    /// race yields `Conflict` and the caller must re-read. The accepted
    /// transition is appended to the stream's log before returning.
    pub fn transition(
        &self,
        stream: StreamId,
        phase: &str,
        from: PhaseState,
        to: PhaseState,
        meta: TransitionMeta,
    ) -> Result<(), StoreError> {
        let mut streams = self.lock()?;
        let record = streams
            .get_mut(&stream)
            .ok_or_else(|| StoreError::not_found("stream", stream.to_string()))?;
        let index = record
            .graph
            .index_of(phase)
            .ok_or_else(|| StoreError::not_found("phase", phase))?;

        let current = record.phases[index].state;
        if current != from {
            return Err(StoreError::Conflict {
                phase: phase.to_string(),
                expected: from,
                actual: current,
            });
        }
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                phase: phase.to_string(),
                from,
                to,
            });
        }

        let at = Utc::now();
        let seq = record.next_seq;
        record.next_seq += 1;
        record.apply(index, from, to, &meta, at);
        record.append_record(LogRecord::Transition {
            seq,
            phase: phase.to_string(),
            from,
            to,
            meta,
            at,
        })?;

        debug!(stream = %stream, phase, %from, %to, seq, "transition committed");
        Ok(())
    }

    /// Abandon a stream: every non-terminal phase is marked `Abandoned`
    /// and no further transitions will be scheduled. Idempotent.
    pub fn abandon_stream(&self, stream: StreamId) -> Result<StreamSnapshot, StoreError> {
        {
            let mut streams = self.lock()?;
            let record = streams
                .get_mut(&stream)
                .ok_or_else(|| StoreError::not_found("stream", stream.to_string()))?;

            if !record.abandoned {
                let at = Utc::now();
                for index in 0..record.phases.len() {
                    let from = record.phases[index].state;
                    if from.is_terminal() {
                        continue;
                    }
                    let phase = record.phases[index].id.clone();
                    let seq = record.next_seq;
                    record.next_seq += 1;
                    let meta = TransitionMeta::default().note("stream abandoned");
                    record.apply(index, from, PhaseState::Abandoned, &meta, at);
                    record.append_record(LogRecord::Transition {
                        seq,
                        phase,
                        from,
                        to: PhaseState::Abandoned,
                        meta,
                        at,
                    })?;
                }
                record.abandoned = true;
                record.append_record(LogRecord::StreamAbandoned { at })?;
                debug!(stream = %stream, "stream abandoned");
            }
        }

        self.snapshot(stream)
    }

    /// Get a copy of the stream's append-only transition log.
    pub fn transition_log(&self, stream: StreamId) -> Result<Vec<LogRecord>, StoreError> {
        let streams = self.lock()?;
        let record = streams
            .get(&stream)
            .ok_or_else(|| StoreError::not_found("stream", stream.to_string()))?;
        Ok(record.log.clone())
    }

    /// List all streams known to this store.
    pub fn streams(&self) -> Result<Vec<StreamId>, StoreError> {
        Ok(self.lock()?.keys().copied().collect())
    }

    /// Rebuild a store from a transition log, reproducing the exact
    /// state snapshot the log's writer held. Timestamps and sequence
    /// numbers come from the records, not the clock.
    pub fn replay(records: &[LogRecord]) -> Result<(StreamId, PhaseStore), StoreError> {
        let mut iter = records.iter();

        let (stream, feature, specs, created_at) = match iter.next() {
            Some(LogRecord::StreamCreated {
                stream,
                feature,
                phases,
                at,
            }) => (*stream, feature.clone(), phases.clone(), *at),
            _ => {
                return Err(StoreError::Log(anyhow!(
                    "transition log must begin with a stream_created record"
                )));
            }
        };

        let graph = StreamGraph::build(&specs)?;
        let phases: Vec<PhaseRecord> = specs
            .iter()
            .map(|s| PhaseRecord::from_spec(s, created_at))
            .collect();

        let mut record = StreamRecord {
            feature,
            graph,
            phases,
            abandoned: false,
            next_seq: 1,
            log: vec![records[0].clone()],
            sink: None,
        };

        for entry in iter {
            match entry {
                LogRecord::Transition {
                    seq,
                    phase,
                    from,
                    to,
                    meta,
                    at,
                } => {
                    let index = record.graph.index_of(phase).ok_or_else(|| {
                        StoreError::Log(anyhow!("log references unknown phase '{}'", phase))
                    })?;
                    let current = record.phases[index].state;
                    if current != *from {
                        return Err(StoreError::Log(anyhow!(
                            "log replay diverged on phase '{}': expected {}, found {}",
                            phase,
                            from,
                            current
                        )));
                    }
                    record.apply(index, *from, *to, meta, *at);
                    record.next_seq = seq + 1;
                    record.log.push(entry.clone());
                }
                LogRecord::StreamAbandoned { .. } => {
                    record.abandoned = true;
                    record.log.push(entry.clone());
                }
                LogRecord::StreamCreated { .. } => {
                    return Err(StoreError::Log(anyhow!(
                        "duplicate stream_created record in log"
                    )));
                }
            }
        }

        let store = PhaseStore::new();
        store.lock()?.insert(stream, record);
        Ok((stream, store))
    }

    /// Rebuild a store from a log file and keep the file open for
    /// further appends (crash recovery / operator commands).
    pub fn open_logged(path: &Path) -> Result<(StreamId, PhaseStore), StoreError> {
        let (sink, records) = TransitionLog::open_append(path).map_err(StoreError::Log)?;
        let (stream, store) = Self::replay(&records)?;
        if let Some(record) = store.lock()?.get_mut(&stream) {
            record.sink = Some(sink);
        }
        Ok((stream, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::ArtifactRef;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn spec(id: &str, deps: Vec<&str>) -> PhaseSpec {
        PhaseSpec::new(
            id,
            &format!("Phase {}", id),
            deps.into_iter().map(String::from).collect(),
        )
    }

    fn two_phase_stream(store: &PhaseStore) -> StreamId {
        store
            .create_stream("feature", vec![spec("01", vec![]), spec("02", vec!["01"])])
            .unwrap()
    }

    #[test]
    fn test_create_stream_and_snapshot() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        let snapshot = store.snapshot(stream).unwrap();
        assert_eq!(snapshot.feature, "feature");
        assert_eq!(snapshot.state, StreamState::Active);
        assert_eq!(snapshot.phases.len(), 2);
        assert_eq!(snapshot.count_in(PhaseState::Pending), 2);
    }

    #[test]
    fn test_create_stream_cyclic_graph_creates_no_records() {
        let store = PhaseStore::new();
        let result = store.create_stream(
            "feature",
            vec![spec("01", vec!["02"]), spec("02", vec!["01"])],
        );

        assert!(matches!(result, Err(StoreError::InvalidGraph(_))));
        assert!(store.streams().unwrap().is_empty());
    }

    #[test]
    fn test_get_phase_not_found() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        assert!(matches!(
            store.get_phase(stream, "99"),
            Err(StoreError::NotFound { kind: "phase", .. })
        ));
        assert!(matches!(
            store.snapshot(Uuid::new_v4()),
            Err(StoreError::NotFound { kind: "stream", .. })
        ));
    }

    #[test]
    fn test_transition_cas_success_and_conflict() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        store
            .transition(
                stream,
                "01",
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            )
            .unwrap();

        // Second claim from the stale source state loses the race
        let result = store.transition(
            stream,
            "01",
            PhaseState::Pending,
            PhaseState::InProgress,
            TransitionMeta::default(),
        );
        match result {
            Err(StoreError::Conflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, PhaseState::Pending);
                assert_eq!(actual, PhaseState::InProgress);
            }
            other => panic!("Expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_transition_illegal_edge_rejected() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        let result = store.transition(
            stream,
            "01",
            PhaseState::Pending,
            PhaseState::Merged,
            TransitionMeta::default(),
        );
        assert!(matches!(result, Err(StoreError::IllegalTransition { .. })));
    }

    #[test]
    fn test_concurrent_cas_yields_exactly_one_winner() {
        let store = Arc::new(PhaseStore::new());
        let stream = two_phase_stream(&store);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.transition(
                    stream,
                    "01",
                    PhaseState::Pending,
                    PhaseState::InProgress,
                    TransitionMeta::default(),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[test]
    fn test_retry_edge_increments_and_clears() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        store
            .transition(
                stream,
                "01",
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            )
            .unwrap();
        store
            .transition(
                stream,
                "01",
                PhaseState::InProgress,
                PhaseState::Validating,
                TransitionMeta::default().artifact(ArtifactRef::new("pr-1")),
            )
            .unwrap();
        store
            .transition(
                stream,
                "01",
                PhaseState::Validating,
                PhaseState::Failed,
                TransitionMeta::default().validation(ValidationOutcome::Fail),
            )
            .unwrap();

        let phase = store.get_phase(stream, "01").unwrap();
        assert_eq!(phase.validation, ValidationOutcome::Fail);
        assert_eq!(phase.artifact.as_ref().unwrap().as_str(), "pr-1");

        store
            .transition(
                stream,
                "01",
                PhaseState::Failed,
                PhaseState::InProgress,
                TransitionMeta::default().note("retrying with new artifact"),
            )
            .unwrap();

        let phase = store.get_phase(stream, "01").unwrap();
        assert_eq!(phase.retries, 1);
        assert!(phase.artifact.is_none());
        assert_eq!(phase.validation, ValidationOutcome::Unset);
        assert_eq!(phase.review, ReviewOutcome::Unset);
    }

    #[test]
    fn test_ready_phases_reflects_committed_state() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        assert_eq!(store.ready_phases(stream).unwrap(), vec!["01"]);

        for (from, to) in [
            (PhaseState::Pending, PhaseState::InProgress),
            (PhaseState::InProgress, PhaseState::Validating),
            (PhaseState::Validating, PhaseState::Reviewing),
            (PhaseState::Reviewing, PhaseState::Merged),
        ] {
            store
                .transition(stream, "01", from, to, TransitionMeta::default())
                .unwrap();
        }

        assert_eq!(store.ready_phases(stream).unwrap(), vec!["02"]);
    }

    #[test]
    fn test_stream_state_complete_and_failed() {
        let store = PhaseStore::new();
        let stream = store
            .create_stream("feature", vec![spec("01", vec![])])
            .unwrap();

        for (from, to) in [
            (PhaseState::Pending, PhaseState::InProgress),
            (PhaseState::InProgress, PhaseState::Validating),
            (PhaseState::Validating, PhaseState::Reviewing),
            (PhaseState::Reviewing, PhaseState::Merged),
        ] {
            store
                .transition(stream, "01", from, to, TransitionMeta::default())
                .unwrap();
        }
        assert_eq!(store.snapshot(stream).unwrap().state, StreamState::Complete);

        let failing = store
            .create_stream("feature2", vec![spec("01", vec![])])
            .unwrap();
        for (from, to) in [
            (PhaseState::Pending, PhaseState::InProgress),
            (PhaseState::InProgress, PhaseState::Validating),
            (PhaseState::Validating, PhaseState::Failed),
            (PhaseState::Failed, PhaseState::Abandoned),
        ] {
            store
                .transition(failing, "01", from, to, TransitionMeta::default())
                .unwrap();
        }
        assert_eq!(store.snapshot(failing).unwrap().state, StreamState::Failed);
    }

    #[test]
    fn test_abandon_stream_marks_non_terminal_phases() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        store
            .transition(
                stream,
                "01",
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            )
            .unwrap();

        let snapshot = store.abandon_stream(stream).unwrap();
        assert_eq!(snapshot.state, StreamState::Abandoned);
        assert_eq!(snapshot.count_in(PhaseState::Abandoned), 2);

        // Idempotent: a second abandon appends nothing
        let log_len = store.transition_log(stream).unwrap().len();
        store.abandon_stream(stream).unwrap();
        assert_eq!(store.transition_log(stream).unwrap().len(), log_len);
    }

    #[test]
    fn test_transition_log_is_append_only_and_sequenced() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        store
            .transition(
                stream,
                "01",
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            )
            .unwrap();
        store
            .transition(
                stream,
                "01",
                PhaseState::InProgress,
                PhaseState::Validating,
                TransitionMeta::default().artifact(ArtifactRef::new("pr-1")),
            )
            .unwrap();

        let log = store.transition_log(stream).unwrap();
        assert_eq!(log.len(), 3);
        assert!(matches!(log[0], LogRecord::StreamCreated { .. }));
        match (&log[1], &log[2]) {
            (
                LogRecord::Transition { seq: s1, .. },
                LogRecord::Transition { seq: s2, phase, .. },
            ) => {
                assert_eq!(*s1, 1);
                assert_eq!(*s2, 2);
                assert_eq!(phase, "01");
            }
            other => panic!("Expected transition records, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_reproduces_exact_snapshot() {
        let store = PhaseStore::new();
        let stream = two_phase_stream(&store);

        for (from, to, meta) in [
            (
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            ),
            (
                PhaseState::InProgress,
                PhaseState::Validating,
                TransitionMeta::default().artifact(ArtifactRef::new("pr-1")),
            ),
            (
                PhaseState::Validating,
                PhaseState::Failed,
                TransitionMeta::default().validation(ValidationOutcome::Fail),
            ),
            (
                PhaseState::Failed,
                PhaseState::InProgress,
                TransitionMeta::default(),
            ),
        ] {
            store.transition(stream, "01", from, to, meta).unwrap();
        }

        let log = store.transition_log(stream).unwrap();
        let (replayed_id, replayed) = PhaseStore::replay(&log).unwrap();

        assert_eq!(replayed_id, stream);
        let original = store.snapshot(stream).unwrap();
        let rebuilt = replayed.snapshot(replayed_id).unwrap();
        assert_eq!(original.state, rebuilt.state);
        assert_eq!(original.phases, rebuilt.phases);
    }

    #[test]
    fn test_replay_rejects_log_without_creation_record() {
        let records = vec![LogRecord::StreamAbandoned { at: Utc::now() }];
        assert!(matches!(
            PhaseStore::replay(&records),
            Err(StoreError::Log(_))
        ));
    }

    #[test]
    fn test_logged_store_roundtrips_through_file() {
        let dir = tempdir().unwrap();
        let store = PhaseStore::new();
        let stream = store
            .create_stream_logged(
                "feature",
                vec![spec("01", vec![]), spec("02", vec!["01"])],
                dir.path(),
            )
            .unwrap();

        store
            .transition(
                stream,
                "01",
                PhaseState::Pending,
                PhaseState::InProgress,
                TransitionMeta::default(),
            )
            .unwrap();

        let path = PhaseStore::log_path(dir.path(), stream);
        assert!(path.exists());

        drop(store);
        let (reopened_id, reopened) = PhaseStore::open_logged(&path).unwrap();
        assert_eq!(reopened_id, stream);
        let snapshot = reopened.snapshot(stream).unwrap();
        assert_eq!(snapshot.phase("01").unwrap().state, PhaseState::InProgress);
        assert_eq!(snapshot.phase("02").unwrap().state, PhaseState::Pending);

        // Reopened store keeps appending to the same file
        reopened.abandon_stream(stream).unwrap();
        let records = TransitionLog::read_all(&path).unwrap();
        assert!(matches!(
            records.last().unwrap(),
            LogRecord::StreamAbandoned { .. }
        ));
    }
}
