//! Append-only transition log with replay.
//!
//! One JSON Lines file per stream. The first record is always
//! `StreamCreated`; every accepted state transition follows as a
//! `Transition` record carrying a stream-wide sequence number and the
//! phase id it is keyed by. The log is the only durable state: replaying
//! it from an empty store reconstructs the exact stream status.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::{ArtifactRef, PhaseId, PhaseSpec, PhaseState, ReviewOutcome, ValidationOutcome};

/// Metadata attached to a transition: outcome changes and the artifact
/// assignment that accompany the state edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TransitionMeta {
    pub fn artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn validation(mut self, outcome: ValidationOutcome) -> Self {
        self.validation = Some(outcome);
        self
    }

    pub fn review(mut self, outcome: ReviewOutcome) -> Self {
        self.review = Some(outcome);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.artifact.is_none()
            && self.validation.is_none()
            && self.review.is_none()
            && self.note.is_none()
    }
}

/// One record in a stream's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    /// Stream initialization: the closed set of declared phases.
    StreamCreated {
        stream: Uuid,
        feature: String,
        phases: Vec<PhaseSpec>,
        at: DateTime<Utc>,
    },
    /// One accepted compare-and-swap transition, keyed by phase id and
    /// stream-wide sequence number.
    Transition {
        seq: u64,
        phase: PhaseId,
        from: PhaseState,
        to: PhaseState,
        #[serde(default, skip_serializing_if = "TransitionMeta::is_empty")]
        meta: TransitionMeta,
        at: DateTime<Utc>,
    },
    /// Operator abandoned the stream.
    StreamAbandoned { at: DateTime<Utc> },
}

/// File sink for a stream's log. Holds an exclusive advisory lock so two
/// operator processes cannot interleave appends to the same stream.
#[derive(Debug)]
pub struct TransitionLog {
    path: PathBuf,
    file: File,
}

impl TransitionLog {
    /// Create a fresh log file. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to create transition log: {}", path.display()))?;

        file.try_lock_exclusive()
            .with_context(|| format!("Transition log already locked: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Open an existing log: read all records back, then keep the file
    /// open (and locked) for further appends.
    pub fn open_append(path: &Path) -> Result<(Self, Vec<LogRecord>)> {
        let records = Self::read_all(path)?;

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transition log: {}", path.display()))?;

        file.try_lock_exclusive()
            .with_context(|| format!("Transition log already locked: {}", path.display()))?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            records,
        ))
    }

    /// Read every record from a log file without taking the lock.
    pub fn read_all(path: &Path) -> Result<Vec<LogRecord>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to read transition log: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read transition log: {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line).with_context(|| {
                format!(
                    "Malformed record at {}:{}",
                    path.display(),
                    line_no + 1
                )
            })?;
            records.push(record);
        }

        if records.is_empty() {
            bail!("Transition log is empty: {}", path.display());
        }

        Ok(records)
    }

    /// Append one record and flush it to disk.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize log record")?;
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.write_all(b"\n"))
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to append to transition log: {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn created_record() -> LogRecord {
        LogRecord::StreamCreated {
            stream: Uuid::new_v4(),
            feature: "expense-tracker".to_string(),
            phases: vec![PhaseSpec::new("01", "Project foundation", vec![])],
            at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("streams").join("stream.jsonl");

        let created = created_record();
        let transition = LogRecord::Transition {
            seq: 1,
            phase: "01".to_string(),
            from: PhaseState::Pending,
            to: PhaseState::InProgress,
            meta: TransitionMeta::default(),
            at: Utc::now(),
        };

        {
            let mut log = TransitionLog::create(&path).unwrap();
            log.append(&created).unwrap();
            log.append(&transition).unwrap();
        }

        let records = TransitionLog::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], created);
        assert_eq!(records[1], transition);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        std::fs::write(&path, "").unwrap();

        assert!(TransitionLog::create(&path).is_err());
    }

    #[test]
    fn test_open_append_continues_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");

        let created = created_record();
        {
            let mut log = TransitionLog::create(&path).unwrap();
            log.append(&created).unwrap();
        }

        let abandoned = LogRecord::StreamAbandoned { at: Utc::now() };
        {
            let (mut log, records) = TransitionLog::open_append(&path).unwrap();
            assert_eq!(records.len(), 1);
            log.append(&abandoned).unwrap();
        }

        let records = TransitionLog::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], abandoned);
    }

    #[test]
    fn test_read_all_rejects_malformed_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        std::fs::write(&path, "{ not json\n").unwrap();

        let result = TransitionLog::read_all(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Malformed record"));
    }

    #[test]
    fn test_read_all_rejects_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        std::fs::write(&path, "\n").unwrap();

        let result = TransitionLog::read_all(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_transition_meta_skipped_when_empty() {
        let record = LogRecord::Transition {
            seq: 3,
            phase: "02".to_string(),
            from: PhaseState::Pending,
            to: PhaseState::InProgress,
            meta: TransitionMeta::default(),
            at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("meta"));

        let parsed: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_transition_meta_builder() {
        let meta = TransitionMeta::default()
            .artifact(ArtifactRef::new("pr-42"))
            .validation(ValidationOutcome::Pass)
            .note("validated");

        assert_eq!(meta.artifact.as_ref().unwrap().as_str(), "pr-42");
        assert_eq!(meta.validation, Some(ValidationOutcome::Pass));
        assert!(meta.review.is_none());
        assert!(!meta.is_empty());
    }
}
