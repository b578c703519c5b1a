//! CLI command implementations.
//!
//! | Command   | Behavior                                                    |
//! |-----------|-------------------------------------------------------------|
//! | `start`   | Create a stream from a plan file and drive it to completion |
//! | `status`  | Replay a stream's log and print its status snapshot         |
//! | `abandon` | Mark every non-terminal phase abandoned                     |
//!
//! Exit codes map to the error taxonomy: 0 for success (stream
//! complete), 1 for a failed or abandoned stream, 2 for usage errors
//! and unknown streams, 3 for an invalid dependency graph.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tokio::sync::mpsc;
use uuid::Uuid;

use cadence::config::CadenceConfig;
use cadence::engine::{Engine, StreamEvent};
use cadence::errors::StoreError;
use cadence::gateway::http::{HttpArtifactHost, HttpReviewGate, HttpValidationGateway};
use cadence::phase::{PlanFile, StreamState};
use cadence::store::{LogRecord, PhaseStore, StreamId, StreamSnapshot, TransitionLog};

/// Map an error chain to the operator-facing exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::InvalidGraph(_)) => 3,
        Some(StoreError::NotFound { .. }) => 2,
        _ => 1,
    }
}

/// Start a stream from a plan file and run the engine until the stream
/// reaches a terminal state.
pub async fn cmd_start(
    project_dir: &Path,
    config_path: Option<&Path>,
    plan_path: &Path,
    feature: Option<&str>,
    json: bool,
) -> Result<u8> {
    let config = CadenceConfig::load(project_dir, config_path)?;
    let plan = PlanFile::load(plan_path)?;
    let feature = feature.unwrap_or(&plan.feature).to_string();
    let state_dir = config.state_dir(project_dir);

    let store = Arc::new(PhaseStore::new());
    let stream = store.create_stream_logged(&feature, plan.phases.clone(), &state_dir)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "stream": stream, "feature": feature })
        );
    } else {
        println!(
            "{} {} ({} phases, log at {})",
            style("Started stream").bold(),
            style(stream).cyan(),
            plan.phases.len(),
            PhaseStore::log_path(&state_dir, stream).display()
        );
    }

    let host = Arc::new(HttpArtifactHost::new(config.endpoints.host_url.clone()));
    let validation = Arc::new(HttpValidationGateway::new(
        config.endpoints.validation_url.clone(),
    ));
    let review = Arc::new(HttpReviewGate::new(config.endpoints.review_url.clone()));

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(100);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let state = {
        let engine = Engine::new(store.clone(), host, validation, review, config.engine_config())
            .with_event_channel(tx);
        engine.run_stream(stream).await?
    };
    printer.await.ok();

    let snapshot = store.snapshot(stream)?;
    print_snapshot(&snapshot, json)?;

    Ok(if state == StreamState::Complete { 0 } else { 1 })
}

/// Print the status snapshot of a stream, reconstructed by replaying
/// its transition log.
pub fn cmd_status(
    project_dir: &Path,
    config_path: Option<&Path>,
    stream: &str,
    show_log: bool,
    json: bool,
) -> Result<u8> {
    let config = CadenceConfig::load(project_dir, config_path)?;
    let (stream, records) = read_stream_log(project_dir, &config, stream)?;

    let (replayed, store) = PhaseStore::replay(&records)?;
    debug_assert_eq!(replayed, stream);
    let snapshot = store.snapshot(stream)?;

    print_snapshot(&snapshot, json)?;
    if show_log && !json {
        println!();
        print_log(&records);
    }

    Ok(0)
}

/// Abandon a stream: every non-terminal phase is marked abandoned and
/// the engine stops scheduling further transitions for it.
pub fn cmd_abandon(
    project_dir: &Path,
    config_path: Option<&Path>,
    stream: &str,
    json: bool,
) -> Result<u8> {
    let config = CadenceConfig::load(project_dir, config_path)?;
    let id = parse_stream_id(stream)?;
    let path = PhaseStore::log_path(&config.state_dir(project_dir), id);
    if !path.exists() {
        return Err(StoreError::not_found("stream", stream).into());
    }

    let (id, store) = PhaseStore::open_logged(&path)?;
    let snapshot = store.abandon_stream(id)?;

    if !json {
        println!("{} {}", style("Abandoned stream").bold(), style(id).cyan());
    }
    print_snapshot(&snapshot, json)?;

    Ok(0)
}

fn parse_stream_id(raw: &str) -> Result<StreamId> {
    // An unparseable id can never name a stream; report it the same way
    Uuid::parse_str(raw)
        .map_err(|_| StoreError::not_found("stream", raw).into())
}

fn read_stream_log(
    project_dir: &Path,
    config: &CadenceConfig,
    stream: &str,
) -> Result<(StreamId, Vec<LogRecord>)> {
    let id = parse_stream_id(stream)?;
    let path = PhaseStore::log_path(&config.state_dir(project_dir), id);
    if !path.exists() {
        return Err(StoreError::not_found("stream", stream).into());
    }
    let records = TransitionLog::read_all(&path)
        .with_context(|| format!("Failed to read log for stream {}", id))?;
    Ok((id, records))
}

fn print_event(event: &StreamEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
        return;
    }
    match event {
        StreamEvent::PhaseClaimed { phase } => {
            println!("{} phase {} claimed", style(">").bold(), phase);
        }
        StreamEvent::ArtifactOpened { phase, artifact } => {
            println!("  phase {}: artifact {} opened", phase, style(artifact).cyan());
        }
        StreamEvent::ValidationSubmitted { phase } => {
            println!("  phase {}: validation submitted", phase);
        }
        StreamEvent::ValidationPassed { phase } => {
            println!("{} phase {}: validation passed", style("+").green(), phase);
        }
        StreamEvent::ValidationFailed { phase, details } => {
            println!(
                "{} phase {}: validation failed: {}",
                style("x").red(),
                phase,
                details
            );
        }
        StreamEvent::ValidationErrored { phase, reason } => {
            println!(
                "{} phase {}: validation error: {}",
                style("!").yellow(),
                phase,
                reason
            );
        }
        StreamEvent::ReviewRequested { phase } => {
            println!("  phase {}: review requested", phase);
        }
        StreamEvent::ReviewApproved { phase } => {
            println!("{} phase {}: review approved", style("+").green(), phase);
        }
        StreamEvent::ReviewRejected { phase, reason } => {
            println!(
                "{} phase {}: review rejected: {}",
                style("x").red(),
                phase,
                reason
            );
        }
        StreamEvent::PhaseMerged { phase } => {
            println!("{} phase {} merged", style("+").green().bold(), phase);
        }
        StreamEvent::PhaseRetried { phase, retries } => {
            println!(
                "{} phase {} retrying (attempt {})",
                style("~").yellow(),
                phase,
                retries
            );
        }
        StreamEvent::PhaseAbandoned { phase, reason } => {
            println!(
                "{} phase {} abandoned: {}",
                style("x").red().bold(),
                phase,
                reason
            );
        }
        StreamEvent::StreamFinished { state } => {
            println!("stream finished: {}", style_stream_state(*state));
        }
    }
}

fn style_stream_state(state: StreamState) -> console::StyledObject<&'static str> {
    match state {
        StreamState::Complete => style(state.as_str()).green().bold(),
        StreamState::Failed | StreamState::Abandoned => style(state.as_str()).red().bold(),
        StreamState::Active => style(state.as_str()).yellow(),
    }
}

fn print_snapshot(snapshot: &StreamSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    println!(
        "\n{} {}  feature: {}  state: {}",
        style("stream").bold(),
        snapshot.stream,
        snapshot.feature,
        style_stream_state(snapshot.state)
    );
    // Plain cells: ANSI escapes would break the column padding
    println!(
        "{}",
        style(format!(
            "{:<10} {:<30} {:<12} {:<11} {:<9} {:>7}  {}",
            "PHASE", "TITLE", "STATE", "VALIDATION", "REVIEW", "RETRIES", "ARTIFACT"
        ))
        .dim()
    );
    for phase in &snapshot.phases {
        println!(
            "{:<10} {:<30} {:<12} {:<11} {:<9} {:>7}  {}",
            phase.id,
            truncate(&phase.title, 30),
            phase.state,
            phase.validation,
            phase.review,
            phase.retries,
            phase
                .artifact
                .as_ref()
                .map(|a| a.as_str())
                .unwrap_or("-")
        );
    }

    Ok(())
}

fn print_log(records: &[LogRecord]) {
    println!("{}", style("transition log").bold());
    for record in records {
        match record {
            LogRecord::StreamCreated {
                feature,
                phases,
                at,
                ..
            } => {
                println!("{}  stream created: {} ({} phases)", at, feature, phases.len());
            }
            LogRecord::Transition {
                seq,
                phase,
                from,
                to,
                meta,
                at,
            } => {
                let note = meta
                    .note
                    .as_deref()
                    .map(|n| format!("  ({})", n))
                    .unwrap_or_default();
                println!("{}  #{:<4} {:<10} {} -> {}{}", at, seq, phase, from, to, note);
            }
            LogRecord::StreamAbandoned { at } => {
                println!("{}  stream abandoned", at);
            }
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let invalid: anyhow::Error = StoreError::InvalidGraph("cycle".into()).into();
        assert_eq!(exit_code_for(&invalid), 3);

        let missing: anyhow::Error = StoreError::not_found("stream", "x").into();
        assert_eq!(exit_code_for(&missing), 2);

        let other = anyhow::anyhow!("something broke");
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn test_parse_stream_id_rejects_garbage_as_not_found() {
        let err = parse_stream_id("not-a-uuid").unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 30), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }
}
