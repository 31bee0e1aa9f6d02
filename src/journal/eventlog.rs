//! DP-009: Append-only JSONL execution log.
//!
//! One [`ExecutionLogger`] per run. Every record gets the next sequence
//! number and a timestamp clamped so it never goes backwards, is written to
//! the sink, and is mirrored as a `tracing` event.

use crate::core::error::EngineError;
use crate::core::types::{ArtifactRef, LogEvent, RunEvent, StepPhase};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::hasher;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a run.
pub fn event_log_path(log_dir: &Path, run_id: &str) -> PathBuf {
    log_dir.join(run_id).join("events.jsonl")
}

/// Destination for log events.
pub trait EventSink {
    fn append(&mut self, event: &LogEvent) -> Result<(), EngineError>;

    /// Where the events end up, if they are persisted.
    fn location(&self) -> Option<PathBuf> {
        None
    }
}

/// One JSON object per line, flushed per event.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: File,
}

impl JsonlSink {
    /// Open `<log_dir>/<run_id>/events.jsonl` for appending.
    pub fn create(log_dir: &Path, run_id: &str) -> Result<Self, EngineError> {
        let path = event_log_path(log_dir, run_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Log(format!("cannot create log dir {}: {}", parent.display(), e))
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                EngineError::Log(format!("cannot open event log {}: {}", path.display(), e))
            })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlSink {
    fn append(&mut self, event: &LogEvent) -> Result<(), EngineError> {
        let json = serde_json::to_string(event)
            .map_err(|e| EngineError::Log(format!("JSON serialize error: {}", e)))?;
        writeln!(self.file, "{}", json)
            .and_then(|_| self.file.flush())
            .map_err(|e| EngineError::Log(format!("write error {}: {}", self.path.display(), e)))
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// In-memory sink; clones share the event buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Rc<RefCell<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.borrow().clone()
    }
}

impl EventSink for MemorySink {
    fn append(&mut self, event: &LogEvent) -> Result<(), EngineError> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

/// Per-run logger: sequencing, timestamps, artifacts.
pub struct ExecutionLogger {
    run_id: String,
    seq: u64,
    last_ts: Option<DateTime<Utc>>,
    sink: Box<dyn EventSink>,
    artifacts_dir: PathBuf,
    artifact_count: u32,
}

impl ExecutionLogger {
    /// `artifacts_root` is the shared root; this run writes under `<root>/<run_id>/`.
    pub fn new(run_id: &str, sink: Box<dyn EventSink>, artifacts_root: &Path) -> Self {
        Self {
            run_id: run_id.to_string(),
            seq: 0,
            last_ts: None,
            sink,
            artifacts_dir: artifacts_root.join(run_id),
            artifact_count: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn location(&self) -> Option<PathBuf> {
        self.sink.location()
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Append one event.
    pub fn record(&mut self, event: RunEvent) -> Result<(), EngineError> {
        let mut ts = now_utc();
        if let Some(last) = self.last_ts {
            if ts < last {
                ts = last;
            }
        }
        self.last_ts = Some(ts);
        self.seq += 1;

        trace_event(&self.run_id, &event);

        self.sink.append(&LogEvent {
            seq: self.seq,
            ts,
            run_id: self.run_id.clone(),
            event,
        })
    }

    /// Store diagnostic bytes; the extension is sniffed (PNG or raw).
    pub fn capture_artifact(
        &mut self,
        kind: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, EngineError> {
        let extension = if bytes.starts_with(PNG_MAGIC) {
            "png"
        } else {
            "bin"
        };
        self.store_artifact(kind, extension, bytes)
    }

    /// Store diagnostic bytes under an explicit extension.
    pub fn store_artifact(
        &mut self,
        kind: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, EngineError> {
        std::fs::create_dir_all(&self.artifacts_dir).map_err(|e| {
            EngineError::Artifact(format!(
                "cannot create {}: {}",
                self.artifacts_dir.display(),
                e
            ))
        })?;
        self.artifact_count += 1;
        let path = self.artifacts_dir.join(format!(
            "{:03}-{}.{}",
            self.artifact_count,
            sanitize(kind),
            extension.trim_start_matches('.')
        ));
        std::fs::write(&path, bytes)
            .map_err(|e| EngineError::Artifact(format!("write {}: {}", path.display(), e)))?;
        Ok(ArtifactRef {
            kind: kind.to_string(),
            path,
            hash: hasher::hash_bytes(bytes),
        })
    }
}

impl std::fmt::Debug for ExecutionLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLogger")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .field("artifacts_dir", &self.artifacts_dir)
            .finish()
    }
}

fn sanitize(kind: &str) -> String {
    kind.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn trace_event(run_id: &str, event: &RunEvent) {
    match event {
        RunEvent::RunState { recipe, state } => {
            tracing::info!(run_id, recipe = recipe.as_str(), %state, "run state");
        }
        RunEvent::ValidationFailed { recipe, errors } => {
            for e in errors {
                tracing::error!(
                    run_id,
                    recipe = recipe.as_str(),
                    field = e.field.as_str(),
                    "{}",
                    e.message
                );
            }
        }
        RunEvent::Step {
            step, phase, error, ..
        } => match (phase, error) {
            (StepPhase::Failure, Some(err)) => {
                tracing::error!(
                    run_id,
                    step = step.id.as_str(),
                    name = step.name.as_str(),
                    %phase,
                    "{}",
                    err
                );
            }
            _ => {
                tracing::info!(
                    run_id,
                    step = step.id.as_str(),
                    name = step.name.as_str(),
                    action = %step.action,
                    %phase,
                    "step"
                );
            }
        },
        RunEvent::Attempt {
            step,
            attempt,
            max_attempts,
            success,
            error,
            ..
        } => match error {
            Some(err) if !success => {
                tracing::warn!(
                    run_id,
                    step = step.id.as_str(),
                    attempt,
                    max_attempts,
                    "attempt failed: {}",
                    err
                );
            }
            _ => {
                tracing::debug!(
                    run_id,
                    step = step.id.as_str(),
                    attempt,
                    max_attempts,
                    "attempt succeeded"
                );
            }
        },
        RunEvent::Verification { step, passed, .. } => {
            tracing::debug!(run_id, step = step.id.as_str(), passed, "verification");
        }
        RunEvent::RunFinished {
            recipe,
            state,
            exit_code,
            ..
        } => {
            tracing::info!(run_id, recipe = recipe.as_str(), %state, exit_code, "run finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunState;

    fn state_event(state: RunState) -> RunEvent {
        RunEvent::RunState {
            recipe: "demo".to_string(),
            state,
        }
    }

    #[test]
    fn test_dp009_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_dp009_event_log_path() {
        let p = event_log_path(Path::new("/logs"), "r-abc");
        assert_eq!(p, PathBuf::from("/logs/r-abc/events.jsonl"));
    }

    #[test]
    fn test_dp009_memory_sink_sequence() {
        let sink = MemorySink::new();
        let mut logger = ExecutionLogger::new("r-1", Box::new(sink.clone()), Path::new("/tmp"));
        logger.record(state_event(RunState::Loaded)).unwrap();
        logger.record(state_event(RunState::Validating)).unwrap();
        logger.record(state_event(RunState::Executing)).unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 3);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(events.windows(2).all(|w| w[0].ts <= w[1].ts));
        assert!(events.iter().all(|e| e.run_id == "r-1"));
        assert!(logger.location().is_none());
    }

    #[test]
    fn test_dp009_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::create(dir.path(), "r-xyz").unwrap();
        let mut logger = ExecutionLogger::new("r-xyz", Box::new(sink), dir.path());
        logger.record(state_event(RunState::Loaded)).unwrap();
        logger.record(state_event(RunState::Completed)).unwrap();

        let path = dir.path().join("r-xyz/events.jsonl");
        assert_eq!(logger.location(), Some(path.clone()));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"run_state\""));
        assert!(lines[1].contains("COMPLETED"));
        let parsed: LogEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.seq, 2);
    }

    #[test]
    fn test_dp009_capture_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger =
            ExecutionLogger::new("r-art", Box::new(MemorySink::new()), dir.path());
        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(b"pixels");
        let shot = logger.capture_artifact("failure screen", &png).unwrap();
        assert_eq!(shot.path, dir.path().join("r-art/001-failure_screen.png"));
        assert_eq!(std::fs::read(&shot.path).unwrap(), png);
        assert_eq!(shot.hash, hasher::hash_bytes(&png));

        let raw = logger.capture_artifact("dump", b"raw").unwrap();
        assert_eq!(raw.path.extension().and_then(|e| e.to_str()), Some("bin"));

        let text = logger.store_artifact("ocr", ".txt", b"words").unwrap();
        assert!(text.path.ends_with("003-ocr.txt"));
    }
}
