//! DP-011: Reconstruct a run from its persisted event log.
//!
//! The terminal `step` event of each step carries everything a
//! [`StepResult`] holds, so results can be rebuilt without re-running.

use crate::core::error::EngineError;
use crate::core::parser::FieldError;
use crate::core::types::{LogEvent, RunEvent, RunState, StepResult};
use std::path::Path;

/// Read every event from a JSONL log.
pub fn read_events(path: &Path) -> Result<Vec<LogEvent>, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|source| EngineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                EngineError::Log(format!("{}:{}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

/// Run state recovered from events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReplay {
    pub run_id: String,
    pub recipe: String,
    /// Run-state transitions in order
    pub states: Vec<RunState>,
    pub results: Vec<StepResult>,
    pub validation_errors: Vec<FieldError>,
    /// Present once the run finished
    pub exit_code: Option<i32>,
    pub first_failure: Option<String>,
    pub duration_ms: u64,
    pub attempt_events: usize,
}

impl RunReplay {
    pub fn final_state(&self) -> Option<RunState> {
        self.states.last().copied()
    }

    /// A log without a `run_finished` event belongs to an interrupted run.
    pub fn is_complete(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Fold events into the run's final state.
pub fn replay(events: &[LogEvent]) -> RunReplay {
    let mut out = RunReplay::default();

    for le in events {
        if out.run_id.is_empty() {
            out.run_id = le.run_id.clone();
        }
        match &le.event {
            RunEvent::RunState { recipe, state } => {
                out.recipe = recipe.clone();
                out.states.push(*state);
            }
            RunEvent::ValidationFailed { errors, .. } => {
                out.validation_errors.extend(errors.iter().cloned());
            }
            RunEvent::Step {
                step,
                phase,
                attempts,
                duration_ms,
                error,
                artifacts,
            } if phase.is_terminal() => {
                out.results.push(StepResult {
                    step_id: step.id.clone(),
                    index: step.index,
                    name: step.name.clone(),
                    action: step.action.clone(),
                    phase: *phase,
                    attempt_count: *attempts,
                    duration_ms: *duration_ms,
                    error: error.clone(),
                    artifact_refs: artifacts.iter().map(|a| a.path.clone()).collect(),
                });
            }
            RunEvent::Attempt { .. } => out.attempt_events += 1,
            RunEvent::RunFinished {
                exit_code,
                duration_ms,
                first_failure,
                ..
            } => {
                out.exit_code = Some(*exit_code);
                out.duration_ms = *duration_ms;
                out.first_failure = first_failure.clone();
            }
            RunEvent::Step { .. } | RunEvent::Verification { .. } => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ErrorInfo, ErrorKind};
    use crate::core::types::{ActionKind, StepPhase, StepRef};
    use chrono::Utc;

    fn ev(seq: u64, event: RunEvent) -> LogEvent {
        LogEvent {
            seq,
            ts: Utc::now(),
            run_id: "r-1".to_string(),
            event,
        }
    }

    fn step_ref() -> StepRef {
        StepRef {
            id: "step-001".to_string(),
            index: 0,
            name: "read".to_string(),
            action: ActionKind::FileRead,
            target: "file a.txt".to_string(),
        }
    }

    #[test]
    fn test_dp011_replay_step_results() {
        let events = vec![
            ev(1, RunEvent::RunState { recipe: "demo".into(), state: RunState::Loaded }),
            ev(2, RunEvent::Step {
                step: step_ref(),
                phase: StepPhase::Running,
                attempts: 0,
                duration_ms: 0,
                error: None,
                artifacts: vec![],
            }),
            ev(3, RunEvent::Attempt {
                step: step_ref(),
                attempt: 1,
                max_attempts: 1,
                success: false,
                duration_ms: 3,
                error: Some(ErrorInfo::new(ErrorKind::FileNotFound, "a.txt")),
                retry_in_ms: None,
                give_up: None,
            }),
            ev(4, RunEvent::Step {
                step: step_ref(),
                phase: StepPhase::Failure,
                attempts: 1,
                duration_ms: 3,
                error: Some(ErrorInfo::new(ErrorKind::FileNotFound, "a.txt")),
                artifacts: vec![],
            }),
            ev(5, RunEvent::RunFinished {
                recipe: "demo".into(),
                state: RunState::Aborted,
                exit_code: 1,
                succeeded: 0,
                failed: 1,
                skipped: 0,
                duration_ms: 7,
                first_failure: Some("step-001".into()),
            }),
        ];
        let r = replay(&events);
        assert_eq!(r.run_id, "r-1");
        assert_eq!(r.recipe, "demo");
        assert_eq!(r.results.len(), 1);
        assert_eq!(r.results[0].phase, StepPhase::Failure);
        assert_eq!(r.results[0].attempt_count, 1);
        assert_eq!(r.attempt_events, 1);
        assert_eq!(r.exit_code, Some(1));
        assert!(r.is_complete());
        assert_eq!(r.final_state(), Some(RunState::Loaded));
    }

    #[test]
    fn test_dp011_incomplete_log() {
        let events = vec![ev(
            1,
            RunEvent::RunState {
                recipe: "x".into(),
                state: RunState::Executing,
            },
        )];
        let r = replay(&events);
        assert!(!r.is_complete());
        assert_eq!(r.final_state(), Some(RunState::Executing));
    }

    #[test]
    fn test_dp011_read_events_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = read_events(&path).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }

    #[test]
    fn test_dp011_read_events_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let line = serde_json::to_string(&ev(1, RunEvent::RunState {
            recipe: "x".into(),
            state: RunState::Loaded,
        }))
        .unwrap();
        std::fs::write(&path, format!("{}\n\n", line)).unwrap();
        assert_eq!(read_events(&path).unwrap().len(), 1);
    }
}
