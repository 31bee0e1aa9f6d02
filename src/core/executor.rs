//! DP-012: Recipe execution engine.
//!
//! Runs a recipe as one sequential timeline:
//! validate → for each step: resolve → dispatch (under retry policy) →
//! verify → bind outputs → record. A failed step without
//! `continue_on_failure` aborts the run and every later step is skipped.

use super::clock::{Clock, SystemClock};
use super::config::EngineConfig;
use super::dispatcher::{Artifact, Dispatcher, ProviderOutcome, ProviderRequest};
use super::error::{EngineError, ErrorInfo, ErrorKind};
use super::parser::{validate_recipe, FieldError, ValidationResult};
use super::resolver::{resolve_target, resolve_template, Builtins, Scope};
use super::retry::{self, GiveUpReason, RetryDecision};
use super::types::*;
use crate::journal::eventlog::ExecutionLogger;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation flag, checked between steps and before each retry.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Defaults applied to steps that leave a policy unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub default_timeout: Duration,
    pub default_backoff: Backoff,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_backoff: Backoff::default(),
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            default_timeout: retry::timeout_duration(config.defaults.timeout_secs)
                .unwrap_or(Duration::from_secs(30)),
            default_backoff: config.retry,
        }
    }
}

/// Engine-owned state for one run.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: String,
    pub recipe_name: String,
    /// 1-based index of the current step; 0 before the first step
    pub step_index: usize,
    bindings: IndexMap<String, String>,
    logger: ExecutionLogger,
}

impl ExecutionContext {
    /// Recipe variables first, then runtime overrides shadowing them.
    pub fn new(
        recipe: &Recipe,
        overrides: &IndexMap<String, String>,
        logger: ExecutionLogger,
    ) -> Self {
        let mut ctx = Self {
            run_id: logger.run_id().to_string(),
            recipe_name: recipe.name.clone(),
            step_index: 0,
            bindings: IndexMap::new(),
            logger,
        };
        for (k, v) in recipe.variables.iter().chain(overrides.iter()) {
            ctx.bind(k, v);
        }
        ctx
    }

    /// Later bindings shadow earlier ones; the key moves to the end.
    pub fn bind(&mut self, name: &str, value: &str) {
        self.bindings.shift_remove(name);
        self.bindings.insert(name.to_string(), value.to_string());
    }

    pub fn bindings(&self) -> &IndexMap<String, String> {
        &self.bindings
    }
}

/// Final report of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub recipe: String,
    pub state: RunState,
    pub transitions: Vec<RunState>,
    pub results: Vec<StepResult>,
    pub validation_errors: Vec<FieldError>,
    pub duration: Duration,
    pub log_location: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
    pub bindings: IndexMap<String, String>,
    /// Index of the step whose failure aborted the run
    pub aborted_at: Option<usize>,
    pub cancelled: bool,
}

impl RunReport {
    /// 0 iff the run completed.
    pub fn exit_code(&self) -> i32 {
        if self.state == RunState::Completed {
            0
        } else {
            1
        }
    }

    /// The unrecovered failure that aborted the run.
    pub fn first_failure(&self) -> Option<&StepResult> {
        self.aborted_at.and_then(|i| self.results.get(i))
    }

    pub fn succeeded(&self) -> u32 {
        self.count(StepPhase::Success)
    }

    pub fn failed(&self) -> u32 {
        self.count(StepPhase::Failure)
    }

    pub fn skipped(&self) -> u32 {
        self.count(StepPhase::Skipped)
    }

    fn count(&self, phase: StepPhase) -> u32 {
        let n = self.results.iter().filter(|r| r.phase == phase).count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// Output of a successful primary action, with the inputs it ran on.
struct Attempted {
    target: TargetSpec,
    text: Option<String>,
    value: Option<String>,
    artifacts: Vec<Artifact>,
}

/// The recipe engine. Owns the provider table and the clock.
pub struct Engine {
    dispatcher: Dispatcher,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
    options: EngineOptions,
    overrides: IndexMap<String, String>,
}

impl Engine {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            clock: Box::new(SystemClock::new()),
            cancel: CancelToken::new(),
            options: EngineOptions::default(),
            overrides: IndexMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runtime bindings that shadow recipe variables.
    pub fn with_bindings(mut self, overrides: IndexMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute a recipe. Step failures are contained in the report; only
    /// log sink failures surface as `Err`.
    pub fn run(
        &mut self,
        recipe: &Recipe,
        logger: ExecutionLogger,
    ) -> Result<RunReport, EngineError> {
        let started = self.clock.now();
        let mut ctx = ExecutionContext::new(recipe, &self.overrides, logger);
        let mut transitions = Vec::new();

        transition(&mut ctx, &mut transitions, RunState::Loaded)?;
        transition(&mut ctx, &mut transitions, RunState::Validating)?;

        let validation_errors = match validate_recipe(recipe) {
            ValidationResult::Valid => Vec::new(),
            ValidationResult::Invalid(errors) => errors,
        };

        let mut results = Vec::with_capacity(recipe.steps.len());
        let mut aborted_at = None;
        let mut aborted = false;

        if validation_errors.is_empty() {
            transition(&mut ctx, &mut transitions, RunState::Executing)?;

            for (i, step) in recipe.steps.iter().enumerate() {
                if aborted || self.cancel.is_cancelled() {
                    aborted = true;
                    results.push(skip_step(&mut ctx, i, step)?);
                    continue;
                }

                let result = self.execute_step(&mut ctx, i, step)?;
                if result.phase == StepPhase::Failure
                    && (!step.continue_on_failure || self.cancel.is_cancelled())
                {
                    tracing::warn!(
                        run_id = ctx.run_id.as_str(),
                        step = result.step_id.as_str(),
                        "aborting run after failed step '{}'",
                        step.name
                    );
                    aborted = true;
                    aborted_at = Some(i);
                }
                results.push(result);
            }
        } else {
            ctx.logger.record(RunEvent::ValidationFailed {
                recipe: recipe.name.clone(),
                errors: validation_errors.clone(),
            })?;
            aborted = true;
        }

        let state = if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        transition(&mut ctx, &mut transitions, state)?;

        let mut report = RunReport {
            run_id: ctx.run_id.clone(),
            recipe: recipe.name.clone(),
            state,
            transitions,
            results,
            validation_errors,
            duration: self.clock.now().saturating_sub(started),
            log_location: ctx.logger.location(),
            artifacts_dir: ctx.logger.artifacts_dir().to_path_buf(),
            bindings: IndexMap::new(),
            aborted_at,
            cancelled: self.cancel.is_cancelled(),
        };

        ctx.logger.record(RunEvent::RunFinished {
            recipe: recipe.name.clone(),
            state,
            exit_code: report.exit_code(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
            duration_ms: millis(report.duration),
            first_failure: report.first_failure().map(|r| r.step_id.clone()),
        })?;

        report.bindings = ctx.bindings;
        Ok(report)
    }

    fn execute_step(
        &mut self,
        ctx: &mut ExecutionContext,
        index: usize,
        step: &Step,
    ) -> Result<StepResult, EngineError> {
        let step_ref = StepRef::new(index, step);
        let step_start = self.clock.now();
        ctx.step_index = index + 1;

        ctx.logger.record(RunEvent::Step {
            step: step_ref.clone(),
            phase: StepPhase::Running,
            attempts: 0,
            duration_ms: 0,
            error: None,
            artifacts: vec![],
        })?;

        // validation rejects timeouts `timeout_duration` cannot represent
        let timeout = step
            .timeout
            .and_then(retry::timeout_duration)
            .unwrap_or(self.options.default_timeout);
        let backoff = step.retry_backoff.unwrap_or(self.options.default_backoff);
        let max_attempts = retry::max_attempts(step.retry_attempts);
        let builtins = Builtins::new(&ctx.run_id, &ctx.recipe_name, index + 1);

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let attempt_start = self.clock.now();
            let remaining = timeout.saturating_sub(attempt_start.saturating_sub(step_start));
            let result = self.attempt(ctx, step, &builtins, remaining);
            let duration_ms = millis(self.clock.now().saturating_sub(attempt_start));

            let err = match result {
                Ok(done) => {
                    ctx.logger.record(RunEvent::Attempt {
                        step: step_ref.clone(),
                        attempt,
                        max_attempts,
                        success: true,
                        duration_ms,
                        error: None,
                        retry_in_ms: None,
                        give_up: None,
                    })?;
                    break Ok(done);
                }
                Err(err) => err,
            };

            let elapsed = self.clock.now().saturating_sub(step_start);
            let mut decision =
                retry::next_action(attempt, max_attempts, elapsed, timeout, &backoff, &err);
            if matches!(decision, RetryDecision::Retry(_)) && self.cancel.is_cancelled() {
                decision = RetryDecision::GiveUp(GiveUpReason::Cancelled);
            }

            let (retry_in_ms, give_up) = match decision {
                RetryDecision::Retry(delay) => (Some(millis(delay)), None),
                RetryDecision::GiveUp(reason) => (None, Some(reason)),
            };
            ctx.logger.record(RunEvent::Attempt {
                step: step_ref.clone(),
                attempt,
                max_attempts,
                success: false,
                duration_ms,
                error: Some(err.clone()),
                retry_in_ms,
                give_up,
            })?;

            match decision {
                RetryDecision::Retry(delay) => self.clock.sleep(delay),
                // the attempt event above keeps the provider error as observed
                RetryDecision::GiveUp(GiveUpReason::Cancelled) => {
                    break Err(ErrorInfo::new(
                        ErrorKind::Cancelled,
                        format!("run cancelled after attempt {}: {}", attempt, err),
                    ))
                }
                RetryDecision::GiveUp(_) => break Err(err),
            }
        };

        let outcome = match outcome {
            Ok(done) if step.verify_after => {
                let remaining = remaining_after(timeout, step_start, self.clock.as_ref());
                self.verify_step(ctx, step, &step_ref, remaining, done)?
            }
            other => other,
        };

        let mut artifacts = Vec::new();
        let (phase, error) = match outcome {
            Ok(done) => {
                record_success(ctx, index, step, &done, &mut artifacts);
                (StepPhase::Success, None)
            }
            Err(err) => {
                if let Some(bytes) = self.dispatcher.capture_screen() {
                    store(ctx, &mut artifacts, "failure-screen", None, &bytes);
                }
                (StepPhase::Failure, Some(err))
            }
        };

        let duration_ms = millis(self.clock.now().saturating_sub(step_start));
        ctx.logger.record(RunEvent::Step {
            step: step_ref.clone(),
            phase,
            attempts: attempt,
            duration_ms,
            error: error.clone(),
            artifacts: artifacts.clone(),
        })?;

        Ok(StepResult {
            step_id: step_ref.id,
            index,
            name: step.name.clone(),
            action: step.action.clone(),
            phase,
            attempt_count: attempt,
            duration_ms,
            error,
            artifact_refs: artifacts.into_iter().map(|a| a.path).collect(),
        })
    }

    /// One attempt: resolve against the current scope, then dispatch.
    fn attempt(
        &mut self,
        ctx: &ExecutionContext,
        step: &Step,
        builtins: &Builtins,
        timeout: Duration,
    ) -> Result<Attempted, ErrorInfo> {
        let scope = Scope {
            locals: &step.variables,
            bindings: &ctx.bindings,
            builtins,
        };
        let target = resolve_target(&step.target, &scope)?;
        let text = step
            .text
            .as_deref()
            .map(|t| resolve_template(t, &scope))
            .transpose()?;

        let request = ProviderRequest {
            action: &step.action,
            target: &target,
            text: text.as_deref(),
            timeout,
            bindings: &ctx.bindings,
        };
        let (value, artifacts) = self.dispatcher.dispatch(&request).into_result()?;
        Ok(Attempted {
            target,
            text,
            value,
            artifacts,
        })
    }

    /// Single retry-free post-action check.
    fn verify_step(
        &mut self,
        ctx: &mut ExecutionContext,
        step: &Step,
        step_ref: &StepRef,
        timeout: Duration,
        done: Attempted,
    ) -> Result<Result<Attempted, ErrorInfo>, EngineError> {
        let request = ProviderRequest {
            action: &step.action,
            target: &done.target,
            text: done.text.as_deref(),
            timeout,
            bindings: &ctx.bindings,
        };
        let error = match self.dispatcher.verify(&request) {
            ProviderOutcome::Success { .. } => None,
            ProviderOutcome::Failure { kind, message } => Some(ErrorInfo::new(
                ErrorKind::VerificationFailure,
                format!("{} ({})", message, kind),
            )),
        };

        ctx.logger.record(RunEvent::Verification {
            step: step_ref.clone(),
            passed: error.is_none(),
            error: error.clone(),
        })?;

        Ok(match error {
            Some(err) => Err(err),
            None => Ok(done),
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dispatcher", &self.dispatcher)
            .field("options", &self.options)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn transition(
    ctx: &mut ExecutionContext,
    transitions: &mut Vec<RunState>,
    state: RunState,
) -> Result<(), EngineError> {
    transitions.push(state);
    ctx.logger.record(RunEvent::RunState {
        recipe: ctx.recipe_name.clone(),
        state,
    })
}

/// Bind the step's output and store provider artifacts.
fn record_success(
    ctx: &mut ExecutionContext,
    index: usize,
    step: &Step,
    done: &Attempted,
    artifacts: &mut Vec<ArtifactRef>,
) {
    let value = done.value.clone().unwrap_or_default();
    ctx.bind(&format!("step_{}_result", index + 1), &value);
    if let Some(ref name) = step.save_as {
        ctx.bind(name, &value);
    }
    for a in &done.artifacts {
        store(ctx, artifacts, &a.kind, Some(&a.extension), &a.bytes);
    }
}

/// Artifact storage problems are reported but never fail the step.
fn store(
    ctx: &mut ExecutionContext,
    artifacts: &mut Vec<ArtifactRef>,
    kind: &str,
    extension: Option<&str>,
    bytes: &[u8],
) {
    let stored = match extension {
        Some(ext) => ctx.logger.store_artifact(kind, ext, bytes),
        None => ctx.logger.capture_artifact(kind, bytes),
    };
    match stored {
        Ok(r) => artifacts.push(r),
        Err(e) => tracing::warn!(run_id = ctx.run_id.as_str(), "{}", e),
    }
}

fn skip_step(
    ctx: &mut ExecutionContext,
    index: usize,
    step: &Step,
) -> Result<StepResult, EngineError> {
    let step_ref = StepRef::new(index, step);
    ctx.logger.record(RunEvent::Step {
        step: step_ref.clone(),
        phase: StepPhase::Skipped,
        attempts: 0,
        duration_ms: 0,
        error: None,
        artifacts: vec![],
    })?;
    Ok(StepResult {
        step_id: step_ref.id,
        index,
        name: step.name.clone(),
        action: step.action.clone(),
        phase: StepPhase::Skipped,
        attempt_count: 0,
        duration_ms: 0,
        error: None,
        artifact_refs: vec![],
    })
}

fn remaining_after(timeout: Duration, step_start: Duration, clock: &dyn Clock) -> Duration {
    timeout.saturating_sub(clock.now().saturating_sub(step_start))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
