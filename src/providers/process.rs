//! DP-021: Process provider.
//!
//! `launch` spawns the executable directly (no shell) and watches it for a
//! short settle window: a process that exits non-zero inside the window is a
//! failed launch. The step value is the child's pid.

use crate::core::dispatcher::{Provider, ProviderOutcome, ProviderRequest};
use crate::core::error::ErrorKind;
use crate::core::types::{ActionKind, AppTarget, TargetSpec};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const DEFAULT_SETTLE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct ProcessProvider {
    settle: Duration,
    children: Vec<(String, Child)>,
}

impl Default for ProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProvider {
    pub fn new() -> Self {
        Self::with_settle(DEFAULT_SETTLE)
    }

    pub fn with_settle(settle: Duration) -> Self {
        Self {
            settle,
            children: Vec::new(),
        }
    }

    /// Kill and reap every process this provider started.
    #[cfg(test)]
    fn terminate_all(&mut self) {
        for (_, child) in &mut self.children {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.children.clear();
    }

    fn launch(&mut self, app: &AppTarget, timeout: Duration) -> ProviderOutcome {
        let spawned = Command::new(&app.executable)
            .args(&app.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                let kind = match e.kind() {
                    std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                    std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                    _ => ErrorKind::ProcessFailed,
                };
                return ProviderOutcome::fail(
                    kind,
                    format!("failed to spawn {}: {}", app.executable, e),
                );
            }
        };
        let pid = child.id();

        let deadline = Instant::now() + self.settle.min(timeout);
        loop {
            match child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    return ProviderOutcome::fail(
                        ErrorKind::ProcessFailed,
                        format!("{} exited early with {}", app.executable, status),
                    );
                }
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return ProviderOutcome::fail(
                        ErrorKind::ProcessFailed,
                        format!("cannot poll {}: {}", app.executable, e),
                    );
                }
            }
        }

        tracing::debug!(executable = app.executable.as_str(), pid, "launched");
        self.children.push((app.executable.clone(), child));
        ProviderOutcome::value(pid.to_string())
    }

    /// The most recent launch of `executable` is running or exited cleanly.
    fn check_alive(&mut self, executable: &str) -> ProviderOutcome {
        let Some((_, child)) = self
            .children
            .iter_mut()
            .rev()
            .find(|(exe, _)| exe == executable)
        else {
            return ProviderOutcome::fail(
                ErrorKind::ProcessFailed,
                format!("{} was not launched by this run", executable),
            );
        };
        match child.try_wait() {
            Ok(None) => ProviderOutcome::ok(),
            Ok(Some(status)) if status.success() => ProviderOutcome::ok(),
            Ok(Some(status)) => ProviderOutcome::fail(
                ErrorKind::ProcessFailed,
                format!("{} exited with {}", executable, status),
            ),
            Err(e) => ProviderOutcome::fail(
                ErrorKind::ProcessFailed,
                format!("cannot poll {}: {}", executable, e),
            ),
        }
    }
}

impl Provider for ProcessProvider {
    fn name(&self) -> &str {
        "process"
    }

    fn invoke(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        match (request.action, request.target) {
            (ActionKind::Launch, TargetSpec::App(app)) => self.launch(app, request.timeout),
            (action, target) => ProviderOutcome::fail(
                ErrorKind::Unsupported,
                format!("process provider cannot {} {}", action, target),
            ),
        }
    }

    fn verify(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        match request.target {
            TargetSpec::App(app) => self.check_alive(&app.executable),
            other => ProviderOutcome::fail(
                ErrorKind::Unsupported,
                format!("process provider cannot verify {}", other),
            ),
        }
    }
}
