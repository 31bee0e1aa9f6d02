//! DP-023: UI automation provider.
//!
//! Routes window/element actions to a pluggable [`UiBackend`]. `wait_for`
//! polls the backend until the target appears or the request timeout
//! elapses; every other action is a single backend call. Hosts without a
//! window-tree backend get [`UnavailableBackend`], which reports every action
//! as unsupported.

use crate::core::dispatcher::{Artifact, Provider, ProviderOutcome, ProviderRequest};
use crate::core::error::{ErrorInfo, ErrorKind};
use crate::core::types::{ActionKind, ElementTarget, TargetSpec, WindowTarget};
use crate::providers::fs::AllowList;
use std::time::{Duration, Instant};

const DEFAULT_POLL: Duration = Duration::from_millis(250);

/// Live window-tree access.
pub trait UiBackend {
    fn name(&self) -> &str;

    /// Whether the window or element currently exists.
    fn locate(&mut self, target: &TargetSpec) -> Result<bool, ErrorInfo>;

    fn click(&mut self, element: &ElementTarget) -> Result<(), ErrorInfo>;

    fn type_text(&mut self, target: &TargetSpec, text: &str) -> Result<(), ErrorInfo>;

    /// Send a chord such as `ctrl+s` to a window.
    fn hotkey(&mut self, window: &WindowTarget, chord: &str) -> Result<(), ErrorInfo>;

    fn read_text(&mut self, element: &ElementTarget) -> Result<String, ErrorInfo>;

    /// Whether the target's value or state equals `expected`.
    fn state_matches(&mut self, target: &TargetSpec, expected: &str) -> Result<bool, ErrorInfo>;

    /// Image bytes of a window, or the whole screen for `None`.
    fn capture(&mut self, window: Option<&WindowTarget>) -> Result<Vec<u8>, ErrorInfo>;
}

/// Backend for hosts with no UI automation support.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

impl UnavailableBackend {
    fn unsupported<T>(&self, what: &str) -> Result<T, ErrorInfo> {
        Err(ErrorInfo::new(
            ErrorKind::Unsupported,
            format!("no UI automation backend available on this host ({})", what),
        ))
    }
}

impl UiBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn locate(&mut self, _target: &TargetSpec) -> Result<bool, ErrorInfo> {
        self.unsupported("locate")
    }

    fn click(&mut self, _element: &ElementTarget) -> Result<(), ErrorInfo> {
        self.unsupported("click")
    }

    fn type_text(&mut self, _target: &TargetSpec, _text: &str) -> Result<(), ErrorInfo> {
        self.unsupported("type")
    }

    fn hotkey(&mut self, _window: &WindowTarget, _chord: &str) -> Result<(), ErrorInfo> {
        self.unsupported("hotkey")
    }

    fn read_text(&mut self, _element: &ElementTarget) -> Result<String, ErrorInfo> {
        self.unsupported("read_text")
    }

    fn state_matches(&mut self, _target: &TargetSpec, _expected: &str) -> Result<bool, ErrorInfo> {
        self.unsupported("verify")
    }

    fn capture(&mut self, _window: Option<&WindowTarget>) -> Result<Vec<u8>, ErrorInfo> {
        self.unsupported("screenshot")
    }
}

pub struct UiProvider {
    backend: Box<dyn UiBackend>,
    poll: Duration,
    /// Screenshots written to a file target obey the file-system allow-list.
    allowed: AllowList,
}

impl UiProvider {
    pub fn new(backend: Box<dyn UiBackend>) -> Self {
        Self {
            backend,
            poll: DEFAULT_POLL,
            allowed: AllowList::new(&[]),
        }
    }

    pub fn with_allow_list(mut self, allowed: AllowList) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn require_present(&mut self, target: &TargetSpec) -> Result<(), ErrorInfo> {
        if self.backend.locate(target)? {
            Ok(())
        } else {
            Err(not_found(target))
        }
    }

    fn wait_for(&mut self, target: &TargetSpec, timeout: Duration) -> Result<(), ErrorInfo> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.backend.locate(target)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorInfo::new(
                    ErrorKind::TimeoutExceeded,
                    format!("{} did not appear within {:?}", target, timeout),
                ));
            }
            std::thread::sleep(self.poll.min(deadline - now));
        }
    }

    fn check_state(
        &mut self,
        target: &TargetSpec,
        expected: Option<&str>,
    ) -> Result<(), ErrorInfo> {
        self.require_present(target)?;
        let Some(want) = expected else {
            return Ok(());
        };
        if self.backend.state_matches(target, want)? {
            Ok(())
        } else {
            Err(ErrorInfo::new(
                ErrorKind::Provider,
                format!("{} does not have state '{}'", target, want),
            ))
        }
    }

    fn screenshot(&mut self, target: &TargetSpec) -> Result<ProviderOutcome, ErrorInfo> {
        match target {
            TargetSpec::Window(w) => {
                let bytes = self.backend.capture(Some(w))?;
                Ok(ProviderOutcome::Success {
                    value: None,
                    artifacts: vec![Artifact {
                        kind: "screenshot".to_string(),
                        extension: "png".to_string(),
                        bytes,
                    }],
                })
            }
            TargetSpec::File(raw) => {
                let path = self.allowed.check(raw)?;
                let bytes = self.backend.capture(None)?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ErrorInfo::from_io(&format!("create {}", parent.display()), &e)
                    })?;
                }
                std::fs::write(&path, bytes)
                    .map_err(|e| ErrorInfo::from_io(&format!("write {}", path.display()), &e))?;
                Ok(ProviderOutcome::value(path.display().to_string()))
            }
            other => Err(unsupported(&ActionKind::Screenshot, other)),
        }
    }

    fn perform(&mut self, request: &ProviderRequest<'_>) -> Result<ProviderOutcome, ErrorInfo> {
        let text = request.text.unwrap_or_default();
        match (request.action, request.target) {
            (ActionKind::WaitFor, target) => {
                self.wait_for(target, request.timeout)?;
                Ok(ProviderOutcome::ok())
            }
            (ActionKind::Verify, target) => {
                self.check_state(target, request.text)?;
                Ok(ProviderOutcome::ok())
            }
            (ActionKind::Click, TargetSpec::Element(e)) => {
                self.backend.click(e)?;
                Ok(ProviderOutcome::ok())
            }
            (ActionKind::Type, target) => {
                self.backend.type_text(target, text)?;
                Ok(ProviderOutcome::ok())
            }
            (ActionKind::Hotkey, TargetSpec::Window(w)) => {
                self.backend.hotkey(w, text)?;
                Ok(ProviderOutcome::ok())
            }
            (ActionKind::ReadText, TargetSpec::Element(e)) => {
                Ok(ProviderOutcome::value(self.backend.read_text(e)?))
            }
            (ActionKind::Screenshot, target) => self.screenshot(target),
            (action, target) => Err(unsupported(action, target)),
        }
    }

    fn confirm(&mut self, request: &ProviderRequest<'_>) -> Result<(), ErrorInfo> {
        match (request.action, request.target) {
            (ActionKind::Type, target) => self.check_state(target, request.text),
            (ActionKind::Verify, target) => self.check_state(target, request.text),
            (ActionKind::Screenshot, TargetSpec::File(raw)) => {
                let path = self.allowed.check(raw)?;
                if path.is_file() {
                    Ok(())
                } else {
                    Err(ErrorInfo::new(
                        ErrorKind::FileNotFound,
                        format!("screenshot {} was not written", path.display()),
                    ))
                }
            }
            (_, target) => self.require_present(target),
        }
    }
}

fn not_found(target: &TargetSpec) -> ErrorInfo {
    let kind = match target {
        TargetSpec::Window(_) => ErrorKind::WindowNotFound,
        _ => ErrorKind::ElementNotFound,
    };
    ErrorInfo::new(kind, format!("{} not found", target))
}

fn unsupported(action: &ActionKind, target: &TargetSpec) -> ErrorInfo {
    ErrorInfo::new(
        ErrorKind::Unsupported,
        format!("ui provider cannot {} {}", action, target),
    )
}

impl Provider for UiProvider {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn invoke(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        self.perform(request).unwrap_or_else(ProviderOutcome::from)
    }

    fn verify(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        match self.confirm(request) {
            Ok(()) => ProviderOutcome::ok(),
            Err(e) => e.into(),
        }
    }

    fn capture_screen(&mut self) -> Option<Vec<u8>> {
        self.backend.capture(None).ok()
    }
}
