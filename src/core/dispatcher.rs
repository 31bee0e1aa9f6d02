//! DP-008: Provider dispatch.
//!
//! Each action maps statically to one [`Capability`]; a registration table
//! holds one boxed [`Provider`] per capability. The dispatcher only routes:
//! provider failures are returned verbatim.

use super::error::{ErrorInfo, ErrorKind};
use super::types::{ActionKind, TargetSpec};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::time::Duration;

/// Provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Ui,
    Ocr,
    FileSystem,
    Process,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Ui,
        Capability::Ocr,
        Capability::FileSystem,
        Capability::Process,
    ];

    /// Static action→capability mapping. `None` for unrecognized actions.
    pub fn for_action(action: &ActionKind) -> Option<Self> {
        match action {
            ActionKind::Launch => Some(Self::Process),
            ActionKind::FileRead | ActionKind::FileWrite | ActionKind::FileCopy => {
                Some(Self::FileSystem)
            }
            ActionKind::OcrText => Some(Self::Ocr),
            ActionKind::WaitFor
            | ActionKind::Verify
            | ActionKind::Click
            | ActionKind::Type
            | ActionKind::Hotkey
            | ActionKind::ReadText
            | ActionKind::Screenshot => Some(Self::Ui),
            ActionKind::Unrecognized(_) => None,
        }
    }

    /// Actions served by this capability.
    pub fn actions(self) -> Vec<ActionKind> {
        ActionKind::ALL
            .iter()
            .filter(|a| Self::for_action(a) == Some(self))
            .cloned()
            .collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ui => write!(f, "ui"),
            Self::Ocr => write!(f, "ocr"),
            Self::FileSystem => write!(f, "filesystem"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Normalized, fully-resolved request handed to a provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub action: &'a ActionKind,
    pub target: &'a TargetSpec,
    pub text: Option<&'a str>,
    /// Upper bound for any waiting the provider does
    pub timeout: Duration,
    /// Read-only view of the run's bindings
    pub bindings: &'a IndexMap<String, String>,
}

/// Raw diagnostic bytes returned by a provider; stored by the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Success {
        value: Option<String>,
        artifacts: Vec<Artifact>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl ProviderOutcome {
    pub fn ok() -> Self {
        Self::Success {
            value: None,
            artifacts: vec![],
        }
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self::Success {
            value: Some(value.into()),
            artifacts: vec![],
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn into_result(self) -> Result<(Option<String>, Vec<Artifact>), ErrorInfo> {
        match self {
            Self::Success { value, artifacts } => Ok((value, artifacts)),
            Self::Failure { kind, message } => Err(ErrorInfo::new(kind, message)),
        }
    }
}

impl From<ErrorInfo> for ProviderOutcome {
    fn from(err: ErrorInfo) -> Self {
        Self::Failure {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// One family of actions.
pub trait Provider {
    fn name(&self) -> &str;

    /// Perform the primary action.
    fn invoke(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome;

    /// Confirm the effect of a successful `invoke` took hold.
    fn verify(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        ProviderOutcome::fail(
            ErrorKind::Unsupported,
            format!(
                "{} provider cannot verify '{}'",
                self.name(),
                request.action
            ),
        )
    }

    /// Screen image for failure diagnostics, if this provider can take one.
    fn capture_screen(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Registration table keyed by capability.
#[derive(Default)]
pub struct Dispatcher {
    providers: FxHashMap<Capability, Box<dyn Provider>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one for the capability.
    pub fn register(&mut self, capability: Capability, provider: Box<dyn Provider>) {
        self.providers.insert(capability, provider);
    }

    pub fn with(mut self, capability: Capability, provider: Box<dyn Provider>) -> Self {
        self.register(capability, provider);
        self
    }

    pub fn provider_name(&self, capability: Capability) -> Option<&str> {
        self.providers.get(&capability).map(|p| p.name())
    }

    fn route(&mut self, action: &ActionKind) -> Result<&mut Box<dyn Provider>, ProviderOutcome> {
        let capability = Capability::for_action(action).ok_or_else(|| {
            ProviderOutcome::fail(
                ErrorKind::Validation,
                format!("unrecognized action '{}'", action),
            )
        })?;
        self.providers.get_mut(&capability).ok_or_else(|| {
            ProviderOutcome::fail(
                ErrorKind::Unsupported,
                format!("no {} provider registered for '{}'", capability, action),
            )
        })
    }

    pub fn dispatch(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        match self.route(request.action) {
            Ok(provider) => provider.invoke(request),
            Err(outcome) => outcome,
        }
    }

    pub fn verify(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        match self.route(request.action) {
            Ok(provider) => provider.verify(request),
            Err(outcome) => outcome,
        }
    }

    /// Ask the UI provider for a screen capture.
    pub fn capture_screen(&mut self) -> Option<Vec<u8>> {
        self.providers
            .get_mut(&Capability::Ui)
            .and_then(|p| p.capture_screen())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .map(|(cap, p)| format!("{}={}", cap, p.name()))
            .collect();
        names.sort();
        f.debug_struct("Dispatcher").field("providers", &names).finish()
    }
}
