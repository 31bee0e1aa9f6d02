//! DP-001: Recipe document types, step results and log events.
//!
//! Defines the YAML schema for recipes (steps, actions, targets, backoff) and
//! the records the engine produces (step results, JSONL log events). Document
//! types derive Serialize/Deserialize/JsonSchema for YAML roundtripping and
//! schema export.

use super::error::ErrorInfo;
use super::parser::FieldError;
use super::retry::GiveUpReason;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Recipe document
// ============================================================================

/// A declarative automation recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Recipe {
    /// Recipe name (letters, digits, `_`, `-`; starts with a letter)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Recipe version
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Recipe-level variables (scalars are normalized to strings)
    #[serde(default, deserialize_with = "de_string_map")]
    pub variables: IndexMap<String, String>,

    /// Steps, executed in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// One automation instruction with its own retry, timeout and verification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    pub name: String,

    pub action: ActionKind,

    pub target: TargetSpec,

    /// Text to type, hotkey chord, file content, or expected element state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Timeout in seconds (engine default when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// Retries after the first attempt
    #[serde(default)]
    pub retry_attempts: i64,

    /// Backoff between attempts (engine default when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<Backoff>,

    #[serde(default)]
    pub verify_after: bool,

    #[serde(default)]
    pub continue_on_failure: bool,

    /// Step-local variables; shadow everything else during resolution
    #[serde(
        default,
        deserialize_with = "de_string_map",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub variables: IndexMap<String, String>,

    /// Variable that receives the step's output value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

/// Exponential backoff between attempts: `base * factor^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Backoff {
    #[serde(default = "default_base_secs")]
    pub base_secs: f64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_cap_secs")]
    pub cap_secs: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            factor: default_factor(),
            cap_secs: default_cap_secs(),
        }
    }
}

fn default_base_secs() -> f64 {
    1.0
}

fn default_factor() -> f64 {
    2.0
}

fn default_cap_secs() -> f64 {
    30.0
}

// ============================================================================
// Actions
// ============================================================================

/// The closed set of actions a step can perform.
///
/// Unknown names deserialize into `Unrecognized` so validation can report
/// them together with every other defect instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Launch,
    WaitFor,
    Verify,
    Click,
    Type,
    Hotkey,
    ReadText,
    FileRead,
    FileWrite,
    FileCopy,
    Screenshot,
    OcrText,
    Unrecognized(String),
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        ActionKind::Launch,
        ActionKind::WaitFor,
        ActionKind::Verify,
        ActionKind::Click,
        ActionKind::Type,
        ActionKind::Hotkey,
        ActionKind::ReadText,
        ActionKind::FileRead,
        ActionKind::FileWrite,
        ActionKind::FileCopy,
        ActionKind::Screenshot,
        ActionKind::OcrText,
    ];

    /// Parse an action name; never fails.
    pub fn parse(name: &str) -> Self {
        Self::ALL
            .iter()
            .find(|a| a.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Self::Unrecognized(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Launch => "launch",
            Self::WaitFor => "wait_for",
            Self::Verify => "verify",
            Self::Click => "click",
            Self::Type => "type",
            Self::Hotkey => "hotkey",
            Self::ReadText => "read_text",
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::FileCopy => "file_copy",
            Self::Screenshot => "screenshot",
            Self::OcrText => "ocr_text",
            Self::Unrecognized(name) => name,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// Target variants this action accepts.
    pub fn accepted_targets(&self) -> &'static [&'static str] {
        match self {
            Self::Launch => &["app"],
            Self::WaitFor => &["window", "element"],
            Self::Verify => &["element", "window"],
            Self::Click => &["element"],
            Self::Type => &["element", "window"],
            Self::Hotkey => &["window"],
            Self::ReadText => &["element"],
            Self::FileRead => &["file"],
            Self::FileWrite => &["file"],
            Self::FileCopy => &["files"],
            Self::Screenshot => &["window", "file"],
            Self::OcrText => &["file"],
            Self::Unrecognized(_) => &[],
        }
    }

    pub fn accepts(&self, target: &TargetSpec) -> bool {
        self.accepted_targets().contains(&target.variant_name())
    }

    /// Whether the step must carry `text`.
    pub fn requires_text(&self) -> bool {
        matches!(self, Self::Type | Self::Hotkey | Self::FileWrite)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

impl JsonSchema for ActionKind {
    fn schema_name() -> String {
        "ActionKind".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        schemars::schema::SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::String.into()),
            enum_values: Some(
                Self::ALL
                    .iter()
                    .map(|a| serde_json::Value::String(a.as_str().to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
        .into()
    }
}

// ============================================================================
// Targets
// ============================================================================

/// Top-level window selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WindowTarget {
    /// Window title (or part of it)
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl WindowTarget {
    pub fn has_selectors(&self) -> bool {
        self.title.is_some() || self.class_name.is_some() || self.process_id.is_some()
    }
}

/// UI element selector within a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ElementTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Which match to use when several elements qualify
    #[serde(default)]
    pub index: u32,
    /// Window scope for the search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowTarget>,
}

impl ElementTarget {
    pub fn has_selectors(&self) -> bool {
        self.automation_id.is_some()
            || self.control_type.is_some()
            || self.name.is_some()
            || self.class_name.is_some()
    }

    /// Selector specificity — higher is more stable across UI changes.
    pub fn entropy_score(&self) -> u32 {
        let mut score = 0;
        if self.automation_id.is_some() {
            score += 10;
        }
        if self.control_type.is_some() {
            score += 5;
        }
        if self.class_name.is_some() {
            score += 3;
        }
        if self.name.is_some() {
            score += 2;
        }
        score
    }
}

/// Executable plus arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AppTarget {
    pub executable: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// What a step acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Window(WindowTarget),
    Element(ElementTarget),
    File(String),
    /// Source and destination for copies
    Files(Vec<String>),
    App(AppTarget),
    /// A document target naming no kind or several; the validator reports the reason.
    Malformed(String),
}

impl TargetSpec {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Window(_) => "window",
            Self::Element(_) => "element",
            Self::File(_) => "file",
            Self::Files(_) => "files",
            Self::App(_) => "app",
            Self::Malformed(_) => "malformed",
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window(w) => write!(f, "window {}", describe_window(w)),
            Self::Element(e) => {
                let mut parts = Vec::new();
                if let Some(ref id) = e.automation_id {
                    parts.push(format!("automation_id={}", id));
                }
                if let Some(ref ct) = e.control_type {
                    parts.push(format!("control_type={}", ct));
                }
                if let Some(ref name) = e.name {
                    parts.push(format!("name={}", name));
                }
                if let Some(ref cls) = e.class_name {
                    parts.push(format!("class_name={}", cls));
                }
                if e.index > 0 {
                    parts.push(format!("index={}", e.index));
                }
                write!(f, "element [{}]", parts.join(", "))?;
                if let Some(ref w) = e.window {
                    write!(f, " in window {}", describe_window(w))?;
                }
                Ok(())
            }
            Self::File(path) => write!(f, "file {}", path),
            Self::Files(paths) => write!(f, "files {}", paths.join(" -> ")),
            Self::App(app) => {
                write!(f, "app {}", app.executable)?;
                if !app.args.is_empty() {
                    write!(f, " {}", app.args.join(" "))?;
                }
                Ok(())
            }
            Self::Malformed(reason) => write!(f, "malformed target ({})", reason),
        }
    }
}

fn describe_window(w: &WindowTarget) -> String {
    if let Some(ref title) = w.title {
        format!("'{}'", title)
    } else if let Some(ref cls) = w.class_name {
        format!("class={}", cls)
    } else if let Some(pid) = w.process_id {
        format!("pid={}", pid)
    } else {
        "<any>".to_string()
    }
}

/// Document form of a target: exactly one of the keys is set.
///
/// `element` may be accompanied by a sibling `window`, which scopes the
/// element search.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    window: Option<WindowTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element: Option<ElementTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app: Option<RawApp>,
}

/// `app: notepad.exe` shorthand or the full form.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
enum RawApp {
    Executable(String),
    Full(AppTarget),
}

impl TryFrom<RawTarget> for TargetSpec {
    type Error = String;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        let mut found = Vec::new();
        if let Some(mut element) = raw.element {
            if element.window.is_none() {
                element.window = raw.window;
            } else if raw.window.is_some() {
                return Err("element target has both an inline and a sibling window".to_string());
            }
            found.push(TargetSpec::Element(element));
        } else if let Some(window) = raw.window {
            found.push(TargetSpec::Window(window));
        }
        if let Some(path) = raw.file {
            found.push(TargetSpec::File(path));
        }
        if let Some(paths) = raw.files {
            found.push(TargetSpec::Files(paths));
        }
        if let Some(app) = raw.app {
            found.push(TargetSpec::App(match app {
                RawApp::Executable(executable) => AppTarget {
                    executable,
                    args: vec![],
                },
                RawApp::Full(full) => full,
            }));
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("target needs one of: window, element, file, files, app".to_string()),
            _ => Err(format!(
                "target has several kinds ({}); use exactly one",
                found
                    .iter()
                    .map(|t| t.variant_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

impl From<&TargetSpec> for RawTarget {
    fn from(target: &TargetSpec) -> Self {
        let mut raw = RawTarget::default();
        match target {
            TargetSpec::Window(w) => raw.window = Some(w.clone()),
            TargetSpec::Element(e) => raw.element = Some(e.clone()),
            TargetSpec::File(p) => raw.file = Some(p.clone()),
            TargetSpec::Files(ps) => raw.files = Some(ps.clone()),
            TargetSpec::App(a) => raw.app = Some(RawApp::Full(a.clone())),
            TargetSpec::Malformed(_) => {}
        }
        raw
    }
}

impl Serialize for TargetSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawTarget::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TargetSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawTarget::deserialize(deserializer)?;
        Ok(TargetSpec::try_from(raw).unwrap_or_else(TargetSpec::Malformed))
    }
}

impl JsonSchema for TargetSpec {
    fn schema_name() -> String {
        "TargetSpec".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        RawTarget::json_schema(gen)
    }
}

// ============================================================================
// Run and step state
// ============================================================================

/// Engine-level run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Loaded,
    Validating,
    Executing,
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded => write!(f, "LOADED"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Lifecycle phase of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepPhase {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl StepPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Terminal outcome of one step in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub index: usize,
    pub name: String,
    pub action: ActionKind,
    pub phase: StepPhase,
    pub attempt_count: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub artifact_refs: Vec<PathBuf>,
}

impl StepResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Stable step identifier: `step-001` for the first step.
pub fn step_id(index: usize) -> String {
    format!("step-{:03}", index + 1)
}

// ============================================================================
// Log events
// ============================================================================

/// Identity of the step an event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRef {
    pub id: String,
    pub index: usize,
    pub name: String,
    pub action: ActionKind,
    /// Human-readable target description
    pub target: String,
}

impl StepRef {
    pub fn new(index: usize, step: &Step) -> Self {
        Self {
            id: step_id(index),
            index,
            name: step.name.clone(),
            action: step.action.clone(),
            target: step.target.to_string(),
        }
    }
}

/// A captured diagnostic file referenced from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: String,
    pub path: PathBuf,
    /// `blake3:{hex}` of the stored bytes
    pub hash: String,
}

/// Event body for the JSONL execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunState {
        recipe: String,
        state: RunState,
    },
    ValidationFailed {
        recipe: String,
        errors: Vec<FieldError>,
    },
    /// Step lifecycle transition (RUNNING or a terminal phase).
    Step {
        step: StepRef,
        phase: StepPhase,
        attempts: u32,
        duration_ms: u64,
        #[serde(default)]
        error: Option<ErrorInfo>,
        #[serde(default)]
        artifacts: Vec<ArtifactRef>,
    },
    /// One attempt of a step's primary action.
    Attempt {
        step: StepRef,
        attempt: u32,
        max_attempts: u32,
        success: bool,
        duration_ms: u64,
        #[serde(default)]
        error: Option<ErrorInfo>,
        #[serde(default)]
        retry_in_ms: Option<u64>,
        #[serde(default)]
        give_up: Option<GiveUpReason>,
    },
    /// Post-action verification check.
    Verification {
        step: StepRef,
        passed: bool,
        #[serde(default)]
        error: Option<ErrorInfo>,
    },
    RunFinished {
        recipe: String,
        state: RunState,
        exit_code: i32,
        succeeded: u32,
        failed: u32,
        skipped: u32,
        duration_ms: u64,
        #[serde(default)]
        first_failure: Option<String>,
    },
}

/// Sequenced, timestamped event wrapper — one JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub run_id: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a YAML scalar to the string used for variable bindings.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

fn de_string_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, serde_yaml_ng::Value> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .iter()
        .map(|(k, v)| (k.clone(), yaml_value_to_string(v)))
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dp001_recipe_parse() {
        let yaml = r#"
name: notepad-demo
description: Type into notepad
variables:
  app_name: notepad.exe
  retries: 3
  debug: true
steps:
  - name: Launch Notepad
    action: launch
    target:
      app: "${app_name}"
    retry_attempts: 2
    timeout: 15
  - name: Type greeting
    action: type
    target:
      element:
        control_type: Edit
      window:
        title: Untitled - Notepad
    text: hello
    verify_after: true
"#;
        let recipe: Recipe = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(recipe.name, "notepad-demo");
        assert_eq!(recipe.version, "1.0");
        assert_eq!(recipe.variables["retries"], "3");
        assert_eq!(recipe.variables["debug"], "true");
        assert_eq!(recipe.steps.len(), 2);
        assert_eq!(recipe.steps[0].action, ActionKind::Launch);
        assert_eq!(
            recipe.steps[0].target,
            TargetSpec::App(AppTarget {
                executable: "${app_name}".to_string(),
                args: vec![],
            })
        );
        match &recipe.steps[1].target {
            TargetSpec::Element(e) => {
                assert_eq!(e.control_type.as_deref(), Some("Edit"));
                assert_eq!(
                    e.window.as_ref().and_then(|w| w.title.as_deref()),
                    Some("Untitled - Notepad")
                );
            }
            other => panic!("expected element target, got {:?}", other),
        }
    }

    #[test]
    fn test_dp001_step_defaults() {
        let yaml = r#"
name: s
action: file_read
target:
  file: /tmp/x.txt
"#;
        let step: Step = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.retry_attempts, 0);
        assert!(step.timeout.is_none());
        assert!(!step.verify_after);
        assert!(!step.continue_on_failure);
        assert!(step.retry_backoff.is_none());
        assert!(step.variables.is_empty());
    }

    #[test]
    fn test_dp001_unrecognized_action_parses() {
        let yaml = r#"
name: s
action: teleport
target:
  file: a
"#;
        let step: Step = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.action, ActionKind::Unrecognized("teleport".to_string()));
        assert!(!step.action.is_recognized());
    }

    #[test]
    fn test_dp001_action_roundtrip_names() {
        for action in ActionKind::ALL.iter() {
            assert_eq!(&ActionKind::parse(action.as_str()), action);
        }
        assert_eq!(ActionKind::WaitFor.to_string(), "wait_for");
    }

    #[test]
    fn test_dp001_target_exactly_one() {
        match serde_yaml_ng::from_str::<TargetSpec>("file: a\napp: b\n").unwrap() {
            TargetSpec::Malformed(reason) => assert!(reason.contains("exactly one"), "{}", reason),
            other => panic!("expected malformed target, got {:?}", other),
        }
        match serde_yaml_ng::from_str::<TargetSpec>("{}").unwrap() {
            TargetSpec::Malformed(reason) => assert!(reason.contains("needs one of"), "{}", reason),
            other => panic!("expected malformed target, got {:?}", other),
        }
        let t: TargetSpec = serde_yaml_ng::from_str("{}").unwrap();
        assert!(t.is_malformed());
        assert!(!ActionKind::FileRead.accepts(&t));
    }

    #[test]
    fn test_dp001_target_unknown_key_still_rejected() {
        assert!(serde_yaml_ng::from_str::<TargetSpec>("path: a\n").is_err());
    }

    #[test]
    fn test_dp001_target_app_full_form() {
        let t: TargetSpec =
            serde_yaml_ng::from_str("app:\n  executable: calc.exe\n  args: [\"/s\"]\n").unwrap();
        assert_eq!(t.to_string(), "app calc.exe /s");
    }

    #[test]
    fn test_dp001_target_files() {
        let t: TargetSpec = serde_yaml_ng::from_str("files: [a.txt, b.txt]\n").unwrap();
        assert_eq!(t, TargetSpec::Files(vec!["a.txt".into(), "b.txt".into()]));
        assert_eq!(t.to_string(), "files a.txt -> b.txt");
    }

    #[test]
    fn test_dp001_window_name_alias() {
        let t: TargetSpec = serde_yaml_ng::from_str("window:\n  name: Calculator\n").unwrap();
        assert_eq!(t.to_string(), "window 'Calculator'");
    }

    #[test]
    fn test_dp001_target_serialize_roundtrip() {
        let t = TargetSpec::Element(ElementTarget {
            automation_id: Some("15".into()),
            ..Default::default()
        });
        let yaml = serde_yaml_ng::to_string(&t).unwrap();
        let back: TargetSpec = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_dp001_accepts() {
        let element = TargetSpec::Element(ElementTarget::default());
        let file = TargetSpec::File("x".into());
        assert!(ActionKind::Click.accepts(&element));
        assert!(!ActionKind::Click.accepts(&file));
        assert!(ActionKind::FileRead.accepts(&file));
        assert!(!ActionKind::Unrecognized("x".into()).accepts(&file));
        assert!(ActionKind::Type.requires_text());
        assert!(!ActionKind::Click.requires_text());
    }

    #[test]
    fn test_dp001_entropy_score() {
        let strong = ElementTarget {
            automation_id: Some("id".into()),
            ..Default::default()
        };
        assert_eq!(strong.entropy_score(), 10);
        let medium = ElementTarget {
            control_type: Some("Button".into()),
            name: Some("Submit".into()),
            class_name: Some("btn".into()),
            ..Default::default()
        };
        assert_eq!(medium.entropy_score(), 10);
        assert_eq!(ElementTarget::default().entropy_score(), 0);
        assert!(!ElementTarget::default().has_selectors());
    }

    #[test]
    fn test_dp001_phase_display() {
        assert_eq!(StepPhase::Skipped.to_string(), "SKIPPED");
        assert_eq!(RunState::Aborted.to_string(), "ABORTED");
        assert!(StepPhase::Failure.is_terminal());
        assert!(!StepPhase::Running.is_terminal());
    }

    #[test]
    fn test_dp001_step_id() {
        assert_eq!(step_id(0), "step-001");
        assert_eq!(step_id(41), "step-042");
    }

    #[test]
    fn test_dp001_log_event_serde() {
        let event = LogEvent {
            seq: 1,
            ts: Utc::now(),
            run_id: "r-abc".to_string(),
            event: RunEvent::RunState {
                recipe: "demo".to_string(),
                state: RunState::Loaded,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"run_state\""));
        assert!(json.contains("\"state\":\"LOADED\""));
        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_dp001_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
    }
}
