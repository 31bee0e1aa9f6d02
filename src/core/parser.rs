//! DP-002: Recipe parsing and validation.
//!
//! Parses recipe YAML and validates structural constraints before anything
//! runs. Validation never stops at the first defect: every violation is
//! collected so a recipe can be fixed in one pass.

use super::error::EngineError;
use super::retry::timeout_duration;
use super::types::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

/// Upper bound on steps per recipe.
pub const MAX_STEPS: usize = 100;

/// Timeouts above this many seconds draw a lint warning.
pub const LINT_TIMEOUT_SECS: f64 = 60.0;

/// Element selectors scoring below this draw a lint warning.
pub const WEAK_SELECTOR_SCORE: u32 = 5;

static NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").ok());

/// A single violation, addressed by field path (e.g. `steps[2].target`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of [`validate_recipe`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<FieldError>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn errors(&self) -> &[FieldError] {
        match self {
            Self::Valid => &[],
            Self::Invalid(errors) => errors,
        }
    }
}

/// Parse a recipe file from disk.
pub fn parse_recipe_file(path: &Path) -> Result<Recipe, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|source| EngineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_recipe(&content)
}

/// Parse a recipe from a YAML string.
pub fn parse_recipe(yaml: &str) -> Result<Recipe, EngineError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| EngineError::Parse(e.to_string()))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_recipe_name(name: &str) -> bool {
    match NAME_RE.as_ref() {
        Some(re) => re.is_match(name),
        None => false,
    }
}

/// Validate a parsed recipe, reporting every violation.
pub fn validate_recipe(recipe: &Recipe) -> ValidationResult {
    let mut errors = Vec::new();

    if recipe.name.is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    } else if !is_valid_recipe_name(&recipe.name) {
        errors.push(FieldError::new(
            "name",
            format!(
                "'{}' must start with a letter and contain only letters, digits, '_' or '-'",
                recipe.name
            ),
        ));
    }

    if recipe.version.trim().is_empty() {
        errors.push(FieldError::new("version", "must not be empty"));
    }

    if recipe.steps.len() > MAX_STEPS {
        errors.push(FieldError::new(
            "steps",
            format!(
                "{} steps exceeds the maximum of {}",
                recipe.steps.len(),
                MAX_STEPS
            ),
        ));
    }

    for key in recipe.variables.keys() {
        if !is_identifier(key) {
            errors.push(FieldError::new(
                format!("variables.{}", key),
                "variable name must be an identifier",
            ));
        }
    }

    for (i, step) in recipe.steps.iter().enumerate() {
        validate_step(i, step, &mut errors);
    }

    if errors.is_empty() {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(errors)
    }
}

fn validate_step(i: usize, step: &Step, errors: &mut Vec<FieldError>) {
    let at = |field: &str| format!("steps[{}].{}", i, field);

    if step.name.trim().is_empty() {
        errors.push(FieldError::new(at("name"), "must not be empty"));
    }

    if !step.action.is_recognized() {
        errors.push(FieldError::new(
            at("action"),
            format!(
                "unknown action '{}' (expected one of: {})",
                step.action,
                ActionKind::ALL
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    } else if !step.target.is_malformed() && !step.action.accepts(&step.target) {
        errors.push(FieldError::new(
            at("target"),
            format!(
                "action '{}' requires a {} target, got {}",
                step.action,
                step.action.accepted_targets().join(" or "),
                step.target.variant_name()
            ),
        ));
    }

    validate_target_shape(&at("target"), &step.target, errors);

    if step.action.requires_text() && step.text.as_deref().is_none_or(str::is_empty) {
        errors.push(FieldError::new(
            at("text"),
            format!("action '{}' requires text", step.action),
        ));
    }

    if step.retry_attempts < 0 {
        errors.push(FieldError::new(
            at("retry_attempts"),
            format!("must be >= 0, got {}", step.retry_attempts),
        ));
    }

    if let Some(timeout) = step.timeout {
        if timeout_duration(timeout).is_none() {
            errors.push(FieldError::new(
                at("timeout"),
                format!(
                    "must be a positive, representable number of seconds, got {}",
                    timeout
                ),
            ));
        }
    }

    if let Some(ref backoff) = step.retry_backoff {
        validate_backoff(&at("retry_backoff"), backoff, errors);
    }

    if let Some(ref name) = step.save_as {
        if !is_identifier(name) {
            errors.push(FieldError::new(
                at("save_as"),
                format!("'{}' is not a valid variable name", name),
            ));
        }
    }

    for key in step.variables.keys() {
        if !is_identifier(key) {
            errors.push(FieldError::new(
                format!("steps[{}].variables.{}", i, key),
                "variable name must be an identifier",
            ));
        }
    }
}

fn validate_target_shape(field: &str, target: &TargetSpec, errors: &mut Vec<FieldError>) {
    match target {
        TargetSpec::Window(w) => {
            if !w.has_selectors() {
                errors.push(FieldError::new(
                    field,
                    "window target needs title, class_name or process_id",
                ));
            }
        }
        TargetSpec::Element(e) => {
            if !e.has_selectors() {
                errors.push(FieldError::new(
                    field,
                    "element target needs automation_id, control_type, name or class_name",
                ));
            }
            if let Some(ref w) = e.window {
                if !w.has_selectors() {
                    errors.push(FieldError::new(
                        format!("{}.window", field),
                        "window scope needs title, class_name or process_id",
                    ));
                }
            }
        }
        TargetSpec::File(path) => {
            if path.trim().is_empty() {
                errors.push(FieldError::new(field, "file path must not be empty"));
            }
        }
        TargetSpec::Files(paths) => {
            if paths.len() != 2 {
                errors.push(FieldError::new(
                    field,
                    format!(
                        "files target needs exactly two paths (source, destination), got {}",
                        paths.len()
                    ),
                ));
            }
            if paths.iter().any(|p| p.trim().is_empty()) {
                errors.push(FieldError::new(field, "file paths must not be empty"));
            }
        }
        TargetSpec::App(app) => {
            if app.executable.trim().is_empty() {
                errors.push(FieldError::new(field, "app executable must not be empty"));
            }
        }
        TargetSpec::Malformed(reason) => errors.push(FieldError::new(field, reason.clone())),
    }
}

fn validate_backoff(field: &str, backoff: &Backoff, errors: &mut Vec<FieldError>) {
    if !backoff.base_secs.is_finite() || backoff.base_secs < 0.0 {
        errors.push(FieldError::new(
            format!("{}.base_secs", field),
            format!("must be >= 0, got {}", backoff.base_secs),
        ));
    }
    if !backoff.factor.is_finite() || backoff.factor < 1.0 {
        errors.push(FieldError::new(
            format!("{}.factor", field),
            format!("must be >= 1, got {}", backoff.factor),
        ));
    }
    if !backoff.cap_secs.is_finite() || backoff.cap_secs < backoff.base_secs {
        errors.push(FieldError::new(
            format!("{}.cap_secs", field),
            format!(
                "must be >= base_secs ({}), got {}",
                backoff.base_secs, backoff.cap_secs
            ),
        ));
    }
}

/// Non-blocking advice about fragile recipes.
pub fn lint_recipe(recipe: &Recipe) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (i, step) in recipe.steps.iter().enumerate() {
        if !seen.insert(step.name.as_str()) {
            warnings.push(format!(
                "steps[{}]: duplicate step name '{}'",
                i, step.name
            ));
        }

        if let Some(timeout) = step.timeout {
            if timeout > LINT_TIMEOUT_SECS {
                warnings.push(format!(
                    "steps[{}] '{}': timeout {}s is unusually long",
                    i, step.name, timeout
                ));
            }
        }

        if let TargetSpec::Element(ref e) = step.target {
            let score = e.entropy_score();
            if score < WEAK_SELECTOR_SCORE {
                warnings.push(format!(
                    "steps[{}] '{}': weak element selector (score {}); prefer automation_id or control_type",
                    i, step.name, score
                ));
            }
        }

        if matches!(step.action, ActionKind::Click | ActionKind::Type) && !step.verify_after {
            warnings.push(format!(
                "steps[{}] '{}': {} without verify_after",
                i, step.name, step.action
            ));
        }
    }

    warnings
}
