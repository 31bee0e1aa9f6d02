//! DP-006: Engine configuration (`deskpilot.toml`).
//!
//! Every section is optional; missing keys take the defaults below.

use super::error::EngineError;
use super::retry::timeout_duration;
use super::types::Backoff;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "deskpilot.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub log: LogConfig,
    pub defaults: DefaultsConfig,
    pub retry: Backoff,
    pub fs: FsConfig,
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Root for per-run event logs
    pub dir: PathBuf,
    /// Root for per-run captured artifacts
    pub artifacts_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts/logs"),
            artifacts_dir: PathBuf::from("artifacts/screens"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Step timeout when a step does not declare one
    pub timeout_secs: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self { timeout_secs: 30.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Roots file actions may touch; empty means working dir + temp dir
    pub allowed_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub command: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
        }
    }
}

/// Parse config TOML; `origin` is only used in error messages.
pub fn parse_config(toml_str: &str, origin: &Path) -> Result<EngineConfig, EngineError> {
    let config: EngineConfig = toml::from_str(toml_str).map_err(|e| EngineError::Config {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;
    if timeout_duration(config.defaults.timeout_secs).is_none() {
        return Err(EngineError::Config {
            path: origin.to_path_buf(),
            message: format!(
                "defaults.timeout_secs must be a positive, representable number of seconds, got {}",
                config.defaults.timeout_secs
            ),
        });
    }
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<EngineConfig, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|source| EngineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, path)
}

/// Explicit path if given, else `./deskpilot.toml` if present, else defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<EngineConfig, EngineError> {
    match path {
        Some(p) => load_config(p),
        None => {
            let local = Path::new(DEFAULT_CONFIG_FILE);
            if local.exists() {
                load_config(local)
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}
