//! DP-020: File-system provider.
//!
//! Serves `file_read`, `file_write` and `file_copy`. Every path is made
//! absolute against the working directory, normalized lexically and checked
//! against the allow-list before any I/O happens.

use crate::core::dispatcher::{Provider, ProviderOutcome, ProviderRequest};
use crate::core::error::{ErrorInfo, ErrorKind};
use crate::core::types::{ActionKind, TargetSpec};
use crate::journal::hasher;
use std::path::{Component, Path, PathBuf};

/// Normalized roots every file path must fall under.
#[derive(Debug, Clone)]
pub struct AllowList {
    roots: Vec<PathBuf>,
    cwd: PathBuf,
}

impl AllowList {
    /// An empty list means the working directory plus the temp dir.
    pub fn new(allowed_paths: &[PathBuf]) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let roots: Vec<PathBuf> = if allowed_paths.is_empty() {
            vec![cwd.clone(), std::env::temp_dir()]
        } else {
            allowed_paths.to_vec()
        };
        let roots = roots
            .iter()
            .map(|p| normalize(&absolutize(&cwd, p)))
            .collect();
        Self { roots, cwd }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve a recipe path and enforce the allow-list.
    pub fn check(&self, raw: &str) -> Result<PathBuf, ErrorInfo> {
        let path = normalize(&absolutize(&self.cwd, Path::new(raw)));
        if self.roots.iter().any(|root| path.starts_with(root)) {
            Ok(path)
        } else {
            Err(ErrorInfo::new(
                ErrorKind::PermissionDenied,
                format!("{} is outside the allowed paths", path.display()),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSystemProvider {
    allowed: AllowList,
}

impl FileSystemProvider {
    pub fn new(allowed_paths: &[PathBuf]) -> Self {
        Self {
            allowed: AllowList::new(allowed_paths),
        }
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        self.allowed.roots()
    }

    pub fn check_path(&self, raw: &str) -> Result<PathBuf, ErrorInfo> {
        self.allowed.check(raw)
    }

    fn read(&self, raw: &str) -> Result<String, ErrorInfo> {
        let path = self.check_path(raw)?;
        std::fs::read_to_string(&path)
            .map_err(|e| ErrorInfo::from_io(&format!("read {}", path.display()), &e))
    }

    fn write(&self, raw: &str, content: &str) -> Result<String, ErrorInfo> {
        let path = self.check_path(raw)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ErrorInfo::from_io(&format!("create {}", parent.display()), &e))?;
        }
        std::fs::write(&path, content)
            .map_err(|e| ErrorInfo::from_io(&format!("write {}", path.display()), &e))?;
        Ok(path.display().to_string())
    }

    fn copy(&self, src: &str, dst: &str) -> Result<String, ErrorInfo> {
        let src = self.check_path(src)?;
        let dst = self.check_path(dst)?;
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ErrorInfo::from_io(&format!("create {}", parent.display()), &e))?;
        }
        std::fs::copy(&src, &dst).map_err(|e| {
            ErrorInfo::from_io(&format!("copy {} -> {}", src.display(), dst.display()), &e)
        })?;
        Ok(dst.display().to_string())
    }

    fn hash(&self, path: &Path) -> Result<String, ErrorInfo> {
        hasher::hash_file(path)
            .map_err(|e| ErrorInfo::from_io(&format!("hash {}", path.display()), &e))
    }

    fn check(&self, request: &ProviderRequest<'_>) -> Result<(), ErrorInfo> {
        match (request.action, request.target) {
            (ActionKind::FileRead, TargetSpec::File(p)) => {
                let path = self.check_path(p)?;
                if path.is_file() {
                    Ok(())
                } else {
                    Err(ErrorInfo::new(
                        ErrorKind::FileNotFound,
                        format!("{} does not exist", path.display()),
                    ))
                }
            }
            (ActionKind::FileWrite, TargetSpec::File(p)) => {
                let path = self.check_path(p)?;
                let expected = hasher::hash_string(request.text.unwrap_or_default());
                let actual = self.hash(&path)?;
                if actual == expected {
                    Ok(())
                } else {
                    Err(ErrorInfo::new(
                        ErrorKind::Io,
                        format!("{} content hash {} != {}", path.display(), actual, expected),
                    ))
                }
            }
            (ActionKind::FileCopy, TargetSpec::Files(paths)) if paths.len() == 2 => {
                let src = self.check_path(&paths[0])?;
                let dst = self.check_path(&paths[1])?;
                let (a, b) = (self.hash(&src)?, self.hash(&dst)?);
                if a == b {
                    Ok(())
                } else {
                    Err(ErrorInfo::new(
                        ErrorKind::Io,
                        format!("{} and {} differ", src.display(), dst.display()),
                    ))
                }
            }
            (action, target) => Err(unsupported(action, target)),
        }
    }
}

fn unsupported(action: &ActionKind, target: &TargetSpec) -> ErrorInfo {
    ErrorInfo::new(
        ErrorKind::Unsupported,
        format!("filesystem provider cannot {} {}", action, target),
    )
}

impl Provider for FileSystemProvider {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn invoke(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        let result = match (request.action, request.target) {
            (ActionKind::FileRead, TargetSpec::File(p)) => self.read(p),
            (ActionKind::FileWrite, TargetSpec::File(p)) => {
                self.write(p, request.text.unwrap_or_default())
            }
            (ActionKind::FileCopy, TargetSpec::Files(paths)) if paths.len() == 2 => {
                self.copy(&paths[0], &paths[1])
            }
            (action, target) => Err(unsupported(action, target)),
        };
        match result {
            Ok(value) => ProviderOutcome::value(value),
            Err(e) => e.into(),
        }
    }

    fn verify(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        match self.check(request) {
            Ok(()) => ProviderOutcome::ok(),
            Err(e) => e.into(),
        }
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Resolve `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
