//! DP-022: OCR provider.
//!
//! `ocr_text` extracts text from an image file through an [`OcrBackend`].
//! The stock backend shells out to a tesseract-compatible command.

use crate::core::dispatcher::{Provider, ProviderOutcome, ProviderRequest};
use crate::core::error::{ErrorInfo, ErrorKind};
use crate::core::types::{ActionKind, TargetSpec};
use std::path::Path;
use std::process::Command;

/// Image-to-text engine.
pub trait OcrBackend {
    fn extract(&mut self, image: &Path) -> Result<String, ErrorInfo>;
}

/// Runs `<command> <image> stdout` and takes its standard output.
#[derive(Debug, Clone)]
pub struct CommandOcr {
    command: String,
}

impl CommandOcr {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl OcrBackend for CommandOcr {
    fn extract(&mut self, image: &Path) -> Result<String, ErrorInfo> {
        if !image.is_file() {
            return Err(ErrorInfo::new(
                ErrorKind::FileNotFound,
                format!("image {} does not exist", image.display()),
            ));
        }
        let output = Command::new(&self.command)
            .arg(image)
            .arg("stdout")
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ErrorInfo::new(
                    ErrorKind::Unsupported,
                    format!("OCR command '{}' is not installed", self.command),
                ),
                _ => ErrorInfo::new(
                    ErrorKind::Provider,
                    format!("failed to run {}: {}", self.command, e),
                ),
            })?;
        if !output.status.success() {
            return Err(ErrorInfo::new(
                ErrorKind::Provider,
                format!(
                    "{} exited with {}: {}",
                    self.command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub struct OcrProvider {
    backend: Box<dyn OcrBackend>,
}

impl OcrProvider {
    pub fn new(backend: Box<dyn OcrBackend>) -> Self {
        Self { backend }
    }
}

impl Provider for OcrProvider {
    fn name(&self) -> &str {
        "ocr"
    }

    fn invoke(&mut self, request: &ProviderRequest<'_>) -> ProviderOutcome {
        let image = match (request.action, request.target) {
            (ActionKind::OcrText, TargetSpec::File(path)) => Path::new(path),
            (action, target) => {
                return ProviderOutcome::fail(
                    ErrorKind::Unsupported,
                    format!("ocr provider cannot {} {}", action, target),
                )
            }
        };
        match self.backend.extract(image) {
            Ok(text) if text.trim().is_empty() => ProviderOutcome::fail(
                ErrorKind::OcrEmpty,
                format!("no text recognized in {}", image.display()),
            ),
            Ok(text) => ProviderOutcome::value(text.trim()),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::time::Duration;

    struct Fixed(Result<String, ErrorInfo>);

    impl OcrBackend for Fixed {
        fn extract(&mut self, _image: &Path) -> Result<String, ErrorInfo> {
            self.0.clone()
        }
    }

    fn ocr(provider: &mut OcrProvider, target: TargetSpec) -> ProviderOutcome {
        let bindings = IndexMap::new();
        let action = ActionKind::OcrText;
        provider.invoke(&ProviderRequest {
            action: &action,
            target: &target,
            text: None,
            timeout: Duration::from_secs(5),
            bindings: &bindings,
        })
    }

    #[test]
    fn test_dp022_text_trimmed() {
        let mut p = OcrProvider::new(Box::new(Fixed(Ok("  Total: 42\n".into()))));
        let out = ocr(&mut p, TargetSpec::File("shot.png".into()));
        assert_eq!(out, ProviderOutcome::value("Total: 42"));
    }

    #[test]
    fn test_dp022_empty_is_ocr_empty() {
        let mut p = OcrProvider::new(Box::new(Fixed(Ok(" \n".into()))));
        let out = ocr(&mut p, TargetSpec::File("shot.png".into()));
        assert!(matches!(out, ProviderOutcome::Failure { kind: ErrorKind::OcrEmpty, .. }));
    }

    #[test]
    fn test_dp022_backend_error_passed_through() {
        let err = ErrorInfo::new(ErrorKind::FileNotFound, "shot.png");
        let mut p = OcrProvider::new(Box::new(Fixed(Err(err.clone()))));
        let out = ocr(&mut p, TargetSpec::File("shot.png".into()));
        assert_eq!(out, ProviderOutcome::from(err));
    }

    #[test]
    fn test_dp022_command_missing_image() {
        let mut backend = CommandOcr::new("tesseract");
        let err = backend.extract(Path::new("/nonexistent/shot.png")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileNotFound);
    }

    #[test]
    fn test_dp022_command_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.png");
        std::fs::write(&image, b"\x89PNG").unwrap();
        let mut backend = CommandOcr::new("deskpilot-no-such-ocr");
        let err = backend.extract(&image).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn test_dp022_command_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.png");
        std::fs::write(&image, b"img").unwrap();
        // `echo <image> stdout` stands in for a real OCR engine
        let mut backend = CommandOcr::new("echo");
        let text = backend.extract(&image).unwrap();
        assert!(text.trim().ends_with("stdout"));
    }
}
