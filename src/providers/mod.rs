//! Capability providers — file system, process launch, OCR and UI automation.

pub mod fs;
pub mod ocr;
pub mod process;
pub mod ui;

use crate::core::config::EngineConfig;
use crate::core::dispatcher::{Capability, Dispatcher};

/// Dispatcher with the stock provider for every capability.
pub fn standard_dispatcher(config: &EngineConfig) -> Dispatcher {
    Dispatcher::new()
        .with(
            Capability::FileSystem,
            Box::new(fs::FileSystemProvider::new(&config.fs.allowed_paths)),
        )
        .with(Capability::Process, Box::new(process::ProcessProvider::new()))
        .with(
            Capability::Ocr,
            Box::new(ocr::OcrProvider::new(Box::new(ocr::CommandOcr::new(
                &config.ocr.command,
            )))),
        )
        .with(
            Capability::Ui,
            Box::new(
                ui::UiProvider::new(Box::new(ui::UnavailableBackend))
                    .with_allow_list(fs::AllowList::new(&config.fs.allowed_paths)),
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dp024_standard_dispatcher_covers_all_capabilities() {
        let d = standard_dispatcher(&EngineConfig::default());
        for cap in Capability::ALL {
            assert!(d.provider_name(cap).is_some(), "{}", cap);
        }
        assert_eq!(d.provider_name(Capability::Ui), Some("unavailable"));
        assert_eq!(d.provider_name(Capability::FileSystem), Some("filesystem"));
    }
}
