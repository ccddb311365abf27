use tracing::info;

use crate::config::{Configuration, Mode, Settings, SettingsDelta};
use crate::error::{BridgeError, Result};
use crate::install::{self, ModelFamily, Resolution};

/// Outcome of the one-time mode decision
#[derive(Debug, Clone, PartialEq)]
pub struct Initialization {
    pub configuration: Configuration,
    /// Present in managed mode only
    pub resolution: Option<Resolution>,
    /// Settings the caller should persist
    pub delta: SettingsDelta,
}

impl Initialization {
    pub fn mode(&self) -> Mode {
        self.configuration.mode
    }
}

/// Decide between a managed and an external server.
///
/// A configured install path selects managed mode and resolves the
/// installation, which may flip the model family once. Without one the user
/// is expected to run Sugoi themselves: the well-known port is used and every
/// request carries a single sentence.
pub fn initialize(settings: &Settings) -> Result<Initialization> {
    check_language_pair(settings)?;

    match settings.install_root() {
        Some(install_root) => {
            info!("Using Sugoi installation at {}", install_root.display());

            let requested = ModelFamily::from_accelerated(settings.enable_ctranslate2);
            let resolution = install::resolve(&install_root, requested)?;
            let configuration = Configuration::managed(settings, resolution.family.is_accelerated());

            info!(
                "Managed mode: {} model, port {}, max batch size {}",
                resolution.family, configuration.server_port, configuration.max_batch_size
            );

            Ok(Initialization {
                configuration,
                delta: resolution.settings_delta(),
                resolution: Some(resolution),
            })
        }
        None => {
            info!("Sugoi install path not configured. Either configure a path or start Sugoi externally.");

            Ok(Initialization {
                configuration: Configuration::external(settings),
                resolution: None,
                delta: SettingsDelta::default(),
            })
        }
    }
}

fn check_language_pair(settings: &Settings) -> Result<()> {
    if settings.source_language != "ja" {
        return Err(BridgeError::Configuration(format!(
            "Only ja is supported as source language, got {}",
            settings.source_language
        )));
    }
    if settings.destination_language != "en" {
        return Err(BridgeError::Configuration(format!(
            "Only en is supported as destination language, got {}",
            settings.destination_language
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXTERNAL_SERVER_PORT;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use tracing_test::traced_test;

    const WORKDIR: &str = "backendServer/Modules/Translation-API-Server/Offline/Sugoi_Model";

    fn touch(dir: &TempDir, relative: &str) {
        if let Some(parent) = std::path::Path::new(relative).parent() {
            dir.child(parent).create_dir_all().unwrap();
        }
        dir.child(relative).touch().unwrap();
    }

    fn fairseq_only_install() -> TempDir {
        let dir = TempDir::new().unwrap();
        touch(&dir, "Power-Source/Python38/python.exe");
        touch(&dir, &format!("{}/fairseq/japaneseModel/big.pretrain.pt", WORKDIR));
        touch(&dir, &format!("{}/fairseq/spmModels/spm.ja.nopretok.model", WORKDIR));
        dir
    }

    #[test]
    fn test_external_mode_without_install_path() {
        let mut settings = Settings::default();
        settings.max_batch_size = 40;

        let init = initialize(&settings).unwrap();
        assert_eq!(init.mode(), Mode::External);
        assert_eq!(init.configuration.max_batch_size, 1);
        assert_eq!(init.configuration.server_port, EXTERNAL_SERVER_PORT);
        assert!(init.resolution.is_none());
        assert!(init.delta.is_empty());
    }

    #[test]
    fn test_managed_mode_with_install_path() {
        let dir = fairseq_only_install();
        let mut settings = Settings::default();
        settings.install_path = dir.path().to_string_lossy().to_string();

        let init = initialize(&settings).unwrap();
        assert_eq!(init.mode(), Mode::Managed);
        assert_eq!(init.configuration.max_batch_size, 10);
        assert!(!init.configuration.use_accelerated_model);
        assert!(init.delta.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_ctranslate2_requested_but_only_fairseq_installed() {
        let dir = fairseq_only_install();
        let mut settings = Settings::default();
        settings.install_path = dir.path().to_string_lossy().to_string();
        settings.enable_ctranslate2 = true;

        let init = initialize(&settings).unwrap();
        assert!(!init.configuration.use_accelerated_model);
        assert_eq!(init.delta.enable_ctranslate2, Some(false));
        assert!(logs_contain("Falling back to the Fairseq model"));

        settings.apply(&init.delta);
        assert!(!settings.enable_ctranslate2);
    }

    #[test]
    fn test_unsupported_language_pair() {
        let mut settings = Settings::default();
        settings.destination_language = "fr".to_string();

        let err = initialize(&settings).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("destination language"));
    }
}
