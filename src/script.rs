use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// Server script shipped with the bridge
pub const BUNDLED_SERVER_SCRIPT: &str = include_str!("../assets/SugoiOfflineTranslatorServer.py");

pub const BUNDLED_SCRIPT_FILE_NAME: &str = "SugoiOfflineTranslatorServer.py";

/// Pick the server script to launch.
///
/// A custom script is used as-is. Otherwise the bundled script is written into
/// `target_dir` (the system temp directory in production) and that copy is used.
pub async fn materialize_server_script(custom: Option<&Path>, target_dir: &Path) -> Result<PathBuf> {
    if let Some(custom) = custom {
        if !custom.is_file() {
            return Err(BridgeError::Configuration(format!(
                "Custom server script not found: {}. Fix or clear custom_server_script_path.",
                custom.display()
            )));
        }
        info!("Using custom server script: {}", custom.display());
        return Ok(custom.to_path_buf());
    }

    let script_path = target_dir.join(BUNDLED_SCRIPT_FILE_NAME);
    let written = async {
        fs::create_dir_all(target_dir).await?;
        fs::write(&script_path, BUNDLED_SERVER_SCRIPT).await
    }
    .await;

    written.map_err(|e| {
        BridgeError::Configuration(format!(
            "Failed to write the server script to {}: {}",
            script_path.display(),
            e
        ))
    })?;

    debug!("Wrote bundled server script to {}", script_path.display());
    Ok(script_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bundled_script_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = materialize_server_script(None, dir.path()).await.unwrap();

        assert_eq!(path, dir.path().join(BUNDLED_SCRIPT_FILE_NAME));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, BUNDLED_SERVER_SCRIPT);
        assert!(written.contains("translate batch"));
    }

    #[tokio::test]
    async fn test_custom_script_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("my_server.py");
        std::fs::write(&custom, "print('hi')").unwrap();

        let path = materialize_server_script(Some(&custom), dir.path()).await.unwrap();
        assert_eq!(path, custom);
        assert!(!dir.path().join(BUNDLED_SCRIPT_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_missing_custom_script() {
        let dir = tempfile::tempdir().unwrap();
        let err = materialize_server_script(Some(&dir.path().join("nope.py")), dir.path())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unwritable_target_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();

        let err = materialize_server_script(None, &blocked.join("scripts")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(err.is_fatal());
    }
}
