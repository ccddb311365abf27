use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, BridgeError};

/// Port used by the managed server unless configured otherwise
pub const DEFAULT_SERVER_PORT: u16 = 14367;
/// Port the stock Sugoi application listens on when started by the user
pub const EXTERNAL_SERVER_PORT: u16 = 14366;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_source_language() -> String {
    "ja".to_string()
}

fn default_destination_language() -> String {
    "en".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    300
}

fn default_shutdown_timeout_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// User-facing settings, persisted as TOML by whoever hosts the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the Sugoi Translator installation. Empty means the server is started externally.
    #[serde(default)]
    pub install_path: String,
    /// Port the managed server listens on
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Maximum number of strings sent in one batch request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Run translations on the GPU
    #[serde(default)]
    pub enable_cuda: bool,
    /// Prefer the CTranslate2 model over the fairseq one
    #[serde(default)]
    pub enable_ctranslate2: bool,
    /// Use this server script instead of the bundled one
    #[serde(default)]
    pub custom_server_script_path: String,
    /// Forward every server output line to the log
    #[serde(default)]
    pub log_server_messages: bool,
    /// Launch the server without a console window (Windows only)
    #[serde(default)]
    pub hide_server_window: bool,
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default = "default_destination_language")]
    pub destination_language: String,
    /// Upper bound for waiting on the ready signal, 0 waits forever
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Time allowed for the graceful close handshake before the process is killed
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            install_path: String::new(),
            server_port: default_server_port(),
            max_batch_size: default_max_batch_size(),
            enable_cuda: false,
            enable_ctranslate2: false,
            custom_server_script_path: String::new(),
            log_server_messages: false,
            hide_server_window: false,
            source_language: default_source_language(),
            destination_language: default_destination_language(),
            ready_timeout_secs: default_ready_timeout_secs(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Configuration(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| BridgeError::Configuration(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| BridgeError::Configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Install root, if one is configured
    pub fn install_root(&self) -> Option<PathBuf> {
        let trimmed = self.install_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    /// Custom server script, if one is configured
    pub fn custom_script(&self) -> Option<PathBuf> {
        let trimmed = self.custom_server_script_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    /// Persist the decisions made while resolving the installation
    pub fn apply(&mut self, delta: &SettingsDelta) {
        if let Some(enable) = delta.enable_ctranslate2 {
            self.enable_ctranslate2 = enable;
        }
    }
}

/// Settings changed by initialization that the caller may want to persist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDelta {
    pub enable_ctranslate2: Option<bool>,
}

impl SettingsDelta {
    pub fn is_empty(&self) -> bool {
        self.enable_ctranslate2.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The bridge owns the server process and talks the batch protocol
    Managed,
    /// The user runs the server; only single sentences are sent
    External,
}

/// Runtime configuration, fixed once initialization is done
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub mode: Mode,
    pub server_port: u16,
    pub max_batch_size: usize,
    pub use_accelerated_model: bool,
    pub use_cuda: bool,
    pub hide_process_window: bool,
    pub log_backend_output: bool,
    pub ready_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub request_timeout: Duration,
}

impl Configuration {
    /// Configuration for a server supervised by the bridge
    pub fn managed(settings: &Settings, use_accelerated_model: bool) -> Self {
        Self {
            mode: Mode::Managed,
            server_port: settings.server_port,
            max_batch_size: settings.max_batch_size.max(1),
            use_accelerated_model,
            ..Self::common(settings)
        }
    }

    /// Configuration for a server the user started themselves
    pub fn external(settings: &Settings) -> Self {
        Self {
            mode: Mode::External,
            server_port: EXTERNAL_SERVER_PORT,
            max_batch_size: 1,
            use_accelerated_model: false,
            ..Self::common(settings)
        }
    }

    fn common(settings: &Settings) -> Self {
        let ready_timeout = match settings.ready_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            mode: Mode::External,
            server_port: settings.server_port,
            max_batch_size: 1,
            use_accelerated_model: false,
            use_cuda: settings.enable_cuda,
            hide_process_window: settings.hide_server_window,
            log_backend_output: settings.log_server_messages,
            ready_timeout,
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }

    /// URL of the server's single POST endpoint
    pub fn endpoint_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.server_port)
    }
}
