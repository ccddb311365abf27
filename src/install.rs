//! Installation resolver
//!
//! Finds the bundled Python runtime, the translation server working directory
//! and the optional CTranslate2 model inside a Sugoi Translator installation.
//! Each artifact is probed through an ordered table of relative paths because
//! different Sugoi releases lay their files out differently. The first existing
//! candidate wins.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::SettingsDelta;
use crate::error::{BridgeError, Result};

/// Python runtime, relative to the install root
pub const INTERPRETER_CANDIDATES: &[&str] = &[
    "Power-Source/Python38/python.exe",
    "Power-Source/Python39/python.exe",
];

/// Server working directory, relative to the install root
pub const WORKING_DIRECTORY_CANDIDATES: &[&str] = &[
    "backendServer/Program-Backend/Sugoi-Translator-Offline/offlineTranslation",
    "backendServer/Program-Backend/Sugoi-Japanese-Translator/offlineTranslation",
    "backendServer/Modules/Translation-API-Server/Offline/Sugoi_Model",
];

/// CTranslate2 model directory, relative to the working directory
pub const ACCELERATED_MODEL_CANDIDATES: &[&str] = &[
    "ct2/ct2_models",
    "models/ct2Model",
    "ct2Model",
];

const FAIRSEQ_WEIGHTS: &str = "fairseq/japaneseModel/big.pretrain.pt";
const FAIRSEQ_TOKENIZER: &str = "fairseq/spmModels/spm.ja.nopretok.model";
const CT2_WEIGHTS: &str = "model.bin";
const CT2_TOKENIZERS: &[&str] = &["spmModels/spm.ja.nopretok.model", "spmModels/spm.en.nopretok.model"];

const INSTALL_PATH_HINT: &str =
    "Check that install_path points at the Sugoi Translator folder. If it does, please report this error.";

/// What a probed candidate has to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    File,
    Directory,
}

/// Join a `/`-separated relative path onto `base` using native separators
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |path, part| path.join(part))
}

/// Return the first candidate under `base` that exists as `kind`, in table order
pub fn probe_first(base: &Path, candidates: &[&str], kind: ProbeKind) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| join_relative(base, candidate))
        .find(|path| {
            let found = match kind {
                ProbeKind::File => path.is_file(),
                ProbeKind::Directory => path.is_dir(),
            };
            debug!("Probing {} -> {}", path.display(), if found { "found" } else { "missing" });
            found
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// The original fairseq transformer model
    Fairseq,
    /// The CTranslate2 conversion of the same model
    CTranslate2,
}

impl ModelFamily {
    pub fn from_accelerated(accelerated: bool) -> Self {
        if accelerated {
            Self::CTranslate2
        } else {
            Self::Fairseq
        }
    }

    pub fn is_accelerated(self) -> bool {
        matches!(self, Self::CTranslate2)
    }

    fn other(self) -> Self {
        match self {
            Self::Fairseq => Self::CTranslate2,
            Self::CTranslate2 => Self::Fairseq,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fairseq => write!(f, "Fairseq"),
            Self::CTranslate2 => write!(f, "CTranslate2"),
        }
    }
}

/// Absolute paths needed to launch the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationLayout {
    pub interpreter_path: PathBuf,
    pub working_directory: PathBuf,
    pub accelerated_model_path: Option<PathBuf>,
}

impl InstallationLayout {
    pub fn fairseq_model_path(&self) -> PathBuf {
        self.working_directory.join("fairseq")
    }

    /// Both mandatory paths are set
    pub fn is_launchable(&self) -> bool {
        !self.interpreter_path.as_os_str().is_empty() && !self.working_directory.as_os_str().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAvailability {
    pub fairseq_available: bool,
    pub accelerated_available: bool,
}

impl ModelAvailability {
    /// Check that every required file of both families is present
    pub fn detect(layout: &InstallationLayout) -> Self {
        let workdir = &layout.working_directory;
        let fairseq_available = [FAIRSEQ_WEIGHTS, FAIRSEQ_TOKENIZER]
            .iter()
            .all(|file| join_relative(workdir, file).is_file());

        let accelerated_available = layout
            .accelerated_model_path
            .as_deref()
            .map(|model_dir| {
                // Tokenizers live next to the model directory, not inside it
                let spm_root = model_dir.parent().unwrap_or(model_dir);
                join_relative(model_dir, CT2_WEIGHTS).is_file()
                    && CT2_TOKENIZERS
                        .iter()
                        .all(|file| join_relative(spm_root, file).is_file())
            })
            .unwrap_or(false);

        Self {
            fairseq_available,
            accelerated_available,
        }
    }

    pub fn is_available(&self, family: ModelFamily) -> bool {
        match family {
            ModelFamily::Fairseq => self.fairseq_available,
            ModelFamily::CTranslate2 => self.accelerated_available,
        }
    }
}

/// A switch away from the requested model family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFallback {
    pub requested: ModelFamily,
    pub effective: ModelFamily,
}

/// Outcome of resolving an installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub layout: InstallationLayout,
    pub availability: ModelAvailability,
    pub family: ModelFamily,
    pub fallback: Option<ModelFallback>,
}

impl Resolution {
    /// Settings the caller should persist so the fallback is not repeated
    pub fn settings_delta(&self) -> SettingsDelta {
        SettingsDelta {
            enable_ctranslate2: self.fallback.map(|fallback| fallback.effective.is_accelerated()),
        }
    }
}

/// Locate the runtime, working directory and models under `install_root`
pub fn resolve(install_root: &Path, requested: ModelFamily) -> Result<Resolution> {
    let layout = resolve_layout(install_root)?;
    let availability = ModelAvailability::detect(&layout);

    if let Some(model_dir) = &layout.accelerated_model_path {
        info!("CTranslate2 model path: {}", model_dir.display());
    }
    info!("Fairseq model path: {}", layout.fairseq_model_path().display());

    let (family, fallback) = choose_family(requested, availability)?;

    Ok(Resolution {
        layout,
        availability,
        family,
        fallback,
    })
}

fn resolve_layout(install_root: &Path) -> Result<InstallationLayout> {
    let interpreter_path = probe_first(install_root, INTERPRETER_CANDIDATES, ProbeKind::File)
        .ok_or_else(|| {
            BridgeError::Configuration(format!(
                "interpreter not found: unable to find the Python runtime (Power-Source/Python3x) under {}. {}",
                install_root.display(),
                INSTALL_PATH_HINT
            ))
        })?;

    let working_directory = probe_first(install_root, WORKING_DIRECTORY_CANDIDATES, ProbeKind::Directory)
        .ok_or_else(|| {
            BridgeError::Configuration(format!(
                "working directory not found: unable to find the translation server directory under {}. {}",
                install_root.display(),
                INSTALL_PATH_HINT
            ))
        })?;

    let accelerated_model_path =
        probe_first(&working_directory, ACCELERATED_MODEL_CANDIDATES, ProbeKind::Directory);

    Ok(InstallationLayout {
        interpreter_path,
        working_directory,
        accelerated_model_path,
    })
}

/// Apply the fallback policy between the two model families
pub fn choose_family(
    requested: ModelFamily,
    availability: ModelAvailability,
) -> Result<(ModelFamily, Option<ModelFallback>)> {
    if availability.is_available(requested) {
        return Ok((requested, None));
    }

    let effective = requested.other();
    if !availability.is_available(effective) {
        return Err(BridgeError::Configuration(format!(
            "no usable translation model found: neither the Fairseq nor the CTranslate2 model is fully installed. {}",
            INSTALL_PATH_HINT
        )));
    }

    warn!("{} model not found! Falling back to the {} model", requested, effective);
    Ok((effective, Some(ModelFallback { requested, effective })))
}
