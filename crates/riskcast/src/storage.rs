//! File input and output.
//!
//! Every input file is YAML unless its extension is `.json`. The pattern
//! library is always written as JSON.

use std::fs;
use std::path::{Path, PathBuf};

use riskcast_core::calibration::HistoricalCalibrator;
use riskcast_core::error::RegisterError;
use riskcast_core::model::{InMemoryRegister, Risk, RiskRegister};
use serde::de::DeserializeOwned;

/// Error types for storage operations
#[derive(Debug)]
pub enum StorageError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Serialize(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io { path, message } => {
                write!(f, "IO error on {}: {message}", path.display())
            }
            StorageError::Parse { path, message } => {
                write!(f, "failed to parse {}: {message}", path.display())
            }
            StorageError::Serialize(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Read and deserialize a YAML or JSON file
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let content = fs::read_to_string(path).map_err(|e| StorageError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let parsed = if is_json(path) {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_saphyr::from_str(&content).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| StorageError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load a pattern library, or start an empty one if the file does not exist yet
pub fn load_library(path: &Path) -> Result<HistoricalCalibrator, StorageError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "starting a new pattern library");
        return Ok(HistoricalCalibrator::new());
    }
    load(path)
}

/// Write the pattern library as pretty JSON, creating parent directories
pub fn save_library(path: &Path, library: &HistoricalCalibrator) -> Result<(), StorageError> {
    let json =
        serde_json::to_string_pretty(library).map_err(|e| StorageError::Serialize(e.to_string()))?;
    let io_err = |e: std::io::Error| StorageError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, json).map_err(io_err)?;
    tracing::debug!(path = %path.display(), "pattern library saved");
    Ok(())
}

/// Read-only risk register backed by a YAML/JSON file of
/// `projects: { name: [risk, ...] }`.
///
/// The file is re-read on every lookup so edits made by the register's
/// owner are picked up without restarting.
#[derive(Debug, Clone)]
pub struct FileRegister {
    path: PathBuf,
}

impl FileRegister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RiskRegister for FileRegister {
    fn risks(&self, project: &str) -> Result<Vec<Risk>, RegisterError> {
        let register: InMemoryRegister =
            load(&self.path).map_err(|e| RegisterError::Unavailable(e.to_string()))?;
        register.risks(project)
    }
}
