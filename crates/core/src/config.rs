//! `<data_dir>/config.toml`: defaults for tiling, backend and output.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::InferenceBackend;
use crate::geometry::PixelRange;
use crate::grid::TilingSettings;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATA_DIR_ENV: &str = "TESSERA_DATA_DIR";
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub tiling: TilingSettings,
    pub inference: InferenceConfig,
    pub output: OutputConfig,
}

/// Relative entries are resolved against the data dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub trt_cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".into(),
            trt_cache_dir: "trt_cache".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub backend: InferenceBackend,
    /// Forces the range model inputs are scaled to instead of guessing from
    /// the element type.
    pub input_range: Option<PixelRange>,
    /// Range of model outputs; unset means same as the inputs.
    pub output_range: Option<PixelRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl AppConfig {
    /// A missing or blank file yields the defaults; malformed TOML is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read {}", path.display()))
            }
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&text).with_context(|| format!("invalid config TOML in {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create config dir {}", dir.display()))?;
        }
        let text = toml::to_string_pretty(self).context("cannot serialize config")?;
        fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
    }

    /// Create the data dir on first use and read its config, falling back to
    /// defaults with a warning when either step fails.
    pub fn load_or_init(data_dir: &Path) -> Self {
        if let Err(err) = initialize_data_dir(data_dir) {
            warn!(error = %err, "Failed to initialize data directory");
        }
        Self::load_from_path(&config_path(data_dir)).unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "Failed to load config file, using defaults");
            Self::default()
        })
    }

    /// Existing or absolute paths are used as given; bare names are looked up
    /// under `models_dir`.
    pub fn resolve_model_path(&self, data_dir: &Path, model: &Path) -> PathBuf {
        if model.is_absolute() || model.exists() {
            model.to_path_buf()
        } else {
            resolve_relative_to(data_dir, &self.paths.models_dir).join(model)
        }
    }

    pub fn trt_cache_dir(&self, data_dir: &Path) -> PathBuf {
        resolve_relative_to(data_dir, &self.paths.trt_cache_dir)
    }
}

/// `--data-dir`, then `$TESSERA_DATA_DIR`, then `./data`.
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    cli_override
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Create `data_dir` and write a default config.toml unless one exists.
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;
    let path = config_path(data_dir);
    if !path.exists() {
        AppConfig::default().save_to_path(&path)?;
    }
    Ok(())
}

pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
