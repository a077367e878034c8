// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{QualityPreset, SupervisorConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Quality preset used when `--quality` is not given
    #[serde(default = "default_quality")]
    pub quality: QualityPreset,

    /// Try the platform hardware encoder first
    #[serde(default = "default_true_config")]
    pub use_hardware: bool,

    /// Fade in from and out to black
    #[serde(default = "default_true_config")]
    pub fade: bool,

    /// Output file name without extension
    #[serde(default = "default_output_basename")]
    pub output_basename: String,

    /// Where the last successful encode was written
    #[serde(default)]
    pub last_output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Explicit ffmpeg binary (otherwise bundled copy, then PATH)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Explicit ffprobe binary
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Seconds between the stop request and the hard kill when cancelling
    #[serde(default = "default_termination_grace_secs")]
    pub termination_grace_secs: u64,

    /// Append engine commands and errors to this file
    #[serde(default)]
    pub debug_log: Option<PathBuf>,
}

fn default_quality() -> QualityPreset {
    QualityPreset::High
}

fn default_true_config() -> bool {
    true
}

fn default_output_basename() -> String {
    "output_video".to_string()
}

fn default_termination_grace_secs() -> u64 {
    5
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            use_hardware: true,
            fade: true,
            output_basename: default_output_basename(),
            last_output_dir: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            termination_grace_secs: default_termination_grace_secs(),
            debug_log: None,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("stillcast")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("stillcast")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // Not being able to write defaults is not fatal
            if let Err(e) = config.save_to(&config_path) {
                tracing::warn!(
                    "Could not create default config file ({:#}). Using built-in defaults; run 'stillcast init-config' to create one.",
                    e
                );
            }

            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            Config::default().save()?;
        }
        Ok(())
    }

    /// Supervisor settings from the `[engine]` section
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            ffmpeg_path: self.engine.ffmpeg_path.clone(),
            ffprobe_path: self.engine.ffprobe_path.clone(),
            termination_grace: Duration::from_secs(self.engine.termination_grace_secs),
            debug_log: self.engine.debug_log.clone(),
        }
    }
}
