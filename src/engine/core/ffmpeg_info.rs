use super::error::EncodeError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

/// Resolved engine binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

/// Bundled copies shipped next to the executable (plain install, or inside a
/// macOS app bundle's Resources folder)
fn bundled_candidates(name: &str) -> Vec<PathBuf> {
    let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    else {
        return Vec::new();
    };

    vec![
        exe_dir.join(name),
        exe_dir.join("..").join("Resources").join(name),
        exe_dir.join("Resources").join(name),
    ]
}

fn resolve_binary(explicit: Option<&Path>, base: &str) -> Result<PathBuf, EncodeError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(EncodeError::EngineNotFound {
            binary: path.display().to_string(),
        });
    }

    let name = executable_name(base);
    if let Some(bundled) = bundled_candidates(&name).into_iter().find(|p| p.is_file()) {
        tracing::debug!(path = %bundled.display(), "using bundled {}", base);
        return Ok(bundled);
    }

    which::which(&name).map_err(|_| EncodeError::EngineNotFound {
        binary: base.to_string(),
    })
}

impl Engine {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Find ffmpeg and ffprobe. Explicit paths must exist; otherwise a
    /// bundled copy wins over the first match on PATH.
    pub fn locate(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Result<Self, EncodeError> {
        Ok(Self {
            ffmpeg: resolve_binary(ffmpeg, "ffmpeg")?,
            ffprobe: resolve_binary(ffprobe, "ffprobe")?,
        })
    }

    /// Base command for the encoder binary
    pub fn command(&self) -> Command {
        Command::new(&self.ffmpeg)
    }

    /// First line of `ffmpeg -version`
    pub fn version(&self) -> Result<String> {
        first_version_line(&self.ffmpeg)
    }

    /// First line of `ffprobe -version`
    pub fn ffprobe_version(&self) -> Result<String> {
        first_version_line(&self.ffprobe)
    }

    /// Raw output of `ffmpeg -hide_banner -encoders`
    pub fn encoders(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .output()
            .with_context(|| format!("Failed to execute {}", self.ffmpeg.display()))?;

        if !output.status.success() {
            anyhow::bail!("ffmpeg -encoders failed with status: {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Probe an audio file to get its duration in seconds
    pub fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg(path)
            .output()
            .context("Failed to execute ffprobe")?;

        if !output.status.success() {
            anyhow::bail!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        parse_ffprobe_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn first_version_line(binary: &Path) -> Result<String> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .with_context(|| format!("Failed to execute {}", binary.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} -version failed with status: {}",
            binary.display(),
            output.status
        );
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");
    Ok(first_line.to_string())
}

/// Parse duration from ffprobe `-show_format` JSON
pub fn parse_ffprobe_duration(json: &str) -> Result<f64> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON")?;

    let duration_str = probe.format.duration.context("No duration found in JSON")?;

    duration_str
        .parse::<f64>()
        .context("Failed to parse duration as float")
}
