// Media probing using ffprobe

use crate::engine::core::Engine;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// Black-box queries the inventory builder needs from the engine
pub trait MediaProbe {
    /// Duration of an audio file in seconds
    fn audio_duration(&self, path: &Path) -> Result<f64>;

    /// Native (width, height) of a still image
    fn image_dimensions(&self, path: &Path) -> Result<(u32, u32)>;
}

impl MediaProbe for Engine {
    fn audio_duration(&self, path: &Path) -> Result<f64> {
        self.probe_duration(path)
    }

    fn image_dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        probe_image_dimensions(&self.ffprobe, path)
    }
}

/// Probe a still image with ffprobe to get its pixel dimensions
pub fn probe_image_dimensions(ffprobe: &Path, image_path: &Path) -> Result<(u32, u32)> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v:0", // images decode as a single video stream
        ])
        .arg(image_path)
        .output()
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    parse_stream_dimensions(&String::from_utf8_lossy(&output.stdout))
}

/// Extract width/height of the first stream from ffprobe `-show_streams` JSON
pub fn parse_stream_dimensions(json_str: &str) -> Result<(u32, u32)> {
    let json: serde_json::Value =
        serde_json::from_str(json_str).context("Failed to parse ffprobe JSON")?;

    let stream = json["streams"]
        .as_array()
        .and_then(|streams| streams.first())
        .context("No image stream found")?;

    let width = stream["width"]
        .as_u64()
        .context("Failed to get image width")?;
    let height = stream["height"]
        .as_u64()
        .context("Failed to get image height")?;

    let width = u32::try_from(width).context("Image width out of range")?;
    let height = u32::try_from(height).context("Image height out of range")?;
    Ok((width, height))
}
