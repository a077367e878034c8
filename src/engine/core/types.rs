use super::error::{EncodeError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// One audio file in play order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Position after sorting (0-based)
    pub sequence_index: usize,
    pub duration_s: f64,
}

/// The still image rendered behind the audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Ordered audio tracks plus the background image for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inventory {
    pub tracks: Vec<AudioTrack>,
    pub image: ImageAsset,
}

impl Inventory {
    pub fn total_duration_s(&self) -> f64 {
        self.tracks.iter().map(|t| t.duration_s).sum()
    }
}

// ============================================================================
// Quality presets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    Medium,
    High,
    Ultra,
}

/// Fixed numbers behind a preset. Every field grows (or for `crf`, shrinks)
/// strictly from Low to Ultra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySettings {
    /// Peak video bitrate in kbit/s
    pub max_bitrate_kbps: u32,
    /// CRF-style knob, lower is better (crf, cq, global_quality)
    pub crf: u32,
    /// 0 = fastest .. 3 = slowest encoder effort
    pub effort: u8,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [Self::Low, Self::Medium, Self::High, Self::Ultra];

    pub fn settings(self) -> QualitySettings {
        match self {
            Self::Low => QualitySettings {
                max_bitrate_kbps: 2_000,
                crf: 28,
                effort: 0,
            },
            Self::Medium => QualitySettings {
                max_bitrate_kbps: 5_000,
                crf: 23,
                effort: 1,
            },
            Self::High => QualitySettings {
                max_bitrate_kbps: 10_000,
                crf: 18,
                effort: 2,
            },
            Self::Ultra => QualitySettings {
                max_bitrate_kbps: 20_000,
                crf: 15,
                effort: 3,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(format!(
                "unknown quality preset '{}' (expected low, medium, high or ultra)",
                other
            )),
        }
    }
}

// ============================================================================
// User options
// ============================================================================

/// User-selected options for one encode. Validated on construction and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeOptions {
    quality: QualityPreset,
    hardware_acceleration: bool,
    fade_enabled: bool,
    output_dir: PathBuf,
    output_basename: String,
}

impl EncodeOptions {
    pub fn new(
        quality: QualityPreset,
        hardware_acceleration: bool,
        fade_enabled: bool,
        output_dir: impl Into<PathBuf>,
        output_basename: &str,
    ) -> Result<Self, EncodeError> {
        let output_dir = output_dir.into();
        let basename = output_basename.trim();

        if output_dir.as_os_str().is_empty() {
            return Err(EncodeError::InvalidOptions(
                "output directory is empty".to_string(),
            ));
        }
        if basename.is_empty() {
            return Err(EncodeError::InvalidOptions(
                "output filename is empty".to_string(),
            ));
        }
        if basename.contains(['/', '\\']) || basename == "." || basename == ".." {
            return Err(EncodeError::InvalidOptions(format!(
                "output filename '{}' must be a plain file name",
                basename
            )));
        }

        Ok(Self {
            quality,
            hardware_acceleration,
            fade_enabled,
            output_dir,
            output_basename: basename.to_string(),
        })
    }

    pub fn quality(&self) -> QualityPreset {
        self.quality
    }

    pub fn hardware_acceleration(&self) -> bool {
        self.hardware_acceleration
    }

    pub fn fade_enabled(&self) -> bool {
        self.fade_enabled
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_basename(&self) -> &str {
        &self.output_basename
    }

    /// `output_dir/<basename>.mp4` (the extension is only added when missing)
    pub fn output_path(&self) -> PathBuf {
        let name = if self.output_basename.to_ascii_lowercase().ends_with(".mp4") {
            self.output_basename.clone()
        } else {
            format!("{}.mp4", self.output_basename)
        };
        self.output_dir.join(name)
    }

    /// Same options with hardware acceleration switched off (fallback re-plan)
    pub fn without_hardware(&self) -> Self {
        Self {
            hardware_acceleration: false,
            ..self.clone()
        }
    }
}

// ============================================================================
// Host capabilities
// ============================================================================

/// Platform hardware H.264 encoders the engine can be driven through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum HardwareEncoderKind {
    /// Apple VideoToolbox (macOS)
    VideoToolbox,
    /// NVIDIA NVENC
    Nvenc,
    /// Intel Quick Sync
    Qsv,
    /// VA-API (Linux), bound to a DRM render node
    Vaapi { render_device: PathBuf },
    /// AMD AMF (Windows)
    Amf,
}

impl HardwareEncoderKind {
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::VideoToolbox => "h264_videotoolbox",
            Self::Nvenc => "h264_nvenc",
            Self::Qsv => "h264_qsv",
            Self::Vaapi { .. } => "h264_vaapi",
            Self::Amf => "h264_amf",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::VideoToolbox => "VideoToolbox (Apple)",
            Self::Nvenc => "NVENC (NVIDIA)",
            Self::Qsv => "Quick Sync (Intel)",
            Self::Vaapi { .. } => "VA-API",
            Self::Amf => "AMF (AMD)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostCapabilities {
    /// Always >= 1
    pub core_count: usize,
    /// Busy fraction of all cores, in [0, 1]
    pub load_fraction: f64,
    pub hardware_encoder: Option<HardwareEncoderKind>,
}

impl HostCapabilities {
    /// Normalizes out-of-range inputs: zero cores becomes one, load is
    /// clamped to [0, 1] and a non-finite load reads as idle.
    pub fn new(
        core_count: usize,
        load_fraction: f64,
        hardware_encoder: Option<HardwareEncoderKind>,
    ) -> Self {
        let load_fraction = if load_fraction.is_finite() {
            load_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            core_count: core_count.max(1),
            load_fraction,
            hardware_encoder,
        }
    }

    /// Safest configuration, used whenever probing fails
    pub fn conservative() -> Self {
        Self::new(1, 0.0, None)
    }

    pub fn hardware_encoder_available(&self) -> bool {
        self.hardware_encoder.is_some()
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::conservative()
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VideoCodec {
    /// libx264
    Software,
    Hardware(HardwareEncoderKind),
}

impl VideoCodec {
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Software => "libx264",
            Self::Hardware(kind) => kind.ffmpeg_name(),
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware(_))
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Software => "libx264 (Software)".to_string(),
            Self::Hardware(kind) => format!("{} (Hardware)", kind.display_name()),
        }
    }
}

/// Placement of the scaled image on the output canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Letterbox {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fade {
    pub start_s: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterChain {
    pub letterbox: Letterbox,
    pub fade_in: Option<Fade>,
    pub fade_out: Option<Fade>,
}

/// Fully resolved engine invocation for one attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodePlan {
    pub codec: VideoCodec,
    pub quality: QualityPreset,
    pub thread_count: usize,
    pub filter_chain: FilterChain,
    pub total_duration_s: f64,
    pub output_path: PathBuf,
    /// Engine arguments, program excluded
    pub args: Vec<String>,
}

// ============================================================================
// Result
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EncodeOutcome {
    Succeeded { output_path: PathBuf },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// Terminal value of one encode request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeResult {
    pub request_id: Uuid,
    pub outcome: EncodeOutcome,
    pub fallback_used: bool,
    pub attempts: u32,
    pub elapsed_s: f64,
}

impl EncodeResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, EncodeOutcome::Succeeded { .. })
    }

    pub fn output_path(&self) -> Option<&Path> {
        match &self.outcome {
            EncodeOutcome::Succeeded { output_path } => Some(output_path),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            EncodeOutcome::Succeeded { .. } => None,
            EncodeOutcome::Failed { kind, .. } => Some(*kind),
            EncodeOutcome::Cancelled => Some(ErrorKind::Cancelled),
        }
    }
}
