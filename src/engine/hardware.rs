//! Host capability probing: core count, current load, hardware H.264 encoders.
//!
//! Results are never cached. Load changes between requests and a GPU can
//! disappear (driver reload, eGPU unplugged), so every encode asks again.

use std::path::PathBuf;
use std::process::Command;
use sysinfo::System;

use crate::engine::core::{Engine, HardwareEncoderKind, HostCapabilities};

/// Operating system family, as far as encoder selection cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    MacOs,
    Linux,
    Windows,
    Other,
}

impl TargetOs {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Other
        }
    }
}

/// GPU runtime facts gathered outside of ffmpeg
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuRuntime {
    pub nvidia_gpu: bool,
    pub intel_gpu: bool,
    pub render_device: Option<PathBuf>,
}

impl GpuRuntime {
    pub fn detect(os: TargetOs) -> Self {
        match os {
            TargetOs::Linux => Self {
                nvidia_gpu: detect_nvidia_gpu().is_some(),
                intel_gpu: has_intel_gpu(),
                render_device: detect_render_device(),
            },
            TargetOs::Windows => Self {
                nvidia_gpu: detect_nvidia_gpu().is_some(),
                ..Self::default()
            },
            TargetOs::MacOs | TargetOs::Other => Self::default(),
        }
    }
}

/// Probe the host. Never fails: anything that cannot be determined falls
/// back to the conservative answer (one core, idle, no hardware encoder).
pub fn probe(engine: &Engine) -> HostCapabilities {
    let (core_count, load_fraction) = sample_cpu();

    let os = TargetOs::current();
    let hardware_encoder = match engine.encoders() {
        Ok(encoders) => select_hardware_encoder(os, &encoders, &GpuRuntime::detect(os)),
        Err(e) => {
            tracing::warn!("could not list engine encoders, assuming software only: {:#}", e);
            None
        }
    };

    let caps = HostCapabilities::new(core_count, load_fraction, hardware_encoder);
    tracing::info!(
        cores = caps.core_count,
        load = format!("{:.2}", caps.load_fraction),
        hardware = caps
            .hardware_encoder
            .as_ref()
            .map(|k| k.ffmpeg_name())
            .unwrap_or("none"),
        "probed host capabilities"
    );
    caps
}

/// Core count and global CPU busy fraction
fn sample_cpu() -> (usize, f64) {
    let mut system = System::new();
    // Usage is a delta between two refreshes
    system.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu();

    let cores = match system.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };
    let load = f64::from(system.global_cpu_info().cpu_usage()) / 100.0;
    (cores, load)
}

fn lists_encoder(encoders_output: &str, name: &str) -> bool {
    encoders_output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// Pick the platform hardware encoder, in priority order.
///
/// An encoder compiled into ffmpeg is not enough on its own: NVENC needs an
/// NVIDIA driver, QSV and VA-API need a DRM render node (QSV also an Intel
/// GPU). Otherwise ffmpeg happily lists encoders that fail at init.
pub fn select_hardware_encoder(
    os: TargetOs,
    encoders_output: &str,
    runtime: &GpuRuntime,
) -> Option<HardwareEncoderKind> {
    let has = |name: &str| lists_encoder(encoders_output, name);

    match os {
        TargetOs::MacOs => has("h264_videotoolbox").then_some(HardwareEncoderKind::VideoToolbox),
        TargetOs::Linux => {
            if has("h264_nvenc") && runtime.nvidia_gpu {
                Some(HardwareEncoderKind::Nvenc)
            } else if has("h264_qsv") && runtime.intel_gpu && runtime.render_device.is_some() {
                Some(HardwareEncoderKind::Qsv)
            } else if has("h264_vaapi") {
                runtime
                    .render_device
                    .clone()
                    .map(|render_device| HardwareEncoderKind::Vaapi { render_device })
            } else {
                None
            }
        }
        TargetOs::Windows => {
            if has("h264_nvenc") && runtime.nvidia_gpu {
                Some(HardwareEncoderKind::Nvenc)
            } else if has("h264_qsv") {
                Some(HardwareEncoderKind::Qsv)
            } else if has("h264_amf") {
                Some(HardwareEncoderKind::Amf)
            } else {
                None
            }
        }
        TargetOs::Other => None,
    }
}

/// Detect NVIDIA GPU using nvidia-smi
pub fn detect_nvidia_gpu() -> Option<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let name = stdout.lines().next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Detect if an Intel display controller is present (for QSV)
fn has_intel_gpu() -> bool {
    let Ok(output) = Command::new("lspci").output() else {
        return false;
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.to_lowercase())
        .any(|lower| {
            (lower.contains("vga") || lower.contains("display") || lower.contains("3d"))
                && lower.contains("intel")
        })
}

/// First `/dev/dri/renderD*` node, if any
pub fn detect_render_device() -> Option<PathBuf> {
    let mut devices: Vec<PathBuf> = std::fs::read_dir("/dev/dri")
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("renderD"))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();

    // renderD128 before renderD129
    devices.sort();
    devices.into_iter().next()
}
