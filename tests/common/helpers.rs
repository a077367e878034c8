#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use stillcast::engine::{
    AudioTrack, EncodeOptions, HardwareEncoderKind, HostCapabilities, ImageAsset, Inventory,
    QualityPreset,
};

/// Convert a Command to a string for testing/assertions
pub fn cmd_to_string(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<String> = cmd
        .get_args()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect();

    format!("{} {}", program, args.join(" "))
}

/// Inventory over made-up paths; the planner never touches the files
pub fn sample_inventory(durations: &[f64], width: u32, height: u32) -> Inventory {
    Inventory {
        tracks: durations
            .iter()
            .enumerate()
            .map(|(i, d)| AudioTrack {
                path: PathBuf::from(format!("/music/{:02}-track.mp3", i + 1)),
                sequence_index: i,
                duration_s: *d,
            })
            .collect(),
        image: ImageAsset {
            path: PathBuf::from("/art/cover.jpg"),
            width,
            height,
        },
    }
}

pub fn options_in(
    dir: &Path,
    quality: QualityPreset,
    hardware: bool,
    fade: bool,
) -> EncodeOptions {
    EncodeOptions::new(quality, hardware, fade, dir, "album").unwrap()
}

pub fn software_host(cores: usize, load: f64) -> HostCapabilities {
    HostCapabilities::new(cores, load, None)
}

pub fn hardware_host(kind: HardwareEncoderKind) -> HostCapabilities {
    HostCapabilities::new(8, 0.0, Some(kind))
}

/// Create empty files named `names` inside `dir`
pub fn touch_all(dir: &Path, names: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    for name in names {
        std::fs::write(dir.join(name), b"fake").unwrap();
    }
}
