#![allow(dead_code)]
//! Shell scripts standing in for ffmpeg/ffprobe.
//!
//! All scripts are written once, before any of them runs, so no test ever
//! executes a file another thread still has open for writing (ETXTBSY).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

/// Behavior of the fake ffmpeg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFfmpeg {
    /// Reports progress, writes the output, exits 0
    Succeeds,
    /// Fails on any hardware codec, succeeds with libx264
    HardwareFails,
    /// Writes a partial file, then exits 1
    AlwaysFails,
    /// Exits 0 without writing anything
    NoOutput,
    /// Writes a partial file, then sleeps until killed
    Hangs,
}

impl FakeFfmpeg {
    const ALL: [FakeFfmpeg; 5] = [
        Self::Succeeds,
        Self::HardwareFails,
        Self::AlwaysFails,
        Self::NoOutput,
        Self::Hangs,
    ];

    fn file_name(self) -> &'static str {
        match self {
            Self::Succeeds => "ffmpeg-succeeds",
            Self::HardwareFails => "ffmpeg-hardware-fails",
            Self::AlwaysFails => "ffmpeg-always-fails",
            Self::NoOutput => "ffmpeg-no-output",
            Self::Hangs => "ffmpeg-hangs",
        }
    }

    fn body(self) -> &'static str {
        match self {
            Self::Succeeds => SUCCEED,
            Self::HardwareFails => {
                r#"if [ "$codec" != "libx264" ]; then
  echo "out_time_us=1000000"
  echo "[$codec @ 0x5561d2c0] Cannot load libcuda.so.1" >&2
  echo "Error initializing output stream 0:0" >&2
  printf 'partial' > "$out"
  exit 1
fi
"#
            }
            Self::AlwaysFails => {
                r#"printf 'partial' > "$out"
echo "Conversion failed!" >&2
exit 1
"#
            }
            Self::NoOutput => "echo progress=end\nexit 0\n",
            Self::Hangs => {
                r#"printf 'partial' > "$out"
echo "out_time_us=1000000"
exec sleep 30
"#
            }
        }
    }
}

const PRELUDE: &str = r#"#!/bin/sh
codec=""
prev=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-c:v" ]; then codec="$arg"; fi
  prev="$arg"
  out="$arg"
done
printf '%s\n' "$@" > "$out.args"
"#;

const SUCCEED: &str = r#"echo "out_time_us=5000000"
echo "speed=2.00x"
echo "progress=continue"
echo "out_time_us=10000000"
printf 'fake mp4 payload' > "$out"
echo "progress=end"
exit 0
"#;

/// Every file probes as 10 seconds long and 1000x1000 pixels
const FFPROBE: &str = r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "-show_streams" ]; then
    echo '{"streams":[{"index":0,"width":1000,"height":1000}]}'
    exit 0
  fi
done
echo '{"format":{"duration":"10.000000"}}'
"#;

struct Scripts {
    dir: TempDir,
}

#[cfg(unix)]
fn write_script(path: &Path, contents: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn write_script(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

fn scripts() -> &'static Scripts {
    static SCRIPTS: OnceLock<Scripts> = OnceLock::new();
    SCRIPTS.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        for fake in FakeFfmpeg::ALL {
            let script = format!("{}{}", PRELUDE, fake.body());
            // Hardware-fails falls through to the success path for libx264
            let script = if fake == FakeFfmpeg::HardwareFails {
                format!("{}{}", script, SUCCEED)
            } else {
                script
            };
            write_script(&dir.path().join(fake.file_name()), &script);
        }
        write_script(&dir.path().join("ffprobe"), FFPROBE);
        // Exists, so lookup succeeds, but exec fails with EACCES
        std::fs::write(dir.path().join("ffmpeg-not-executable"), SUCCEED).unwrap();
        Scripts { dir }
    })
}

pub fn fake_ffmpeg(kind: FakeFfmpeg) -> PathBuf {
    scripts().dir.path().join(kind.file_name())
}

/// An ffmpeg that is found but can never be launched
pub fn unlaunchable_ffmpeg() -> PathBuf {
    scripts().dir.path().join("ffmpeg-not-executable")
}

pub fn fake_ffprobe() -> PathBuf {
    scripts().dir.path().join("ffprobe")
}

/// Arguments the fake ffmpeg received for `output`, one per line
pub fn recorded_args(output: &Path) -> Vec<String> {
    let mut log = output.as_os_str().to_owned();
    log.push(".args");
    std::fs::read_to_string(PathBuf::from(log))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
