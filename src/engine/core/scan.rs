use super::error::EncodeError;
use super::types::{AudioTrack, ImageAsset, Inventory};
use crate::engine::probe::MediaProbe;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Audio file extensions accepted as tracks
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"];

/// Image file extensions accepted as the background
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

/// Sort key for names without leading digits
pub const UNNUMBERED_KEY: u64 = u64::MAX;

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_audio_file(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

/// Numeric key from the longest leading run of ASCII digits.
///
/// Names without leading digits get `UNNUMBERED_KEY` so they play last.
/// Absurdly long numbers saturate just below it and still sort before them.
pub fn track_sort_key(file_name: &str) -> u64 {
    let digits: &str = {
        let end = file_name
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(file_name.len());
        &file_name[..end]
    };

    if digits.is_empty() {
        return UNNUMBERED_KEY;
    }
    digits.parse::<u64>().unwrap_or(UNNUMBERED_KEY - 1).min(UNNUMBERED_KEY - 1)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Play-order comparison: numeric key, then file name, then full path
pub fn compare_tracks(a: &Path, b: &Path) -> Ordering {
    let (name_a, name_b) = (file_name_of(a), file_name_of(b));
    track_sort_key(&name_a)
        .cmp(&track_sort_key(&name_b))
        .then_with(|| name_a.cmp(&name_b))
        .then_with(|| a.cmp(b))
}

/// Sort paths into play order. Pure function of the names, so the listing
/// order of the directory never matters.
pub fn order_tracks(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| compare_tracks(a, b));
}

/// List supported audio files directly inside `dir` (no recursion)
pub fn scan_audio_dir(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Build the ordered inventory for one request.
///
/// Only file metadata and the engine's probe answers are read; audio
/// payloads are never opened here.
pub fn build_inventory(
    audio_dir: &Path,
    image_path: &Path,
    probe: &dyn MediaProbe,
) -> Result<Inventory, EncodeError> {
    let mut files = scan_audio_dir(audio_dir);
    if files.is_empty() {
        return Err(EncodeError::NoAudioFiles {
            dir: audio_dir.to_path_buf(),
        });
    }

    if !is_image_file(image_path) {
        return Err(EncodeError::UnsupportedImage {
            path: image_path.to_path_buf(),
            reason: format!("extension must be one of {}", IMAGE_EXTENSIONS.join(", ")),
        });
    }
    if !image_path.is_file() {
        return Err(EncodeError::UnsupportedImage {
            path: image_path.to_path_buf(),
            reason: "file does not exist".to_string(),
        });
    }

    order_tracks(&mut files);
    tracing::info!(count = files.len(), dir = %audio_dir.display(), "found audio files");

    let mut tracks = Vec::with_capacity(files.len());
    for (sequence_index, path) in files.into_iter().enumerate() {
        let duration_s =
            probe
                .audio_duration(&path)
                .map_err(|e| EncodeError::DurationProbeFailed {
                    path: path.clone(),
                    reason: format!("{:#}", e),
                })?;

        if !duration_s.is_finite() || duration_s <= 0.0 {
            return Err(EncodeError::DurationProbeFailed {
                path,
                reason: format!("unusable duration {}", duration_s),
            });
        }

        tracing::debug!(index = sequence_index, path = %path.display(), duration_s, "track");
        tracks.push(AudioTrack {
            path,
            sequence_index,
            duration_s,
        });
    }

    let (width, height) =
        probe
            .image_dimensions(image_path)
            .map_err(|e| EncodeError::UnsupportedImage {
                path: image_path.to_path_buf(),
                reason: format!("{:#}", e),
            })?;
    if width == 0 || height == 0 {
        return Err(EncodeError::UnsupportedImage {
            path: image_path.to_path_buf(),
            reason: format!("image has no pixels ({}x{})", width, height),
        });
    }

    Ok(Inventory {
        tracks,
        image: ImageAsset {
            path: image_path.to_path_buf(),
            width,
            height,
        },
    })
}
