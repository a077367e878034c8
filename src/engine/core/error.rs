use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Flat taxonomy of everything that can go wrong with an encode request.
///
/// `FailedRecoverable` only ever exists inside the supervisor: a hardware
/// attempt failed and the software retry is about to run. It is never the
/// kind of a terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoAudioFiles,
    UnsupportedImage,
    DurationProbeFailed,
    EngineNotFound,
    EncodeAlreadyInProgress,
    InvalidOptions,
    FailedRecoverable,
    FailedFatal,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoAudioFiles => "no audio files",
            Self::UnsupportedImage => "unsupported image",
            Self::DurationProbeFailed => "duration probe failed",
            Self::EngineNotFound => "engine not found",
            Self::EncodeAlreadyInProgress => "encode already in progress",
            Self::InvalidOptions => "invalid options",
            Self::FailedRecoverable => "hardware attempt failed",
            Self::FailedFatal => "encode failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors returned synchronously from inventory building, option
/// validation, engine lookup and `Supervisor::start`.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("No supported audio files found in {}", dir.display())]
    NoAudioFiles { dir: PathBuf },

    #[error("Unsupported image {}: {reason}", path.display())]
    UnsupportedImage { path: PathBuf, reason: String },

    #[error("Could not read duration of {}: {reason}", path.display())]
    DurationProbeFailed { path: PathBuf, reason: String },

    #[error("`{binary}` not found (checked bundled locations and PATH)")]
    EngineNotFound { binary: String },

    #[error("Another encode is already in progress")]
    EncodeAlreadyInProgress,

    #[error("Invalid encode options: {0}")]
    InvalidOptions(String),
}

impl EncodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAudioFiles { .. } => ErrorKind::NoAudioFiles,
            Self::UnsupportedImage { .. } => ErrorKind::UnsupportedImage,
            Self::DurationProbeFailed { .. } => ErrorKind::DurationProbeFailed,
            Self::EngineNotFound { .. } => ErrorKind::EngineNotFound,
            Self::EncodeAlreadyInProgress => ErrorKind::EncodeAlreadyInProgress,
            Self::InvalidOptions(_) => ErrorKind::InvalidOptions,
        }
    }
}
