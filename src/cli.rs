use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stillcast::engine::QualityPreset;

#[derive(Parser)]
#[command(name = "stillcast")]
#[command(about = "Render an album folder and a cover image into an MP4", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Input folder, cover image and encode settings shared by encode/plan
#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    /// Directory holding the audio tracks (not searched recursively)
    #[arg(value_name = "AUDIO_DIR")]
    pub audio_dir: PathBuf,

    /// Background image (jpg, jpeg, png, bmp, tiff)
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Output directory (defaults to the last one used, then the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output file name; ".mp4" is appended when missing
    #[arg(short = 'n', long, value_name = "NAME")]
    pub name: Option<String>,

    /// Quality preset (overrides config)
    #[arg(short, long, value_parser = clap::value_parser!(QualityPreset))]
    pub quality: Option<QualityPreset>,

    /// Try the hardware encoder first (overrides config)
    #[arg(long, conflicts_with = "no_hardware")]
    pub hardware: bool,

    /// Software encoding only (overrides config)
    #[arg(long, conflicts_with = "hardware")]
    pub no_hardware: bool,

    /// Fade in and out (overrides config)
    #[arg(long, conflicts_with = "no_fade")]
    pub fade: bool,

    /// No fades (overrides config)
    #[arg(long, conflicts_with = "fade")]
    pub no_fade: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode the album into an MP4
    Encode {
        #[command(flatten)]
        args: EncodeArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the ffmpeg command without executing it (dry run)
    Plan {
        #[command(flatten)]
        args: EncodeArgs,

        /// Print the full plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tracks in play order with their durations
    Inventory {
        /// Directory holding the audio tracks
        audio_dir: PathBuf,

        /// Background image
        image: PathBuf,

        /// Print the inventory as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show detected cores, load and hardware encoder
    ProbeHost {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that ffmpeg and ffprobe can be found and run
    CheckEngine,

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}

/// Tri-state from a `--x` / `--no-x` flag pair
pub fn flag_pair(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}
