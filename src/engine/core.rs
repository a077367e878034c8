mod error;
mod ffmpeg_cmd;
mod ffmpeg_info;
mod log;
mod progress;
mod runner;
mod scan;
mod state;
mod types;

pub use error::{EncodeError, ErrorKind};
pub use ffmpeg_cmd::{
    MAX_FADE_S, OUTPUT_FPS, OUTPUT_HEIGHT, OUTPUT_WIDTH, build_ffmpeg_cmd, filter_graph,
    format_ffmpeg_cmd, letterbox, plan, resolve_codec, resolve_fades, resolve_thread_count,
};
pub use ffmpeg_info::{Engine, parse_ffprobe_duration};
pub use log::write_debug_log;
pub use progress::{EngineEvent, EngineEvents, ProgressTracker, engine_events, parse_line};
pub use runner::{
    AttemptExit, AttemptOutcome, POLL_INTERVAL, RunningAttempt, STDERR_TAIL_LINES, spawn_attempt,
};
pub use scan::{
    AUDIO_EXTENSIONS, IMAGE_EXTENSIONS, build_inventory, compare_tracks, is_audio_file,
    is_image_file, order_tracks, scan_audio_dir, track_sort_key,
};
pub use state::SupervisorState;
pub use types::{
    AudioTrack, EncodeOptions, EncodeOutcome, EncodePlan, EncodeResult, Fade, FilterChain,
    HardwareEncoderKind, HostCapabilities, ImageAsset, Inventory, Letterbox, QualityPreset,
    QualitySettings, VideoCodec,
};
