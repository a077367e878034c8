//! Command planning: inventory + options + host capabilities -> engine argv.
//!
//! Everything here is a pure function of its inputs. No probing, no clock,
//! no environment, so two calls with equal inputs give equal plans.

use super::ffmpeg_info::Engine;
use super::types::{
    EncodeOptions, EncodePlan, Fade, FilterChain, HardwareEncoderKind, HostCapabilities,
    Inventory, Letterbox, QualityPreset, QualitySettings, VideoCodec,
};
use std::path::Path;
use std::process::Command;

pub const OUTPUT_WIDTH: u32 = 1920;
pub const OUTPUT_HEIGHT: u32 = 1080;
pub const OUTPUT_FPS: u32 = 30;

/// Longest fade applied at either end
pub const MAX_FADE_S: f64 = 2.0;

const AUDIO_BITRATE: &str = "320k";
const AUDIO_SAMPLE_RATE: &str = "48000";
const AUDIO_CHANNELS: &str = "2";

/// Threads left over after the current load, never below one and never
/// above the core count.
pub fn resolve_thread_count(caps: &HostCapabilities) -> usize {
    let cores = caps.core_count.max(1);
    let idle = 1.0 - caps.load_fraction.clamp(0.0, 1.0);
    let threads = (cores as f64 * idle).floor() as usize;
    threads.clamp(1, cores)
}

pub fn resolve_codec(options: &EncodeOptions, caps: &HostCapabilities) -> VideoCodec {
    match (&caps.hardware_encoder, options.hardware_acceleration()) {
        (Some(kind), true) => VideoCodec::Hardware(kind.clone()),
        _ => VideoCodec::Software,
    }
}

fn even_floor(v: u64) -> u32 {
    let v = v.min(u64::from(u32::MAX)) as u32;
    (v & !1).max(2)
}

/// Fit `width x height` inside the output canvas, preserving aspect ratio,
/// and center it. Integer math only.
pub fn letterbox(width: u32, height: u32) -> Letterbox {
    let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));
    let (cw, ch) = (u64::from(OUTPUT_WIDTH), u64::from(OUTPUT_HEIGHT));

    let (scaled_width, scaled_height) = if w * ch > h * cw {
        // Wider than 16:9: full width, bars top and bottom
        (OUTPUT_WIDTH, even_floor(cw * h / w))
    } else {
        (even_floor(ch * w / h), OUTPUT_HEIGHT)
    };
    let scaled_width = scaled_width.min(OUTPUT_WIDTH);
    let scaled_height = scaled_height.min(OUTPUT_HEIGHT);

    Letterbox {
        scaled_width,
        scaled_height,
        pad_x: (OUTPUT_WIDTH - scaled_width) / 2,
        pad_y: (OUTPUT_HEIGHT - scaled_height) / 2,
    }
}

/// Fade-in at 0 and fade-out ending at `total_s`. Each lasts at most
/// `MAX_FADE_S` and at most half the total, so they never overlap.
pub fn resolve_fades(total_s: f64, enabled: bool) -> (Option<Fade>, Option<Fade>) {
    if !enabled || !total_s.is_finite() || total_s <= 0.0 {
        return (None, None);
    }
    let duration_s = MAX_FADE_S.min(total_s / 2.0);
    (
        Some(Fade {
            start_s: 0.0,
            duration_s,
        }),
        Some(Fade {
            start_s: total_s - duration_s,
            duration_s,
        }),
    )
}

fn seconds(v: f64) -> String {
    format!("{:.3}", v)
}

fn kbps(v: u32) -> String {
    format!("{}k", v)
}

/// `-filter_complex` graph: letterboxed image as `[v]`, concatenated
/// audio inputs as `[a]`.
pub fn filter_graph(chain: &FilterChain, codec: &VideoCodec, track_count: usize) -> String {
    let lb = &chain.letterbox;
    let mut video = vec![
        format!("scale={}:{}", lb.scaled_width, lb.scaled_height),
        format!(
            "pad={}:{}:{}:{}:black",
            OUTPUT_WIDTH, OUTPUT_HEIGHT, lb.pad_x, lb.pad_y
        ),
        "setsar=1".to_string(),
    ];
    if let Some(fade) = &chain.fade_in {
        video.push(format!(
            "fade=t=in:st={}:d={}",
            seconds(fade.start_s),
            seconds(fade.duration_s)
        ));
    }
    if let Some(fade) = &chain.fade_out {
        video.push(format!(
            "fade=t=out:st={}:d={}",
            seconds(fade.start_s),
            seconds(fade.duration_s)
        ));
    }
    match codec {
        VideoCodec::Hardware(HardwareEncoderKind::Vaapi { .. }) => {
            video.push("format=nv12".to_string());
            video.push("hwupload".to_string());
        }
        _ => video.push("format=yuv420p".to_string()),
    }

    // Input 0 is the image, audio starts at 1
    let audio_inputs: String = (1..=track_count).map(|i| format!("[{}:a]", i)).collect();
    format!(
        "[0:v]{}[v];{}concat=n={}:v=0:a=1[a]",
        video.join(","),
        audio_inputs,
        track_count
    )
}

fn x264_preset(effort: u8) -> &'static str {
    match effort {
        0 => "faster",
        1 => "fast",
        2 => "medium",
        _ => "slow",
    }
}

fn nvenc_preset(effort: u8) -> &'static str {
    match effort {
        0 => "p3",
        1 => "p4",
        2 => "p5",
        _ => "p6",
    }
}

fn amf_quality(effort: u8) -> &'static str {
    match effort {
        0 => "speed",
        1 => "balanced",
        _ => "quality",
    }
}

/// Encoder-specific rate control and tuning for the chosen codec
fn video_codec_args(codec: &VideoCodec, settings: QualitySettings) -> Vec<String> {
    let maxrate = kbps(settings.max_bitrate_kbps);
    let bufsize = kbps(settings.max_bitrate_kbps * 2);
    let crf = settings.crf.to_string();

    let args: Vec<&str> = match codec {
        VideoCodec::Software => vec![
            "-preset",
            x264_preset(settings.effort),
            "-crf",
            crf.as_str(),
            "-maxrate",
            maxrate.as_str(),
            "-bufsize",
            bufsize.as_str(),
            "-profile:v",
            "high",
            "-level",
            "4.2",
        ],
        VideoCodec::Hardware(HardwareEncoderKind::VideoToolbox) => vec![
            "-b:v",
            maxrate.as_str(),
            "-maxrate",
            maxrate.as_str(),
            "-bufsize",
            bufsize.as_str(),
            "-profile:v",
            "high",
            "-color_primaries",
            "bt709",
            "-color_trc",
            "bt709",
            "-colorspace",
            "bt709",
        ],
        VideoCodec::Hardware(HardwareEncoderKind::Nvenc) => vec![
            "-preset",
            nvenc_preset(settings.effort),
            "-rc",
            "vbr",
            "-cq",
            crf.as_str(),
            "-b:v",
            "0",
            "-maxrate",
            maxrate.as_str(),
            "-bufsize",
            bufsize.as_str(),
        ],
        VideoCodec::Hardware(HardwareEncoderKind::Qsv) => vec![
            "-preset",
            x264_preset(settings.effort),
            "-global_quality",
            crf.as_str(),
            "-maxrate",
            maxrate.as_str(),
            "-bufsize",
            bufsize.as_str(),
        ],
        VideoCodec::Hardware(HardwareEncoderKind::Vaapi { .. }) => vec![
            "-rc_mode",
            "QVBR",
            "-global_quality",
            crf.as_str(),
            "-b:v",
            maxrate.as_str(),
            "-maxrate",
            maxrate.as_str(),
        ],
        VideoCodec::Hardware(HardwareEncoderKind::Amf) => vec![
            "-quality",
            amf_quality(settings.effort),
            "-rc",
            "vbr_peak",
            "-b:v",
            maxrate.as_str(),
            "-maxrate",
            maxrate.as_str(),
        ],
    };
    args.into_iter().map(str::to_string).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Resolve codec, threads and filters, then lay out the full argv.
pub fn plan(inventory: &Inventory, options: &EncodeOptions, caps: &HostCapabilities) -> EncodePlan {
    let codec = resolve_codec(options, caps);
    let quality: QualityPreset = options.quality();
    let thread_count = resolve_thread_count(caps);
    let total_duration_s = inventory.total_duration_s();
    let (fade_in, fade_out) = resolve_fades(total_duration_s, options.fade_enabled());
    let filter_chain = FilterChain {
        letterbox: letterbox(inventory.image.width, inventory.image.height),
        fade_in,
        fade_out,
    };
    let output_path = options.output_path();

    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y"]
        .into_iter()
        .map(str::to_string)
        .collect();

    if let VideoCodec::Hardware(HardwareEncoderKind::Vaapi { render_device }) = &codec {
        args.push("-vaapi_device".to_string());
        args.push(path_arg(render_device));
    }

    let framerate = OUTPUT_FPS.to_string();
    args.extend(["-loop", "1", "-framerate", framerate.as_str(), "-i"].map(str::to_string));
    args.push(path_arg(&inventory.image.path));
    for track in &inventory.tracks {
        args.push("-i".to_string());
        args.push(path_arg(&track.path));
    }

    args.push("-filter_complex".to_string());
    args.push(filter_graph(&filter_chain, &codec, inventory.tracks.len()));
    args.extend(["-map", "[v]", "-map", "[a]"].map(str::to_string));

    args.push("-c:v".to_string());
    args.push(codec.ffmpeg_name().to_string());
    args.extend(video_codec_args(&codec, quality.settings()));

    args.extend(
        [
            "-c:a",
            "aac",
            "-b:a",
            AUDIO_BITRATE,
            "-ar",
            AUDIO_SAMPLE_RATE,
            "-ac",
            AUDIO_CHANNELS,
        ]
        .map(str::to_string),
    );

    args.extend([
        "-r".to_string(),
        framerate,
        "-t".to_string(),
        seconds(total_duration_s),
        "-threads".to_string(),
        thread_count.to_string(),
    ]);
    args.extend(
        [
            "-movflags",
            "+faststart",
            "-max_muxing_queue_size",
            "9999",
            "-progress",
            "pipe:1",
            "-nostats",
        ]
        .map(str::to_string),
    );
    args.push(path_arg(&output_path));

    EncodePlan {
        codec,
        quality,
        thread_count,
        filter_chain,
        total_duration_s,
        output_path,
        args,
    }
}

/// Engine command ready to spawn (stdio is left to the caller)
pub fn build_ffmpeg_cmd(engine: &Engine, plan: &EncodePlan) -> Command {
    let mut cmd = engine.command();
    cmd.args(&plan.args);
    cmd
}

/// Shell-quoted rendering of the command for dry runs and logs
pub fn format_ffmpeg_cmd(program: &Path, plan: &EncodePlan) -> String {
    std::iter::once(path_arg(program))
        .chain(plan.args.iter().cloned())
        .map(|arg| match shlex::try_quote(&arg) {
            Ok(quoted) => quoted.into_owned(),
            // Only fails on interior NUL bytes, which cannot reach argv anyway
            Err(_) => format!("{:?}", arg),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
