#![cfg(unix)]
// Integration tests for the encode supervisor
//
// These tests drive the supervisor against shell scripts posing as ffmpeg and
// ffprobe, covering fallback, cancellation and the single-request rule.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use stillcast::engine::{
    ChannelReporter, EncodeOutcome, EncodeRequest, EncodeResult, Engine, ErrorKind,
    HardwareEncoderKind, HostCapabilities, ProgressEvent, ProgressReporter, QualityPreset,
    Supervisor, SupervisorConfig, SupervisorState,
};
use tempfile::TempDir;

use crate::common::assertions::*;
use crate::common::fake_engine::*;
use crate::common::helpers::*;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn config_for(kind: FakeFfmpeg) -> SupervisorConfig {
    SupervisorConfig {
        ffmpeg_path: Some(fake_ffmpeg(kind)),
        ffprobe_path: Some(fake_ffprobe()),
        termination_grace: Duration::from_secs(1),
        debug_log: None,
    }
}

fn supervisor_with(
    config: SupervisorConfig,
    caps: HostCapabilities,
) -> (Supervisor, Receiver<ProgressEvent>) {
    let (reporter, rx) = ChannelReporter::new();
    let prober = Arc::new(move |_: &Engine| caps.clone());
    (Supervisor::with_prober(config, Arc::new(reporter), prober), rx)
}

fn nvenc_host() -> HostCapabilities {
    hardware_host(HardwareEncoderKind::Nvenc)
}

fn fallback_count(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Fallback { .. }))
        .count()
}

/// Percentages between fallbacks, one list per attempt
fn percents_per_attempt(events: &[ProgressEvent]) -> Vec<Vec<f64>> {
    let mut attempts = vec![Vec::new()];
    for event in events {
        match event {
            ProgressEvent::Progress { percent, .. } => {
                attempts.last_mut().unwrap().push(*percent)
            }
            ProgressEvent::Fallback { .. } => attempts.push(Vec::new()),
            ProgressEvent::Completed(_) => {}
        }
    }
    attempts
}

fn assert_monotonic(events: &[ProgressEvent]) {
    for percents in percents_per_attempt(events) {
        for pair in percents.windows(2) {
            assert!(pair[0] <= pair[1], "progress went backwards: {:?}", percents);
        }
        for p in percents {
            assert!((0.0..=100.0).contains(&p), "progress out of range: {}", p);
        }
    }
}

fn completed(events: &[ProgressEvent]) -> Vec<&EncodeResult> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Completed(result) => Some(result),
            _ => None,
        })
        .collect()
}

fn failure_message(result: &EncodeResult) -> &str {
    match &result.outcome {
        EncodeOutcome::Failed { message, .. } => message,
        other => panic!("expected failure, got {:?}", other),
    }
}

/// Block until the worker has launched the engine
fn wait_until_running(supervisor: &Supervisor, output: &Path) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while supervisor.state() != SupervisorState::Running || !output.exists() {
        assert!(Instant::now() < deadline, "engine never started");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ============================================================================
// Hardware to software fallback
// ============================================================================

#[test]
fn test_hardware_failure_falls_back_to_software() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, rx) = supervisor_with(config_for(FakeFfmpeg::HardwareFails), nvenc_host());
    let options = options_in(temp_dir.path(), QualityPreset::High, true, true);

    let handle = supervisor
        .start_with_inventory(sample_inventory(&[10.0, 10.0], 1000, 1000), options.clone())
        .unwrap();
    let result = handle.wait();

    assert!(result.success(), "{:?}", result);
    assert!(result.fallback_used);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.output_path(), Some(options.output_path().as_path()));
    assert!(options.output_path().is_file());
    assert_eq!(supervisor.state(), SupervisorState::Idle);

    // The surviving argv is the software one
    let args = recorded_args(&options.output_path());
    assert_flag_value(&args, "-c:v", "libx264");

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(fallback_count(&events), 1);
    assert_eq!(completed(&events), vec![&result]);
    assert_monotonic(&events);
    match events.last() {
        Some(ProgressEvent::Completed(_)) => {}
        other => panic!("completion must be the last event, got {:?}", other),
    }
}

#[test]
fn test_both_attempts_failing_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, rx) = supervisor_with(config_for(FakeFfmpeg::AlwaysFails), nvenc_host());
    let options = options_in(temp_dir.path(), QualityPreset::High, true, true);

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options.clone())
        .unwrap()
        .wait();

    assert_eq!(result.error_kind(), Some(ErrorKind::FailedFatal));
    assert!(result.fallback_used);
    assert_eq!(result.attempts, 2);
    assert!(failure_message(&result).contains("Conversion failed!"));
    assert!(!options.output_path().exists(), "partial output must be removed");

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(fallback_count(&events), 1);
    assert_eq!(completed(&events).len(), 1);
}

#[test]
fn test_software_failure_is_not_retried() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, rx) = supervisor_with(
        config_for(FakeFfmpeg::AlwaysFails),
        software_host(4, 0.0),
    );
    let options = options_in(temp_dir.path(), QualityPreset::Low, true, false);

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options.clone())
        .unwrap()
        .wait();

    assert_eq!(result.error_kind(), Some(ErrorKind::FailedFatal));
    assert!(!result.fallback_used);
    assert_eq!(result.attempts, 1);
    assert!(!options.output_path().exists());
    assert_eq!(fallback_count(&rx.try_iter().collect::<Vec<_>>()), 0);
}

#[test]
fn test_hardware_declined_by_user_runs_software_once() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, rx) = supervisor_with(config_for(FakeFfmpeg::HardwareFails), nvenc_host());
    let options = options_in(temp_dir.path(), QualityPreset::Medium, false, true);

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options.clone())
        .unwrap()
        .wait();

    assert!(result.success(), "{:?}", result);
    assert!(!result.fallback_used);
    assert_eq!(result.attempts, 1);
    assert_eq!(fallback_count(&rx.try_iter().collect::<Vec<_>>()), 0);
}

#[test]
fn test_clean_exit_without_output_is_failure() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, _rx) =
        supervisor_with(config_for(FakeFfmpeg::NoOutput), software_host(2, 0.0));
    let options = options_in(temp_dir.path(), QualityPreset::High, false, true);

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .unwrap()
        .wait();

    assert_eq!(result.error_kind(), Some(ErrorKind::FailedFatal));
    assert!(failure_message(&result).contains("missing or empty"));
}

// ============================================================================
// Cancellation and the single-request rule
// ============================================================================

#[test]
fn test_cancel_stops_engine_and_removes_output() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, rx) = supervisor_with(config_for(FakeFfmpeg::Hangs), software_host(2, 0.0));
    let options = options_in(temp_dir.path(), QualityPreset::High, false, true);
    let output = options.output_path();

    let handle = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .unwrap();
    wait_until_running(&supervisor, &output);

    let cancelled_at = Instant::now();
    handle.cancel();
    let result = handle.wait();

    assert_eq!(result.outcome, EncodeOutcome::Cancelled);
    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert!(cancelled_at.elapsed() < Duration::from_secs(10));
    assert!(!output.exists());
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(!supervisor.cancel(), "nothing left to cancel");

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(completed(&events).len(), 1);
}

#[test]
fn test_second_request_is_rejected_while_running() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, _rx) =
        supervisor_with(config_for(FakeFfmpeg::Hangs), software_host(2, 0.0));
    let options = options_in(temp_dir.path(), QualityPreset::High, false, true);
    let output = options.output_path();

    let handle = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options.clone())
        .unwrap();
    wait_until_running(&supervisor, &output);

    let err = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .err()
        .expect("second request must be rejected");
    assert_eq!(err.kind(), ErrorKind::EncodeAlreadyInProgress);
    assert_eq!(supervisor.state(), SupervisorState::Running);

    assert!(supervisor.cancel());
    assert_eq!(handle.wait().outcome, EncodeOutcome::Cancelled);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[test]
fn test_cancel_on_hardware_path_does_not_fall_back() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, rx) = supervisor_with(config_for(FakeFfmpeg::Hangs), nvenc_host());
    let options = options_in(temp_dir.path(), QualityPreset::High, true, true);
    let output = options.output_path();

    let handle = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .unwrap();
    wait_until_running(&supervisor, &output);
    handle.cancel();
    let result = handle.wait();

    assert_eq!(result.outcome, EncodeOutcome::Cancelled);
    assert_eq!(result.attempts, 1);
    assert!(!result.fallback_used);
    assert!(!output.exists());
    // Only the hardware attempt ever ran
    assert_flag_value(&recorded_args(&output), "-c:v", "h264_nvenc");

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(fallback_count(&events), 0);
    assert_eq!(completed(&events).len(), 1);
}

/// Forwards to a channel and cancels the request as soon as a fallback
/// is announced
struct CancelOnFallback {
    inner: ChannelReporter,
    supervisor: OnceLock<Supervisor>,
}

impl ProgressReporter for CancelOnFallback {
    fn on_progress(&self, percent: f64, message: &str) {
        self.inner.on_progress(percent, message);
    }

    fn on_fallback(&self, message: &str) {
        self.inner.on_fallback(message);
        if let Some(supervisor) = self.supervisor.get() {
            supervisor.cancel();
        }
    }

    fn on_completed(&self, result: &EncodeResult) {
        self.inner.on_completed(result);
    }
}

#[test]
fn test_cancel_between_attempts_skips_retry() {
    let temp_dir = TempDir::new().unwrap();
    let (inner, rx) = ChannelReporter::new();
    let reporter = Arc::new(CancelOnFallback {
        inner,
        supervisor: OnceLock::new(),
    });
    let caps = nvenc_host();
    let supervisor = Supervisor::with_prober(
        config_for(FakeFfmpeg::HardwareFails),
        reporter.clone(),
        Arc::new(move |_: &Engine| caps.clone()),
    );
    let _ = reporter.supervisor.set(supervisor.clone());
    let options = options_in(temp_dir.path(), QualityPreset::High, true, true);

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options.clone())
        .unwrap()
        .wait();

    assert_eq!(result.outcome, EncodeOutcome::Cancelled);
    assert_eq!(result.attempts, 1);
    assert!(!result.fallback_used, "no software attempt was launched");
    assert!(!options.output_path().exists());
    assert_flag_value(&recorded_args(&options.output_path()), "-c:v", "h264_nvenc");
    assert_eq!(supervisor.state(), SupervisorState::Idle);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(fallback_count(&events), 1);
}

// ============================================================================
// Synchronous rejections
// ============================================================================

#[test]
fn test_missing_engine_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let config = SupervisorConfig {
        ffmpeg_path: Some(temp_dir.path().join("no-ffmpeg")),
        ..config_for(FakeFfmpeg::Succeeds)
    };
    let (supervisor, rx) = supervisor_with(config, software_host(2, 0.0));
    let options = options_in(temp_dir.path(), QualityPreset::High, false, true);

    let err = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .err()
        .expect("start must fail");
    assert_eq!(err.kind(), ErrorKind::EngineNotFound);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(rx.try_recv().is_err(), "no events for rejected requests");
}

#[test]
fn test_empty_inventory_and_missing_output_dir() {
    let temp_dir = TempDir::new().unwrap();
    let (supervisor, _rx) =
        supervisor_with(config_for(FakeFfmpeg::Succeeds), software_host(2, 0.0));

    let options = options_in(temp_dir.path(), QualityPreset::High, false, true);
    let err = supervisor
        .start_with_inventory(sample_inventory(&[], 1000, 1000), options)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::NoAudioFiles);

    let options = options_in(&temp_dir.path().join("gone"), QualityPreset::High, false, true);
    let err = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[test]
fn test_launch_failure_leaves_existing_file_alone() {
    let temp_dir = TempDir::new().unwrap();
    let config = SupervisorConfig {
        ffmpeg_path: Some(unlaunchable_ffmpeg()),
        ..config_for(FakeFfmpeg::Succeeds)
    };
    let (supervisor, _rx) = supervisor_with(config, nvenc_host());
    let options = options_in(temp_dir.path(), QualityPreset::High, true, true);
    std::fs::write(options.output_path(), b"earlier render").unwrap();

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options.clone())
        .unwrap()
        .wait();

    assert_eq!(result.error_kind(), Some(ErrorKind::FailedFatal));
    assert!(failure_message(&result).contains("Failed to launch"));
    assert_eq!(result.attempts, 1);
    assert!(!result.fallback_used);
    assert_eq!(
        std::fs::read(options.output_path()).unwrap(),
        b"earlier render".to_vec()
    );
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

// ============================================================================
// Full request through start()
// ============================================================================

fn album(temp_dir: &TempDir) -> (PathBuf, PathBuf) {
    let audio = temp_dir.path().join("album");
    touch_all(&audio, &["10-outro.mp3", "1-track.mp3", "02-intro.mp3", "liner.pdf"]);
    touch_all(temp_dir.path(), &["cover.jpg"]);
    (audio, temp_dir.path().join("cover.jpg"))
}

#[test]
fn test_start_scans_probes_and_encodes_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let (audio_dir, image_path) = album(&temp_dir);
    let out_dir = temp_dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();

    let (supervisor, _rx) =
        supervisor_with(config_for(FakeFfmpeg::Succeeds), software_host(4, 0.5));
    let request = EncodeRequest {
        audio_dir: audio_dir.clone(),
        image_path: image_path.clone(),
        options: options_in(&out_dir, QualityPreset::High, true, true),
    };

    let result = supervisor.start(&request).unwrap().wait();
    assert!(result.success(), "{:?}", result);
    assert_eq!(result.attempts, 1);

    let args = recorded_args(&request.options.output_path());
    let expected: Vec<String> = [
        image_path,
        audio_dir.join("1-track.mp3"),
        audio_dir.join("02-intro.mp3"),
        audio_dir.join("10-outro.mp3"),
    ]
    .iter()
    .map(|p| p.to_string_lossy().to_string())
    .collect();
    assert_eq!(input_args(&args), expected);
    // Three 10 s tracks from the fake ffprobe
    assert_flag_value(&args, "-t", "30.000");
    assert_flag_value(&args, "-threads", "2");
    let graph = get_flag_value(&args, "-filter_complex").unwrap();
    assert!(graph.contains("scale=1080:1080"), "{}", graph);
}

#[test]
fn test_start_without_audio_files() {
    let temp_dir = TempDir::new().unwrap();
    let audio_dir = temp_dir.path().join("empty");
    touch_all(&audio_dir, &["cover.jpg"]);

    let (supervisor, _rx) =
        supervisor_with(config_for(FakeFfmpeg::Succeeds), software_host(2, 0.0));
    let request = EncodeRequest {
        image_path: audio_dir.join("cover.jpg"),
        audio_dir,
        options: options_in(temp_dir.path(), QualityPreset::High, true, true),
    };

    let err = supervisor.start(&request).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NoAudioFiles);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[test]
fn test_debug_log_records_attempts() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("debug.log");
    let config = SupervisorConfig {
        debug_log: Some(log_path.clone()),
        ..config_for(FakeFfmpeg::HardwareFails)
    };
    let (supervisor, _rx) = supervisor_with(config, nvenc_host());
    let options = options_in(temp_dir.path(), QualityPreset::High, true, true);

    let result = supervisor
        .start_with_inventory(sample_inventory(&[10.0], 1000, 1000), options)
        .unwrap()
        .wait();
    assert!(result.success());

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("attempt 1: "), "{}", log);
    assert!(log.contains("h264_nvenc"), "{}", log);
    assert!(log.contains("attempt 1 failed"), "{}", log);
    assert!(log.contains("Cannot load libcuda.so.1"), "{}", log);
    assert!(log.contains("attempt 2: "), "{}", log);
    assert!(log.contains("libx264"), "{}", log);
}
