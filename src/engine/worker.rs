// Encode supervisor: one request at a time, hardware first, software fallback

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::core::{
    AttemptExit, EncodeError, EncodeOptions, EncodeOutcome, EncodePlan, EncodeResult, Engine,
    ErrorKind, HostCapabilities, Inventory, SupervisorState, build_ffmpeg_cmd, build_inventory,
    format_ffmpeg_cmd, plan, spawn_attempt, write_debug_log,
};
use super::hardware;
use super::reporter::ProgressReporter;

pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Hardware failures get exactly one software retry
const FALLBACK_RETRIES: u32 = 1;

/// Capability source, swappable so callers can pin what the host reports
pub type Prober = Arc<dyn Fn(&Engine) -> HostCapabilities + Send + Sync>;

/// What to encode: every supported audio file in `audio_dir`, over `image_path`
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub audio_dir: PathBuf,
    pub image_path: PathBuf,
    pub options: EncodeOptions,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Explicit engine binaries; `None` means bundled copy, then PATH
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Time between the termination request and the hard kill on cancel
    pub termination_grace: Duration,
    /// Append-only transcript of commands and engine errors
    pub debug_log: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            debug_log: None,
        }
    }
}

struct Inner {
    config: SupervisorConfig,
    prober: Prober,
    reporter: Arc<dyn ProgressReporter>,
    state: Mutex<SupervisorState>,
    /// Cancel flag of the in-flight request
    current_cancel: Mutex<Option<Arc<AtomicBool>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn transition(&self, request_id: Uuid, next: SupervisorState) {
        let mut state = lock(&self.state);
        let prev = *state;
        if !prev.can_transition_to(next) {
            tracing::warn!(%request_id, "unexpected state change {} -> {}", prev, next);
        }
        *state = next;
        tracing::info!(%request_id, from = %prev, to = %next, "encode state");
    }

    fn debug_log(&self, message: &str) {
        if let Some(path) = &self.config.debug_log {
            if let Err(e) = write_debug_log(path, message) {
                tracing::warn!("Failed to write debug log: {:#}", e);
            }
        }
    }
}

/// Owns the encode state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

/// Caller's view of a started request
pub struct EncodeHandle {
    request_id: Uuid,
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<EncodeResult>,
}

impl EncodeHandle {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Request cancellation. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the request reaches its terminal result
    pub fn wait(self) -> EncodeResult {
        let request_id = self.request_id;
        self.thread.join().unwrap_or_else(|_| EncodeResult {
            request_id,
            outcome: EncodeOutcome::Failed {
                kind: ErrorKind::FailedFatal,
                message: "encode worker panicked".to_string(),
            },
            fallback_used: false,
            attempts: 0,
            elapsed_s: 0.0,
        })
    }
}

/// Everything the worker needs for one request
struct AttemptContext {
    request_id: Uuid,
    engine: Engine,
    inventory: Inventory,
    options: EncodeOptions,
    caps: HostCapabilities,
    plan: EncodePlan,
    retries_remaining: u32,
    cancel: Arc<AtomicBool>,
}

fn output_is_usable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            "Failed to remove partial output: {}",
            e
        ),
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self::with_prober(config, reporter, Arc::new(hardware::probe))
    }

    pub fn with_prober(
        config: SupervisorConfig,
        reporter: Arc<dyn ProgressReporter>,
        prober: Prober,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                prober,
                reporter,
                state: Mutex::new(SupervisorState::Idle),
                current_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *lock(&self.inner.state)
    }

    /// Cancel the in-flight request, if any. Returns whether one existed.
    pub fn cancel(&self) -> bool {
        match lock(&self.inner.current_cancel).as_ref() {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Locate the engine, build the inventory, probe the host and plan, then
    /// hand the encode to a worker thread. Every failure before the first
    /// spawn is returned here.
    pub fn start(&self, request: &EncodeRequest) -> Result<EncodeHandle, EncodeError> {
        let request_id = self.reserve()?;
        let prepared = self.locate_engine().and_then(|engine| {
            let inventory = build_inventory(&request.audio_dir, &request.image_path, &engine)?;
            Ok((engine, inventory))
        });
        match prepared {
            Ok((engine, inventory)) => {
                self.launch(request_id, engine, inventory, request.options.clone())
            }
            Err(e) => Err(self.release(request_id, e)),
        }
    }

    /// Same as `start` with an inventory the caller already built
    pub fn start_with_inventory(
        &self,
        inventory: Inventory,
        options: EncodeOptions,
    ) -> Result<EncodeHandle, EncodeError> {
        let request_id = self.reserve()?;
        match self.locate_engine() {
            Ok(engine) => self.launch(request_id, engine, inventory, options),
            Err(e) => Err(self.release(request_id, e)),
        }
    }

    fn locate_engine(&self) -> Result<Engine, EncodeError> {
        Engine::locate(
            self.inner.config.ffmpeg_path.as_deref(),
            self.inner.config.ffprobe_path.as_deref(),
        )
    }

    /// Idle -> Launching, or `EncodeAlreadyInProgress`
    fn reserve(&self) -> Result<Uuid, EncodeError> {
        let mut state = lock(&self.inner.state);
        if *state != SupervisorState::Idle {
            return Err(EncodeError::EncodeAlreadyInProgress);
        }
        *state = SupervisorState::Launching;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, from = "idle", to = "launching", "encode state");
        Ok(request_id)
    }

    /// Undo `reserve` after a synchronous failure
    fn release(&self, request_id: Uuid, err: EncodeError) -> EncodeError {
        tracing::warn!(%request_id, "encode rejected: {}", err);
        self.inner.transition(request_id, SupervisorState::Idle);
        err
    }

    fn launch(
        &self,
        request_id: Uuid,
        engine: Engine,
        inventory: Inventory,
        options: EncodeOptions,
    ) -> Result<EncodeHandle, EncodeError> {
        if inventory.tracks.is_empty() {
            return Err(self.release(
                request_id,
                EncodeError::NoAudioFiles {
                    dir: PathBuf::new(),
                },
            ));
        }
        if !options.output_dir().is_dir() {
            return Err(self.release(
                request_id,
                EncodeError::InvalidOptions(format!(
                    "output directory {} does not exist",
                    options.output_dir().display()
                )),
            ));
        }

        let caps = (self.inner.prober)(&engine);
        let plan = plan(&inventory, &options, &caps);
        tracing::info!(
            %request_id,
            tracks = inventory.tracks.len(),
            total_s = format!("{:.1}", plan.total_duration_s),
            codec = plan.codec.ffmpeg_name(),
            threads = plan.thread_count,
            "encode planned"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        *lock(&self.inner.current_cancel) = Some(cancel.clone());

        let ctx = AttemptContext {
            request_id,
            engine,
            inventory,
            options,
            caps,
            plan,
            retries_remaining: FALLBACK_RETRIES,
            cancel: cancel.clone(),
        };

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("encode-{}", request_id))
            .spawn(move || {
                let started = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| run_request(&inner, ctx)))
                    .unwrap_or_else(|_| {
                        tracing::error!(%request_id, "encode worker panicked");
                        inner.transition(request_id, SupervisorState::FailedFatal);
                        EncodeResult {
                            request_id,
                            outcome: EncodeOutcome::Failed {
                                kind: ErrorKind::FailedFatal,
                                message: "encode worker panicked".to_string(),
                            },
                            fallback_used: false,
                            attempts: 0,
                            elapsed_s: started.elapsed().as_secs_f64(),
                        }
                    });

                *lock(&inner.current_cancel) = None;
                inner.transition(request_id, SupervisorState::Idle);
                inner.reporter.on_completed(&result);
                result
            });

        match spawned {
            Ok(thread) => Ok(EncodeHandle {
                request_id,
                cancel,
                thread,
            }),
            Err(e) => {
                *lock(&self.inner.current_cancel) = None;
                Err(self.release(
                    request_id,
                    EncodeError::InvalidOptions(format!("could not start encode worker: {}", e)),
                ))
            }
        }
    }
}

/// Worker body: attempts until success, cancellation, or an exhausted
/// fallback budget. Always ends in a terminal state.
fn run_request(inner: &Inner, mut ctx: AttemptContext) -> EncodeResult {
    let started = Instant::now();
    let request_id = ctx.request_id;
    let output_path = ctx.plan.output_path.clone();
    let mut attempts = 0u32;
    let mut fallback_used = false;
    // Output is only ours to delete once one of our engine processes ran
    let mut spawned_any = false;

    let finish = |outcome: EncodeOutcome, attempts: u32, fallback_used: bool| EncodeResult {
        request_id,
        outcome,
        fallback_used,
        attempts,
        elapsed_s: started.elapsed().as_secs_f64(),
    };

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            if spawned_any {
                remove_partial_output(&output_path);
            }
            inner.transition(request_id, SupervisorState::Cancelled);
            return finish(EncodeOutcome::Cancelled, attempts, fallback_used);
        }

        attempts += 1;
        let codec_name = ctx.plan.codec.display_name();
        let command_line = format_ffmpeg_cmd(&ctx.engine.ffmpeg, &ctx.plan);
        tracing::debug!(%request_id, attempt = attempts, "{}", command_line);
        inner.debug_log(&format!("[{}] attempt {}: {}", request_id, attempts, command_line));

        let running = match spawn_attempt(build_ffmpeg_cmd(&ctx.engine, &ctx.plan)) {
            Ok(running) => running,
            Err(e) => {
                let message = format!("Failed to launch {}: {}", ctx.engine.ffmpeg.display(), e);
                tracing::error!(%request_id, "{}", message);
                inner.debug_log(&format!("[{}] {}", request_id, message));
                if spawned_any {
                    remove_partial_output(&output_path);
                }
                inner.transition(request_id, SupervisorState::FailedFatal);
                return finish(
                    EncodeOutcome::Failed {
                        kind: ErrorKind::FailedFatal,
                        message,
                    },
                    attempts,
                    fallback_used,
                );
            }
        };

        spawned_any = true;
        fallback_used = ctx.retries_remaining < FALLBACK_RETRIES;
        inner.transition(request_id, SupervisorState::Running);
        tracing::info!(%request_id, pid = running.id(), codec = %codec_name, "engine started");
        inner
            .reporter
            .on_progress(0.0, &format!("Encoding with {}", codec_name));

        let reporter = inner.reporter.clone();
        let mut on_progress = |percent: f64, speed: Option<f64>| {
            let message = match speed {
                Some(speed) => format!("Encoding with {} ({:.2}x)", codec_name, speed),
                None => format!("Encoding with {}", codec_name),
            };
            reporter.on_progress(percent, &message);
        };
        let outcome = running.supervise(
            ctx.plan.total_duration_s,
            &ctx.cancel,
            inner.config.termination_grace,
            &mut on_progress,
        );

        let failure = match &outcome.exit {
            AttemptExit::Cancelled => {
                remove_partial_output(&output_path);
                inner.transition(request_id, SupervisorState::Cancelled);
                return finish(EncodeOutcome::Cancelled, attempts, fallback_used);
            }
            AttemptExit::Exited(status) if status.success() => {
                if output_is_usable(&output_path) {
                    inner.transition(request_id, SupervisorState::Succeeded);
                    tracing::info!(
                        %request_id,
                        output = %output_path.display(),
                        elapsed_s = format!("{:.1}", started.elapsed().as_secs_f64()),
                        "encode finished"
                    );
                    return finish(
                        EncodeOutcome::Succeeded {
                            output_path: output_path.clone(),
                        },
                        attempts,
                        fallback_used,
                    );
                }
                "engine exited successfully but the output file is missing or empty".to_string()
            }
            AttemptExit::Exited(status) => format!("engine exited with {}", status),
            AttemptExit::Lost(reason) => format!("lost track of engine process: {}", reason),
        };

        let stderr = outcome.stderr_summary();
        let message = match stderr.lines().last() {
            Some(last) => format!("{} using {}: {}", failure, codec_name, last),
            None => format!("{} using {}", failure, codec_name),
        };
        tracing::warn!(%request_id, attempt = attempts, "{}", message);
        inner.debug_log(&format!(
            "[{}] attempt {} failed: {}\n{}",
            request_id, attempts, failure, stderr
        ));
        remove_partial_output(&output_path);

        if ctx.plan.codec.is_hardware() && ctx.retries_remaining > 0 {
            ctx.retries_remaining -= 1;
            inner.transition(request_id, SupervisorState::FailedRecoverable);

            ctx.options = ctx.options.without_hardware();
            ctx.plan = plan(&ctx.inventory, &ctx.options, &ctx.caps);
            inner.reporter.on_fallback(&format!(
                "Hardware encoding with {} failed, retrying with {}",
                codec_name,
                ctx.plan.codec.display_name()
            ));
            // Cancelled while failing over still ends as Cancelled
            if !ctx.cancel.load(Ordering::SeqCst) {
                inner.transition(request_id, SupervisorState::Launching);
            }
            continue;
        }

        inner.transition(request_id, SupervisorState::FailedFatal);
        return finish(
            EncodeOutcome::Failed {
                kind: ErrorKind::FailedFatal,
                message,
            },
            attempts,
            fallback_used,
        );
    }
}
