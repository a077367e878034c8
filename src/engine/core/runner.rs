//! One engine attempt: spawn, read both pipes, poll for exit, honor cancel.

use super::progress::{EngineEvent, ProgressTracker, engine_events, parse_line};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

/// How often the worker checks for exit and cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Stderr lines kept for failure messages and the debug transcript
pub const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on waiting for the pipes to drain after exit. A grandchild
/// that inherited the pipes could otherwise hold them open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

enum StreamLine {
    Stdout(EngineEvent),
    Stderr(String),
}

#[derive(Debug)]
pub enum AttemptExit {
    Exited(ExitStatus),
    Cancelled,
    /// try_wait itself failed; the process was killed
    Lost(String),
}

#[derive(Debug)]
pub struct AttemptOutcome {
    pub exit: AttemptExit,
    pub stderr_tail: Vec<String>,
    pub last_percent: f64,
}

impl AttemptOutcome {
    pub fn stderr_summary(&self) -> String {
        self.stderr_tail.join("\n")
    }
}

/// A spawned engine process with its pipe readers running
pub struct RunningAttempt {
    child: Child,
    lines: Receiver<StreamLine>,
}

/// Spawn the engine with stdin closed and both output pipes captured.
pub fn spawn_attempt(mut cmd: Command) -> std::io::Result<RunningAttempt> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // Own process group: a terminal Ctrl-C reaches us, not the engine,
    // and stopping it goes through cancellation
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let (tx, rx) = mpsc::channel();

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        thread::spawn(move || {
            for event in engine_events(BufReader::new(stdout)) {
                if tx.send(StreamLine::Stdout(event)).is_err() {
                    break;
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tx.send(StreamLine::Stderr(line)).is_err() {
                    break;
                }
            }
        });
    }

    Ok(RunningAttempt { child, lines: rx })
}

/// Ask the process to stop. SIGTERM lets ffmpeg finalize and exit on its own.
#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: plain signal delivery to our own child; the pid stays reserved
    // until it is reaped by try_wait/wait below.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(pid, "SIGTERM failed, killing engine process");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.kill();
}

struct StreamState<'a> {
    tracker: ProgressTracker,
    tail: VecDeque<String>,
    on_progress: &'a mut dyn FnMut(f64, Option<f64>),
}

impl StreamState<'_> {
    fn handle(&mut self, line: StreamLine) {
        let event = match line {
            StreamLine::Stdout(event) => event,
            StreamLine::Stderr(text) => {
                let event = parse_line(&text);
                if let EngineEvent::Warning(msg) = &event {
                    tracing::debug!("engine: {}", msg);
                }
                if self.tail.len() == STDERR_TAIL_LINES {
                    self.tail.pop_front();
                }
                self.tail.push_back(text);
                event
            }
        };

        if let Some(percent) = self.tracker.observe(&event) {
            (self.on_progress)(percent, self.tracker.speed());
        }
    }
}

impl RunningAttempt {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Drive the attempt to completion.
    ///
    /// `on_progress(percent, speed)` fires on every forward step of the
    /// percentage. Once `cancel` is set the process gets a termination
    /// request, then a hard kill if it is still alive after `grace`.
    pub fn supervise(
        mut self,
        total_s: f64,
        cancel: &AtomicBool,
        grace: Duration,
        on_progress: &mut dyn FnMut(f64, Option<f64>),
    ) -> AttemptOutcome {
        let mut state = StreamState {
            tracker: ProgressTracker::new(total_s),
            tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
            on_progress,
        };
        let mut stop_requested_at: Option<Instant> = None;
        let mut kill_sent = false;

        let exit = loop {
            loop {
                match self.lines.try_recv() {
                    Ok(line) => state.handle(line),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            if stop_requested_at.is_none() && cancel.load(Ordering::SeqCst) {
                tracing::info!(pid = self.child.id(), "cancel requested, stopping engine");
                request_termination(&mut self.child);
                stop_requested_at = Some(Instant::now());
            }

            if let Some(requested_at) = stop_requested_at {
                if !kill_sent && requested_at.elapsed() >= grace {
                    match self.child.kill() {
                        Ok(()) => tracing::warn!(
                            pid = self.child.id(),
                            "engine ignored termination for {:?}, killed",
                            grace
                        ),
                        Err(e) => tracing::warn!("Failed to force-stop engine process: {}", e),
                    }
                    kill_sent = true;
                }
            }

            match self.child.try_wait() {
                Ok(Some(status)) => {
                    break if stop_requested_at.is_some() {
                        AttemptExit::Cancelled
                    } else {
                        AttemptExit::Exited(status)
                    };
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    tracing::warn!("Failed to poll engine process: {}", e);
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break if stop_requested_at.is_some() {
                        AttemptExit::Cancelled
                    } else {
                        AttemptExit::Lost(e.to_string())
                    };
                }
            }
        };

        // Collect whatever the readers still have buffered
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => state.handle(line),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!("engine pipes still open after exit, not waiting further");
                    break;
                }
            }
        }

        AttemptOutcome {
            exit,
            last_percent: state.tracker.percent(),
            stderr_tail: state.tail.into_iter().collect(),
        }
    }
}
