//! Ctrl-C handling for the foreground encode.
//!
//! The handler only records the interrupt; the encode loop turns it into a
//! cancellation so the engine is stopped and the partial file removed.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT to the flag instead of terminating the process
#[cfg(unix)]
pub fn install() {
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe
    let previous = unsafe { libc::signal(libc::SIGINT, handler) };
    if previous == libc::SIG_ERR {
        tracing::warn!("Could not install Ctrl-C handler");
    }
}

#[cfg(not(unix))]
pub fn install() {}

/// Whether Ctrl-C was pressed since the last call
pub fn take() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}
