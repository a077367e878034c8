// Progress reporting sinks for encode requests

use std::sync::mpsc::{self, Receiver, Sender};

use super::core::EncodeResult;

/// Receives updates for one encode request, always from the worker thread.
///
/// Within an attempt `on_progress` percentages never go down. A hardware
/// fallback restarts at 0 through `on_fallback`. `on_completed` is called
/// exactly once, after the supervisor is idle again.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, percent: f64, message: &str);

    fn on_fallback(&self, message: &str) {
        self.on_progress(0.0, message);
    }

    fn on_completed(&self, result: &EncodeResult);
}

/// Message form of the reporter callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { percent: f64, message: String },
    Fallback { message: String },
    Completed(EncodeResult),
}

/// Forwards every callback over a channel
pub struct ChannelReporter {
    tx: Sender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_progress(&self, percent: f64, message: &str) {
        let _ = self.tx.send(ProgressEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    fn on_fallback(&self, message: &str) {
        let _ = self.tx.send(ProgressEvent::Fallback {
            message: message.to_string(),
        });
    }

    fn on_completed(&self, result: &EncodeResult) {
        let _ = self.tx.send(ProgressEvent::Completed(result.clone()));
    }
}

/// Discards everything
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn on_progress(&self, _percent: f64, _message: &str) {}

    fn on_completed(&self, _result: &EncodeResult) {}
}
