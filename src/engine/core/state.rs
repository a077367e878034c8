use serde::Serialize;
use std::fmt;

/// Lifecycle of the supervisor's single in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    Succeeded,
    /// Hardware attempt failed, software retry pending
    FailedRecoverable,
    FailedFatal,
    Cancelled,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedFatal | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// `Launching -> Idle` covers a start that failed before any process
    /// was spawned; terminal states return to `Idle` once reported.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, Launching)
                | (Launching, Running | FailedFatal | Cancelled | Idle)
                | (Running, Succeeded | FailedRecoverable | FailedFatal | Cancelled)
                | (FailedRecoverable, Launching | Cancelled)
                | (Succeeded | FailedFatal | Cancelled, Idle)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::FailedRecoverable => "failed (recoverable)",
            Self::FailedFatal => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
