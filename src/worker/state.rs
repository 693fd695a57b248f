//! Worker lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`ActionWorker`](crate::worker::ActionWorker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, `start()` not yet called.
    Created,
    /// Registration call in progress.
    Registering,
    /// Consuming the listen channel.
    Listening,
    /// Listen channel dropped; re-registering with backoff.
    Reconnecting,
    /// Shutdown requested; no new assignments are accepted.
    Draining,
    /// Shut down cleanly.
    Stopped,
    /// Registration or reconnect budget exhausted.
    Failed,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        if target == Draining {
            return !self.is_terminal() && *self != Draining;
        }

        matches!(
            (self, target),
            (Created, Registering) |
            (Registering, Listening) | (Registering, Reconnecting) | (Registering, Failed) |
            (Listening, Reconnecting) |
            (Reconnecting, Registering) | (Reconnecting, Failed) |
            (Draining, Stopped)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Registering => "registering",
            Self::Listening => "listening",
            Self::Reconnecting => "reconnecting",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerState::*;

    #[test]
    fn test_happy_path() {
        assert!(Created.can_transition_to(Registering));
        assert!(Registering.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopped));
    }

    #[test]
    fn test_reconnect_cycle() {
        assert!(Listening.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Registering));
        assert!(Registering.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Failed));
        assert!(!Listening.can_transition_to(Failed));
    }

    #[test]
    fn test_any_live_state_can_drain() {
        for state in [Created, Registering, Listening, Reconnecting] {
            assert!(state.can_transition_to(Draining), "{state}");
        }
        assert!(!Draining.can_transition_to(Draining));
        assert!(!Stopped.can_transition_to(Draining));
        assert!(!Failed.can_transition_to(Draining));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Stopped.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Draining.is_terminal());
        assert!(!Failed.can_transition_to(Registering));
        assert!(!Stopped.can_transition_to(Listening));
    }

    #[test]
    fn test_display() {
        assert_eq!(Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&Listening).unwrap(),
            "\"listening\""
        );
    }
}
