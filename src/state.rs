//! Detector lifecycle: Idle → RequestingPermission → Calibrating → Listening → Stopped.
//! Calibration strictly precedes detection; every failure path lands in Stopped.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

/// Lifecycle states of a clap/wake detector instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DetectorState {
    /// Constructed, never started.
    Idle,
    /// Waiting on the platform to grant or deny microphone access.
    RequestingPermission,
    /// Collecting ambient samples; no clap classification yet.
    Calibrating,
    /// Baseline finalized, detection loop running.
    Listening,
    /// Session torn down (explicit stop, error, or never granted).
    Stopped,
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorState::Idle => write!(f, "Idle"),
            DetectorState::RequestingPermission => write!(f, "RequestingPermission"),
            DetectorState::Calibrating => write!(f, "Calibrating"),
            DetectorState::Listening => write!(f, "Listening"),
            DetectorState::Stopped => write!(f, "Stopped"),
        }
    }
}

impl DetectorState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: DetectorState) -> bool {
        matches!(
            (self, next),
            (DetectorState::Idle, DetectorState::RequestingPermission)
                | (DetectorState::Stopped, DetectorState::RequestingPermission) // restart
                | (DetectorState::RequestingPermission, DetectorState::Calibrating)
                | (DetectorState::Calibrating, DetectorState::Listening)
                // Any state can stop: permission denied, device lost, explicit stop
                | (_, DetectorState::Stopped)
        )
    }
}

/// Thread-safe state machine with a watch channel for reactive subscribers.
pub struct StateMachine {
    state: RwLock<DetectorState>,
    state_tx: watch::Sender<DetectorState>,
    state_rx: watch::Receiver<DetectorState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(DetectorState::Idle);
        Self {
            state: RwLock::new(DetectorState::Idle),
            state_tx,
            state_rx,
        }
    }

    /// Current state (non-blocking read).
    pub fn current(&self) -> DetectorState {
        *self.state.read()
    }

    /// Attempt a state transition. Returns Ok(new_state) or Err with reason.
    pub fn transition(&self, next: DetectorState) -> Result<DetectorState, String> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {current} -> {next}");
            warn!("{}", msg);
            return Err(msg);
        }
        *state = next;
        let _ = self.state_tx.send(next);
        info!(from = %current, to = %next, "state_transition");
        Ok(next)
    }

    /// Force transition to Stopped from any state (stop, error, cancel).
    pub fn force_stop(&self) {
        let mut state = self.state.write();
        let prev = *state;
        *state = DetectorState::Stopped;
        let _ = self.state_tx.send(DetectorState::Stopped);
        if prev != DetectorState::Stopped {
            info!(from = %prev, "force_stop");
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<DetectorState> {
        self.state_rx.clone()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), DetectorState::Idle);
        sm.transition(DetectorState::RequestingPermission).unwrap();
        sm.transition(DetectorState::Calibrating).unwrap();
        sm.transition(DetectorState::Listening).unwrap();
        sm.transition(DetectorState::Stopped).unwrap();
        assert_eq!(sm.current(), DetectorState::Stopped);
    }

    #[test]
    fn detection_cannot_precede_calibration() {
        let sm = StateMachine::new();
        sm.transition(DetectorState::RequestingPermission).unwrap();
        assert!(sm.transition(DetectorState::Listening).is_err());
        assert_eq!(sm.current(), DetectorState::RequestingPermission);
    }

    #[test]
    fn live_session_rejects_reentrant_start() {
        // start() gates on this transition; while a session is calibrating
        // or listening a second start must fail and leave the state alone.
        let sm = StateMachine::new();
        sm.transition(DetectorState::RequestingPermission).unwrap();
        sm.transition(DetectorState::Calibrating).unwrap();
        assert!(sm.transition(DetectorState::RequestingPermission).is_err());
        assert_eq!(sm.current(), DetectorState::Calibrating);
        sm.transition(DetectorState::Listening).unwrap();
        assert!(sm.transition(DetectorState::RequestingPermission).is_err());
        assert_eq!(sm.current(), DetectorState::Listening);
    }

    #[test]
    fn restart_allowed_from_stopped() {
        let sm = StateMachine::new();
        sm.force_stop();
        sm.transition(DetectorState::RequestingPermission).unwrap();
        assert_eq!(sm.current(), DetectorState::RequestingPermission);
    }

    #[test]
    fn force_stop_is_idempotent() {
        let sm = StateMachine::new();
        sm.transition(DetectorState::RequestingPermission).unwrap();
        sm.force_stop();
        sm.force_stop();
        sm.force_stop();
        assert_eq!(sm.current(), DetectorState::Stopped);
    }

    #[test]
    fn watch_subscribers_observe_transitions() {
        let sm = StateMachine::new();
        let rx = sm.subscribe();
        sm.transition(DetectorState::RequestingPermission).unwrap();
        assert_eq!(*rx.borrow(), DetectorState::RequestingPermission);
    }
}
