//! clapwake: microphone clap / wake-transient detection for hands-free voice
//! activation.
//!
//! Pipeline: cpal capture → ring buffer → per-tick RMS + spectral features →
//! baseline-relative spike classification → debounce/cooldown → wake callback.
//! Consumed in-process by a UI layer; no server, no persistence.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod state;
pub mod wake;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use audio::{AudioSession, Controls, SessionContext};

pub use config::{DetectorConfig, Tuning};
pub use error::{DetectorError, Result};
pub use events::DetectorEvent;
pub use metrics::{HistogramSummary, MetricsSummary};
pub use state::DetectorState;

/// A clap/wake detector instance. Owns configuration, lifecycle state, the
/// feedback event bus, and the wake clock that persists across start/stop
/// cycles; the live audio session is owned by the [`DetectorHandle`] that
/// `start` returns.
///
/// Wake policy: with the default `claps_to_wake = 1` a single qualifying clap
/// fires the wake callback; set it to 2 for the double-clap variant.
pub struct ClapWakeDetector {
    config: DetectorConfig,
    state: Arc<state::StateMachine>,
    events: events::EventBus,
    metrics: Arc<metrics::DetectorMetrics>,
    controls: Arc<Controls>,
    /// Last wake instant, instance-scoped so detectors never interfere.
    wake_clock: Arc<RwLock<Option<Instant>>>,
    last_error: Arc<RwLock<Option<DetectorError>>>,
    /// Token for the current (or most recent) session; `stop` cancels it.
    cancel: RwLock<CancellationToken>,
}

impl ClapWakeDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let controls = Arc::new(Controls::new(config.sensitivity));
        Ok(Self {
            config,
            state: Arc::new(state::StateMachine::new()),
            events: events::EventBus::new(),
            metrics: Arc::new(metrics::DetectorMetrics::new()),
            controls,
            wake_clock: Arc::new(RwLock::new(None)),
            last_error: Arc::new(RwLock::new(None)),
            cancel: RwLock::new(CancellationToken::new()),
        })
    }

    /// Acquire the microphone, calibrate, and start detecting. `on_wake` is
    /// invoked on the detection thread for every qualifying wake event and
    /// must be cheap.
    ///
    /// Fails with `PermissionDenied` / `DeviceUnavailable` when the platform
    /// declines (terminal, no retry), `AlreadyRunning` when a session is
    /// already live on this instance, and `Cancelled` when a concurrent
    /// `stop` wins the race against the permission grant. When the config
    /// gate is disabled this is a structured no-op: no device is touched and
    /// the returned handle is already stopped.
    pub fn start<F>(&self, on_wake: F) -> Result<DetectorHandle>
    where
        F: Fn() + Send + 'static,
    {
        if !self.config.enabled {
            info!("detector disabled by config, start is a no-op");
            self.state.force_stop();
            return Ok(DetectorHandle {
                session: None,
                state: Arc::clone(&self.state),
                last_error: Arc::clone(&self.last_error),
            });
        }

        let cancel = CancellationToken::new();
        {
            // Gate + token install under one lock so a concurrent stop()
            // either targets the previous session or this one, never neither.
            let mut guard = self.cancel.write();
            self.state
                .transition(DetectorState::RequestingPermission)
                .map_err(|_| DetectorError::AlreadyRunning)?;
            *guard = cancel.clone();
        }
        *self.last_error.write() = None;

        let ctx = SessionContext {
            config: self.config.clone(),
            controls: Arc::clone(&self.controls),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
            wake_clock: Arc::clone(&self.wake_clock),
            last_error: Arc::clone(&self.last_error),
            on_wake: Box::new(on_wake),
        };

        match audio::start_session(ctx, cancel) {
            Ok(session) => Ok(DetectorHandle {
                session: Some(session),
                state: Arc::clone(&self.state),
                last_error: Arc::clone(&self.last_error),
            }),
            Err(e) => {
                self.state.force_stop();
                *self.last_error.write() = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Request the current session to stop. Callable from any state, any
    /// number of times, and concurrently with an in-flight `start` (which
    /// then releases the freshly granted stream and returns `Cancelled`).
    ///
    /// This only cancels the detection loop. The capture stream lives in the
    /// [`DetectorHandle`], so the microphone stays open until the handle is
    /// stopped or dropped as well.
    pub fn stop(&self) {
        self.cancel.read().cancel();
        match self.state.current() {
            DetectorState::Idle | DetectorState::Stopped => self.state.force_stop(),
            // A live loop or in-flight start observes the token and lands in
            // Stopped on its own.
            _ => {}
        }
    }

    /// Rescale the decision thresholds mid-session; no restart needed.
    /// Higher sensitivity always means easier to trigger.
    pub fn set_sensitivity(&self, value: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(DetectorError::Config(format!(
                "sensitivity must be in 0.0..=1.0, got {value}"
            )));
        }
        self.controls.set_sensitivity(value);
        info!(sensitivity = value, "sensitivity adjusted");
        Ok(())
    }

    pub fn sensitivity(&self) -> f32 {
        self.controls.sensitivity()
    }

    pub fn state(&self) -> DetectorState {
        self.state.current()
    }

    /// Watch channel of lifecycle transitions.
    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<DetectorState> {
        self.state.subscribe()
    }

    /// Feedback stream: calibration, claps, wakes, device loss. Drained by
    /// the host at its own pace.
    pub fn events(&self) -> crossbeam_channel::Receiver<DetectorEvent> {
        self.events.subscribe()
    }

    /// Most recent terminal error, if the session ended abnormally.
    pub fn last_error(&self) -> Option<DetectorError> {
        self.last_error.read().clone()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

/// Owner of a live session's resources (the capture stream is not `Send`, so
/// it lives here, on the thread that called `start`). Dropping the handle
/// stops the session.
pub struct DetectorHandle {
    session: Option<AudioSession>,
    state: Arc<state::StateMachine>,
    last_error: Arc<RwLock<Option<DetectorError>>>,
}

impl DetectorHandle {
    /// Tear the session down: cancel the loop, join the thread, release the
    /// stream, land in `Stopped`. Idempotent.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
        }
        self.state.force_stop();
    }

    pub fn state(&self) -> DetectorState {
        self.state.current()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.current() == DetectorState::Stopped
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn last_error(&self) -> Option<DetectorError> {
        self.last_error.read().clone()
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_start_touches_no_device() {
        let detector = ClapWakeDetector::new(DetectorConfig {
            enabled: false,
            ..Default::default()
        })
        .unwrap();
        let mut handle = detector.start(|| {}).unwrap();
        assert!(handle.is_stopped());
        assert!(handle.session_id().is_none());
        handle.stop();
        handle.stop();
        assert_eq!(detector.state(), DetectorState::Stopped);
        assert!(detector.last_error().is_none());
    }

    #[test]
    fn stop_without_session_is_safe_and_repeatable() {
        let detector = ClapWakeDetector::new(DetectorConfig::default()).unwrap();
        detector.stop();
        detector.stop();
        detector.stop();
        assert_eq!(detector.state(), DetectorState::Stopped);
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let result = ClapWakeDetector::new(DetectorConfig {
            sensitivity: 2.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(DetectorError::Config(_))));
    }

    #[test]
    fn sensitivity_adjustment_is_clamped_and_observable() {
        let detector = ClapWakeDetector::new(DetectorConfig::default()).unwrap();
        detector.set_sensitivity(0.9).unwrap();
        assert_eq!(detector.sensitivity(), 0.9);
        assert!(detector.set_sensitivity(1.5).is_err());
        assert_eq!(detector.sensitivity(), 0.9);
    }
}
