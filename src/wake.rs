//! Clap classification and wake predicate.
//! Pure logic over (clock, frame features, effective thresholds): baseline
//! calibration, rolling volume history, spike classification, clap debounce,
//! wake-window sequencing, wake cooldown. No I/O, so the whole decision path
//! is unit-testable with a fabricated clock.
//!
//! Wake policy: `claps_to_wake` claps inside `wake_window` fire a wake, with
//! at least `wake_cooldown` between firings (inclusive boundary: elapsed ==
//! cooldown fires). The default of 1 makes a single clap wake; 2 gives the
//! double-clap variant with no extra code path.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info};

use crate::audio::analyzer::FrameFeatures;
use crate::config::{DetectorConfig, Tuning};

/// Minimum history entries before any classification is attempted.
const MIN_HISTORY: usize = 3;

/// Ambient noise floor learned during the calibration phase.
/// Immutable once finalized; discarded with the session.
pub struct BaselineProfile {
    target: usize,
    interval: std::time::Duration,
    samples: Vec<f32>,
    last_sample_at: Option<Instant>,
    baseline: Option<f32>,
}

impl BaselineProfile {
    pub fn new(target: usize, interval: std::time::Duration) -> Self {
        Self {
            target,
            interval,
            samples: Vec::with_capacity(target),
            last_sample_at: None,
            baseline: None,
        }
    }

    /// Record one ambient sample if the calibration cadence allows. Returns
    /// `Some(baseline)` exactly once, on the call that finalizes it.
    pub fn observe(&mut self, now: Instant, volume: f32) -> Option<f32> {
        if self.baseline.is_some() {
            return None;
        }
        let due = match self.last_sample_at {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) >= self.interval,
        };
        if !due {
            return None;
        }
        self.samples.push(volume);
        self.last_sample_at = Some(now);
        if self.samples.len() >= self.target {
            let mean = self.samples.iter().sum::<f32>() / self.samples.len() as f32;
            self.baseline = Some(mean);
            return Some(mean);
        }
        None
    }

    pub fn baseline(&self) -> Option<f32> {
        self.baseline
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }
}

/// Bounded most-recent-N ring of volume samples.
pub struct VolumeHistory {
    ring: VecDeque<f32>,
    capacity: usize,
}

impl VolumeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, volume: f32) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(volume);
    }

    /// Rolling average over all entries except the newest. `None` until the
    /// ring holds at least `MIN_HISTORY` entries.
    pub fn recent_average(&self) -> Option<f32> {
        let n = self.ring.len();
        if n < MIN_HISTORY {
            return None;
        }
        let sum: f32 = self.ring.iter().take(n - 1).sum();
        Some(sum / (n - 1) as f32)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Outcome of feeding one analysis frame to the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Still collecting ambient samples; no classification attempted.
    Calibrating { collected: usize, target: usize },
    /// Calibration finalized on this tick.
    Calibrated { baseline: f32 },
    /// Nothing clap-like in this frame.
    Quiet,
    /// A clap registered but the wake predicate did not fire.
    Clap { volume: f32, hf_ratio: f32 },
    /// A clap registered and fired a wake.
    Wake { volume: f32, hf_ratio: f32 },
}

/// Per-session clap/wake classifier. The caller reads the clock once per tick
/// and passes it in, so cooldown and window checks within one classification
/// all see the same `now`.
pub struct ClapClassifier {
    baseline: BaselineProfile,
    history: VolumeHistory,
    last_clap: Option<Instant>,
    /// Accepted-clap timestamps, pruned to the wake window.
    sequence: Vec<Instant>,
    last_wake: Option<Instant>,
    clap_cooldown: std::time::Duration,
    wake_window: std::time::Duration,
    wake_cooldown: std::time::Duration,
    claps_to_wake: usize,
}

impl ClapClassifier {
    /// `last_wake` seeds the wake cooldown from a previous session so a
    /// stop/start cycle cannot double-fire (instance field, never global).
    pub fn new(config: &DetectorConfig, last_wake: Option<Instant>) -> Self {
        Self {
            baseline: BaselineProfile::new(
                config.calibration_samples,
                config.calibration_interval(),
            ),
            history: VolumeHistory::new(config.history_size),
            last_clap: None,
            sequence: Vec::new(),
            last_wake,
            clap_cooldown: config.clap_cooldown(),
            wake_window: config.wake_window(),
            wake_cooldown: config.wake_cooldown(),
            claps_to_wake: config.claps_to_wake,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.baseline().is_some()
    }

    pub fn last_wake(&self) -> Option<Instant> {
        self.last_wake
    }

    /// Feed one frame. `tuning` carries the sensitivity-scaled thresholds,
    /// recomputed by the caller each tick.
    pub fn observe(&mut self, now: Instant, features: &FrameFeatures, tuning: &Tuning) -> Tick {
        let Some(baseline) = self.baseline.baseline() else {
            if let Some(baseline) = self.baseline.observe(now, features.volume) {
                info!(baseline, "baseline calibrated");
                return Tick::Calibrated { baseline };
            }
            return Tick::Calibrating {
                collected: self.baseline.collected(),
                target: self.baseline.target,
            };
        };

        self.history.push(features.volume);
        let Some(recent_average) = self.history.recent_average() else {
            return Tick::Quiet;
        };

        let volume_increase = features.volume - recent_average;
        let volume_ratio = if baseline > 0.0 {
            features.volume / baseline
        } else {
            1.0
        };

        let is_candidate = volume_increase > tuning.spike_threshold
            && volume_ratio > tuning.min_ratio
            && features.volume > tuning.min_absolute_volume
            && features.hf_ratio > tuning.min_hf_ratio;
        if !is_candidate {
            return Tick::Quiet;
        }

        // Debounce: one physical clap must register once.
        if let Some(last) = self.last_clap {
            if now.saturating_duration_since(last) <= self.clap_cooldown {
                return Tick::Quiet;
            }
        }
        self.last_clap = Some(now);
        self.sequence.push(now);
        self.sequence
            .retain(|&t| now.saturating_duration_since(t) <= self.wake_window);
        debug!(
            volume = features.volume,
            hf_ratio = features.hf_ratio,
            volume_increase,
            volume_ratio,
            "clap registered"
        );

        let cooled = self
            .last_wake
            .map_or(true, |w| now.saturating_duration_since(w) >= self.wake_cooldown);
        if self.sequence.len() >= self.claps_to_wake && cooled {
            self.last_wake = Some(now);
            self.sequence.clear();
            info!(volume = features.volume, "wake fired");
            Tick::Wake {
                volume: features.volume,
                hf_ratio: features.hf_ratio,
            }
        } else {
            Tick::Clap {
                volume: features.volume,
                hf_ratio: features.hf_ratio,
            }
        }
    }
}
