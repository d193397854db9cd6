//! Detector configuration: decision thresholds, cooldowns, audio-format knobs.
//! Every tunable the classifier consults lives here; nothing is hard-coded at
//! the use site. The host UI owns persistence and hands us the struct.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DetectorError, Result};

/// Full detector configuration. Loudness values are on the 0..~100 scale
/// produced by the analyzer (RMS of the normalized frame, x100).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Gate: when false, `start` is a structured no-op (no device touched).
    pub enabled: bool,
    /// 0.0..=1.0; scales the effective thresholds, adjustable mid-session.
    pub sensitivity: f32,

    /// Minimum jump of the current volume over the rolling recent average.
    pub spike_threshold: f32,
    /// Minimum current-volume / calibrated-baseline ratio.
    pub min_ratio: f32,
    /// Absolute volume floor; quieter frames are never claps.
    pub min_absolute_volume: f32,
    /// Minimum fraction of spectral energy in the upper bins. Distinguishes
    /// sharp claps from low-frequency thumps (door slams, desk bumps).
    pub min_hf_ratio: f32,
    /// Fraction of the spectrum below the "high frequency" split (0.6 means
    /// the top 40% of bins count as high).
    pub hf_split: f32,

    /// Minimum time between two registered claps (debounce).
    pub clap_cooldown_ms: u64,
    /// Claps older than this are pruned from the wake sequence.
    pub wake_window_ms: u64,
    /// Minimum time between two wake firings.
    pub wake_cooldown_ms: u64,
    /// Claps required inside the wake window before a wake fires.
    /// 1 = single-clap policy (default), 2 = double-clap.
    pub claps_to_wake: usize,

    /// Volume history ring capacity (rolling recent average).
    pub history_size: usize,
    /// Ambient samples collected before the baseline is finalized.
    pub calibration_samples: usize,
    /// Spacing between calibration samples.
    pub calibration_interval_ms: u64,

    /// Analysis frame length; must be a power of two.
    pub fft_size: usize,
    /// Detection loop sleep while the ring holds less than a full frame.
    /// Buffered frames are consumed back-to-back without sleeping.
    pub tick_interval_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 0.5,
            spike_threshold: 18.0,
            min_ratio: 2.0,
            min_absolute_volume: 20.0,
            min_hf_ratio: 0.2,
            hf_split: 0.6,
            clap_cooldown_ms: 250,
            wake_window_ms: 600,
            wake_cooldown_ms: 2000,
            claps_to_wake: 1,
            history_size: 6,
            calibration_samples: 20,
            calibration_interval_ms: 50,
            fft_size: 512,
            tick_interval_ms: 16,
            sample_rate: 44100,
            channels: 1,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(DetectorError::Config(format!(
                "sensitivity must be in 0.0..=1.0, got {}",
                self.sensitivity
            )));
        }
        if self.spike_threshold <= 0.0 {
            return Err(DetectorError::Config("spike_threshold must be > 0".into()));
        }
        if self.min_ratio < 1.0 {
            return Err(DetectorError::Config("min_ratio must be >= 1.0".into()));
        }
        if !(0.0..1.0).contains(&self.min_hf_ratio) {
            return Err(DetectorError::Config("min_hf_ratio must be in 0.0..1.0".into()));
        }
        if !(0.0 < self.hf_split && self.hf_split < 1.0) {
            return Err(DetectorError::Config("hf_split must be in (0.0, 1.0)".into()));
        }
        if self.claps_to_wake == 0 {
            return Err(DetectorError::Config("claps_to_wake must be >= 1".into()));
        }
        if self.history_size < 2 {
            return Err(DetectorError::Config("history_size must be >= 2".into()));
        }
        if self.calibration_samples == 0 {
            return Err(DetectorError::Config("calibration_samples must be >= 1".into()));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 64 {
            return Err(DetectorError::Config(format!(
                "fft_size must be a power of two >= 64, got {}",
                self.fft_size
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(DetectorError::Config("tick_interval_ms must be > 0".into()));
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(DetectorError::Config("sample_rate and channels must be > 0".into()));
        }
        Ok(())
    }

    /// Effective thresholds after applying a sensitivity value.
    ///
    /// `scale = 1.5 - sensitivity`, so the configured values apply unchanged
    /// at sensitivity 0.5 and every effective threshold is non-increasing in
    /// sensitivity. The high-frequency gate is a spectral-character test, not
    /// a loudness test, and is left unscaled.
    pub fn tuning(&self, sensitivity: f32) -> Tuning {
        let scale = 1.5 - sensitivity.clamp(0.0, 1.0);
        Tuning {
            spike_threshold: self.spike_threshold * scale,
            min_ratio: (self.min_ratio * scale).max(1.0),
            min_absolute_volume: self.min_absolute_volume * scale,
            min_hf_ratio: self.min_hf_ratio,
        }
    }

    pub fn clap_cooldown(&self) -> Duration {
        Duration::from_millis(self.clap_cooldown_ms)
    }

    pub fn wake_window(&self) -> Duration {
        Duration::from_millis(self.wake_window_ms)
    }

    pub fn wake_cooldown(&self) -> Duration {
        Duration::from_millis(self.wake_cooldown_ms)
    }

    pub fn calibration_interval(&self) -> Duration {
        Duration::from_millis(self.calibration_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Thresholds the classifier actually compares against, after sensitivity
/// scaling. Recomputed every tick so mid-session adjustments take effect
/// without a restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub spike_threshold: f32,
    pub min_ratio: f32,
    pub min_absolute_volume: f32,
    pub min_hf_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        DetectorConfig::default().validate().unwrap();
    }

    #[test]
    fn default_sensitivity_leaves_thresholds_unchanged() {
        let cfg = DetectorConfig::default();
        let tuning = cfg.tuning(0.5);
        assert_eq!(tuning.spike_threshold, cfg.spike_threshold);
        assert_eq!(tuning.min_ratio, cfg.min_ratio);
        assert_eq!(tuning.min_absolute_volume, cfg.min_absolute_volume);
        assert_eq!(tuning.min_hf_ratio, cfg.min_hf_ratio);
    }

    #[test]
    fn higher_sensitivity_never_raises_a_threshold() {
        let cfg = DetectorConfig::default();
        let mut prev = cfg.tuning(0.0);
        for step in 1..=20 {
            let next = cfg.tuning(step as f32 / 20.0);
            assert!(next.spike_threshold <= prev.spike_threshold);
            assert!(next.min_ratio <= prev.min_ratio);
            assert!(next.min_absolute_volume <= prev.min_absolute_volume);
            assert!(next.min_hf_ratio <= prev.min_hf_ratio);
            prev = next;
        }
    }

    #[test]
    fn min_ratio_is_floored_at_unity() {
        let cfg = DetectorConfig {
            min_ratio: 1.0,
            ..Default::default()
        };
        assert_eq!(cfg.tuning(1.0).min_ratio, 1.0);
    }

    #[test]
    fn out_of_range_values_rejected() {
        let bad = DetectorConfig {
            sensitivity: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = DetectorConfig {
            history_size: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = DetectorConfig {
            calibration_samples: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = DetectorConfig {
            fft_size: 500,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
