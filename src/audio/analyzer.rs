//! Per-frame feature extraction: RMS loudness and spectral balance.
//! One analyzer per session; FFT plan and scratch buffers are allocated once,
//! the per-tick path is allocation-free.

use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

/// Features the classifier consumes for one analysis frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFeatures {
    /// RMS of the normalized time-domain frame, scaled to ~0..100.
    pub volume: f32,
    /// Fraction of spectral magnitude in the upper bins (0.0 when silent).
    pub hf_ratio: f32,
}

/// RMS amplitude of a frame of normalized PCM samples.
#[inline]
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| {
        let f = s as f64;
        f * f
    }).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

pub struct FrameAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    scratch: Vec<Complex32>,
    /// First spectrum bin counted as "high frequency".
    hf_start: usize,
    half: usize,
}

impl FrameAnalyzer {
    /// `fft_size` is the frame length (power of two); `hf_split` is the
    /// fraction of bins below the high-frequency boundary (0.6 means the top
    /// 40% of bins count as high).
    pub fn new(fft_size: usize, hf_split: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let hann: Vec<f32> = (0..fft_size)
            .map(|i| {
                let phase = (i as f32) * core::f32::consts::PI * 2.0 / (fft_size as f32);
                0.5 * (1.0 - phase.cos())
            })
            .collect();
        let half = fft_size / 2;
        let hf_start = ((half as f32) * hf_split).floor() as usize;
        Self {
            fft,
            hann,
            scratch: vec![Complex32::default(); fft_size],
            hf_start: hf_start.min(half.saturating_sub(1)),
            half,
        }
    }

    /// Extract loudness and spectral-balance features from one frame.
    /// `frame.len()` must equal the configured FFT size.
    pub fn analyze(&mut self, frame: &[f32]) -> FrameFeatures {
        debug_assert_eq!(frame.len(), self.scratch.len());

        let volume = compute_rms(frame) * 100.0;

        for (slot, (&sample, &w)) in self.scratch.iter_mut().zip(frame.iter().zip(&self.hann)) {
            slot.re = sample * w;
            slot.im = 0.0;
        }
        self.fft.process(&mut self.scratch);

        // Magnitude sums over the one-sided spectrum (DC bin excluded so a
        // constant offset never reads as low-frequency energy).
        let mut total = 0.0f32;
        let mut high = 0.0f32;
        for (bin, c) in self.scratch.iter().enumerate().take(self.half).skip(1) {
            let magnitude = c.norm();
            total += magnitude;
            if bin >= self.hf_start {
                high += magnitude;
            }
        }
        let hf_ratio = if total > 0.0 { high / total } else { 0.0 };

        FrameFeatures { volume, hf_ratio }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 512;

    fn sine(bin: usize) -> Vec<f32> {
        (0..N)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / N as f32).sin())
            .collect()
    }

    #[test]
    fn silence_has_zero_features() {
        let mut analyzer = FrameAnalyzer::new(N, 0.6);
        let features = analyzer.analyze(&vec![0.0; N]);
        assert_eq!(features.volume, 0.0);
        assert_eq!(features.hf_ratio, 0.0);
    }

    #[test]
    fn full_scale_sine_volume_is_rms_times_hundred() {
        let mut analyzer = FrameAnalyzer::new(N, 0.6);
        let features = analyzer.analyze(&sine(4));
        // RMS of a unit sine is 1/sqrt(2) ~= 0.707.
        assert!((features.volume - 70.7).abs() < 1.0, "volume {}", features.volume);
    }

    #[test]
    fn low_frequency_tone_has_low_hf_ratio() {
        let mut analyzer = FrameAnalyzer::new(N, 0.6);
        let features = analyzer.analyze(&sine(5));
        assert!(features.hf_ratio < 0.1, "hf_ratio {}", features.hf_ratio);
    }

    #[test]
    fn high_frequency_tone_has_high_hf_ratio() {
        let mut analyzer = FrameAnalyzer::new(N, 0.6);
        // hf boundary at bin 153 of 256; bin 200 is well above it.
        let features = analyzer.analyze(&sine(200));
        assert!(features.hf_ratio > 0.8, "hf_ratio {}", features.hf_ratio);
    }

    #[test]
    fn dc_offset_does_not_count_as_low_frequency_energy() {
        let mut analyzer = FrameAnalyzer::new(N, 0.6);
        let features = analyzer.analyze(&vec![0.3; N]);
        // Pure DC: some window leakage lands in the lowest bins, but the
        // volume must register while hf stays near zero.
        assert!(features.volume > 25.0);
        assert!(features.hf_ratio < 0.1);
    }
}
