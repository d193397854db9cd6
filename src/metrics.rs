//! Detection timing metrics. The detector has exactly three timing points,
//! so they are fields, not a string-keyed registry: per-tick analysis cost,
//! calibration duration, and device-acquisition latency. A host reads the
//! p50/p95/p99 summary to verify the loop stays cheap relative to capture.

use std::time::Duration;

use parking_lot::Mutex;

/// Samples retained per histogram; older samples age out.
const SAMPLE_WINDOW: usize = 1024;

/// A sliding-window histogram of durations, recorded in microseconds.
pub struct Histogram {
    window: Mutex<Window>,
}

struct Window {
    samples: Vec<f64>,
    next: usize,
    filled: bool,
}

impl Histogram {
    fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                samples: Vec::with_capacity(SAMPLE_WINDOW),
                next: 0,
                filled: false,
            }),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as f64;
        let mut w = self.window.lock();
        if w.filled {
            let next = w.next;
            w.samples[next] = us;
            w.next = (next + 1) % SAMPLE_WINDOW;
        } else {
            w.samples.push(us);
            if w.samples.len() == SAMPLE_WINDOW {
                w.filled = true;
            }
        }
    }

    /// Percentile in microseconds, `p` in 0..=100. Zero when empty.
    pub fn percentile(&self, p: f64) -> f64 {
        let w = self.window.lock();
        if w.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = w.samples.clone();
        sorted.sort_unstable_by(f64::total_cmp);
        let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.window.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn summary(&self) -> HistogramSummary {
        HistogramSummary {
            p50_us: self.percentile(50.0),
            p95_us: self.percentile(95.0),
            p99_us: self.percentile(99.0),
            count: self.len(),
        }
    }
}

/// The detector's timing points.
pub struct DetectorMetrics {
    /// Feature extraction + classification cost, one sample per frame.
    pub detect_tick: Histogram,
    /// Capture start to baseline finalized.
    pub calibration: Histogram,
    /// `start()` to stream playing (device acquisition latency).
    pub session_start: Histogram,
}

impl DetectorMetrics {
    pub fn new() -> Self {
        Self {
            detect_tick: Histogram::new(),
            calibration: Histogram::new(),
            session_start: Histogram::new(),
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            detect_tick: self.detect_tick.summary(),
            calibration: self.calibration.summary(),
            session_start: self.session_start.summary(),
        }
    }
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistogramSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub detect_tick: HistogramSummary,
    pub calibration: HistogramSummary,
    pub session_start: HistogramSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_known_samples() {
        let h = Histogram::new();
        for v in 1..=100u64 {
            h.record(Duration::from_micros(v));
        }
        assert_eq!(h.percentile(50.0), 50.0);
        assert_eq!(h.percentile(99.0), 99.0);
        assert_eq!(h.percentile(100.0), 100.0);
    }

    #[test]
    fn empty_histogram_reads_zero() {
        let h = Histogram::new();
        assert!(h.is_empty());
        assert_eq!(h.percentile(50.0), 0.0);
        assert_eq!(h.summary().count, 0);
    }

    #[test]
    fn window_ages_out_old_samples() {
        let h = Histogram::new();
        for _ in 0..SAMPLE_WINDOW {
            h.record(Duration::from_micros(1));
        }
        for _ in 0..SAMPLE_WINDOW {
            h.record(Duration::from_micros(1000));
        }
        assert_eq!(h.len(), SAMPLE_WINDOW);
        assert_eq!(h.percentile(50.0), 1000.0);
    }

    #[test]
    fn summary_covers_all_timing_points() {
        let m = DetectorMetrics::new();
        m.session_start.record(Duration::from_micros(250));
        m.calibration.record(Duration::from_millis(1000));
        m.detect_tick.record(Duration::from_micros(40));
        let s = m.summary();
        assert_eq!(s.session_start.count, 1);
        assert_eq!(s.calibration.count, 1);
        assert_eq!(s.detect_tick.count, 1);
        assert!(serde_json::to_string(&s).is_ok());
    }
}
