// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-stage load tracking for observability.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::error;

/// Smoothing factor of the exponential moving average.
const LOAD_EMA_ALPHA: f32 = 0.05;

pub const SCHEDULER: &str = "Scheduler";
pub const RESAMPLER: &str = "Resampler";
pub const DEMODULATOR: &str = "Demodulator";
pub const FFT_PROCESSOR: &str = "FftProcessor";

/// Exponentially smoothed load per named stage.
///
/// A load of `1.0` means the stage spends as long processing a packet as the
/// packet represents in signal time.
#[derive(Debug, Clone, Default)]
pub struct LoadMonitor {
    loads: Arc<Mutex<HashMap<String, f32>>>,
}

impl LoadMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a new sample into the stage average. The first sample seeds it.
    /// NaN and infinite samples are ignored.
    pub fn update(&self, stage: &str, sample: f32) {
        if !sample.is_finite() {
            return;
        }
        match self.loads.lock() {
            Ok(mut loads) => match loads.get_mut(stage) {
                Some(value) => *value += LOAD_EMA_ALPHA * (sample - *value),
                None => {
                    loads.insert(stage.to_string(), sample);
                }
            },
            Err(e) => error!("load monitor mutex poisoned: {}", e),
        }
    }

    /// Record processing time against the nominal duration of the packet.
    pub fn update_elapsed(&self, stage: &str, elapsed: Duration, packet_ns: f32) {
        if packet_ns > 0.0 {
            self.update(stage, elapsed.as_nanos() as f32 / packet_ns);
        }
    }

    pub fn load(&self, stage: &str) -> f32 {
        self.loads
            .lock()
            .ok()
            .and_then(|loads| loads.get(stage).copied())
            .unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        self.loads
            .lock()
            .map(|loads| loads.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut loads) = self.loads.lock() {
            loads.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ~ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    #[test]
    fn first_sample_initialises() {
        let monitor = LoadMonitor::new();
        monitor.update(SCHEDULER, 0.4);
        assert_approx_eq(monitor.load(SCHEDULER), 0.4, 1e-6, "first sample");
    }

    #[test]
    fn later_samples_are_smoothed() {
        let monitor = LoadMonitor::new();
        monitor.update(DEMODULATOR, 1.0);
        monitor.update(DEMODULATOR, 0.0);
        assert_approx_eq(monitor.load(DEMODULATOR), 0.95, 1e-6, "ema step");
    }

    #[test]
    fn non_finite_samples_are_ignored() {
        let monitor = LoadMonitor::new();
        monitor.update(RESAMPLER, f32::NAN);
        assert!(monitor.snapshot().is_empty());
        monitor.update(RESAMPLER, 0.5);
        monitor.update(RESAMPLER, f32::INFINITY);
        assert_approx_eq(monitor.load(RESAMPLER), 0.5, 1e-6, "after inf");
    }

    #[test]
    fn unknown_stage_reads_zero_and_reset_clears() {
        let monitor = LoadMonitor::new();
        assert_eq!(monitor.load(FFT_PROCESSOR), 0.0);
        monitor.update(FFT_PROCESSOR, 2.0);
        assert_eq!(monitor.snapshot().len(), 1);
        monitor.reset();
        assert!(monitor.snapshot().is_empty());
    }

    #[test]
    fn elapsed_is_normalised_by_packet_time() {
        let monitor = LoadMonitor::new();
        monitor.update_elapsed(SCHEDULER, Duration::from_micros(250), 1_000_000.0);
        assert_approx_eq(monitor.load(SCHEDULER), 0.25, 1e-4, "elapsed");
        monitor.update_elapsed("idle", Duration::from_micros(250), 0.0);
        assert_eq!(monitor.load("idle"), 0.0);
    }
}
