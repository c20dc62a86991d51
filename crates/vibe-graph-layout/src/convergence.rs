//! Multi-phase convergence detection for iterative layouts.
//!
//! The detector moves through four phases:
//!
//! ```text
//! Initial ──warm-up done──▶ FineTune ──deltas small──────────────▶ Finished
//!                              │                                     ▲
//!                              └─stddev keeps rising─▶ Oscillate ────┘
//!                                                  (runs repeat, or mean force tiny)
//! ```
//!
//! Every iteration the layout reports the mean and standard deviation of the
//! per-node force magnitudes. Samples are averaged over a trailing window
//! before they are judged: `initial_smoothing` iterations during warm-up,
//! `fine_tune_smoothing` afterwards.

use std::collections::VecDeque;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Where a layout is in its convergence lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePhase {
    Initial,
    FineTune,
    Oscillate,
    Finished,
}

/// Tunable thresholds and window sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Warm-up samples before any judgement.
    pub initial_samples: usize,
    /// Trailing average length while warming up. 1 disables smoothing.
    pub initial_smoothing: usize,
    /// Trailing average length once warm-up is over.
    pub fine_tune_smoothing: usize,
    /// Rolling window used in the fine-tune phase.
    pub fine_tune_window: usize,
    /// Largest successive stddev change allowed across the window.
    pub fine_tune_stddev_delta: f32,
    /// Largest successive mean-force change allowed across the window.
    pub fine_tune_mean_delta: f32,
    /// Stddev below which fine-tuning finishes immediately. Zero disables it.
    pub minimum_stddev: f32,
    /// Consecutive stddev increases that switch fine-tune to oscillate.
    pub stddev_increases_before_oscillate: usize,
    /// Iterations per oscillate run.
    pub oscillate_sample_size: usize,
    /// Captured runs compared against each other.
    pub oscillate_run_count: usize,
    /// Largest spread between captured runs, in percent of their mean.
    pub oscillate_delta_percent: f32,
    /// Mean force below which an oscillating layout counts as converged.
    pub max_mean_force_for_stop: f32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            initial_samples: 50,
            initial_smoothing: 50,
            fine_tune_smoothing: 10,
            fine_tune_window: 50,
            fine_tune_stddev_delta: 1e-5,
            fine_tune_mean_delta: 1e-5,
            minimum_stddev: 0.0,
            stddev_increases_before_oscillate: 500,
            oscillate_sample_size: 500,
            oscillate_run_count: 5,
            oscillate_delta_percent: 1.0,
            max_mean_force_for_stop: 0.01,
        }
    }
}

/// Per-layout convergence state machine.
#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
    phase: ConvergencePhase,

    /// Raw (mean, stddev) samples feeding the trailing average.
    raw: VecDeque<(f32, f32)>,
    stddevs: VecDeque<f32>,
    means: VecDeque<f32>,
    run_samples: Vec<f32>,
    captured_stddevs: VecDeque<f32>,

    iterations_in_phase: usize,
    increasing_stddev_count: usize,
    previous_stddev: Option<f32>,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Self {
        let window = config.fine_tune_window.max(2);
        let runs = config.oscillate_run_count.max(1);
        let smoothing = config.initial_smoothing.max(config.fine_tune_smoothing).max(1);
        Self {
            config,
            phase: ConvergencePhase::Initial,
            raw: VecDeque::with_capacity(smoothing),
            stddevs: VecDeque::with_capacity(window),
            means: VecDeque::with_capacity(window),
            run_samples: Vec::new(),
            captured_stddevs: VecDeque::with_capacity(runs),
            iterations_in_phase: 0,
            increasing_stddev_count: 0,
            previous_stddev: None,
        }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    pub fn phase(&self) -> ConvergencePhase {
        self.phase
    }

    pub fn finished(&self) -> bool {
        self.phase == ConvergencePhase::Finished
    }

    /// Return to the initial phase and drop every sample.
    pub fn reset(&mut self) {
        self.phase = ConvergencePhase::Initial;
        self.raw.clear();
        self.stddevs.clear();
        self.means.clear();
        self.run_samples.clear();
        self.captured_stddevs.clear();
        self.iterations_in_phase = 0;
        self.increasing_stddev_count = 0;
        self.previous_stddev = None;
    }

    /// Feed one iteration's force statistics and return the resulting phase.
    ///
    /// Non-finite samples are ignored.
    pub fn observe(&mut self, mean: f32, stddev: f32) -> ConvergencePhase {
        if !mean.is_finite() || !stddev.is_finite() || self.finished() {
            return self.phase;
        }

        let (mean, stddev) = self.smooth(mean, stddev);
        match self.phase {
            ConvergencePhase::Initial => self.initial(mean, stddev),
            ConvergencePhase::FineTune => self.fine_tune(mean, stddev),
            ConvergencePhase::Oscillate => self.oscillate(mean, stddev),
            ConvergencePhase::Finished => {}
        }

        self.phase
    }

    /// Rough percentage for progress reporting.
    pub fn progress(&self) -> u8 {
        let fraction = |done: usize, total: usize| done.min(total) as f32 / total.max(1) as f32;
        match self.phase {
            ConvergencePhase::Initial => {
                (25.0 * fraction(self.iterations_in_phase, self.config.initial_samples)) as u8
            }
            ConvergencePhase::FineTune => {
                let f = fraction(self.iterations_in_phase, self.config.fine_tune_window);
                (25.0 + 49.0 * f) as u8
            }
            ConvergencePhase::Oscillate => {
                let f = fraction(self.captured_stddevs.len(), self.config.oscillate_run_count);
                (75.0 + 24.0 * f) as u8
            }
            ConvergencePhase::Finished => 100,
        }
    }

    fn initial(&mut self, mean: f32, stddev: f32) {
        self.push_window(mean, stddev);
        self.previous_stddev = Some(stddev);
        self.iterations_in_phase += 1;

        if self.iterations_in_phase >= self.config.initial_samples {
            self.enter(ConvergencePhase::FineTune);
        }
    }

    fn fine_tune(&mut self, mean: f32, stddev: f32) {
        self.push_window(mean, stddev);
        self.iterations_in_phase += 1;

        match self.previous_stddev {
            Some(previous) if stddev > previous => self.increasing_stddev_count += 1,
            _ => self.increasing_stddev_count = 0,
        }
        self.previous_stddev = Some(stddev);

        if self.increasing_stddev_count >= self.config.stddev_increases_before_oscillate {
            self.enter(ConvergencePhase::Oscillate);
            return;
        }

        if self.config.minimum_stddev > 0.0 && stddev < self.config.minimum_stddev {
            self.enter(ConvergencePhase::Finished);
            return;
        }

        let window = self.config.fine_tune_window.max(2);
        if self.stddevs.len() < window {
            return;
        }

        if max_successive_delta(&self.stddevs) < self.config.fine_tune_stddev_delta
            && max_successive_delta(&self.means) < self.config.fine_tune_mean_delta
        {
            self.enter(ConvergencePhase::Finished);
        }
    }

    fn oscillate(&mut self, mean: f32, stddev: f32) {
        self.iterations_in_phase += 1;

        if mean < self.config.max_mean_force_for_stop {
            self.enter(ConvergencePhase::Finished);
            return;
        }

        self.run_samples.push(stddev);
        if self.run_samples.len() < self.config.oscillate_sample_size.max(1) {
            return;
        }

        // One capture per completed run
        let captured = self.run_samples.iter().sum::<f32>() / self.run_samples.len() as f32;
        self.run_samples.clear();

        let runs = self.config.oscillate_run_count.max(1);
        if self.captured_stddevs.len() == runs {
            self.captured_stddevs.pop_front();
        }
        self.captured_stddevs.push_back(captured);

        if self.captured_stddevs.len() < runs {
            return;
        }

        let max = self.captured_stddevs.iter().copied().map(OrderedFloat).max();
        let min = self.captured_stddevs.iter().copied().map(OrderedFloat).min();
        let average =
            self.captured_stddevs.iter().sum::<f32>() / self.captured_stddevs.len() as f32;

        if let (Some(max), Some(min)) = (max, min) {
            let spread = max.0 - min.0;
            let percent = if average > 0.0 {
                spread / average * 100.0
            } else {
                0.0
            };
            if percent < self.config.oscillate_delta_percent {
                self.enter(ConvergencePhase::Finished);
            }
        }
    }

    /// Record a raw sample and return the trailing average for the current
    /// phase.
    fn smooth(&mut self, mean: f32, stddev: f32) -> (f32, f32) {
        let capacity = self
            .config
            .initial_smoothing
            .max(self.config.fine_tune_smoothing)
            .max(1);
        if self.raw.len() == capacity {
            self.raw.pop_front();
        }
        self.raw.push_back((mean, stddev));

        let length = match self.phase {
            ConvergencePhase::Initial => self.config.initial_smoothing,
            _ => self.config.fine_tune_smoothing,
        }
        .clamp(1, self.raw.len());

        let (sum_mean, sum_stddev) = self
            .raw
            .iter()
            .rev()
            .take(length)
            .fold((0.0, 0.0), |(m, s), (mean, stddev)| (m + mean, s + stddev));
        (sum_mean / length as f32, sum_stddev / length as f32)
    }

    fn push_window(&mut self, mean: f32, stddev: f32) {
        let window = self.config.fine_tune_window.max(2);
        if self.stddevs.len() == window {
            self.stddevs.pop_front();
            self.means.pop_front();
        }
        self.stddevs.push_back(stddev);
        self.means.push_back(mean);
    }

    fn enter(&mut self, phase: ConvergencePhase) {
        self.phase = phase;
        self.iterations_in_phase = 0;
        self.increasing_stddev_count = 0;

        if phase == ConvergencePhase::Oscillate {
            self.run_samples.clear();
            self.captured_stddevs.clear();
        }
    }
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self::new(ConvergenceConfig::default())
    }
}

fn max_successive_delta(samples: &VecDeque<f32>) -> f32 {
    samples
        .iter()
        .zip(samples.iter().skip(1))
        .map(|(a, b)| OrderedFloat((b - a).abs()))
        .max()
        .map(|d| d.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ConvergenceConfig {
        ConvergenceConfig {
            initial_samples: 5,
            initial_smoothing: 1,
            fine_tune_smoothing: 1,
            fine_tune_window: 4,
            stddev_increases_before_oscillate: 6,
            oscillate_sample_size: 3,
            oscillate_run_count: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_warm_up_then_fine_tune() {
        let mut detector = ConvergenceDetector::new(small_config());
        for _ in 0..4 {
            assert_eq!(detector.observe(1.0, 0.5), ConvergencePhase::Initial);
        }
        assert_eq!(detector.observe(1.0, 0.5), ConvergencePhase::FineTune);
    }

    #[test]
    fn test_steady_samples_finish() {
        let mut detector = ConvergenceDetector::new(small_config());
        let mut phase = ConvergencePhase::Initial;
        for _ in 0..20 {
            phase = detector.observe(0.2, 0.1);
            if phase == ConvergencePhase::Finished {
                break;
            }
        }
        assert_eq!(phase, ConvergencePhase::Finished);
        assert!(detector.finished());
        assert_eq!(detector.progress(), 100);
    }

    #[test]
    fn test_changing_samples_do_not_finish() {
        let mut detector = ConvergenceDetector::new(small_config());
        for i in 0..200 {
            // Alternating, never rising for long
            let stddev = if i % 2 == 0 { 1.0 } else { 0.5 };
            detector.observe(1.0 + stddev, stddev);
        }
        assert_eq!(detector.phase(), ConvergencePhase::FineTune);
    }

    #[test]
    fn test_rising_stddev_switches_to_oscillate() {
        let mut detector = ConvergenceDetector::new(small_config());
        for _ in 0..5 {
            detector.observe(1.0, 1.0);
        }
        let mut stddev = 1.0;
        for _ in 0..6 {
            stddev += 0.1;
            detector.observe(1.0, stddev);
        }
        assert_eq!(detector.phase(), ConvergencePhase::Oscillate);
    }

    #[test]
    fn test_repeating_oscillation_finishes() {
        let mut detector = ConvergenceDetector::new(small_config());
        for _ in 0..5 {
            detector.observe(1.0, 1.0);
        }
        let mut stddev = 1.0;
        for _ in 0..6 {
            stddev += 0.1;
            detector.observe(1.0, stddev);
        }
        assert_eq!(detector.phase(), ConvergencePhase::Oscillate);

        // Same pattern every run: 1, 2, 3
        let mut finished_at = None;
        for i in 0..30 {
            let sample = (i % 3 + 1) as f32;
            if detector.observe(5.0, sample) == ConvergencePhase::Finished {
                finished_at = Some(i);
                break;
            }
        }
        // Three runs of three samples
        assert_eq!(finished_at, Some(8));
    }

    #[test]
    fn test_oscillate_escape_on_small_mean_force() {
        let mut detector = ConvergenceDetector::new(small_config());
        for _ in 0..5 {
            detector.observe(1.0, 1.0);
        }
        let mut stddev = 1.0;
        for _ in 0..6 {
            stddev += 0.1;
            detector.observe(1.0, stddev);
        }
        assert_eq!(detector.observe(0.001, 3.0), ConvergencePhase::Finished);
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut detector = ConvergenceDetector::new(small_config());
        for _ in 0..20 {
            detector.observe(0.2, 0.1);
        }
        assert!(detector.finished());
        detector.reset();
        assert_eq!(detector.phase(), ConvergencePhase::Initial);
        assert_eq!(detector.progress(), 0);
        assert_eq!(detector.observe(0.2, 0.1), ConvergencePhase::Initial);
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut detector = ConvergenceDetector::new(small_config());
        for _ in 0..100 {
            detector.observe(f32::NAN, 1.0);
        }
        assert_eq!(detector.phase(), ConvergencePhase::Initial);
        assert_eq!(detector.progress(), 0);
    }

    #[test]
    fn test_minimum_stddev_floor() {
        let mut detector = ConvergenceDetector::new(ConvergenceConfig {
            minimum_stddev: 0.5,
            ..small_config()
        });
        for _ in 0..5 {
            detector.observe(3.0, 2.0);
        }
        assert_eq!(detector.observe(3.0, 0.1), ConvergencePhase::Finished);
    }

    #[test]
    fn test_smoothing_absorbs_alternating_samples() {
        // Alternating samples never settle raw, but their two-sample average does
        let mut detector = ConvergenceDetector::new(ConvergenceConfig {
            initial_smoothing: 2,
            fine_tune_smoothing: 2,
            ..small_config()
        });
        let mut phase = ConvergencePhase::Initial;
        for i in 0..40 {
            let stddev = if i % 2 == 0 { 1.0 } else { 0.5 };
            phase = detector.observe(1.0 + stddev, stddev);
            if phase == ConvergencePhase::Finished {
                break;
            }
        }
        assert_eq!(phase, ConvergencePhase::Finished);
    }

    #[test]
    fn test_smoothing_window_uses_recent_samples() {
        let mut detector = ConvergenceDetector::new(ConvergenceConfig {
            initial_smoothing: 4,
            fine_tune_smoothing: 2,
            ..small_config()
        });
        assert_eq!(detector.smooth(4.0, 4.0), (4.0, 4.0));
        assert_eq!(detector.smooth(2.0, 0.0), (3.0, 2.0));
        detector.phase = ConvergencePhase::FineTune;
        // Only the last two of three samples count now
        assert_eq!(detector.smooth(0.0, 2.0), (1.0, 1.0));
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: ConvergenceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ConvergenceConfig::default());
    }
}
