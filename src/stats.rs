//! Lap timing and descriptive statistics.

use std::time::{Duration, Instant};

/// Descriptive statistics over timing samples in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl Stats {
    /// Mean, sample standard deviation and range of `samples`.
    ///
    /// Empty input yields all zeros; a single sample has zero deviation.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                mean: 0.0,
                stddev: 0.0,
                min: 0.0,
                max: 0.0,
                count: 0,
            };
        }
        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;
        let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let stddev = if count > 1 {
            let variance =
                samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };
        Self {
            mean,
            stddev,
            min,
            max,
            count,
        }
    }

    /// Elements per second, in millions, at the mean latency.
    pub fn millions_per_sec(&self, elements: usize) -> f64 {
        if self.mean > 0.0 {
            elements as f64 / 1e6 / self.mean
        } else {
            0.0
        }
    }
}

/// Repeated lap measurement; `stats` summarizes the recorded laps.
///
/// `restart` opens a lap, `next_lap` closes it and opens the next one, so
/// setup work between laps can be excluded by calling `restart` after it.
#[derive(Debug)]
pub struct LapTimer {
    start: Instant,
    laps: Vec<Duration>,
}

impl Default for LapTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl LapTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            laps: Vec::new(),
        }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    /// Record the time since the last restart or lap.
    pub fn next_lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now - self.start;
        self.laps.push(lap);
        self.start = now;
        lap
    }

    pub fn stats(&self) -> Stats {
        let samples: Vec<f64> = self.laps.iter().map(Duration::as_secs_f64).collect();
        Stats::from_samples(&samples)
    }
}
