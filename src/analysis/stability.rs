//! Running CO2 statistics and signal stability classification.

use std::collections::VecDeque;

use serde::Serialize;

use crate::ingest::ReadingSink;
use crate::protocol::Reading;

/// Readings kept for min/max/average.
pub const HISTORY_LEN: usize = 100;

/// Most recent readings used for the stability check.
pub const STABILITY_SPAN: usize = 10;

/// How steady the recent CO2 signal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalStability {
    /// Fewer than two readings.
    Waiting,
    /// Standard deviation below 5 ppm.
    Stable,
    /// Standard deviation below 20 ppm.
    Variable,
    /// Anything noisier.
    Noisy,
}

/// Classify by the sample standard deviation of the last [`STABILITY_SPAN`] values.
pub fn classify(values: &[f64]) -> SignalStability {
    let recent = &values[values.len().saturating_sub(STABILITY_SPAN)..];
    if recent.len() < 2 {
        return SignalStability::Waiting;
    }
    let n = recent.len() as f64;
    let mean = recent.iter().sum::<f64>() / n;
    let variance = recent.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stdev = variance.sqrt();

    if stdev < 5.0 {
        SignalStability::Stable
    } else if stdev < 20.0 {
        SignalStability::Variable
    } else {
        SignalStability::Noisy
    }
}

/// Summary shown next to the live chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Co2Summary {
    /// Most recent value, ppm.
    pub current: f64,
    /// Mean of the history, ppm.
    pub avg: f64,
    /// Minimum of the history, ppm.
    pub min: f64,
    /// Maximum of the history, ppm.
    pub max: f64,
    /// Recent stability.
    pub stability: SignalStability,
}

/// Bounded CO2 history fed from measurement readings.
#[derive(Debug, Clone, Default)]
pub struct Co2Statistics {
    history: VecDeque<f64>,
}

impl Co2Statistics {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one CO2 value.
    pub fn push(&mut self, co2: f64) {
        self.history.push_back(co2);
        if self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }
    }

    /// Forget the history.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Current stability class.
    pub fn stability(&self) -> SignalStability {
        let values: Vec<f64> = self.history.iter().copied().collect();
        classify(&values)
    }

    /// Statistics over the history, `None` until two values have arrived.
    pub fn summary(&self) -> Option<Co2Summary> {
        if self.history.len() < 2 {
            return None;
        }
        let values: Vec<f64> = self.history.iter().copied().collect();
        let current = *values.last()?;
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Co2Summary {
            current,
            avg,
            min,
            max,
            stability: classify(&values),
        })
    }
}

impl ReadingSink for Co2Statistics {
    fn on_reading(&mut self, reading: &Reading) {
        if !reading.kind.is_measurement() {
            return;
        }
        if let Some(co2) = reading.co2_ppm() {
            self.push(co2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_thresholds() {
        assert_eq!(classify(&[]), SignalStability::Waiting);
        assert_eq!(classify(&[400.0]), SignalStability::Waiting);
        assert_eq!(classify(&[400.0, 401.0, 402.0]), SignalStability::Stable);
        assert_eq!(classify(&[400.0, 420.0]), SignalStability::Variable);
        assert_eq!(classify(&[400.0, 480.0]), SignalStability::Noisy);
    }

    #[test]
    fn only_recent_values_count() {
        let mut values = vec![100.0, 900.0];
        values.extend(std::iter::repeat(400.0).take(STABILITY_SPAN));
        assert_eq!(classify(&values), SignalStability::Stable);
    }

    #[test]
    fn summary_tracks_history() {
        let mut stats = Co2Statistics::new();
        assert!(stats.summary().is_none());
        for v in [410.0, 400.0, 420.0] {
            stats.push(v);
        }
        let summary = stats.summary().unwrap();
        assert_eq!(summary.current, 420.0);
        assert_eq!(summary.min, 400.0);
        assert_eq!(summary.max, 420.0);
        assert_eq!(summary.avg, 410.0);
        assert_eq!(summary.stability, SignalStability::Variable);
    }

    #[test]
    fn history_is_bounded() {
        let mut stats = Co2Statistics::new();
        for i in 0..(HISTORY_LEN + 5) {
            stats.push(i as f64);
        }
        assert_eq!(stats.summary().unwrap().min, 5.0);
    }
}
