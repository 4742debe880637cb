//! Per-plot elapsed time reconstruction.
//!
//! The SRC-1 `dt` counter restarts near zero at every chamber closure. Each restart
//! pushes the plot's base offset past the previous cycle so the folded axis keeps
//! increasing across cycles.

use serde::{Deserialize, Serialize};

/// Thresholds for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineSettings {
    /// Spacing inserted between two cycles, seconds.
    pub cycle_gap_s: f64,
    /// A drop larger than this starts a new cycle, seconds.
    pub reset_tolerance_s: f64,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            cycle_gap_s: 5.0,
            reset_tolerance_s: 1.0,
        }
    }
}

/// Timeline state for one plot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlotTimeline {
    last_raw: Option<f64>,
    base_offset: f64,
    cycles: u32,
}

impl PlotTimeline {
    /// Fold a raw counter value onto the continuous axis.
    ///
    /// Readings without a counter advance one second past the previous raw value.
    pub fn advance(&mut self, raw: Option<f64>, settings: &TimelineSettings) -> f64 {
        let raw = match (raw, self.last_raw) {
            (Some(raw), _) => raw,
            (None, Some(last)) => last + 1.0,
            (None, None) => 0.0,
        };

        if let Some(last) = self.last_raw {
            if raw < last - settings.reset_tolerance_s {
                self.base_offset += last + settings.cycle_gap_s;
                self.cycles += 1;
                tracing::debug!(
                    last,
                    raw,
                    base = self.base_offset,
                    "measurement cycle restarted"
                );
            }
        }

        self.last_raw = Some(raw);
        self.base_offset + raw
    }

    /// Last raw counter value.
    pub fn last_raw(&self) -> Option<f64> {
        self.last_raw
    }

    /// Offset added to raw values of the current cycle.
    pub fn base_offset(&self) -> f64 {
        self.base_offset
    }

    /// Cycle restarts seen so far.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }
}
