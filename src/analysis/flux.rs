//! Sliding-window CO2 flux regression.
//!
//! A [`FluxWindow`] keeps the most recent `(time, ppm)` pairs and fits an ordinary
//! least squares line through them. The slope (ppm/s) is converted to a surface flux
//! with the ideal gas law and the chamber volume/area ratio:
//!
//! ```text
//! flux [mol/m²/s] = slope * 1e-6 * P / (R * T) * V / A
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::ReadingSink;
use crate::protocol::Reading;

/// Universal gas constant, J/(mol·K).
pub const GAS_CONSTANT: f64 = 8.314462;

/// Molar mass of CO2, g/mol.
pub const CO2_MOLAR_MASS: f64 = 44.01;

/// Default regression window, in samples.
pub const DEFAULT_WINDOW: usize = 30;

/// Temperature assumed before any reading reports one, °C.
pub const DEFAULT_TEMPERATURE_C: f64 = 25.0;

/// Standard sea-level pressure, mb.
pub const STANDARD_PRESSURE_MB: f64 = 1013.25;

// =============================================================================
// Regression
// =============================================================================

/// Result of a least squares fit of concentration against time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    /// ppm per second.
    pub slope: f64,
    /// Fitted concentration at the first sample's time, ppm.
    pub intercept: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
    /// Standard error of the slope.
    pub std_err: f64,
    /// Points in the fit.
    pub n: usize,
}

impl RegressionResult {
    fn degenerate(n: usize) -> Self {
        Self {
            n,
            ..Self::default()
        }
    }
}

/// Fixed-capacity FIFO of `(time, concentration)` pairs.
#[derive(Debug, Clone)]
pub struct FluxWindow {
    capacity: usize,
    points: VecDeque<(f64, f64)>,
    latest: RegressionResult,
}

impl Default for FluxWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl FluxWindow {
    /// Window holding at most `capacity` points (at least 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
            latest: RegressionResult::default(),
        }
    }

    /// Append a point, evicting the oldest when full, and refit.
    pub fn add_point(&mut self, time_s: f64, concentration: f64) -> RegressionResult {
        self.points.push_back((time_s, concentration));
        if self.points.len() > self.capacity {
            self.points.pop_front();
        }
        self.latest = self.compute();
        self.latest
    }

    /// Fit from the last insertion.
    pub fn latest(&self) -> RegressionResult {
        self.latest
    }

    /// Ordinary least squares over the current points.
    ///
    /// Times are shifted to start at zero before fitting. Fewer than two points or
    /// zero time variance give a zero result that still reports `n`. A horizontal
    /// line gets `r_squared = 0`.
    pub fn compute(&self) -> RegressionResult {
        let n = self.points.len();
        if n < 2 {
            return RegressionResult::degenerate(n);
        }

        let t0 = self.points[0].0;
        let nf = n as f64;
        let mean_x = self.points.iter().map(|(t, _)| t - t0).sum::<f64>() / nf;
        let mean_y = self.points.iter().map(|(_, c)| c).sum::<f64>() / nf;

        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for (t, c) in &self.points {
            let dx = (t - t0) - mean_x;
            let dy = c - mean_y;
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }

        if sxx.abs() < f64::EPSILON {
            return RegressionResult::degenerate(n);
        }

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        let denom = sxx * syy;
        let r_squared = if denom.abs() < f64::EPSILON {
            0.0
        } else {
            ((sxy * sxy) / denom).clamp(0.0, 1.0)
        };

        let std_err = if n > 2 {
            let sse = (syy - slope * sxy).max(0.0);
            (sse / (nf - 2.0)).sqrt() / sxx.sqrt()
        } else {
            0.0
        };

        RegressionResult {
            slope,
            intercept,
            r_squared,
            std_err,
            n,
        }
    }

    /// Drop all points.
    pub fn clear(&mut self) {
        self.points.clear();
        self.latest = RegressionResult::default();
    }

    /// Points currently held.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no points are held.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Maximum number of points.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// =============================================================================
// Physical Conversion
// =============================================================================

/// Chamber volume and soil collar area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChamberGeometry {
    /// Headspace volume, litres.
    pub volume_l: f64,
    /// Enclosed surface area, cm².
    pub area_cm2: f64,
}

impl Default for ChamberGeometry {
    /// SRC-1: 1.171 L over a 10 cm diameter collar.
    fn default() -> Self {
        Self {
            volume_l: 1.171,
            area_cm2: 78.5,
        }
    }
}

impl ChamberGeometry {
    /// Volume/area ratio in metres.
    pub fn height_m(&self) -> f64 {
        (self.volume_l / 1000.0) / (self.area_cm2 / 10_000.0)
    }
}

/// Moles of air per cubic metre at the given temperature and pressure.
pub fn molar_air_density(temp_c: f64, pressure_mb: f64) -> f64 {
    (pressure_mb * 100.0) / (GAS_CONSTANT * (temp_c + 273.15))
}

/// CO2 flux in mol/m²/s for a concentration slope in ppm/s.
pub fn co2_flux_mol_m2_s(
    slope_ppm_s: f64,
    temp_c: f64,
    pressure_mb: f64,
    geometry: &ChamberGeometry,
) -> f64 {
    slope_ppm_s * 1e-6 * molar_air_density(temp_c, pressure_mb) * geometry.height_m()
}

/// CO2 flux in g/m²/h, the unit the SRC-1 reports.
pub fn co2_flux_g_m2_h(
    slope_ppm_s: f64,
    temp_c: f64,
    pressure_mb: f64,
    geometry: &ChamberGeometry,
) -> f64 {
    co2_flux_mol_m2_s(slope_ppm_s, temp_c, pressure_mb, geometry) * CO2_MOLAR_MASS * 3600.0
}

/// CO2 flux in µmol/m²/s.
pub fn co2_flux_umol_m2_s(
    slope_ppm_s: f64,
    temp_c: f64,
    pressure_mb: f64,
    geometry: &ChamberGeometry,
) -> f64 {
    co2_flux_mol_m2_s(slope_ppm_s, temp_c, pressure_mb, geometry) * 1e6
}

// =============================================================================
// Live Tracker
// =============================================================================

/// Current flux estimate with the conditions used to compute it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FluxEstimate {
    /// Plot the window belongs to.
    pub plot: Option<u8>,
    /// Underlying fit.
    pub regression: RegressionResult,
    /// g CO2/m²/h.
    pub flux_g_m2_h: f64,
    /// µmol CO2/m²/s.
    pub flux_umol_m2_s: f64,
    /// Temperature used, °C.
    pub temp_c: f64,
    /// Pressure used, mb.
    pub pressure_mb: f64,
}

/// Feeds live readings into a [`FluxWindow`].
///
/// The window restarts when the plot changes or the chamber elapsed counter goes
/// backwards, since a regression across two closures is meaningless.
#[derive(Debug, Clone)]
pub struct FluxTracker {
    window: FluxWindow,
    geometry: ChamberGeometry,
    plot: Option<u8>,
    last_elapsed: Option<f64>,
    temp_c: f64,
    pressure_mb: f64,
}

impl Default for FluxTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, ChamberGeometry::default())
    }
}

impl FluxTracker {
    /// Tracker with the given window size and chamber.
    pub fn new(window: usize, geometry: ChamberGeometry) -> Self {
        Self {
            window: FluxWindow::new(window),
            geometry,
            plot: None,
            last_elapsed: None,
            temp_c: DEFAULT_TEMPERATURE_C,
            pressure_mb: STANDARD_PRESSURE_MB,
        }
    }

    /// Add a measurement reading; other kinds are ignored.
    pub fn observe(&mut self, reading: &Reading) {
        if !reading.kind.is_measurement() {
            return;
        }
        let Some(co2) = reading.co2_ppm() else {
            return;
        };

        let plot = reading.plot();
        let elapsed = reading.elapsed_s();
        let new_cycle = matches!((self.last_elapsed, elapsed), (Some(last), Some(now)) if now < last);
        if plot != self.plot || new_cycle {
            if !self.window.is_empty() {
                tracing::debug!(?plot, previous = ?self.plot, new_cycle, "flux window restarted");
            }
            self.window.clear();
            self.plot = plot;
        }
        self.last_elapsed = elapsed;

        if let Some(temp) = reading.temperature_c() {
            self.temp_c = temp;
        }
        if let Some(pressure) = reading.pressure_mb() {
            self.pressure_mb = pressure;
        }

        self.window.add_point(seconds(reading.received_at), co2);
    }

    /// Latest fit converted to physical units.
    pub fn estimate(&self) -> FluxEstimate {
        let regression = self.window.latest();
        FluxEstimate {
            plot: self.plot,
            regression,
            flux_g_m2_h: co2_flux_g_m2_h(
                regression.slope,
                self.temp_c,
                self.pressure_mb,
                &self.geometry,
            ),
            flux_umol_m2_s: co2_flux_umol_m2_s(
                regression.slope,
                self.temp_c,
                self.pressure_mb,
                &self.geometry,
            ),
            temp_c: self.temp_c,
            pressure_mb: self.pressure_mb,
        }
    }

    /// Forget all points and the current plot.
    pub fn reset(&mut self) {
        self.window.clear();
        self.plot = None;
        self.last_elapsed = None;
    }
}

impl ReadingSink for FluxTracker {
    fn on_reading(&mut self, reading: &Reading) {
        self.observe(reading);
    }
}

fn seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FieldValue, RecordKind};
    use chrono::Duration;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn fewer_than_two_points_is_zero() {
        let mut window = FluxWindow::default();
        assert_eq!(window.compute(), RegressionResult::default());

        let result = window.add_point(10.0, 400.0);
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.r_squared, 0.0);
        assert_eq!(result.n, 1);
    }

    #[test]
    fn identical_times_are_degenerate() {
        let mut window = FluxWindow::default();
        for c in [400.0, 410.0, 420.0] {
            window.add_point(5.0, c);
        }
        let result = window.compute();
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.r_squared, 0.0);
        assert_eq!(result.n, 3);
    }

    #[test]
    fn perfect_line() {
        let mut window = FluxWindow::default();
        for i in 0..10 {
            let t = 1_700_000_000.0 + f64::from(i);
            window.add_point(t, 400.0 + 2.0 * f64::from(i));
        }
        let result = window.latest();
        assert!(approx(result.slope, 2.0, 1e-9));
        assert!(approx(result.intercept, 400.0, 1e-9));
        assert!(approx(result.r_squared, 1.0, 1e-12));
        assert!(approx(result.std_err, 0.0, 1e-9));
        assert_eq!(result.n, 10);
    }

    #[test]
    fn flat_concentration_has_zero_r_squared() {
        let mut window = FluxWindow::default();
        for i in 0..5 {
            window.add_point(f64::from(i), 415.0);
        }
        let result = window.latest();
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.r_squared, 0.0);
    }

    #[test]
    fn noisy_line_has_partial_fit() {
        let mut window = FluxWindow::default();
        let noise = [0.0, 1.5, -1.0, 0.5, -2.0, 1.0];
        for (i, e) in noise.iter().enumerate() {
            window.add_point(i as f64, 400.0 + i as f64 + e);
        }
        let result = window.latest();
        assert!(result.r_squared > 0.0 && result.r_squared < 1.0);
        assert!(result.std_err > 0.0);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = FluxWindow::new(3);
        window.add_point(0.0, 1000.0);
        window.add_point(1.0, 400.0);
        window.add_point(2.0, 401.0);
        window.add_point(3.0, 402.0);
        assert_eq!(window.len(), 3);
        assert!(approx(window.latest().slope, 1.0, 1e-12));
    }

    #[test]
    fn flux_conversion_matches_ideal_gas_law() {
        let geometry = ChamberGeometry::default();
        assert!(approx(molar_air_density(25.0, 1013.25), 40.874_047, 1e-5));
        assert!(approx(geometry.height_m(), 0.149_172, 1e-6));
        assert!(approx(
            co2_flux_g_m2_h(1.0, 25.0, 1013.25, &geometry),
            0.966_026,
            1e-5
        ));
        assert!(approx(
            co2_flux_umol_m2_s(1.0, 25.0, 1013.25, &geometry),
            6.097_262,
            1e-5
        ));
        assert_eq!(co2_flux_g_m2_h(0.0, 25.0, 1013.25, &geometry), 0.0);
    }

    fn measurement(plot: i64, co2: i64, dt: Option<i64>, at: DateTime<Utc>) -> Reading {
        let mut reading = Reading::new(RecordKind::LiveMeasurement, "", at);
        reading.set("plot", FieldValue::Int(plot));
        reading.set("co2", FieldValue::Int(co2));
        reading.set("atmp", FieldValue::Int(1000));
        reading.set("rht", FieldValue::Float(20.0));
        if let Some(dt) = dt {
            reading.set("dt", FieldValue::Int(dt));
        }
        reading
    }

    #[test]
    fn tracker_follows_receive_time_and_conditions() {
        let start = Utc::now();
        let mut tracker = FluxTracker::default();
        for i in 0..5 {
            let at = start + Duration::seconds(i);
            tracker.observe(&measurement(1, 400 + 3 * i, Some(i), at));
        }

        let estimate = tracker.estimate();
        assert_eq!(estimate.plot, Some(1));
        assert_eq!(estimate.regression.n, 5);
        assert!(approx(estimate.regression.slope, 3.0, 1e-4));
        assert_eq!(estimate.pressure_mb, 1000.0);
        assert_eq!(estimate.temp_c, 20.0);
        let expected = co2_flux_g_m2_h(
            estimate.regression.slope,
            20.0,
            1000.0,
            &ChamberGeometry::default(),
        );
        assert!(approx(estimate.flux_g_m2_h, expected, 1e-12));
    }

    #[test]
    fn tracker_restarts_on_plot_change_and_new_cycle() {
        let start = Utc::now();
        let mut tracker = FluxTracker::default();
        tracker.observe(&measurement(1, 400, Some(0), start));
        tracker.observe(&measurement(1, 405, Some(1), start + Duration::seconds(1)));
        tracker.observe(&measurement(2, 500, Some(2), start + Duration::seconds(2)));
        assert_eq!(tracker.estimate().regression.n, 1);
        assert_eq!(tracker.estimate().plot, Some(2));

        tracker.observe(&measurement(2, 510, Some(3), start + Duration::seconds(3)));
        tracker.observe(&measurement(2, 400, Some(0), start + Duration::seconds(4)));
        assert_eq!(tracker.estimate().regression.n, 1);
    }

    #[test]
    fn tracker_ignores_non_measurements() {
        let mut tracker = FluxTracker::default();
        let mut warmup = Reading::new(RecordKind::Warmup, "W,+54", Utc::now());
        warmup.set("co2", FieldValue::Int(400));
        tracker.observe(&warmup);
        assert_eq!(tracker.estimate().regression.n, 0);
    }
}
