//! Simulated EGM-4 with an SRC-1 soil respiration chamber attached.
//!
//! Generates live (`M`) records about once per interval. CO2 climbs during each
//! chamber closure and the elapsed counter restarts at zero every `cycle_len`
//! records, which exercises the timeline reset logic of the channel store. Output is
//! handed out in randomly sized fragments so the frame splitter sees realistic
//! partial reads. A bare `Z` marker follows every `dump_marker_every` records.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use super::{Transport, TransportError, DEFAULT_READ_TIMEOUT};
use crate::analysis::flux::{co2_flux_g_m2_h, ChamberGeometry};

/// Knobs for the simulated instrument.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Plot number written into every record.
    pub plot: u8,
    /// Mean time between records.
    pub interval: Duration,
    /// Records per chamber closure before the elapsed counter restarts.
    pub cycle_len: u32,
    /// Emit a bare `Z` after this many records (0 disables).
    pub dump_marker_every: u32,
    /// Ambient CO2 at the start of each closure, ppm.
    pub base_co2: f64,
    /// CO2 increase inside the chamber, ppm per second.
    pub rise_ppm_per_s: f64,
    /// Fixed RNG seed for reproducible output.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            plot: 1,
            interval: Duration::from_secs(1),
            cycle_len: 60,
            dump_marker_every: 50,
            base_co2: 400.0,
            rise_ppm_per_s: 1.5,
            seed: None,
        }
    }
}

/// [`Transport`] that fabricates instrument output.
pub struct SimulatedTransport {
    config: SimulationConfig,
    rng: StdRng,
    open: bool,
    outbox: Vec<u8>,
    next_at: Instant,
    read_timeout: Duration,
    record_count: u32,
    co2: f64,
}

impl SimulatedTransport {
    /// Simulator with the given settings.
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let co2 = config.base_co2;
        Self {
            config,
            rng,
            open: false,
            outbox: Vec::new(),
            next_at: Instant::now(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            record_count: 0,
            co2,
        }
    }

    /// Records generated so far.
    pub fn records_generated(&self) -> u32 {
        self.record_count
    }

    fn jittered_interval(&mut self) -> Duration {
        let factor = self.rng.gen_range(0.8..1.2);
        self.config.interval.mul_f64(factor)
    }

    fn generate_record(&mut self) {
        self.record_count += 1;
        let cycle_len = self.config.cycle_len.max(1);
        let dt = (self.record_count - 1) % cycle_len;

        if dt == 0 {
            self.co2 = self.config.base_co2;
        } else {
            self.co2 += self.config.rise_ppm_per_s + self.rng.gen_range(-3.0..3.0);
        }
        self.co2 = self.co2.clamp(350.0, 800.0);

        let dc = (self.co2 - self.config.base_co2).max(0.0);
        let sr = if dt == 0 {
            0.0
        } else {
            co2_flux_g_m2_h(dc / f64::from(dt), 25.0, 1013.25, &ChamberGeometry::default())
        };

        let line = format_src_record(&SrcRecord {
            plot: self.config.plot,
            record: self.record_count % 10_000,
            co2: self.co2.round() as u32,
            dc: dc.round() as u32,
            dt,
            sr_hundredths: (sr * 100.0).round().clamp(0.0, 9999.0) as u32,
            atmp: 1013,
        });
        self.outbox.extend_from_slice(line.as_bytes());
        self.outbox.push(b'\r');

        let every = self.config.dump_marker_every;
        if every > 0 && self.record_count % every == 0 {
            self.outbox.extend_from_slice(b"Z\r");
        }
    }
}

/// Values for one synthetic SRC-1 record.
#[derive(Debug, Clone, Copy)]
pub struct SrcRecord {
    /// Plot number.
    pub plot: u8,
    /// Record number.
    pub record: u32,
    /// CO2 ppm.
    pub co2: u32,
    /// Delta CO2 ppm.
    pub dc: u32,
    /// Elapsed seconds.
    pub dt: u32,
    /// Respiration rate in hundredths of g/m²/h.
    pub sr_hundredths: u32,
    /// Pressure, mb.
    pub atmp: u32,
}

/// Render a 61-character live SRC-1 record stamped with the host clock.
pub fn format_src_record(r: &SrcRecord) -> String {
    let now = chrono::Local::now();
    format!(
        "M{:02}{:04}{:02}{:02}{:02}{:02}{:05}{:05}{:05}{}{:04}{:04}{:04}0000{:04}08",
        r.plot % 100,
        r.record % 10_000,
        now.day(),
        now.month(),
        now.hour(),
        now.minute(),
        r.co2 % 100_000,
        12,
        215,
        "0".repeat(9),
        r.dc % 10_000,
        r.dt % 10_000,
        r.sr_hundredths % 10_000,
        r.atmp % 10_000,
    )
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&mut self, port: &str) -> Result<(), TransportError> {
        tracing::info!(port, "simulated instrument connected");
        self.open = true;
        self.next_at = Instant::now();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.outbox.clear();
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        if self.outbox.is_empty() {
            let now = Instant::now();
            if now < self.next_at {
                tokio::time::sleep((self.next_at - now).min(self.read_timeout)).await;
                if Instant::now() < self.next_at {
                    return Ok(Vec::new());
                }
            }
            self.generate_record();
            self.next_at = Instant::now() + self.jittered_interval();
        }

        let limit = self.outbox.len().min(max.max(1));
        let n = self.rng.gen_range(1..=limit);
        Ok(self.outbox.drain(..n).collect())
    }

    async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn bytes_available(&self) -> usize {
        self.outbox.len()
    }
}
