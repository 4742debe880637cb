//! Live analysis of decoded readings: flux regression and signal statistics.

pub mod flux;
pub mod stability;

pub use flux::{
    co2_flux_g_m2_h, co2_flux_mol_m2_s, co2_flux_umol_m2_s, molar_air_density, ChamberGeometry,
    FluxEstimate, FluxTracker, FluxWindow, RegressionResult,
};
pub use stability::{classify, Co2Statistics, Co2Summary, SignalStability};
