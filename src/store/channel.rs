//! Display channels and their metadata.

use serde::{Deserialize, Serialize};

use crate::protocol::ProbeFamily;

/// A plottable quantity extracted from measurement readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Raw CO2, ppm.
    Co2,
    /// Water vapour, mb.
    H2o,
    /// Photosynthetically active radiation, µmol/m²/s.
    Par,
    /// Chamber relative humidity, %.
    Rh,
    /// Soil or chamber temperature, °C.
    Temp,
    /// CO2 change since chamber closure, ppm.
    DeltaCo2,
    /// Soil respiration rate, g/m²/h.
    SoilResp,
    /// Atmospheric pressure, mb.
    Pressure,
    /// Elapsed time since chamber closure, s.
    DeltaTime,
}

impl Channel {
    /// Every channel, in display order.
    pub const ALL: [Channel; 9] = [
        Channel::Co2,
        Channel::H2o,
        Channel::Par,
        Channel::Rh,
        Channel::Temp,
        Channel::DeltaCo2,
        Channel::SoilResp,
        Channel::Pressure,
        Channel::DeltaTime,
    ];

    /// Channels an analyzer without a chamber reports.
    pub const IRGA: [Channel; 3] = [Channel::Co2, Channel::H2o, Channel::Pressure];

    /// Reading field feeding this channel.
    pub fn field(self) -> &'static str {
        match self {
            Channel::Co2 => "co2",
            Channel::H2o => "h2o",
            Channel::Par => "par",
            Channel::Rh => "rh",
            Channel::Temp => "temp",
            Channel::DeltaCo2 => "dc",
            Channel::SoilResp => "sr",
            Channel::Pressure => "atmp",
            Channel::DeltaTime => "dt",
        }
    }

    /// Short key used for channel selection.
    pub fn key(self) -> &'static str {
        match self {
            Channel::Co2 => "cr",
            Channel::H2o => "hr",
            Channel::Par => "par",
            Channel::Rh => "rh",
            Channel::Temp => "temp",
            Channel::DeltaCo2 => "dc",
            Channel::SoilResp => "sr",
            Channel::Pressure => "atmp",
            Channel::DeltaTime => "dt",
        }
    }

    /// Look a channel up by its short key.
    pub fn from_key(key: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Human readable name.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Co2 => "CO2 Raw",
            Channel::H2o => "H2O",
            Channel::Par => "PAR",
            Channel::Rh => "%RH",
            Channel::Temp => "Temp",
            Channel::DeltaCo2 => "Delta CO2",
            Channel::SoilResp => "Soil Resp",
            Channel::Pressure => "ATMP",
            Channel::DeltaTime => "DT",
        }
    }

    /// Unit string.
    pub fn unit(self) -> &'static str {
        match self {
            Channel::Co2 | Channel::DeltaCo2 => "ppm",
            Channel::H2o | Channel::Pressure => "mb",
            Channel::Par => "µmol/m²/s",
            Channel::Rh => "%",
            Channel::Temp => "°C",
            Channel::SoilResp => "g/m²/hr",
            Channel::DeltaTime => "s",
        }
    }

    /// Range a healthy instrument normally reports, for axis defaults.
    pub fn typical_range(self) -> (f64, f64) {
        match self {
            Channel::Co2 | Channel::Par => (0.0, 2000.0),
            Channel::H2o => (0.0, 50.0),
            Channel::Rh => (0.0, 100.0),
            Channel::Temp => (-10.0, 50.0),
            Channel::DeltaCo2 => (-500.0, 500.0),
            Channel::SoilResp => (-100.0, 100.0),
            Channel::Pressure => (900.0, 1100.0),
            Channel::DeltaTime => (0.0, 200.0),
        }
    }

    /// Channels worth showing for a probe family.
    pub fn for_family(family: ProbeFamily) -> &'static [Channel] {
        match family {
            ProbeFamily::SoilRespiration => &Channel::ALL,
            ProbeFamily::Irga => &Channel::IRGA,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label(), self.unit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_key(channel.key()), Some(channel));
        }
        assert_eq!(Channel::from_key("nope"), None);
    }

    #[test]
    fn family_channel_sets() {
        assert_eq!(Channel::for_family(ProbeFamily::Irga).len(), 3);
        assert!(Channel::for_family(ProbeFamily::SoilRespiration).contains(&Channel::SoilResp));
    }
}
