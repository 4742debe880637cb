//! Probe-specific field layouts for the variable region of measurement records.
//!
//! Each accessory attached to the EGM-4 writes a different set of values after the
//! fixed 30-character header. The registry maps the two-digit probe code found at the
//! end of every record to an ordered list of [`FieldDescriptor`]s. Unknown codes fall
//! back to the generic five auxiliary channels.
//!
//! The SRC-1 soil respiration chamber pads the middle of its record inconsistently,
//! so its analytic fields are located by counting back from the end of the line.
//! Those offsets are reverse-engineered; they live in [`SrcLayout`] and can be
//! overridden from configuration.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::reading::FieldValue;

/// First character of the probe-specific region.
pub const VARIABLE_REGION_START: usize = 30;

/// Probe code used when the record's code cannot be read.
pub const GENERIC_PROBE_CODE: u8 = 0;

static STANDARD_REGISTRY: Lazy<Arc<FieldRegistry>> =
    Lazy::new(|| Arc::new(FieldRegistry::new(&SrcLayout::default())));

/// Where a field's window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// Absolute character offset from the start of the record.
    Start(usize),
    /// Characters counted back from the end of the record.
    End(usize),
}

/// How the characters of a field become a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Signed integer.
    Integer,
    /// Fixed point, one implied decimal.
    Tenths,
    /// Fixed point, two implied decimals.
    Hundredths,
    /// Raw text, kept as-is.
    Text,
}

impl Conversion {
    /// Convert the field text, or `None` when it does not parse.
    pub fn apply(self, text: &str) -> Option<FieldValue> {
        let trimmed = text.trim();
        match self {
            Conversion::Integer => parse_int(trimmed).map(FieldValue::Int),
            Conversion::Tenths => parse_int(trimmed).map(|v| FieldValue::Float(v as f64 / 10.0)),
            Conversion::Hundredths => {
                parse_int(trimmed).map(|v| FieldValue::Float(v as f64 / 100.0))
            }
            Conversion::Text => Some(FieldValue::Text(text.to_string())),
        }
    }

    /// Value stored when the field is present but unparseable.
    pub fn zero(self) -> FieldValue {
        match self {
            Conversion::Integer => FieldValue::Int(0),
            Conversion::Tenths | Conversion::Hundredths => FieldValue::Float(0.0),
            Conversion::Text => FieldValue::Text(String::new()),
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('+').unwrap_or(text);
    digits.parse::<i64>().ok()
}

/// One field of a probe layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Key under which the decoded value is stored.
    pub name: &'static str,
    /// Start of the window.
    pub offset: Offset,
    /// Window width in characters.
    pub width: usize,
    /// Value conversion.
    pub conversion: Conversion,
}

impl FieldDescriptor {
    const fn forward(name: &'static str, start: usize, width: usize, conversion: Conversion) -> Self {
        Self {
            name,
            offset: Offset::Start(start),
            width,
            conversion,
        }
    }

    const fn from_end(name: &'static str, back: usize, width: usize, conversion: Conversion) -> Self {
        Self {
            name,
            offset: Offset::End(back),
            width,
            conversion,
        }
    }

    /// Character range of this field in a record of `len` characters.
    ///
    /// Returns `None` when the record is too short to contain the window. End-anchored
    /// windows must also fall inside the variable region so a short record never
    /// aliases header characters.
    pub fn span(&self, len: usize) -> Option<Range<usize>> {
        let start = match self.offset {
            Offset::Start(start) => start,
            Offset::End(back) => {
                let start = len.checked_sub(back)?;
                if start < VARIABLE_REGION_START {
                    return None;
                }
                start
            }
        };
        let end = start.checked_add(self.width)?;
        (end <= len).then_some(start..end)
    }
}

/// Known accessories, keyed by the two-digit code at the end of each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeType {
    /// Analyzer only, five auxiliary inputs.
    Irga,
    /// STP-1 soil temperature probe.
    Stp1,
    /// HTR-2 / PAR-temperature probe.
    Htr2,
    /// HTR-1 probe.
    Htr1,
    /// PMR-4 porometer.
    Pmr4,
    /// SRC-1 soil respiration chamber.
    Src1,
    /// CPY-3 canopy assimilation chamber / CFX-1 open flux system.
    Cpy3,
    /// Unrecognized code, decoded with the generic layout.
    Other(u8),
}

/// Broad grouping used to choose display channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeFamily {
    /// Closed chamber reporting delta CO2, elapsed time and respiration rate.
    SoilRespiration,
    /// Plain gas analyzer, optionally with environmental sensors.
    Irga,
}

impl ProbeType {
    /// Map a probe code to its accessory.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ProbeType::Irga,
            1 => ProbeType::Stp1,
            2 => ProbeType::Htr2,
            3 => ProbeType::Htr1,
            7 => ProbeType::Pmr4,
            8 => ProbeType::Src1,
            11 => ProbeType::Cpy3,
            other => ProbeType::Other(other),
        }
    }

    /// Code written by the instrument for this accessory.
    pub fn code(self) -> u8 {
        match self {
            ProbeType::Irga => 0,
            ProbeType::Stp1 => 1,
            ProbeType::Htr2 => 2,
            ProbeType::Htr1 => 3,
            ProbeType::Pmr4 => 7,
            ProbeType::Src1 => 8,
            ProbeType::Cpy3 => 11,
            ProbeType::Other(code) => code,
        }
    }

    /// Short label as printed on the accessory.
    pub fn label(self) -> &'static str {
        match self {
            ProbeType::Irga => "IRGA",
            ProbeType::Stp1 => "STP-1",
            ProbeType::Htr2 => "HTR-2",
            ProbeType::Htr1 => "HTR-1",
            ProbeType::Pmr4 => "PMR-4",
            ProbeType::Src1 => "SRC-1",
            ProbeType::Cpy3 => "CPY-3",
            ProbeType::Other(_) => "unknown",
        }
    }

    /// Display grouping for this accessory. Only the SRC-1 chamber gets the
    /// respiration channel set.
    pub fn family(self) -> ProbeFamily {
        match self {
            ProbeType::Src1 => ProbeFamily::SoilRespiration,
            _ => ProbeFamily::Irga,
        }
    }
}

/// End-anchored offsets for the SRC-1 chamber.
///
/// Each value is the number of characters counted back from the end of the record to
/// the first character of a four-character field. The defaults are the offsets
/// validated against captured instrument records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcLayout {
    /// Label recorded in logs so captured data can be traced to an offset table.
    #[serde(default = "default_src_version")]
    pub version: String,
    /// Delta CO2, ppm.
    #[serde(default = "default_dc_from_end")]
    pub dc_from_end: usize,
    /// Elapsed time since chamber closure, seconds.
    #[serde(default = "default_dt_from_end")]
    pub dt_from_end: usize,
    /// Soil respiration rate, hundredths of g/m²/h.
    #[serde(default = "default_sr_from_end")]
    pub sr_from_end: usize,
    /// Atmospheric pressure, mb.
    #[serde(default = "default_atmp_from_end")]
    pub atmp_from_end: usize,
}

/// Width of every end-anchored field.
pub const END_FIELD_WIDTH: usize = 4;

fn default_src_version() -> String {
    "record-tests-v1".to_string()
}

fn default_dc_from_end() -> usize {
    22
}

fn default_dt_from_end() -> usize {
    18
}

fn default_sr_from_end() -> usize {
    14
}

fn default_atmp_from_end() -> usize {
    6
}

impl Default for SrcLayout {
    fn default() -> Self {
        Self {
            version: default_src_version(),
            dc_from_end: default_dc_from_end(),
            dt_from_end: default_dt_from_end(),
            sr_from_end: default_sr_from_end(),
            atmp_from_end: default_atmp_from_end(),
        }
    }
}

impl SrcLayout {
    /// Check that every window fits before the two-character probe code.
    pub fn validate(&self) -> Result<(), String> {
        let min = END_FIELD_WIDTH + 2;
        for (name, back) in [
            ("dc_from_end", self.dc_from_end),
            ("dt_from_end", self.dt_from_end),
            ("sr_from_end", self.sr_from_end),
            ("atmp_from_end", self.atmp_from_end),
        ] {
            if back < min {
                return Err(format!(
                    "layout.src.{} = {} overlaps the probe code (minimum {})",
                    name, back, min
                ));
            }
        }
        Ok(())
    }
}

/// Immutable lookup from probe code to field layout.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    layouts: HashMap<u8, Vec<FieldDescriptor>>,
    generic: Vec<FieldDescriptor>,
    src_version: String,
}

impl FieldRegistry {
    /// Build the registry with the given SRC-1 offset table.
    pub fn new(src: &SrcLayout) -> Self {
        use Conversion::{Hundredths, Integer, Tenths, Text};
        use FieldDescriptor as F;

        let atmp = F::from_end("atmp", src.atmp_from_end, END_FIELD_WIDTH, Integer);

        let generic = vec![
            F::forward("aux1", 30, 4, Integer),
            F::forward("aux2", 34, 4, Integer),
            F::forward("aux3", 38, 4, Integer),
            F::forward("aux4", 42, 4, Integer),
            F::forward("aux5", 46, 4, Integer),
            atmp.clone(),
        ];

        let par_rh_temp = [
            F::forward("par", 30, 4, Integer),
            F::forward("rh", 34, 4, Tenths),
            F::forward("temp", 38, 4, Tenths),
        ];

        let mut layouts = HashMap::new();
        layouts.insert(0, generic.clone());

        let mut stp1 = par_rh_temp.to_vec();
        stp1.push(F::forward("aux5", 46, 4, Integer));
        stp1.push(atmp.clone());
        layouts.insert(1, stp1);

        let mut htr = par_rh_temp.to_vec();
        htr.push(atmp.clone());
        layouts.insert(2, htr.clone());
        layouts.insert(3, htr);

        let mut pmr4 = par_rh_temp.to_vec();
        pmr4.extend([
            F::forward("rh_out", 42, 4, Tenths),
            F::forward("flow", 46, 4, Tenths),
            F::forward("gs", 50, 4, Integer),
            atmp.clone(),
        ]);
        layouts.insert(7, pmr4);

        layouts.insert(
            8,
            vec![
                F::from_end("dc", src.dc_from_end, END_FIELD_WIDTH, Integer),
                F::from_end("dt", src.dt_from_end, END_FIELD_WIDTH, Integer),
                F::from_end("sr", src.sr_from_end, END_FIELD_WIDTH, Hundredths),
                atmp.clone(),
            ],
        );

        layouts.insert(
            11,
            vec![
                F::forward("par", 30, 4, Integer),
                F::forward("evap", 34, 4, Integer),
                F::forward("temp", 38, 4, Tenths),
                F::forward("dc", 42, 4, Integer),
                F::forward("flow", 46, 4, Tenths),
                F::forward("sr_mag", 50, 4, Hundredths),
                F::forward("flow_mult", 54, 1, Integer),
                F::forward("sr_sign", 56, 2, Text),
                atmp,
            ],
        );

        Self {
            layouts,
            generic,
            src_version: src.version.clone(),
        }
    }

    /// Process-wide registry with the default offset table, built on first use.
    pub fn standard() -> Arc<FieldRegistry> {
        Arc::clone(&STANDARD_REGISTRY)
    }

    /// Ordered descriptors for a probe code; unknown codes get the generic layout.
    pub fn layout_for(&self, probe_code: u8) -> &[FieldDescriptor] {
        self.layouts
            .get(&probe_code)
            .map(Vec::as_slice)
            .unwrap_or(&self.generic)
    }

    /// True when the code has a dedicated layout.
    pub fn is_known(&self, probe_code: u8) -> bool {
        self.layouts.contains_key(&probe_code)
    }

    /// Version label of the SRC-1 offset table in use.
    pub fn src_version(&self) -> &str {
        &self.src_version
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new(&SrcLayout::default())
    }
}
