//! Decoded form of one instrument frame.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::layout::{ProbeType, GENERIC_PROBE_CODE};

/// Record kind, determined by the first character of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// `M`: real-time record streamed while measuring.
    LiveMeasurement,
    /// `R`: record replayed from instrument memory during a dump.
    MemoryMeasurement,
    /// `B`: power-up banner.
    Startup,
    /// `W`: warm-up progress.
    Warmup,
    /// `Z,..`: zero-check countdown.
    ZeroCheck,
    /// Bare `Z`: end of a memory dump.
    EndOfDump,
    /// Anything else. The raw text is kept for diagnostics.
    Unknown,
}

impl RecordKind {
    /// True for `M` and `R` records.
    pub fn is_measurement(self) -> bool {
        matches!(
            self,
            RecordKind::LiveMeasurement | RecordKind::MemoryMeasurement
        )
    }

    /// Stable name used in logs and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::LiveMeasurement => "live_measurement",
            RecordKind::MemoryMeasurement => "memory_measurement",
            RecordKind::Startup => "startup",
            RecordKind::Warmup => "warmup",
            RecordKind::ZeroCheck => "zero_check",
            RecordKind::EndOfDump => "end_of_dump",
            RecordKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer field.
    Int(i64),
    /// Fixed-point or floating field.
    Float(f64),
    /// Raw text field.
    Text(String),
}

impl FieldValue {
    /// Numeric view; text fields have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    /// Integer view; floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Text(_) => None,
        }
    }

    /// Text view.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A decode problem recorded on the [`Reading`] instead of being raised.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameParseError {
    /// Measurement frame shorter than the fixed header.
    #[error("measurement frame too short: {len} chars, need {min}")]
    TooShort {
        /// Frame length in characters.
        len: usize,
        /// Minimum header length.
        min: usize,
    },

    /// A field window was present but did not convert.
    #[error("field '{field}' has unparseable text {text:?}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Offending characters.
        text: String,
    },

    /// A comma-separated payload was missing its value.
    #[error("malformed {kind} payload")]
    MalformedPayload {
        /// Record kind being decoded.
        kind: RecordKind,
    },
}

/// Structured decode of one frame.
///
/// Readings are immutable once handed to subscribers; collaborators get shared
/// references or clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Record kind.
    pub kind: RecordKind,
    /// Decoded fields keyed by name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Frame text as received, surrounding whitespace removed.
    pub raw: String,
    /// Instrument clock (current year assumed); `None` when the date is invalid.
    pub device_time: Option<NaiveDateTime>,
    /// Host time at which the frame was decoded.
    pub received_at: DateTime<Utc>,
    /// Per-field or per-frame decode problems.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FrameParseError>,
}

impl Reading {
    /// Empty reading of the given kind.
    pub fn new(kind: RecordKind, raw: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
            raw: raw.into(),
            device_time: None,
            received_at,
            errors: Vec::new(),
        }
    }

    /// True when any decode problem was recorded.
    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Field by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Numeric field by name.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_f64)
    }

    /// Store a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Plot number (00-99).
    pub fn plot(&self) -> Option<u8> {
        self.get("plot")
            .and_then(FieldValue::as_i64)
            .and_then(|v| u8::try_from(v).ok())
    }

    /// Record number within the instrument memory.
    pub fn record_number(&self) -> Option<i64> {
        self.get("record").and_then(FieldValue::as_i64)
    }

    /// CO2 concentration in ppm.
    pub fn co2_ppm(&self) -> Option<f64> {
        self.get_f64("co2")
    }

    /// Probe code; measurement readings always carry one.
    pub fn probe_code(&self) -> Option<u8> {
        self.get("probe_type")
            .and_then(FieldValue::as_i64)
            .and_then(|v| u8::try_from(v).ok())
    }

    /// Attached accessory, generic when the code is missing.
    pub fn probe_type(&self) -> ProbeType {
        ProbeType::from_code(self.probe_code().unwrap_or(GENERIC_PROBE_CODE))
    }

    /// Elapsed seconds since chamber closure (`dt`), when the probe reports it.
    pub fn elapsed_s(&self) -> Option<f64> {
        self.get_f64("dt")
    }

    /// Air temperature: probe temperature if present, else the analyzer's RHT sensor.
    pub fn temperature_c(&self) -> Option<f64> {
        self.get_f64("temp").or_else(|| self.get_f64("rht"))
    }

    /// Atmospheric pressure in mb, ignoring zero placeholders.
    pub fn pressure_mb(&self) -> Option<f64> {
        self.get_f64("atmp").filter(|p| *p > 0.0)
    }

    pub(crate) fn push_error(&mut self, error: FrameParseError) {
        self.errors.push(error);
    }
}
