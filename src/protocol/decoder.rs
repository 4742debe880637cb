//! Frame-to-[`Reading`] decoding.
//!
//! The decoder never fails. Short frames, garbled digits and unknown record kinds all
//! produce a `Reading`; problems are attached to it as [`FrameParseError`]s so one bad
//! frame cannot interrupt the stream.

use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

use super::layout::{FieldRegistry, GENERIC_PROBE_CODE};
use super::reading::{FieldValue, FrameParseError, Reading, RecordKind};

/// Minimum length of a measurement record: kind, plot, record, date/time and CO2.
pub const MIN_HEADER_LEN: usize = 20;

/// Decodes frames using a shared [`FieldRegistry`].
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    registry: Arc<FieldRegistry>,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new(FieldRegistry::standard())
    }
}

impl RecordDecoder {
    /// Decoder over the given registry.
    pub fn new(registry: Arc<FieldRegistry>) -> Self {
        Self { registry }
    }

    /// Registry used for the variable region.
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Decode one frame, stamped with the current host time.
    pub fn decode(&self, frame: &str) -> Reading {
        self.decode_at(frame, Utc::now())
    }

    /// Decode one frame with an explicit host receive time.
    ///
    /// The device timestamp uses the year of `received_at`, since records carry none.
    pub fn decode_at(&self, frame: &str, received_at: DateTime<Utc>) -> Reading {
        let text = frame.trim_matches(|c: char| c.is_whitespace() || c.is_control());

        let reading = match text.chars().next() {
            Some('M') => self.decode_measurement(text, RecordKind::LiveMeasurement, received_at),
            Some('R') => self.decode_measurement(text, RecordKind::MemoryMeasurement, received_at),
            Some('B') => decode_startup(text, received_at),
            Some('W') => decode_warmup(text, received_at),
            Some('Z') if text.contains(',') => decode_zero_check(text, received_at),
            Some('Z') => Reading::new(RecordKind::EndOfDump, text, received_at),
            _ => Reading::new(RecordKind::Unknown, text, received_at),
        };

        if reading.has_error() {
            tracing::debug!(
                kind = %reading.kind,
                raw = %reading.raw,
                errors = ?reading.errors,
                "frame decoded with errors"
            );
        }
        reading
    }

    fn decode_measurement(
        &self,
        text: &str,
        kind: RecordKind,
        received_at: DateTime<Utc>,
    ) -> Reading {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if len < MIN_HEADER_LEN {
            let mut reading = Reading::new(RecordKind::Unknown, text, received_at);
            reading.push_error(FrameParseError::TooShort {
                len,
                min: MIN_HEADER_LEN,
            });
            return reading;
        }

        let mut reading = Reading::new(kind, text, received_at);
        let mut cursor = Cursor {
            chars: &chars,
            reading: &mut reading,
        };

        let plot = cursor.int("plot", 1..3);
        cursor.int("record", 3..7);
        let day = cursor.int("day", 7..9);
        let month = cursor.int("month", 9..11);
        let hour = cursor.int("hour", 11..13);
        let minute = cursor.int("minute", 13..15);
        cursor.int("co2", 15..20);
        if len >= 25 {
            cursor.int("h2o", 20..25);
        }
        if len >= 30 {
            cursor.tenths("rht", 25..30);
        }

        let probe_code = cursor.probe_code();
        tracing::trace!(plot, probe_code, len, "decoding measurement record");

        for descriptor in self.registry.layout_for(probe_code) {
            let Some(span) = descriptor.span(len) else {
                continue;
            };
            let window: String = chars[span].iter().collect();
            let value = match descriptor.conversion.apply(&window) {
                Some(value) => value,
                None => {
                    cursor.reading.push_error(FrameParseError::InvalidField {
                        field: descriptor.name.to_string(),
                        text: window,
                    });
                    descriptor.conversion.zero()
                }
            };
            cursor.reading.set(descriptor.name, value);
        }

        apply_signed_respiration(cursor.reading);

        reading.device_time = device_time(received_at.year(), month, day, hour, minute);
        reading
    }
}

/// Header field extraction over a character slice.
struct Cursor<'a> {
    chars: &'a [char],
    reading: &'a mut Reading,
}

impl Cursor<'_> {
    fn window(&self, range: Range<usize>) -> String {
        self.chars.get(range).map(|c| c.iter().collect()).unwrap_or_default()
    }

    fn int(&mut self, name: &str, range: Range<usize>) -> i64 {
        let text = self.window(range);
        let value = match text.trim().parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                self.reading.push_error(FrameParseError::InvalidField {
                    field: name.to_string(),
                    text,
                });
                0
            }
        };
        self.reading.set(name, FieldValue::Int(value));
        value
    }

    fn tenths(&mut self, name: &str, range: Range<usize>) {
        let text = self.window(range);
        let value = match text.trim().parse::<i64>() {
            Ok(v) => v as f64 / 10.0,
            Err(_) => {
                self.reading.push_error(FrameParseError::InvalidField {
                    field: name.to_string(),
                    text,
                });
                0.0
            }
        };
        self.reading.set(name, FieldValue::Float(value));
    }

    fn probe_code(&mut self) -> u8 {
        let start = self.chars.len().saturating_sub(2);
        let text = self.window(start..self.chars.len());
        let code = match text.trim().parse::<u8>() {
            Ok(code) => code,
            Err(_) => {
                self.reading.push_error(FrameParseError::InvalidField {
                    field: "probe_type".to_string(),
                    text,
                });
                GENERIC_PROBE_CODE
            }
        };
        self.reading.set("probe_type", FieldValue::Int(i64::from(code)));
        code
    }
}

/// Probe 11 reports the respiration magnitude and its sign in separate fields.
fn apply_signed_respiration(reading: &mut Reading) {
    let Some(magnitude) = reading.get_f64("sr_mag") else {
        return;
    };
    let negative = reading
        .get("sr_sign")
        .and_then(FieldValue::as_text)
        .is_some_and(|sign| sign.contains('-'));
    let signed = if negative { -magnitude } else { magnitude };
    reading.set("sr", FieldValue::Float(signed));
}

fn device_time(year: i32, month: i64, day: i64, hour: i64, minute: i64) -> Option<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(
        year,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )?;
    date.and_hms_opt(u32::try_from(hour).ok()?, u32::try_from(minute).ok()?, 0)
}

/// Comma-separated payload field `index`, with any `+` sign removed.
fn payload_f64(text: &str, index: usize) -> Option<f64> {
    text.split(',')
        .nth(index)
        .map(|part| part.trim().replace('+', ""))
        .and_then(|part| part.parse::<f64>().ok())
}

fn decode_payload(
    text: &str,
    kind: RecordKind,
    index: usize,
    field: &str,
    received_at: DateTime<Utc>,
) -> Reading {
    let mut reading = Reading::new(kind, text, received_at);
    match payload_f64(text, index) {
        Some(value) => reading.set(field, FieldValue::Float(value)),
        None => reading.push_error(FrameParseError::MalformedPayload { kind }),
    }
    reading
}

fn decode_startup(text: &str, received_at: DateTime<Utc>) -> Reading {
    decode_payload(text, RecordKind::Startup, 2, "co2", received_at)
}

fn decode_warmup(text: &str, received_at: DateTime<Utc>) -> Reading {
    decode_payload(text, RecordKind::Warmup, 1, "warmup_temp", received_at)
}

fn decode_zero_check(text: &str, received_at: DateTime<Utc>) -> Reading {
    decode_payload(text, RecordKind::ZeroCheck, 1, "zero_countdown", received_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CANONICAL: &str = "R000001180313170042900000000000000000000000000000000000096508";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn decode(frame: &str) -> Reading {
        RecordDecoder::default().decode_at(frame, at())
    }

    #[test]
    fn canonical_src_record() {
        let reading = decode(CANONICAL);
        assert_eq!(reading.kind, RecordKind::MemoryMeasurement);
        assert_eq!(reading.probe_code(), Some(8));
        assert_eq!(reading.plot(), Some(0));
        assert_eq!(reading.record_number(), Some(1));
        assert_eq!(reading.co2_ppm(), Some(429.0));
        assert_eq!(reading.get_f64("atmp"), Some(965.0));
        assert_eq!(reading.elapsed_s(), Some(0.0));
        assert_eq!(reading.get_f64("dc"), Some(0.0));
        assert_eq!(reading.get_f64("sr"), Some(0.0));
        assert!(!reading.has_error());

        let expected = NaiveDate::from_ymd_opt(2025, 3, 18)
            .and_then(|d| d.and_hms_opt(13, 17, 0));
        assert_eq!(reading.device_time, expected);
    }

    #[test]
    fn live_records_use_m_prefix() {
        let reading = decode("M080028260113060047600000000000000000000000000000000000099500");
        assert_eq!(reading.kind, RecordKind::LiveMeasurement);
        assert_eq!(reading.plot(), Some(8));
        assert_eq!(reading.probe_code(), Some(0));
        assert_eq!(reading.get_f64("atmp"), Some(995.0));
        assert_eq!(reading.get_f64("aux1"), Some(0.0));
    }

    #[test]
    fn short_measurement_is_unknown_with_raw_kept() {
        let reading = decode("R0000011803");
        assert_eq!(reading.kind, RecordKind::Unknown);
        assert_eq!(reading.raw, "R0000011803");
        assert!(matches!(
            reading.errors.as_slice(),
            [FrameParseError::TooShort { len: 11, min: 20 }]
        ));
    }

    #[test]
    fn one_bad_field_does_not_spoil_the_rest() {
        let frame = CANONICAL.replacen("0429", "04x9", 1);
        let reading = decode(&frame);
        assert_eq!(reading.kind, RecordKind::MemoryMeasurement);
        assert_eq!(reading.co2_ppm(), Some(0.0));
        assert_eq!(reading.get_f64("atmp"), Some(965.0));
        assert!(reading.has_error());
    }

    #[test]
    fn invalid_calendar_yields_no_timestamp() {
        // day 31, month 02
        let frame = format!("R0000013102{}", &CANONICAL[11..]);
        let reading = decode(&frame);
        assert_eq!(reading.device_time, None);
        assert!(!reading.has_error());
    }

    #[test]
    fn bad_probe_code_uses_generic_layout() {
        let frame = format!("{}x8", &CANONICAL[..CANONICAL.len() - 2]);
        let reading = decode(&frame);
        assert_eq!(reading.probe_code(), Some(0));
        assert!(reading.get("aux1").is_some());
        assert!(reading.get("dt").is_none());
        assert!(reading.has_error());
    }

    #[test]
    fn non_measurement_frames() {
        let warmup = decode("W,+54");
        assert_eq!(warmup.kind, RecordKind::Warmup);
        assert_eq!(warmup.get_f64("warmup_temp"), Some(54.0));

        let zero = decode("Z,+10");
        assert_eq!(zero.kind, RecordKind::ZeroCheck);
        assert_eq!(zero.get_f64("zero_countdown"), Some(10.0));

        let end = decode("Z");
        assert_eq!(end.kind, RecordKind::EndOfDump);
        assert!(end.fields.is_empty());

        let banner = decode("B,EGM-4,00412,4.20");
        assert_eq!(banner.kind, RecordKind::Startup);
        assert_eq!(banner.co2_ppm(), Some(412.0));
    }

    #[test]
    fn malformed_payload_is_flagged() {
        let warmup = decode("W,");
        assert_eq!(warmup.kind, RecordKind::Warmup);
        assert!(warmup.has_error());
        assert!(warmup.get("warmup_temp").is_none());
    }

    #[test]
    fn unknown_and_empty_frames() {
        let noise = decode("?\u{FFFD}garbage");
        assert_eq!(noise.kind, RecordKind::Unknown);
        assert_eq!(noise.raw, "?\u{FFFD}garbage");

        let empty = decode("");
        assert_eq!(empty.kind, RecordKind::Unknown);
    }

    #[test]
    fn surrounding_line_feed_is_ignored() {
        let reading = decode("\nZ,+3");
        assert_eq!(reading.kind, RecordKind::ZeroCheck);
        assert_eq!(reading.raw, "Z,+3");
    }

    #[test]
    fn space_padded_probe_code_is_accepted() {
        let frame = "R0000011803131700429000000000000000000000000000000000000965 8";
        let reading = decode(frame);
        assert_eq!(reading.probe_code(), Some(8));
        assert_eq!(reading.get_f64("atmp"), Some(965.0));
        assert!(!reading.has_error());
    }
}
