//! The frame sequence must not depend on how reads fragment the byte stream.

use egm_daq::protocol::{FrameSplitter, RecordDecoder, RecordKind};
use egm_daq::transport::simulated::{format_src_record, SrcRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn stream() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"W,+54\r");
    for dt in 0..40u32 {
        let line = format_src_record(&SrcRecord {
            plot: 1 + (dt / 20) as u8,
            record: dt + 1,
            co2: 400 + dt,
            dc: dt,
            dt,
            sr_hundredths: 5,
            atmp: 1002,
        });
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\r');
        if dt % 13 == 12 {
            // Line noise, including a multi-byte character.
            bytes.extend_from_slice("\r\r?\u{00B5}\u{FFFD}\r".as_bytes());
        }
    }
    bytes.extend_from_slice(b"Z\r");
    bytes
}

fn split_all(bytes: &[u8], chunk_sizes: impl Iterator<Item = usize>) -> Vec<String> {
    let mut splitter = FrameSplitter::new();
    let mut frames = Vec::new();
    let mut rest = bytes;
    for size in chunk_sizes {
        if rest.is_empty() {
            break;
        }
        let (chunk, tail) = rest.split_at(size.min(rest.len()));
        frames.extend(splitter.feed(chunk).into_iter().map(|f| f.into_string()));
        rest = tail;
    }
    assert!(rest.is_empty(), "chunk iterator ended early");
    assert_eq!(splitter.pending_len(), 0);
    frames
}

#[test]
fn any_fragmentation_yields_the_same_frames() {
    let bytes = stream();
    let whole = split_all(&bytes, std::iter::once(bytes.len()));
    assert_eq!(whole.first().map(String::as_str), Some("W,+54"));
    assert_eq!(whole.last().map(String::as_str), Some("Z"));

    let single = split_all(&bytes, std::iter::repeat(1));
    assert_eq!(single, whole);

    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let sizes = std::iter::from_fn(move || Some(rng.gen_range(1..=80)));
        assert_eq!(split_all(&bytes, sizes), whole, "seed {seed}");
    }
}

#[test]
fn decoded_readings_do_not_depend_on_fragmentation() {
    let bytes = stream();
    let decoder = RecordDecoder::default();
    let decode = |frames: Vec<String>| -> Vec<(RecordKind, Option<u8>, Option<f64>, Option<f64>)> {
        frames
            .iter()
            .map(|f| decoder.decode(f))
            .map(|r| (r.kind, r.plot(), r.elapsed_s(), r.co2_ppm()))
            .collect()
    };

    let whole = decode(split_all(&bytes, std::iter::once(bytes.len())));
    let sevens = decode(split_all(&bytes, std::iter::repeat(7)));
    assert_eq!(whole, sevens);

    let measurements = whole.iter().filter(|r| r.0.is_measurement()).count();
    assert_eq!(measurements, 40);
    assert_eq!(whole.iter().filter(|r| r.0 == RecordKind::Unknown).count(), 3);
}

#[test]
fn oversized_noise_is_split_at_fixed_offsets() {
    let noise = vec![b'x'; 250];
    let mut reference = FrameSplitter::with_max_frame_len(100);
    let expected: Vec<String> = reference
        .feed(&noise)
        .into_iter()
        .map(|f| f.into_string())
        .collect();
    assert_eq!(expected.len(), 2);
    assert_eq!(reference.pending_len(), 50);

    let mut splitter = FrameSplitter::with_max_frame_len(100);
    let mut frames = Vec::new();
    for chunk in noise.chunks(33) {
        frames.extend(splitter.feed(chunk).into_iter().map(|f| f.into_string()));
    }
    assert_eq!(frames, expected);
    assert_eq!(splitter.oversized_frames(), 2);
}
