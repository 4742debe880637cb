//! EGM-4 wire protocol: framing, field layouts and record decoding.
//!
//! Data flows `bytes -> FrameSplitter -> RecordDecoder -> Reading`. The splitter and
//! decoder are synchronous and allocation-light so they can run on the dispatch path
//! of the ingestion loop.

pub mod decoder;
pub mod frame;
pub mod layout;
pub mod reading;

pub use decoder::{RecordDecoder, MIN_HEADER_LEN};
pub use frame::{FrameSplitter, RawFrame, FRAME_DELIMITER};
pub use layout::{
    Conversion, FieldDescriptor, FieldRegistry, Offset, ProbeFamily, ProbeType, SrcLayout,
};
pub use reading::{FieldValue, FrameParseError, Reading, RecordKind};
