//! # EGM DAQ Core Library
//!
//! Host-side driver for the PP Systems EGM-4 environmental gas monitor. The crate
//! reads the instrument's RS-232 record stream, decodes each record into a typed
//! [`Reading`](protocol::Reading), keeps bounded per-channel histories for live
//! display, and estimates soil CO₂ flux from the rise of CO₂ inside a closed chamber.
//!
//! ## Crate Structure
//!
//! Data flows one way: transport bytes → frame splitter → record decoder →
//! {channel store, flux analyzer, persistence} in arrival order.
//!
//! - **`transport`**: The `Transport` trait and its serial, in-memory and simulated
//!   implementations, plus USB-serial port listing.
//! - **`protocol`**: Frame splitting on `\r`, the per-probe field registry and the
//!   record decoder.
//! - **`ingest`**: The `IngestionController` that owns the link, runs the read loop,
//!   tracks device presence and dispatches readings to sinks and subscribers.
//! - **`store`**: Bounded per-plot, per-channel sample rings with cycle-folded
//!   elapsed time.
//! - **`analysis`**: Sliding-window regression, flux conversion and signal stability.
//! - **`persistence`**: Session repositories and the non-blocking write queue.
//! - **`config`**: Figment-based settings with validation.
//! - **`logging`**: Tracing subscriber setup.
//! - **`error`**: The crate-wide `DaqError`.

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod store;
pub mod transport;

pub use error::{AppResult, DaqError};
pub use ingest::{ConnectionState, IngestEvent, IngestionController, ReadingSink};
pub use protocol::{Reading, RecordDecoder, RecordKind};
pub use store::{Channel, ChannelStore, SharedChannelStore};
