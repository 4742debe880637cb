//! Bounded per-plot, per-channel sample storage for live display.
//!
//! The store is written only from the ingestion dispatch path. Readers share it as a
//! [`SharedChannelStore`] and always receive owned copies, so a chart never observes
//! a buffer in the middle of an update.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ingest::ReadingSink;
use crate::protocol::{ProbeFamily, Reading};

pub mod channel;
pub mod ring;
pub mod timeline;
pub mod view;

pub use channel::Channel;
pub use ring::{ChannelSample, SampleRing, DEFAULT_CAPACITY};
pub use timeline::{PlotTimeline, TimelineSettings};
pub use view::ViewSpan;

/// Channel store shared between the dispatch path and readers.
pub type SharedChannelStore = Arc<RwLock<ChannelStore>>;

#[derive(Debug, Clone, Default, PartialEq)]
struct PlotBuffers {
    timeline: PlotTimeline,
    channels: BTreeMap<Channel, SampleRing>,
}

/// Sample buffers and timelines for every plot seen.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStore {
    capacity: usize,
    settings: TimelineSettings,
    plots: BTreeMap<u8, PlotBuffers>,
    current_plot: Option<u8>,
    probe_family: Option<ProbeFamily>,
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, TimelineSettings::default())
    }
}

impl ChannelStore {
    /// Store keeping `capacity` samples per channel and plot.
    pub fn new(capacity: usize, settings: TimelineSettings) -> Self {
        Self {
            capacity: capacity.max(1),
            settings,
            plots: BTreeMap::new(),
            current_plot: None,
            probe_family: None,
        }
    }

    /// Wrap in a lock for sharing with the ingestion controller.
    pub fn into_shared(self) -> SharedChannelStore {
        Arc::new(RwLock::new(self))
    }

    /// Append one sample per channel present in a measurement reading.
    ///
    /// Returns the position on the plot's continuous axis, or `None` when the reading
    /// was not stored (non-measurement kinds and readings without a plot).
    pub fn add(&mut self, reading: &Reading) -> Option<f64> {
        if !reading.kind.is_measurement() {
            return None;
        }
        let plot = reading.plot()?;

        self.current_plot = Some(plot);
        self.probe_family = Some(reading.probe_type().family());

        let capacity = self.capacity;
        let buffers = self.plots.entry(plot).or_default();
        let elapsed_s = buffers.timeline.advance(reading.elapsed_s(), &self.settings);

        for channel in Channel::ALL {
            if let Some(value) = reading.get_f64(channel.field()) {
                buffers
                    .channels
                    .entry(channel)
                    .or_insert_with(|| SampleRing::new(capacity))
                    .push(ChannelSample {
                        plot,
                        elapsed_s,
                        value,
                    });
            }
        }
        Some(elapsed_s)
    }

    /// Add readings in order. The caller sorts them by (plot, elapsed) first.
    pub fn replay<'a>(&mut self, readings: impl IntoIterator<Item = &'a Reading>) -> usize {
        readings
            .into_iter()
            .filter_map(|reading| self.add(reading))
            .count()
    }

    /// Newest `last_n` samples of a channel, oldest first.
    pub fn window(&self, plot: u8, channel: Channel, last_n: usize) -> Vec<ChannelSample> {
        self.ring(plot, channel)
            .map(|ring| ring.last_n(last_n))
            .unwrap_or_default()
    }

    /// Samples covered by a display span.
    pub fn view(&self, plot: u8, channel: Channel, span: ViewSpan) -> Vec<ChannelSample> {
        self.window(plot, channel, span.samples())
    }

    /// Newest sample of a channel.
    pub fn latest(&self, plot: u8, channel: Channel) -> Option<ChannelSample> {
        self.ring(plot, channel).and_then(SampleRing::latest)
    }

    /// Stored sample count of a channel.
    pub fn len(&self, plot: u8, channel: Channel) -> usize {
        self.ring(plot, channel).map_or(0, SampleRing::len)
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    /// Plots with data, ascending.
    pub fn known_plots(&self) -> Vec<u8> {
        self.plots.keys().copied().collect()
    }

    /// Plot of the most recent reading.
    pub fn current_plot(&self) -> Option<u8> {
        self.current_plot
    }

    /// Next plot after `plot`, wrapping around.
    pub fn next_plot(&self, plot: u8) -> Option<u8> {
        self.plots
            .range(plot.saturating_add(1)..)
            .next()
            .or_else(|| self.plots.iter().next())
            .map(|(p, _)| *p)
            .filter(|p| *p != plot || self.plots.len() == 1)
    }

    /// Previous plot before `plot`, wrapping around.
    pub fn prev_plot(&self, plot: u8) -> Option<u8> {
        self.plots
            .range(..plot)
            .next_back()
            .or_else(|| self.plots.iter().next_back())
            .map(|(p, _)| *p)
            .filter(|p| *p != plot || self.plots.len() == 1)
    }

    /// Timeline state of a plot.
    pub fn timeline(&self, plot: u8) -> Option<PlotTimeline> {
        self.plots.get(&plot).map(|b| b.timeline)
    }

    /// Probe family of the most recent reading.
    pub fn probe_family(&self) -> Option<ProbeFamily> {
        self.probe_family
    }

    /// Channels to offer for the attached probe; all channels until one is known.
    pub fn display_channels(&self) -> &'static [Channel] {
        Channel::for_family(self.probe_family.unwrap_or(ProbeFamily::SoilRespiration))
    }

    /// Samples retained per channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every plot's samples and timeline.
    pub fn clear(&mut self) {
        self.plots.clear();
        self.current_plot = None;
        self.probe_family = None;
    }

    fn ring(&self, plot: u8, channel: Channel) -> Option<&SampleRing> {
        self.plots.get(&plot).and_then(|b| b.channels.get(&channel))
    }
}

impl ReadingSink for ChannelStore {
    fn on_reading(&mut self, reading: &Reading) {
        self.add(reading);
    }
}
