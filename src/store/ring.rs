//! Fixed-capacity sample ring.

use std::collections::VecDeque;

use serde::Serialize;

/// Default samples retained per channel.
pub const DEFAULT_CAPACITY: usize = 3600;

/// One stored value on the reconstructed time axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelSample {
    /// Plot the sample belongs to.
    pub plot: u8,
    /// Seconds on the plot's continuous axis.
    pub elapsed_s: f64,
    /// Channel value.
    pub value: f64,
}

/// FIFO that drops its oldest sample once `capacity` is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRing {
    capacity: usize,
    samples: VecDeque<ChannelSample>,
}

impl SampleRing {
    /// Empty ring holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append, evicting the oldest sample when full.
    pub fn push(&mut self, sample: ChannelSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Copy of the newest `n` samples, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<ChannelSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Newest sample.
    pub fn latest(&self) -> Option<ChannelSample> {
        self.samples.back().copied()
    }

    /// Samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelSample> {
        self.samples.iter()
    }
}
