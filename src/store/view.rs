//! Display span for live charts.

/// Narrowest span, in samples.
pub const MIN_SPAN: usize = 30;

/// Widest span, in samples.
pub const MAX_SPAN: usize = 600;

/// Initial span, in samples.
pub const DEFAULT_SPAN: usize = 120;

/// How many of the newest samples a chart shows.
///
/// Zooming only changes the number requested from the store; stored samples are
/// never discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSpan(usize);

impl Default for ViewSpan {
    fn default() -> Self {
        Self(DEFAULT_SPAN)
    }
}

impl ViewSpan {
    /// Span clamped to `[MIN_SPAN, MAX_SPAN]`.
    pub fn new(samples: usize) -> Self {
        Self(samples.clamp(MIN_SPAN, MAX_SPAN))
    }

    /// Samples shown.
    pub fn samples(self) -> usize {
        self.0
    }

    /// Double the span, up to the maximum.
    pub fn zoom_out(self) -> Self {
        Self::new(self.0.saturating_mul(2))
    }

    /// Halve the span, down to the minimum.
    pub fn zoom_in(self) -> Self {
        Self::new(self.0 / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_is_clamped() {
        let span = ViewSpan::default();
        assert_eq!(span.zoom_out().samples(), 240);
        assert_eq!(span.zoom_out().zoom_out().zoom_out().samples(), MAX_SPAN);
        assert_eq!(span.zoom_in().samples(), 60);
        assert_eq!(span.zoom_in().zoom_in().zoom_in().samples(), MIN_SPAN);
    }
}
