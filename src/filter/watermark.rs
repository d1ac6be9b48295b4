//! Write-buffer watermark tracking with hysteresis.

/// Transition reported by [`WriteWatermarks::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatermarkEvent {
    /// Buffered bytes rose above the high watermark.
    AboveHigh,
    /// Buffered bytes fell to or below the low watermark.
    BelowLow,
}

/// Tracks whether a write buffer is over its high watermark.
///
/// The state flips to "above" only when the buffer strictly exceeds the
/// high watermark and flips back only once it drains to the low watermark
/// or below, so sizes between the two marks never cause a transition.
#[derive(Clone, Copy, Debug)]
pub struct WriteWatermarks {
    low: usize,
    high: usize,
    above: bool,
}

impl WriteWatermarks {
    /// Create a tracker; `low` is clamped to `high`.
    #[must_use]
    pub fn new(low: usize, high: usize) -> Self {
        Self {
            low: low.min(high),
            high,
            above: false,
        }
    }

    /// Record the current buffer size and report any transition.
    pub fn observe(&mut self, buffered: usize) -> Option<WatermarkEvent> {
        if !self.above && buffered > self.high {
            self.above = true;
            return Some(WatermarkEvent::AboveHigh);
        }
        if self.above && buffered <= self.low {
            self.above = false;
            return Some(WatermarkEvent::BelowLow);
        }
        None
    }

    /// Returns `true` while the buffer is considered over the high mark.
    #[must_use]
    pub fn is_above(&self) -> bool { self.above }
}
