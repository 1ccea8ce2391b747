use std::fmt;

use thiserror::Error;

/// Error returned when capture options fail validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OptionsError {
    /// The sample ratio was not a probability.
    #[error("sample ratio must be within [0.0, 1.0], got {0}")]
    SampleRatioOutOfRange(f64),
}

/// Immutable per-class capture configuration.
///
/// Decides, for every allocation of a tracked class, which metadata is
/// captured (allocation timestamp, call stack, size/capacity metrics, owner
/// tag) and what fraction of allocations is recorded at all. Once resolved
/// for a class, the options never change for the lifetime of that class's
/// tracker.
///
/// # Examples
///
/// ```
/// use instance_tracker::Options;
///
/// let options = Options::builder()
///     .capture_time(true)
///     .capture_size(true)
///     .sample_ratio(0.25)
///     .build()
///     .unwrap();
///
/// assert!(options.capture_time());
/// assert!(!options.capture_stack());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Options {
    capture_time: bool,
    capture_stack: bool,
    capture_size: bool,
    capture_capacity: bool,
    capture_tag: bool,
    sample_ratio: f64,
}

impl Options {
    /// Starts building a set of capture options.
    ///
    /// All capture flags start disabled and the sample ratio starts at 1.0
    /// (record every allocation).
    #[must_use]
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// The minimal-overhead preset: no per-instance detail, every
    /// allocation recorded. Only live/reclaimed counts are maintained.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            capture_time: false,
            capture_stack: false,
            capture_size: false,
            capture_capacity: false,
            capture_tag: false,
            sample_ratio: 1.0,
        }
    }

    /// The catch-all preset: every capture axis enabled, every allocation
    /// recorded.
    #[must_use]
    pub fn full() -> Self {
        Self {
            capture_time: true,
            capture_stack: true,
            capture_size: true,
            capture_capacity: true,
            capture_tag: true,
            sample_ratio: 1.0,
        }
    }

    /// Whether the allocation timestamp is captured.
    #[must_use]
    pub fn capture_time(&self) -> bool {
        self.capture_time
    }

    /// Whether the allocation call stack is captured.
    #[must_use]
    pub fn capture_stack(&self) -> bool {
        self.capture_stack
    }

    /// Whether per-instance size metrics are captured.
    #[must_use]
    pub fn capture_size(&self) -> bool {
        self.capture_size
    }

    /// Whether per-instance capacity metrics are captured.
    #[must_use]
    pub fn capture_capacity(&self) -> bool {
        self.capture_capacity
    }

    /// Whether the caller-supplied owner tag is captured.
    #[must_use]
    pub fn capture_tag(&self) -> bool {
        self.capture_tag
    }

    /// Probability that a given allocation is recorded.
    ///
    /// Sampled-out allocations are invisible to the engine: they appear in
    /// no count and no snapshot. Counts are reported raw; scaling them back
    /// to a population estimate is a display-layer concern.
    #[must_use]
    pub fn sample_ratio(&self) -> f64 {
        self.sample_ratio
    }

    /// Whether records for these options carry a metrics block.
    pub(crate) fn captures_metrics(&self) -> bool {
        self.capture_size || self.capture_capacity
    }
}

/// Builder for [`Options`].
#[derive(Debug)]
#[must_use]
pub struct OptionsBuilder {
    capture_time: bool,
    capture_stack: bool,
    capture_size: bool,
    capture_capacity: bool,
    capture_tag: bool,
    sample_ratio: f64,
}

impl OptionsBuilder {
    fn new() -> Self {
        Self {
            capture_time: false,
            capture_stack: false,
            capture_size: false,
            capture_capacity: false,
            capture_tag: false,
            sample_ratio: 1.0,
        }
    }

    /// Capture the allocation timestamp on every recorded instance.
    pub fn capture_time(mut self, enabled: bool) -> Self {
        self.capture_time = enabled;
        self
    }

    /// Capture the allocation call stack on every recorded instance.
    ///
    /// This is the most expensive capture axis on the allocation hot path.
    pub fn capture_stack(mut self, enabled: bool) -> Self {
        self.capture_stack = enabled;
        self
    }

    /// Re-derive each live instance's size on every refresh.
    pub fn capture_size(mut self, enabled: bool) -> Self {
        self.capture_size = enabled;
        self
    }

    /// Re-derive each live instance's capacity on every refresh.
    pub fn capture_capacity(mut self, enabled: bool) -> Self {
        self.capture_capacity = enabled;
        self
    }

    /// Capture the caller-supplied owner tag, enabling per-tag rollups.
    pub fn capture_tag(mut self, enabled: bool) -> Self {
        self.capture_tag = enabled;
        self
    }

    /// Record each allocation with this probability.
    ///
    /// A ratio of 0.0 is valid and means "track the class but record
    /// nothing".
    pub fn sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio;
        self
    }

    /// Validates and returns the finished options.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::SampleRatioOutOfRange`] if the sample ratio
    /// is NaN or outside `[0.0, 1.0]`.
    pub fn build(self) -> Result<Options, OptionsError> {
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(OptionsError::SampleRatioOutOfRange(self.sample_ratio));
        }

        Ok(Options {
            capture_time: self.capture_time,
            capture_stack: self.capture_stack,
            capture_size: self.capture_size,
            capture_capacity: self.capture_capacity,
            capture_tag: self.capture_tag,
            sample_ratio: self.sample_ratio,
        })
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(options time={} stack={} size={} capacity={} tag={} sample_ratio={})",
            self.capture_time,
            self.capture_stack,
            self.capture_size,
            self.capture_capacity,
            self.capture_tag,
            self.sample_ratio
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_capture_nothing() {
        let options = Options::builder().build().unwrap();

        assert!(!options.capture_time());
        assert!(!options.capture_stack());
        assert!(!options.capture_size());
        assert!(!options.capture_capacity());
        assert!(!options.capture_tag());
        assert!((options.sample_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_rejects_out_of_range_ratio() {
        assert!(Options::builder().sample_ratio(1.5).build().is_err());
        assert!(Options::builder().sample_ratio(-0.1).build().is_err());
        assert!(Options::builder().sample_ratio(f64::NAN).build().is_err());
    }

    #[test]
    fn zero_ratio_is_valid() {
        let options = Options::builder().sample_ratio(0.0).build().unwrap();
        assert!((options.sample_ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_block_requires_size_or_capacity() {
        assert!(!Options::minimal().captures_metrics());

        let size_only = Options::builder().capture_size(true).build().unwrap();
        assert!(size_only.captures_metrics());

        let capacity_only = Options::builder().capture_capacity(true).build().unwrap();
        assert!(capacity_only.captures_metrics());
    }

    #[test]
    fn presets() {
        assert!(!Options::minimal().capture_stack());
        assert!(Options::full().capture_stack());
        assert!(Options::full().capture_tag());
    }

    // The type is thread-safe and cheap to pass around.
    static_assertions::assert_impl_all!(Options: Send, Sync, Copy);
}
