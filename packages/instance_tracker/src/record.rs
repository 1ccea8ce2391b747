use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::stack::CallStack;
use crate::tracked::{Tracked, identity_of};
use crate::Options;

/// One recorded allocation: a weak reference to the target plus whatever
/// optional metadata the class's [`Options`] enabled.
///
/// The weak reference is the record's only identity and never keeps the
/// target alive. A record is logically dead the instant its target is
/// reclaimed; it is physically removed (and counted) only when a table scan
/// observes that.
///
/// Size and capacity fields are recomputed in place during a refresh; their
/// values are meaningful only as of the most recent refresh.
#[derive(Clone, Debug)]
pub struct InstanceRecord {
    target: Weak<dyn Tracked>,
    detail: Detail,
    metrics: Option<Box<Metrics>>,
}

/// The curated detail representations.
///
/// Four capture axes (time, stack, metrics, tag) would yield sixteen
/// shapes; we implement the common ones and route everything tag-bearing to
/// the catch-all, trading a little footprint for a lot less code. Metrics
/// are an independent additive axis (`Option<Box<Metrics>>` on the record)
/// rather than variants of their own.
#[derive(Clone, Debug)]
enum Detail {
    /// No per-instance detail at all.
    Minimal,
    /// Allocation timestamp only.
    Time { at: SystemTime },
    /// Allocation call stack, with or without a timestamp.
    TimeStack {
        at: Option<SystemTime>,
        stack: CallStack,
    },
    /// The catch-all, used whenever tag capture is enabled.
    Full {
        at: Option<SystemTime>,
        stack: Option<CallStack>,
        tag: Option<Arc<str>>,
    },
}

#[derive(Clone, Copy, Debug, Default)]
struct Metrics {
    size: u64,
    capacity_count: u64,
    capacity_bytes: u64,
    max_size: u64,
    max_capacity_count: u64,
    max_capacity_bytes: u64,
}

impl InstanceRecord {
    /// Builds a record for `target`, capturing exactly the fields `options`
    /// enabled. Timestamp and stack capture happen here, so callers invoke
    /// this before taking any lock.
    ///
    /// `tag` is honored only when tag capture is enabled.
    pub(crate) fn new(
        target: &Arc<dyn Tracked>,
        options: Options,
        tag: Option<Arc<str>>,
    ) -> Self {
        let at = options.capture_time().then(SystemTime::now);
        let stack = options.capture_stack().then(CallStack::capture);

        let detail = if options.capture_tag() {
            Detail::Full { at, stack, tag }
        } else {
            match (at, stack) {
                (None, None) => Detail::Minimal,
                (Some(at), None) => Detail::Time { at },
                (at, Some(stack)) => Detail::TimeStack { at, stack },
            }
        };

        let metrics = options
            .captures_metrics()
            .then(|| Box::new(Metrics::default()));

        Self {
            target: Arc::downgrade(target),
            detail,
            metrics,
        }
    }

    /// The target, if it has not been reclaimed yet.
    ///
    /// This is the engine's sole liveness primitive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<dyn Tracked>> {
        self.target.upgrade()
    }

    /// Whether the target is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Stable identity of the (possibly reclaimed) target.
    pub(crate) fn identity(&self) -> usize {
        identity_of(&self.target)
    }

    /// Wall-clock time of the allocation, when captured.
    #[must_use]
    pub fn allocated_at(&self) -> Option<SystemTime> {
        match &self.detail {
            Detail::Minimal => None,
            Detail::Time { at } => Some(*at),
            Detail::TimeStack { at, .. } | Detail::Full { at, .. } => *at,
        }
    }

    /// Call stack of the allocation, when captured.
    #[must_use]
    pub fn stack(&self) -> Option<&CallStack> {
        match &self.detail {
            Detail::Minimal | Detail::Time { .. } => None,
            Detail::TimeStack { stack, .. } => Some(stack),
            Detail::Full { stack, .. } => stack.as_ref(),
        }
    }

    /// Owner tag of the allocation, when captured.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.detail {
            Detail::Full { tag, .. } => tag.as_deref(),
            _ => None,
        }
    }

    /// Whether this record carries a metrics block at all (size or
    /// capacity capture was enabled for its class).
    #[must_use]
    pub fn has_metrics(&self) -> bool {
        self.metrics.is_some()
    }

    /// Size as of the most recent refresh; 0 if metrics are not captured.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.metrics.as_ref().map_or(0, |m| m.size)
    }

    /// Capacity in elements as of the most recent refresh.
    #[must_use]
    pub fn capacity_count(&self) -> u64 {
        self.metrics.as_ref().map_or(0, |m| m.capacity_count)
    }

    /// Capacity in bytes as of the most recent refresh.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.metrics.as_ref().map_or(0, |m| m.capacity_bytes)
    }

    /// Largest size ever observed for this instance.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.metrics.as_ref().map_or(0, |m| m.max_size)
    }

    /// Largest element capacity ever observed for this instance.
    #[must_use]
    pub fn max_capacity_count(&self) -> u64 {
        self.metrics.as_ref().map_or(0, |m| m.max_capacity_count)
    }

    /// Largest byte capacity ever observed for this instance.
    #[must_use]
    pub fn max_capacity_bytes(&self) -> u64 {
        self.metrics.as_ref().map_or(0, |m| m.max_capacity_bytes)
    }

    /// Capacity headroom (elements reserved but unused) as of the most
    /// recent refresh. Negative when the target reports a size above its
    /// capacity, which a concurrently mutated target is free to do.
    #[must_use]
    pub fn excess_capacity(&self) -> i128 {
        i128::from(self.capacity_count()) - i128::from(self.size())
    }

    /// Re-derives size and capacity from the target, honoring the capture
    /// flags in `options`, and raises the running maxima.
    ///
    /// Capability calls run inside the profiled program's objects and may
    /// panic; such a panic is caught and logged and the metric defaults to
    /// 0. A target with no size capability reports its capacity count as
    /// its size. A target reclaimed since the liveness check zeroes its
    /// current values and keeps its maxima.
    pub(crate) fn refresh_metrics(&mut self, options: Options) {
        let Some(metrics) = self.metrics.as_deref_mut() else {
            return;
        };

        let Some(target) = self.target.upgrade() else {
            metrics.size = 0;
            metrics.capacity_count = 0;
            metrics.capacity_bytes = 0;
            return;
        };

        let mut capacity_count = 0;
        let mut capacity_bytes = 0;
        if options.capture_capacity() {
            capacity_count = guarded("capacity_count", || target.capacity_count()).unwrap_or(0);
            capacity_bytes = guarded("capacity_bytes", || target.capacity_bytes()).unwrap_or(0);
        }

        let size = if options.capture_size() {
            // Absent size capability falls back to the capacity count.
            guarded("size_hint", || target.size_hint()).unwrap_or(capacity_count)
        } else {
            capacity_count
        };

        metrics.size = size;
        metrics.capacity_count = capacity_count;
        metrics.capacity_bytes = capacity_bytes;
        metrics.max_size = metrics.max_size.max(size);
        metrics.max_capacity_count = metrics.max_capacity_count.max(capacity_count);
        metrics.max_capacity_bytes = metrics.max_capacity_bytes.max(capacity_bytes);
    }
}

/// Calls into target-owned code, containing any panic. The profiler must
/// never crash the profiled program.
fn guarded(operation: &str, call: impl FnOnce() -> Option<u64>) -> Option<u64> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(operation, "target capability call panicked; metric defaults to 0");
            Some(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Reporting {
        size: u64,
        capacity: u64,
        capacity_bytes: u64,
        size_calls: AtomicUsize,
        capacity_calls: AtomicUsize,
    }

    impl Tracked for Reporting {
        fn size_hint(&self) -> Option<u64> {
            self.size_calls.fetch_add(1, Ordering::Relaxed);
            Some(self.size)
        }
        fn capacity_count(&self) -> Option<u64> {
            self.capacity_calls.fetch_add(1, Ordering::Relaxed);
            Some(self.capacity)
        }
        fn capacity_bytes(&self) -> Option<u64> {
            Some(self.capacity_bytes)
        }
    }

    struct Opaque;
    impl Tracked for Opaque {}

    struct Panicky;
    impl Tracked for Panicky {
        fn size_hint(&self) -> Option<u64> {
            panic!("concurrent mutation")
        }
        fn capacity_count(&self) -> Option<u64> {
            Some(7)
        }
    }

    fn full_metrics_options() -> Options {
        Options::builder()
            .capture_size(true)
            .capture_capacity(true)
            .build()
            .unwrap()
    }

    #[test]
    fn minimal_options_produce_minimal_record() {
        let target: Arc<dyn Tracked> = Arc::new(Opaque);
        let record = InstanceRecord::new(&target, Options::minimal(), None);

        assert!(record.allocated_at().is_none());
        assert!(record.stack().is_none());
        assert!(record.tag().is_none());
        assert_eq!(record.size(), 0);
    }

    #[test]
    fn time_only_record_carries_timestamp() {
        let target: Arc<dyn Tracked> = Arc::new(Opaque);
        let options = Options::builder().capture_time(true).build().unwrap();
        let record = InstanceRecord::new(&target, options, None);

        assert!(record.allocated_at().is_some());
        assert!(record.stack().is_none());
    }

    #[test]
    fn stack_only_record_carries_stack_without_timestamp() {
        let target: Arc<dyn Tracked> = Arc::new(Opaque);
        let options = Options::builder().capture_stack(true).build().unwrap();
        let record = InstanceRecord::new(&target, options, None);

        assert!(record.allocated_at().is_none());
        assert!(record.stack().is_some());
    }

    #[test]
    fn tag_is_dropped_unless_capture_enabled() {
        let target: Arc<dyn Tracked> = Arc::new(Opaque);
        let record =
            InstanceRecord::new(&target, Options::minimal(), Some(Arc::from("agent-1")));
        assert!(record.tag().is_none());

        let options = Options::builder().capture_tag(true).build().unwrap();
        let record = InstanceRecord::new(&target, options, Some(Arc::from("agent-1")));
        assert_eq!(record.tag(), Some("agent-1"));
    }

    #[test]
    fn liveness_follows_strong_count() {
        let target: Arc<dyn Tracked> = Arc::new(Opaque);
        let record = InstanceRecord::new(&target, Options::minimal(), None);

        assert!(record.is_live());
        assert!(record.upgrade().is_some());

        drop(target);

        assert!(!record.is_live());
        assert!(record.upgrade().is_none());
    }

    #[test]
    fn refresh_reads_capabilities_and_raises_maxima() {
        let reporting = Arc::new(Reporting {
            size: 5,
            capacity: 8,
            capacity_bytes: 64,
            ..Reporting::default()
        });
        let target: Arc<dyn Tracked> = Arc::<Reporting>::clone(&reporting);
        let mut record = InstanceRecord::new(&target, full_metrics_options(), None);

        record.refresh_metrics(full_metrics_options());
        assert_eq!(record.size(), 5);
        assert_eq!(record.capacity_count(), 8);
        assert_eq!(record.capacity_bytes(), 64);
        assert_eq!(record.max_size(), 5);
        assert_eq!(record.excess_capacity(), 3);
    }

    #[test]
    fn capability_methods_not_invoked_when_capture_disabled() {
        let reporting = Arc::new(Reporting {
            size: 5,
            capacity: 8,
            ..Reporting::default()
        });
        let target: Arc<dyn Tracked> = Arc::<Reporting>::clone(&reporting);
        let mut record = InstanceRecord::new(&target, Options::minimal(), None);

        record.refresh_metrics(Options::minimal());

        assert_eq!(reporting.size_calls.load(Ordering::Relaxed), 0);
        assert_eq!(reporting.capacity_calls.load(Ordering::Relaxed), 0);
        assert_eq!(record.size(), 0);
    }

    #[test]
    fn absent_size_capability_falls_back_to_capacity() {
        struct CapacityOnly;
        impl Tracked for CapacityOnly {
            fn capacity_count(&self) -> Option<u64> {
                Some(12)
            }
        }

        let target: Arc<dyn Tracked> = Arc::new(CapacityOnly);
        let mut record = InstanceRecord::new(&target, full_metrics_options(), None);
        record.refresh_metrics(full_metrics_options());

        assert_eq!(record.size(), 12);
        assert_eq!(record.capacity_count(), 12);
        assert_eq!(record.capacity_bytes(), 0);
    }

    #[test]
    fn panicking_capability_defaults_to_zero() {
        let target: Arc<dyn Tracked> = Arc::new(Panicky);
        let mut record = InstanceRecord::new(&target, full_metrics_options(), None);

        record.refresh_metrics(full_metrics_options());

        assert_eq!(record.size(), 0);
        assert_eq!(record.capacity_count(), 7);
    }

    #[test]
    fn reclaimed_target_zeroes_current_metrics() {
        let target: Arc<dyn Tracked> = Arc::new(Reporting {
            size: 5,
            capacity: 8,
            capacity_bytes: 64,
            ..Reporting::default()
        });
        let mut record = InstanceRecord::new(&target, full_metrics_options(), None);
        record.refresh_metrics(full_metrics_options());
        assert_eq!(record.max_size(), 5);

        drop(target);
        record.refresh_metrics(full_metrics_options());

        assert_eq!(record.size(), 0);
        assert_eq!(record.capacity_count(), 0);
        // Maxima are observations, not current state.
        assert_eq!(record.max_size(), 5);
    }

    // Records cross threads inside snapshots.
    static_assertions::assert_impl_all!(InstanceRecord: Send, Sync);
}
