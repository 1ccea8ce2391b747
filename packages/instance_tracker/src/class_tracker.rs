use std::fmt;
use std::sync::{Arc, Mutex};

use foldhash::{HashMap, HashMapExt};
use rand::Rng;

use crate::aggregate::Aggregate;
use crate::constants::ERR_POISONED_LOCK;
use crate::live_set::{LiveSet, SweepEntry};
use crate::record::InstanceRecord;
use crate::tracked::Tracked;
use crate::Options;

/// Per-class tracking state: the live set, the overall rollup and the
/// per-tag rollups, all behind one mutex.
///
/// There is exactly one `ClassTracker` per distinct tracked class name,
/// created through the [`Catalog`](crate::Catalog). The allocation hook
/// calls [`record`](Self::record) once per allocation; the reporting layer
/// (or the background sweeper) calls [`refresh`](Self::refresh) to sweep
/// reclaimed records and recompute statistics.
///
/// All mutation and reading of one class's state serializes on that class's
/// lock; different classes never contend. A refresh holds the lock for its
/// full O(live-count) duration, blocking concurrent `record` calls for the
/// same class - a deliberate trade of pause time for simplicity.
pub struct ClassTracker {
    class_name: Arc<str>,
    object_size: usize,
    options: Options,
    inner: Mutex<Inner>,
}

struct Inner {
    records: LiveSet,
    overall: Aggregate,
    tags: HashMap<Arc<str>, Aggregate>,
}

impl ClassTracker {
    pub(crate) fn new(class_name: &str, object_size: usize, options: Options) -> Self {
        Self {
            class_name: Arc::from(class_name),
            object_size,
            options,
            inner: Mutex::new(Inner {
                records: LiveSet::new(),
                overall: new_aggregate(options),
                tags: HashMap::new(),
            }),
        }
    }

    /// The class being tracked.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Estimated shallow bytes per instance, as supplied at registration.
    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// The capture configuration resolved for this class.
    #[must_use]
    pub fn options(&self) -> Options {
        self.options
    }

    /// Records one allocation of this class.
    ///
    /// Subject to sampling: with ratio `r`, the allocation is skipped with
    /// probability `1 - r` and leaves no trace at all. The sampling draw
    /// and all metadata capture (timestamp, call stack) happen before the
    /// class lock is taken.
    ///
    /// # Panics
    ///
    /// Panics if `target` is already registered and still live - the
    /// allocation hook must be invoked exactly once per allocation.
    pub fn record(&self, target: &Arc<dyn Tracked>) {
        self.record_inner(target, None);
    }

    /// Records one allocation with an owner tag for per-tag rollups.
    ///
    /// The tag is retained only when tag capture is enabled; otherwise
    /// this behaves exactly like [`record`](Self::record).
    pub fn record_tagged(&self, target: &Arc<dyn Tracked>, tag: &str) {
        self.record_inner(target, Some(tag));
    }

    fn record_inner(&self, target: &Arc<dyn Tracked>, tag: Option<&str>) {
        let ratio = self.options.sample_ratio();
        if ratio <= 0.0 {
            return;
        }
        if ratio < 1.0 && rand::rng().random::<f64>() >= ratio {
            return;
        }

        let tag: Option<Arc<str>> = if self.options.capture_tag() {
            tag.map(Arc::from)
        } else {
            None
        };
        let record = InstanceRecord::new(target, self.options, tag.clone());

        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        let Inner {
            records,
            overall,
            tags,
        } = &mut *inner;

        overall.allocate();
        if let Some(tag) = tag {
            // Tag rollups are created lazily, on first sight of the tag.
            tags.entry(tag)
                .or_insert_with(|| new_aggregate(self.options))
                .allocate();
        }

        records.insert(record, |dead| {
            overall.reclaim();
            if let Some(tag) = dead.tag()
                && let Some(aggregate) = tags.get_mut(tag)
            {
                aggregate.reclaim();
            }
        });
    }

    /// Sweeps reclaimed records, recomputes all rollups from the surviving
    /// population and returns that population as a point-in-time snapshot
    /// for the query utilities.
    ///
    /// When size/capacity capture is enabled, each live record's metrics
    /// are re-derived from its target here (and nowhere else); stats reads
    /// are only guaranteed fresh immediately after this returns.
    pub fn refresh(&self) -> Vec<InstanceRecord> {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        let Inner {
            records,
            overall,
            tags,
        } = &mut *inner;

        overall.reset();
        for aggregate in tags.values_mut() {
            aggregate.reset();
        }

        let options = self.options;
        let collect_metrics = options.captures_metrics();

        records.sweep(|entry| match entry {
            SweepEntry::Live(record) => {
                if collect_metrics {
                    record.refresh_metrics(options);
                    let (size, count, bytes) = (
                        record.size(),
                        record.capacity_count(),
                        record.capacity_bytes(),
                    );
                    overall.update(size, count, bytes);
                    if let Some(tag) = record.tag()
                        && let Some(aggregate) = tags.get_mut(tag)
                    {
                        aggregate.update(size, count, bytes);
                    }
                }
            }
            SweepEntry::Reclaimed(dead) => {
                overall.reclaim();
                if let Some(tag) = dead.tag()
                    && let Some(aggregate) = tags.get_mut(tag)
                {
                    aggregate.reclaim();
                }
            }
        })
    }

    /// The overall rollup. Values are guaranteed fresh only immediately
    /// after a [`refresh`](Self::refresh).
    #[must_use]
    pub fn overall_stats(&self) -> Aggregate {
        self.inner.lock().expect(ERR_POISONED_LOCK).overall
    }

    /// The rollup for one owner tag, if that tag has ever been seen.
    #[must_use]
    pub fn tag_stats(&self, tag: &str) -> Option<Aggregate> {
        self.inner
            .lock()
            .expect(ERR_POISONED_LOCK)
            .tags
            .get(tag)
            .copied()
    }

    /// Every owner tag seen so far, in no particular order.
    #[must_use]
    pub fn tag_names(&self) -> Vec<Arc<str>> {
        self.inner
            .lock()
            .expect(ERR_POISONED_LOCK)
            .tags
            .keys()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for ClassTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassTracker")
            .field("class_name", &self.class_name)
            .field("object_size", &self.object_size)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn new_aggregate(options: Options) -> Aggregate {
    if options.captures_metrics() {
        Aggregate::with_metrics()
    } else {
        Aggregate::counts_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Measured {
        size: u64,
    }
    impl Tracked for Measured {
        fn size_hint(&self) -> Option<u64> {
            Some(self.size)
        }
        fn capacity_count(&self) -> Option<u64> {
            Some(self.size.saturating_mul(2))
        }
    }

    fn metric_options() -> Options {
        Options::builder()
            .capture_size(true)
            .capture_capacity(true)
            .capture_tag(true)
            .build()
            .unwrap()
    }

    fn tracker(options: Options) -> ClassTracker {
        ClassTracker::new("demo::Measured", 48, options)
    }

    #[test]
    fn live_plus_reclaimed_equals_accepted_records() {
        let tracker = tracker(Options::minimal());
        let mut targets = Vec::new();

        for size in 0..100 {
            let target: Arc<dyn Tracked> = Arc::new(Measured { size });
            tracker.record(&target);
            targets.push(target);
        }
        targets.truncate(60);
        tracker.refresh();

        let stats = tracker.overall_stats();
        assert_eq!(stats.live(), 60);
        assert_eq!(stats.reclaimed(), 40);
        assert_eq!(stats.live() + stats.reclaimed(), 100);
    }

    #[test]
    fn zero_sample_ratio_records_nothing() {
        let options = Options::builder().sample_ratio(0.0).build().unwrap();
        let tracker = tracker(options);

        let target: Arc<dyn Tracked> = Arc::new(Measured { size: 1 });
        for _ in 0..10 {
            // Re-recording the same live target would panic if any call
            // were accepted.
            tracker.record(&target);
        }

        assert_eq!(tracker.overall_stats().live(), 0);
        assert!(tracker.refresh().is_empty());
    }

    #[test]
    fn full_sample_ratio_records_everything_immediately() {
        let tracker = tracker(Options::minimal());
        let targets: Vec<Arc<dyn Tracked>> = (0..1000)
            .map(|size| Arc::new(Measured { size }) as Arc<dyn Tracked>)
            .collect();

        for target in &targets {
            tracker.record(target);
        }

        // Before any refresh or reclamation.
        assert_eq!(tracker.overall_stats().live(), 1000);
    }

    #[test]
    fn refresh_rolls_up_sizes() {
        let tracker = tracker(metric_options());
        let targets: Vec<Arc<dyn Tracked>> = [3_u64, 5, 9]
            .iter()
            .map(|&size| Arc::new(Measured { size }) as Arc<dyn Tracked>)
            .collect();
        for target in &targets {
            tracker.record(target);
        }

        tracker.refresh();
        let stats = tracker.overall_stats();

        assert_eq!(stats.size_sum(), 17);
        assert_eq!(stats.size_max(), 9);
        assert_eq!(stats.capacity_count_sum(), 34);
    }

    #[test]
    fn refresh_is_idempotent_under_a_stable_population() {
        let tracker = tracker(metric_options());
        let targets: Vec<Arc<dyn Tracked>> = (1..=10)
            .map(|size| Arc::new(Measured { size }) as Arc<dyn Tracked>)
            .collect();
        for target in &targets {
            tracker.record(target);
        }

        tracker.refresh();
        let first = tracker.overall_stats();
        tracker.refresh();
        let second = tracker.overall_stats();

        assert_eq!(first.live(), second.live());
        assert_eq!(first.size_sum(), second.size_sum());
        assert_eq!(first.size_max(), second.size_max());
        assert_eq!(first.capacity_count_sum(), second.capacity_count_sum());
        assert_eq!(first.capacity_bytes_sum(), second.capacity_bytes_sum());
    }

    #[test]
    fn tag_rollups_track_their_owners() {
        let tracker = tracker(metric_options());
        let a: Arc<dyn Tracked> = Arc::new(Measured { size: 4 });
        let b: Arc<dyn Tracked> = Arc::new(Measured { size: 6 });
        let untagged: Arc<dyn Tracked> = Arc::new(Measured { size: 1 });

        tracker.record_tagged(&a, "agent-a");
        tracker.record_tagged(&b, "agent-b");
        tracker.record(&untagged);
        tracker.refresh();

        let mut names = tracker.tag_names();
        names.sort();
        assert_eq!(names, [Arc::from("agent-a"), Arc::from("agent-b")]);

        let stats_a = tracker.tag_stats("agent-a").unwrap();
        assert_eq!(stats_a.live(), 1);
        assert_eq!(stats_a.size_sum(), 4);

        drop(a);
        tracker.refresh();
        let stats_a = tracker.tag_stats("agent-a").unwrap();
        assert_eq!(stats_a.live(), 0);
        assert_eq!(stats_a.reclaimed(), 1);
        assert_eq!(stats_a.size_sum(), 0);
    }

    #[test]
    fn tags_ignored_when_capture_disabled() {
        let tracker = tracker(Options::minimal());
        let target: Arc<dyn Tracked> = Arc::new(Measured { size: 4 });

        tracker.record_tagged(&target, "agent-a");
        tracker.refresh();

        assert!(tracker.tag_names().is_empty());
        assert!(tracker.tag_stats("agent-a").is_none());
    }

    // One tracker is shared by every thread allocating its class.
    static_assertions::assert_impl_all!(ClassTracker: Send, Sync);
}
