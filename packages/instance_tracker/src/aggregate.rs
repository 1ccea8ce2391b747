use std::fmt;

/// Numeric rollup over a tracked population, in two precision tiers:
/// counts only, or counts plus size/capacity statistics.
///
/// `live` and `reclaimed` are exact event counters - incremented once per
/// record at insertion and at sweep-detected reclamation respectively, and
/// never reset. Their sum always equals the number of accepted (not
/// sampled-out) record calls. The sums and current maxima describe the live
/// population *as of the most recent refresh*; the ever-maxima are
/// monotonic over the whole session.
///
/// Snapshots are plain copies; readers hold no lock.
#[derive(Clone, Copy, Debug)]
pub struct Aggregate {
    live: u64,
    reclaimed: u64,
    metrics: Option<MetricTotals>,
}

#[derive(Clone, Copy, Debug, Default)]
struct MetricTotals {
    size_sum: u64,
    size_max: u64,
    size_max_ever: u64,
    capacity_count_sum: u64,
    capacity_count_max: u64,
    capacity_count_max_ever: u64,
    capacity_bytes_sum: u64,
    capacity_bytes_max: u64,
    capacity_bytes_max_ever: u64,
}

impl Aggregate {
    /// Counts-only tier.
    pub(crate) fn counts_only() -> Self {
        Self {
            live: 0,
            reclaimed: 0,
            metrics: None,
        }
    }

    /// Counts plus size/capacity tier.
    pub(crate) fn with_metrics() -> Self {
        Self {
            live: 0,
            reclaimed: 0,
            metrics: Some(MetricTotals::default()),
        }
    }

    /// Accounts one accepted allocation. Called exactly once per record,
    /// at insertion.
    pub(crate) fn allocate(&mut self) {
        self.live = self
            .live
            .checked_add(1)
            .expect("live count overflows u64 - this indicates an unrealistic scenario");
    }

    /// Accounts one sweep-detected reclamation. Called exactly once per
    /// record, when a scan observes its target gone.
    pub(crate) fn reclaim(&mut self) {
        self.live = self
            .live
            .checked_sub(1)
            .expect("reclamation accounted for a record that was never allocated");
        self.reclaimed = self
            .reclaimed
            .checked_add(1)
            .expect("reclaimed count overflows u64 - this indicates an unrealistic scenario");
    }

    /// Zeroes the per-refresh fields (sums and current maxima) ahead of a
    /// new rollup pass. Event counters and ever-maxima persist.
    pub(crate) fn reset(&mut self) {
        if let Some(metrics) = &mut self.metrics {
            metrics.size_sum = 0;
            metrics.size_max = 0;
            metrics.capacity_count_sum = 0;
            metrics.capacity_count_max = 0;
            metrics.capacity_bytes_sum = 0;
            metrics.capacity_bytes_max = 0;
        }
    }

    /// Folds one live record's current metrics into the rollup. Invoked
    /// once per live record per refresh; a no-op in the counts-only tier.
    pub(crate) fn update(&mut self, size: u64, capacity_count: u64, capacity_bytes: u64) {
        let Some(metrics) = &mut self.metrics else {
            return;
        };

        metrics.size_sum = metrics.size_sum.saturating_add(size);
        metrics.capacity_count_sum = metrics.capacity_count_sum.saturating_add(capacity_count);
        metrics.capacity_bytes_sum = metrics.capacity_bytes_sum.saturating_add(capacity_bytes);

        metrics.size_max = metrics.size_max.max(size);
        metrics.size_max_ever = metrics.size_max_ever.max(size);
        metrics.capacity_count_max = metrics.capacity_count_max.max(capacity_count);
        metrics.capacity_count_max_ever = metrics.capacity_count_max_ever.max(capacity_count);
        metrics.capacity_bytes_max = metrics.capacity_bytes_max.max(capacity_bytes);
        metrics.capacity_bytes_max_ever = metrics.capacity_bytes_max_ever.max(capacity_bytes);
    }

    /// Number of live records (records whose reclamation has not yet been
    /// observed by a scan).
    #[must_use]
    pub fn live(&self) -> u64 {
        self.live
    }

    /// Number of records whose targets were observed reclaimed.
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }

    /// Whether this rollup carries size/capacity statistics.
    #[must_use]
    pub fn has_metrics(&self) -> bool {
        self.metrics.is_some()
    }

    /// Sum of live instance sizes as of the last refresh.
    #[must_use]
    pub fn size_sum(&self) -> u64 {
        self.metrics.map_or(0, |m| m.size_sum)
    }

    /// Largest live instance size as of the last refresh.
    #[must_use]
    pub fn size_max(&self) -> u64 {
        self.metrics.map_or(0, |m| m.size_max)
    }

    /// Largest instance size ever observed, live or since reclaimed.
    #[must_use]
    pub fn size_max_ever(&self) -> u64 {
        self.metrics.map_or(0, |m| m.size_max_ever)
    }

    /// Sum of live element capacities as of the last refresh.
    #[must_use]
    pub fn capacity_count_sum(&self) -> u64 {
        self.metrics.map_or(0, |m| m.capacity_count_sum)
    }

    /// Largest live element capacity as of the last refresh.
    #[must_use]
    pub fn capacity_count_max(&self) -> u64 {
        self.metrics.map_or(0, |m| m.capacity_count_max)
    }

    /// Largest element capacity ever observed.
    #[must_use]
    pub fn capacity_count_max_ever(&self) -> u64 {
        self.metrics.map_or(0, |m| m.capacity_count_max_ever)
    }

    /// Sum of live byte capacities as of the last refresh.
    #[must_use]
    pub fn capacity_bytes_sum(&self) -> u64 {
        self.metrics.map_or(0, |m| m.capacity_bytes_sum)
    }

    /// Largest live byte capacity as of the last refresh.
    #[must_use]
    pub fn capacity_bytes_max(&self) -> u64 {
        self.metrics.map_or(0, |m| m.capacity_bytes_max)
    }

    /// Largest byte capacity ever observed.
    #[must_use]
    pub fn capacity_bytes_max_ever(&self) -> u64 {
        self.metrics.map_or(0, |m| m.capacity_bytes_max_ever)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(stats live={} reclaimed={}", self.live, self.reclaimed)?;
        if let Some(m) = &self.metrics {
            write!(
                f,
                " size_sum={} size_max={} size_max_ever={} capacity_count_sum={} \
                 capacity_count_max={} capacity_count_max_ever={} capacity_bytes_sum={} \
                 capacity_bytes_max={} capacity_bytes_max_ever={}",
                m.size_sum,
                m.size_max,
                m.size_max_ever,
                m.capacity_count_sum,
                m.capacity_count_max,
                m.capacity_count_max_ever,
                m.capacity_bytes_sum,
                m.capacity_bytes_max,
                m.capacity_bytes_max_ever
            )?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_reclaim_are_exact() {
        let mut aggregate = Aggregate::counts_only();

        for _ in 0..10 {
            aggregate.allocate();
        }
        for _ in 0..3 {
            aggregate.reclaim();
        }

        assert_eq!(aggregate.live(), 7);
        assert_eq!(aggregate.reclaimed(), 3);
    }

    #[test]
    fn reset_preserves_event_counters_and_ever_maxima() {
        let mut aggregate = Aggregate::with_metrics();
        aggregate.allocate();
        aggregate.update(10, 20, 160);

        aggregate.reset();

        assert_eq!(aggregate.live(), 1);
        assert_eq!(aggregate.size_sum(), 0);
        assert_eq!(aggregate.size_max(), 0);
        assert_eq!(aggregate.size_max_ever(), 10);
        assert_eq!(aggregate.capacity_count_max_ever(), 20);
        assert_eq!(aggregate.capacity_bytes_max_ever(), 160);
    }

    #[test]
    fn update_accumulates_sums_and_maxima() {
        let mut aggregate = Aggregate::with_metrics();
        aggregate.update(5, 8, 64);
        aggregate.update(7, 4, 32);

        assert_eq!(aggregate.size_sum(), 12);
        assert_eq!(aggregate.size_max(), 7);
        assert_eq!(aggregate.capacity_count_sum(), 12);
        assert_eq!(aggregate.capacity_count_max(), 8);
        assert_eq!(aggregate.capacity_bytes_sum(), 96);
        assert_eq!(aggregate.capacity_bytes_max(), 64);
    }

    #[test]
    fn counts_only_tier_ignores_updates() {
        let mut aggregate = Aggregate::counts_only();
        aggregate.update(5, 8, 64);

        assert!(!aggregate.has_metrics());
        assert_eq!(aggregate.size_sum(), 0);
        assert_eq!(aggregate.size_max_ever(), 0);
    }

    #[test]
    #[should_panic(expected = "never allocated")]
    fn reclaim_without_allocate_panics() {
        let mut aggregate = Aggregate::counts_only();
        aggregate.reclaim();
    }
}
