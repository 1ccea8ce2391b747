use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use foldhash::{HashMap, HashMapExt};

use crate::class_tracker::ClassTracker;
use crate::constants::ERR_POISONED_LOCK;
use crate::Options;

/// Decides, per class, whether to track it and with what capture
/// configuration. `None` declines the class permanently.
pub type OptionsResolver = dyn Fn(Option<&str>, &str) -> Option<Options> + Send + Sync;

/// The registry of per-class trackers.
///
/// The allocation hook asks the catalog for its class's tracker on every
/// allocation; the first request for a class runs the resolver and the
/// decision is cached forever after, declined classes included, so the
/// steady-state cost of an untracked class is one map lookup.
///
/// The catalog lock is held only for lookup and resolution, never during a
/// refresh, so reporting does not stall allocation hooks of other classes.
pub struct Catalog {
    resolver: Box<OptionsResolver>,
    trackers: Mutex<HashMap<Arc<str>, Option<Arc<ClassTracker>>>>,
}

impl Catalog {
    /// Creates a catalog that tracks every class with the same options.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self::with_resolver(move |_, _| Some(options))
    }

    /// Creates a catalog whose per-class decisions come from `resolver`.
    ///
    /// The resolver receives the module hint (when the registration site
    /// supplied one) and the class name, and is invoked at most once per
    /// distinct class name.
    #[must_use]
    pub fn with_resolver(
        resolver: impl Fn(Option<&str>, &str) -> Option<Options> + Send + Sync + 'static,
    ) -> Self {
        Self {
            resolver: Box::new(resolver),
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the tracker for `class_name`, resolving options on first
    /// sight. `None` means the resolver declined the class.
    ///
    /// `object_size` is the caller's estimate of shallow bytes per
    /// instance; it is recorded on the tracker the first time the class is
    /// seen and ignored afterwards.
    #[must_use]
    pub fn tracker(
        &self,
        module_hint: Option<&str>,
        class_name: &str,
        object_size: usize,
    ) -> Option<Arc<ClassTracker>> {
        let mut trackers = self.trackers.lock().expect(ERR_POISONED_LOCK);

        if let Some(cached) = trackers.get(class_name) {
            return cached.clone();
        }

        // Resolvers are caller-supplied; one that panics declines the
        // class rather than poisoning the catalog.
        let options = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.resolver)(module_hint, class_name)
        }))
        .unwrap_or_else(|_| {
            tracing::warn!(class_name, "options resolver panicked; class will not be tracked");
            None
        });

        let tracker =
            options.map(|options| Arc::new(ClassTracker::new(class_name, object_size, options)));
        trackers.insert(Arc::from(class_name), tracker.clone());
        tracker
    }

    /// Returns the tracker for a class already seen, without resolving.
    #[must_use]
    pub fn get(&self, class_name: &str) -> Option<Arc<ClassTracker>> {
        self.trackers
            .lock()
            .expect(ERR_POISONED_LOCK)
            .get(class_name)
            .cloned()
            .flatten()
    }

    /// Names of every class currently being tracked, in no particular
    /// order. Declined classes are not included.
    #[must_use]
    pub fn class_names(&self) -> Vec<Arc<str>> {
        self.trackers
            .lock()
            .expect(ERR_POISONED_LOCK)
            .iter()
            .filter(|(_, tracker)| tracker.is_some())
            .map(|(name, _)| Arc::clone(name))
            .collect()
    }

    /// Refreshes every tracked class.
    ///
    /// The tracker list is snapshotted first and each refresh then runs
    /// outside the catalog lock, taking only that class's own lock.
    pub fn refresh_all(&self) {
        let trackers: Vec<Arc<ClassTracker>> = self
            .trackers
            .lock()
            .expect(ERR_POISONED_LOCK)
            .values()
            .filter_map(Clone::clone)
            .collect();

        for tracker in trackers {
            drop(tracker.refresh());
        }
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trackers = self.trackers.lock().expect(ERR_POISONED_LOCK);
        f.debug_struct("Catalog")
            .field("classes", &trackers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::tracked::Tracked;

    struct Plain;
    impl Tracked for Plain {}

    #[test]
    fn same_class_yields_same_tracker() {
        let catalog = Catalog::new(Options::minimal());

        let first = catalog.tracker(None, "demo::Plain", 8).unwrap();
        let second = catalog.tracker(None, "demo::Plain", 8).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn resolver_runs_at_most_once_per_class() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = Catalog::with_resolver({
            let calls = Arc::clone(&calls);
            move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(Options::minimal())
            }
        });

        for _ in 0..5 {
            _ = catalog.tracker(None, "demo::Plain", 8);
        }
        _ = catalog.tracker(None, "demo::Other", 8);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn declined_class_stays_declined() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = Catalog::with_resolver({
            let calls = Arc::clone(&calls);
            move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            }
        });

        assert!(catalog.tracker(None, "demo::Plain", 8).is_none());
        assert!(catalog.tracker(None, "demo::Plain", 8).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Declined classes do not appear in the tracked listing.
        assert!(catalog.class_names().is_empty());
        assert!(catalog.get("demo::Plain").is_none());
    }

    #[test]
    fn resolver_sees_the_module_hint() {
        let catalog = Catalog::with_resolver(|module, _| {
            (module == Some("demo")).then(Options::minimal)
        });

        assert!(catalog.tracker(Some("demo"), "demo::Plain", 8).is_some());
        assert!(catalog.tracker(Some("other"), "other::Plain", 8).is_none());
    }

    #[test]
    fn panicking_resolver_declines_the_class() {
        let catalog = Catalog::with_resolver(|_, class_name| {
            assert!(!class_name.contains("Bad"), "resolver rejected");
            Some(Options::minimal())
        });

        assert!(catalog.tracker(None, "demo::Bad", 8).is_none());
        assert!(catalog.tracker(None, "demo::Good", 8).is_some());
    }

    #[test]
    fn refresh_all_touches_every_tracker() {
        let catalog = Catalog::new(Options::minimal());
        let a = catalog.tracker(None, "demo::A", 8).unwrap();
        let b = catalog.tracker(None, "demo::B", 8).unwrap();

        let live_a: Arc<dyn Tracked> = Arc::new(Plain);
        let dead_b: Arc<dyn Tracked> = Arc::new(Plain);
        a.record(&live_a);
        b.record(&dead_b);
        drop(dead_b);

        catalog.refresh_all();

        assert_eq!(a.overall_stats().live(), 1);
        assert_eq!(b.overall_stats().live(), 0);
        assert_eq!(b.overall_stats().reclaimed(), 1);
    }

    static_assertions::assert_impl_all!(Catalog: Send, Sync);
}
