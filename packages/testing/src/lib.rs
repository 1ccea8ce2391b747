//! Helpers shared by the tests of this workspace.
//!
//! This is an internal package and is not published; it makes no API
//! stability promises whatsoever.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use instance_tracker::Tracked;

/// A tracked target with configurable capability values that counts how
/// often each capability is consulted.
#[derive(Debug, Default)]
pub struct SpyTarget {
    size: Option<u64>,
    capacity_count: Option<u64>,
    capacity_bytes: Option<u64>,
    size_calls: AtomicUsize,
    capacity_calls: AtomicUsize,
}

impl SpyTarget {
    /// A spy reporting the given capability values; `None` means the
    /// capability is absent.
    #[must_use]
    pub fn new(size: Option<u64>, capacity_count: Option<u64>, capacity_bytes: Option<u64>) -> Self {
        Self {
            size,
            capacity_count,
            capacity_bytes,
            size_calls: AtomicUsize::new(0),
            capacity_calls: AtomicUsize::new(0),
        }
    }

    /// How many times `size_hint` has been called.
    #[must_use]
    pub fn size_calls(&self) -> usize {
        self.size_calls.load(AtomicOrdering::Relaxed)
    }

    /// How many times either capacity capability has been called.
    #[must_use]
    pub fn capacity_calls(&self) -> usize {
        self.capacity_calls.load(AtomicOrdering::Relaxed)
    }
}

impl Tracked for SpyTarget {
    fn size_hint(&self) -> Option<u64> {
        self.size_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.size
    }

    fn capacity_count(&self) -> Option<u64> {
        self.capacity_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.capacity_count
    }

    fn capacity_bytes(&self) -> Option<u64> {
        self.capacity_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.capacity_bytes
    }
}

/// A tracked target whose every capability panics, standing in for
/// profiled-program objects mutated concurrently with a scan.
#[derive(Debug)]
pub struct PanickingTarget;

impl Tracked for PanickingTarget {
    fn size_hint(&self) -> Option<u64> {
        panic!("size capability is broken")
    }

    fn capacity_count(&self) -> Option<u64> {
        panic!("capacity capability is broken")
    }

    fn capacity_bytes(&self) -> Option<u64> {
        panic!("capacity capability is broken")
    }

    fn value_hash(&self) -> u64 {
        panic!("hash capability is broken")
    }

    fn render(&self) -> String {
        panic!("render capability is broken")
    }

    fn natural_cmp(&self, _other: &dyn Tracked) -> Option<Ordering> {
        panic!("comparison capability is broken")
    }
}

/// A tracked target with full value semantics: two `ValueTarget`s compare,
/// hash and render by their payload rather than their address.
#[derive(Debug)]
pub struct ValueTarget {
    value: u64,
}

impl ValueTarget {
    /// A target whose value, size and hash all derive from `value`.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self { value }
    }

    /// The payload.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl Tracked for ValueTarget {
    fn size_hint(&self) -> Option<u64> {
        Some(self.value)
    }

    fn capacity_count(&self) -> Option<u64> {
        Some(self.value.saturating_mul(2))
    }

    fn value_hash(&self) -> u64 {
        self.value
    }

    fn value_eq(&self, other: &dyn Tracked) -> bool {
        (other as &dyn std::any::Any)
            .downcast_ref::<Self>()
            .is_some_and(|other| self.value == other.value)
    }

    fn render(&self) -> String {
        format!("value:{}", self.value)
    }

    fn natural_cmp(&self, other: &dyn Tracked) -> Option<Ordering> {
        let other = (other as &dyn std::any::Any).downcast_ref::<Self>()?;
        Some(self.value.cmp(&other.value))
    }
}
