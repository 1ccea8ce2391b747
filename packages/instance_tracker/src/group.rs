use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use foldhash::{HashMap, HashMapExt};

use crate::record::InstanceRecord;
use crate::stack::CallStack;
use crate::tracked::Tracked;

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;

/// What to group a snapshot by.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum GroupKey {
    /// Allocation call stack; same call site, same group.
    Stack,
    /// The target's value equality
    /// ([`value_eq`](crate::Tracked::value_eq) /
    /// [`value_hash`](crate::Tracked::value_hash)).
    Value,
    /// The target's [`render`](crate::Tracked::render) text.
    Rendered,
    /// The target's [`value_hash`](crate::Tracked::value_hash) alone.
    ValueHash,
    /// Allocation timestamp, truncated to the bucket width.
    Time(TimeBucket),
    /// Size as of the last refresh, bucketed by `modulus`.
    Size { modulus: NonZero<u64> },
}

/// Granularity of timestamp grouping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeBucket {
    /// No truncation; every distinct millisecond is its own group.
    Exact,
    /// Truncate to the whole second.
    Second,
    /// Truncate to the whole minute.
    Minute,
    /// Truncate to the whole hour.
    Hour,
}

/// The shared attribute a group of records has in common.
///
/// `Reclaimed`, `Absent` and `Failed` are sentinel groups: records whose
/// target is gone, records that never captured the attribute, and records
/// whose target panicked while producing it.
#[derive(Clone)]
#[non_exhaustive]
pub enum GroupValue {
    /// The allocation call stack the group shares.
    Stack(CallStack),
    /// A representative target; every member compares equal to it by
    /// value.
    Target(Arc<dyn Tracked>),
    /// The rendered text the group shares.
    Text(String),
    /// The value hash the group shares.
    Hash(u64),
    /// The (bucket-truncated) allocation time the group shares.
    Time(SystemTime),
    /// The lower bound of the size bucket the group shares.
    Size(u64),
    /// Records whose targets have been reclaimed.
    Reclaimed,
    /// Records that never captured the grouped attribute.
    Absent,
    /// Records whose target panicked while producing the attribute.
    Failed,
}

impl fmt::Debug for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stack(stack) => f.debug_tuple("Stack").field(stack).finish(),
            Self::Target(_) => f.write_str("Target(..)"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Hash(hash) => f.debug_tuple("Hash").field(hash).finish(),
            Self::Time(at) => f.debug_tuple("Time").field(at).finish(),
            Self::Size(bucket) => f.debug_tuple("Size").field(bucket).finish(),
            Self::Reclaimed => f.write_str("Reclaimed"),
            Self::Absent => f.write_str("Absent"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

/// One group and how many records fell into it.
#[derive(Clone, Debug)]
pub struct GroupCount {
    value: GroupValue,
    count: usize,
}

impl GroupCount {
    /// The attribute shared by every record in the group.
    #[must_use]
    pub fn value(&self) -> &GroupValue {
        &self.value
    }

    /// Number of records in the group.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Groups a snapshot by `key`, largest group first.
///
/// Every record lands in exactly one group; records that cannot produce
/// the attribute land in a sentinel group instead of being dropped. Calls
/// into target code contain any panic from it.
#[must_use]
pub fn group(records: &[InstanceRecord], key: GroupKey) -> Vec<GroupCount> {
    let mut counts: HashMap<MapKey, usize> = HashMap::new();

    for record in records {
        *counts.entry(map_key(record, key)).or_insert(0) += 1;
    }

    let mut groups: Vec<GroupCount> = counts
        .into_iter()
        .map(|(key, count)| GroupCount {
            value: key.into_value(),
            count,
        })
        .collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}

/// The hashable form of a group attribute. Mirrors [`GroupValue`] except
/// that targets carry a precomputed hash and times are kept as truncated
/// milliseconds.
#[derive(Eq, Hash, PartialEq)]
enum MapKey {
    Stack(CallStack),
    Value(ValueKey),
    Text(String),
    Hash(u64),
    TimeMillis(u64),
    Size(u64),
    Reclaimed,
    Absent,
    Failed,
}

impl MapKey {
    fn into_value(self) -> GroupValue {
        match self {
            Self::Stack(stack) => GroupValue::Stack(stack),
            Self::Value(key) => GroupValue::Target(key.target),
            Self::Text(text) => GroupValue::Text(text),
            Self::Hash(hash) => GroupValue::Hash(hash),
            Self::TimeMillis(millis) => {
                GroupValue::Time(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
            }
            Self::Size(bucket) => GroupValue::Size(bucket),
            Self::Reclaimed => GroupValue::Reclaimed,
            Self::Absent => GroupValue::Absent,
            Self::Failed => GroupValue::Failed,
        }
    }
}

/// A live target keyed by its value semantics. The hash is computed once,
/// under a panic guard, before the key is built.
struct ValueKey {
    target: Arc<dyn Tracked>,
    hash: u64,
}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }

        let (target, other) = (Arc::clone(&self.target), Arc::clone(&other.target));
        panic::catch_unwind(AssertUnwindSafe(move || target.value_eq(other.as_ref())))
            .unwrap_or_else(|_| {
                tracing::warn!("value_eq panicked during grouping; targets treated as distinct");
                false
            })
    }
}

impl Eq for ValueKey {}

fn map_key(record: &InstanceRecord, key: GroupKey) -> MapKey {
    match key {
        GroupKey::Stack => record
            .stack()
            .map_or(MapKey::Absent, |stack| MapKey::Stack(stack.clone())),
        GroupKey::Value => with_target(record, |target| {
            guarded_u64(|| target.value_hash(), "value_hash").map_or(MapKey::Failed, |hash| {
                MapKey::Value(ValueKey {
                    target: Arc::clone(target),
                    hash,
                })
            })
        }),
        GroupKey::Rendered => with_target(record, |target| {
            panic::catch_unwind(AssertUnwindSafe(|| target.render()))
                .map_or(MapKey::Failed, MapKey::Text)
        }),
        GroupKey::ValueHash => with_target(record, |target| {
            guarded_u64(|| target.value_hash(), "value_hash").map_or(MapKey::Failed, MapKey::Hash)
        }),
        GroupKey::Time(bucket) => record.allocated_at().map_or(MapKey::Absent, |at| {
            MapKey::TimeMillis(truncate_millis(millis_since_epoch(at), bucket))
        }),
        GroupKey::Size { modulus } => {
            if record.has_metrics() {
                let modulus = modulus.get();
                MapKey::Size(record.size() / modulus * modulus)
            } else {
                // No metrics block means the size was never captured; a
                // bucket of 0 would be indistinguishable from a real
                // zero-sized instance.
                MapKey::Absent
            }
        }
    }
}

fn with_target(
    record: &InstanceRecord,
    build: impl FnOnce(&Arc<dyn Tracked>) -> MapKey,
) -> MapKey {
    record
        .upgrade()
        .map_or(MapKey::Reclaimed, |target| build(&target))
}

fn guarded_u64(call: impl FnOnce() -> u64, operation: &str) -> Option<u64> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_or_else(
        |_| {
            tracing::warn!(operation, "target call panicked during grouping");
            None
        },
        Some,
    )
}

fn millis_since_epoch(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn truncate_millis(millis: u64, bucket: TimeBucket) -> u64 {
    let width = match bucket {
        TimeBucket::Exact => return millis,
        TimeBucket::Second => MILLIS_PER_SECOND,
        TimeBucket::Minute => MILLIS_PER_MINUTE,
        TimeBucket::Hour => MILLIS_PER_HOUR,
    };
    millis / width * width
}
