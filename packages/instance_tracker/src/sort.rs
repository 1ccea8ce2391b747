use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};

use foldhash::{HashMap, HashMapExt};

use crate::record::InstanceRecord;

const RANK_RECLAIMED: u8 = 0;
const RANK_PANICKED: u8 = 1;
const RANK_COMPARABLE: u8 = 2;

/// What to order a snapshot by.
///
/// Keys that consult the live target (`Natural`, `ValueHash`) place
/// reclaimed records first and records whose target panicked next, so
/// healthy records cluster at the end of an ascending sort rather than
/// interleaving with casualties.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SortKey {
    /// Allocation timestamp; records without one sort first.
    AllocationTime,
    /// The target's own [`natural_cmp`](crate::Tracked::natural_cmp)
    /// ordering; non-comparable pairs rank equal.
    Natural,
    /// The target's [`value_hash`](crate::Tracked::value_hash).
    ValueHash,
    /// Size as of the last refresh.
    Size,
    /// Largest size ever observed.
    MaxSize,
    /// Element capacity as of the last refresh.
    CapacityCount,
    /// Largest element capacity ever observed.
    MaxCapacityCount,
    /// Byte capacity as of the last refresh.
    CapacityBytes,
    /// Largest byte capacity ever observed.
    MaxCapacityBytes,
    /// Capacity headroom (capacity count minus size).
    ExcessCapacity,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Sorts a snapshot in place.
///
/// Keys that call into target code contain any panic from it; a record
/// whose target panics ranks as a sentinel rather than aborting the sort.
pub fn sort(records: &mut [InstanceRecord], key: SortKey, direction: Direction) {
    if key == SortKey::Natural {
        sort_natural(records, direction);
        return;
    }

    records.sort_by(|a, b| {
        let ordering = compare(a, b, key);
        match direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    });
}

fn compare(a: &InstanceRecord, b: &InstanceRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::AllocationTime => a.allocated_at().cmp(&b.allocated_at()),
        SortKey::Natural => unreachable!("handled by sort_natural"),
        SortKey::ValueHash => hash_rank(a).cmp(&hash_rank(b)),
        SortKey::Size => a.size().cmp(&b.size()),
        SortKey::MaxSize => a.max_size().cmp(&b.max_size()),
        SortKey::CapacityCount => a.capacity_count().cmp(&b.capacity_count()),
        SortKey::MaxCapacityCount => a.max_capacity_count().cmp(&b.max_capacity_count()),
        SortKey::CapacityBytes => a.capacity_bytes().cmp(&b.capacity_bytes()),
        SortKey::MaxCapacityBytes => a.max_capacity_bytes().cmp(&b.max_capacity_bytes()),
        SortKey::ExcessCapacity => a.excess_capacity().cmp(&b.excess_capacity()),
    }
}

/// Rank tuple for hash ordering: reclaimed, then panicked, then healthy
/// records ordered by hash.
fn hash_rank(record: &InstanceRecord) -> (u8, u64) {
    let Some(target) = record.upgrade() else {
        return (0, 0);
    };

    match panic::catch_unwind(AssertUnwindSafe(|| target.value_hash())) {
        Ok(hash) => (2, hash),
        Err(_) => {
            tracing::warn!("value_hash panicked during sort; record ranks as sentinel");
            (1, 0)
        }
    }
}

/// Natural ordering needs special treatment: the comparator handed to the
/// sort must stay consistent across argument orders, so each record is
/// classified exactly once up front (reclaimed, panicking or comparable)
/// and only records proven comparable ever reach `natural_cmp` pairwise.
/// A panicking comparator is therefore caught and logged once per record,
/// not once per comparison.
fn sort_natural(records: &mut [InstanceRecord], direction: Direction) {
    let ranks: HashMap<usize, u8> = records
        .iter()
        .map(|record| (record.identity(), natural_rank(record)))
        .collect();

    records.sort_by(|a, b| {
        let rank_a = ranks.get(&a.identity()).copied().unwrap_or(RANK_RECLAIMED);
        let rank_b = ranks.get(&b.identity()).copied().unwrap_or(RANK_RECLAIMED);

        let ordering = rank_a.cmp(&rank_b).then_with(|| {
            if rank_a == RANK_COMPARABLE {
                compare_comparable(a, b)
            } else {
                Ordering::Equal
            }
        });
        match direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    });
}

/// Exercises the target's comparator against itself under a panic guard.
fn natural_rank(record: &InstanceRecord) -> u8 {
    let Some(target) = record.upgrade() else {
        return RANK_RECLAIMED;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| {
        _ = target.natural_cmp(target.as_ref());
    })) {
        Ok(()) => RANK_COMPARABLE,
        Err(_) => {
            tracing::warn!("natural_cmp panicked during sort; record ranks as sentinel");
            RANK_PANICKED
        }
    }
}

fn compare_comparable(a: &InstanceRecord, b: &InstanceRecord) -> Ordering {
    // Targets can be reclaimed, and in principle start panicking, between
    // classification and this comparison; both degrade to a symmetric tie.
    let (Some(a), Some(b)) = (a.upgrade(), b.upgrade()) else {
        return Ordering::Equal;
    };

    panic::catch_unwind(AssertUnwindSafe(|| a.natural_cmp(b.as_ref())))
        .map_or(Ordering::Equal, |ordering| ordering.unwrap_or(Ordering::Equal))
}
