use crate::record::InstanceRecord;

/// Index sentinel for "no slot".
const NIL: u32 = u32::MAX;

/// Mean chain length that triggers a table doubling.
const LOAD_FACTOR: usize = 7;

/// Bucket count of the first table, allocated on first insert.
const INITIAL_BUCKETS: usize = 8;

/// Per-class collection of instance records, keyed by target identity and
/// self-pruning as targets are reclaimed.
///
/// The table is a power-of-two array of bucket heads over a flat slot
/// arena; chains and the free list are intrusive `u32` links, so inserting
/// a record allocates no separate node. Inserting also walks the rest of
/// the destination chain once, dropping any records whose targets have been
/// reclaimed - that bounds cleanup cost to an amortized 1/N of the table
/// per insert even if nobody ever takes a snapshot.
///
/// Reclamation is detected *only* here, during a chain walk, a resize or a
/// full sweep. A record whose target died a microsecond ago is still in the
/// table until one of those passes observes it.
#[derive(Debug, Default)]
pub(crate) struct LiveSet {
    /// Head slot index per bucket. Length is always a power of two (or
    /// zero before the first insert).
    buckets: Vec<u32>,
    slots: Vec<Slot>,
    free_head: u32,
    len: usize,
}

#[derive(Debug)]
enum Slot {
    Occupied { record: InstanceRecord, next: u32 },
    Vacant { next_free: u32 },
}

/// One visited entry during a full sweep.
pub(crate) enum SweepEntry<'a> {
    /// A still-live record, mutable so the caller can refresh its metrics.
    Live(&'a mut InstanceRecord),
    /// A record whose target was found reclaimed; it has already been
    /// unlinked and this is the last look at it.
    Reclaimed(InstanceRecord),
}

impl LiveSet {
    pub(crate) fn new() -> Self {
        Self {
            buckets: Vec::new(),
            slots: Vec::new(),
            free_head: NIL,
            len: 0,
        }
    }

    /// Number of records in the table, including records whose targets are
    /// dead but not yet observed dead.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Inserts a freshly created record.
    ///
    /// Any record in the destination chain whose target has been reclaimed
    /// is removed and handed to `on_reclaimed` exactly once. When the table
    /// exceeds its load factor the insert instead triggers a doubling
    /// resize, which performs the same cleanup over the whole table.
    ///
    /// # Panics
    ///
    /// Panics if the chain already holds a record for the same, still-live
    /// target. That is a contract violation in the instrumentation layer:
    /// each allocation must be registered exactly once.
    pub(crate) fn insert(
        &mut self,
        record: InstanceRecord,
        mut on_reclaimed: impl FnMut(InstanceRecord),
    ) {
        if self.buckets.is_empty() {
            self.buckets = vec![NIL; INITIAL_BUCKETS];
        }

        let identity = record.identity();
        let bucket = self.bucket_of(identity);
        let old_head = self.buckets[bucket];
        let new_head = self.alloc(record, old_head);
        self.buckets[bucket] = new_head;
        self.len = self.len.checked_add(1).expect("record count overflows usize");

        if self.len >= self.buckets.len().saturating_mul(LOAD_FACTOR) {
            self.resize(&mut on_reclaimed);
            return;
        }

        // Opportunistic cleanup: walk the rest of this chain once.
        let mut prev = new_head;
        let mut current = old_head;
        while current != NIL {
            let next = self.next_of(current);
            if self.slot_is_live(current) {
                assert!(
                    self.slot_identity(current) != identity,
                    "duplicate registration of a live target - the allocation \
                     hook must be invoked exactly once per allocation"
                );
                prev = current;
            } else {
                self.set_next(prev, next);
                let dead = self.free(current);
                self.len = self.len.saturating_sub(1);
                on_reclaimed(dead);
            }
            current = next;
        }
    }

    /// Full pass over every bucket: reclaimed records are unlinked and
    /// reported, live records are visited mutably and then returned as a
    /// point-in-time snapshot.
    ///
    /// This is the only full-table reclamation point; each reclaimed record
    /// is reported exactly once across all scans.
    pub(crate) fn sweep(
        &mut self,
        mut visit: impl FnMut(SweepEntry<'_>),
    ) -> Vec<InstanceRecord> {
        let mut live = Vec::with_capacity(self.len);

        for bucket in 0..self.buckets.len() {
            let mut prev = NIL;
            let mut current = self.buckets[bucket];
            while current != NIL {
                let next = self.next_of(current);
                if self.slot_is_live(current) {
                    let record = self.record_mut(current);
                    visit(SweepEntry::Live(record));
                    live.push(record.clone());
                    prev = current;
                } else {
                    if prev == NIL {
                        self.buckets[bucket] = next;
                    } else {
                        self.set_next(prev, next);
                    }
                    let dead = self.free(current);
                    self.len = self.len.saturating_sub(1);
                    visit(SweepEntry::Reclaimed(dead));
                }
                current = next;
            }
        }

        live
    }

    /// Doubles the bucket array and relinks every live record; reclaimed
    /// records are dropped and reported, same as a sweep.
    fn resize(&mut self, on_reclaimed: &mut impl FnMut(InstanceRecord)) {
        let new_capacity = self.buckets.len().saturating_mul(2).max(INITIAL_BUCKETS);
        self.buckets.clear();
        self.buckets.resize(new_capacity, NIL);

        for index in 0..self.slots.len() {
            let slot_index = u32::try_from(index).expect("slot index exceeds u32 range");
            let (live, identity) = match self.slots.get(index) {
                Some(Slot::Occupied { record, .. }) => (record.is_live(), record.identity()),
                _ => continue,
            };

            if live {
                let bucket = self.bucket_of(identity);
                let head = self.buckets[bucket];
                self.set_next(slot_index, head);
                self.buckets[bucket] = slot_index;
            } else {
                let dead = self.free(slot_index);
                self.len = self.len.saturating_sub(1);
                on_reclaimed(dead);
            }
        }
    }

    /// Spreads the identity address across the (power of two) buckets.
    /// Addresses share alignment bits, so a straight mask would cluster.
    fn bucket_of(&self, identity: usize) -> usize {
        debug_assert!(self.buckets.len().is_power_of_two());
        let mixed = (identity as u64 >> 3).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let spread =
            usize::try_from(mixed >> 32).expect("32-bit value always fits a supported usize");
        spread & (self.buckets.len().wrapping_sub(1))
    }

    fn alloc(&mut self, record: InstanceRecord, next: u32) -> u32 {
        if self.free_head == NIL {
            let index = u32::try_from(self.slots.len()).expect("slot index exceeds u32 range");
            self.slots.push(Slot::Occupied { record, next });
            return index;
        }

        let index = self.free_head;
        let slot = self.slot_mut(index);
        let Slot::Vacant { next_free } = *slot else {
            panic!("free list points at an occupied slot");
        };
        *slot = Slot::Occupied { record, next };
        self.free_head = next_free;
        index
    }

    fn free(&mut self, index: u32) -> InstanceRecord {
        let next_free = self.free_head;
        let slot = self.slot_mut(index);
        let previous = std::mem::replace(slot, Slot::Vacant { next_free });
        self.free_head = index;
        match previous {
            Slot::Occupied { record, .. } => record,
            Slot::Vacant { .. } => panic!("freeing a vacant slot"),
        }
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot {
        self.slots
            .get_mut(index as usize)
            .expect("slot index out of bounds")
    }

    fn slot(&self, index: u32) -> &Slot {
        self.slots
            .get(index as usize)
            .expect("slot index out of bounds")
    }

    fn next_of(&self, index: u32) -> u32 {
        match self.slot(index) {
            Slot::Occupied { next, .. } => *next,
            Slot::Vacant { .. } => panic!("chain links to a vacant slot"),
        }
    }

    fn set_next(&mut self, index: u32, new_next: u32) {
        match self.slot_mut(index) {
            Slot::Occupied { next, .. } => *next = new_next,
            Slot::Vacant { .. } => panic!("chain links to a vacant slot"),
        }
    }

    fn slot_is_live(&self, index: u32) -> bool {
        match self.slot(index) {
            Slot::Occupied { record, .. } => record.is_live(),
            Slot::Vacant { .. } => panic!("chain links to a vacant slot"),
        }
    }

    fn slot_identity(&self, index: u32) -> usize {
        match self.slot(index) {
            Slot::Occupied { record, .. } => record.identity(),
            Slot::Vacant { .. } => panic!("chain links to a vacant slot"),
        }
    }

    fn record_mut(&mut self, index: u32) -> &mut InstanceRecord {
        match self.slot_mut(index) {
            Slot::Occupied { record, .. } => record,
            Slot::Vacant { .. } => panic!("chain links to a vacant slot"),
        }
    }
}
