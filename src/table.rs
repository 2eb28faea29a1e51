//! Bucket metadata and the probing algorithms.
//!
//! The table keeps one byte of metadata per bucket: the high bit marks the
//! bucket occupied and the low seven bits carry a payload derived from the
//! element's hash. Lookups walk buckets linearly from the hash's ideal
//! bucket and use the payload to skip most non-matching elements without
//! touching element storage; only a payload match costs an equality call.
//!
//! The payload is taken from `hash >> scale`, above the bits that select the
//! bucket. Deriving it from the low bits would correlate it with the probe
//! position and collapse its filtering power, so the two bit ranges are kept
//! disjoint.
//!
//! ## Probing invariants
//!
//! - `bucket_count` is `1 << scale` and probing wraps with `& mask`.
//! - At most three quarters of the buckets are ever occupied, so at least
//!   one bucket is always unoccupied and every probe terminates.
//! - Contiguous chain: for every occupied bucket `b` holding an element
//!   whose ideal bucket is `i`, every bucket on the wrapped arc `[i, b)` is
//!   occupied. Lookups rely on this to stop at the first unoccupied bucket.
//!
//! Deletion preserves the chain invariant by backward-shift repair: after
//! opening a hole, the tail of the collision chain is scanned backward for
//! an element allowed to move into the hole, the move is performed, and the
//! scan repeats from the element's old position until nothing is out of
//! place. Element moves are performed by the caller through
//! [`RepairDelegate`]; the table moves the metadata byte itself.

/// Highest scale the sizing math accepts; one bucket of address space is
/// reserved so `bucket_count` cannot overflow `usize`.
pub const MAX_SCALE: u8 = (usize::BITS - 1) as u8;

/// Real tables never have fewer than eight buckets; tiny scales rehash too
/// often to be worth allocating.
const MIN_SCALE: u8 = 3;

const OCCUPIED_BIT: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Metadata for one bucket: an occupied flag and a 7-bit payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct MapEntry(u8);

impl MapEntry {
    /// An unoccupied bucket.
    pub const EMPTY: MapEntry = MapEntry(0);

    #[inline]
    fn occupied_with(payload: u8) -> MapEntry {
        MapEntry(OCCUPIED_BIT | (payload & PAYLOAD_MASK))
    }

    /// Whether the bucket holds an element.
    #[inline]
    pub fn is_occupied(self) -> bool {
        self.0 & OCCUPIED_BIT != 0
    }

    /// The hash-derived tag stored for an occupied bucket.
    #[inline]
    pub fn payload(self) -> u8 {
        self.0 & PAYLOAD_MASK
    }
}

/// Number of buckets at `scale`.
#[inline]
pub fn bucket_count_for_scale(scale: u8) -> usize {
    debug_assert!(scale <= MAX_SCALE);
    1 << scale
}

/// Largest element count a table of `scale` may hold: three quarters of the
/// buckets, rounded down. Scale zero holds nothing.
#[inline]
pub fn capacity_for_scale(scale: u8) -> usize {
    // Dividing first cannot overflow; exact for any power of two >= 4.
    bucket_count_for_scale(scale) / 4 * 3
}

/// The smallest scale whose capacity covers `capacity` requested entries.
pub fn scale_for_capacity(capacity: usize) -> u8 {
    if capacity == 0 {
        return 0;
    }
    let mut scale = MIN_SCALE;
    while capacity_for_scale(scale) < capacity {
        assert!(scale < MAX_SCALE, "requested capacity overflows the table");
        scale += 1;
    }
    scale
}

/// Result of a probe: the bucket where it stopped and whether it stopped on
/// a payload match (`true`) or on the first unoccupied bucket (`false`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    /// Bucket the probe stopped at.
    pub bucket: usize,
    /// Whether the bucket's payload matched the probed hash.
    pub found: bool,
}

/// Moves elements on behalf of [`BucketsMut::delete`].
pub trait RepairDelegate {
    /// The bucket the element currently stored at `bucket` maps to in an
    /// empty table (`hash & mask`).
    fn ideal_bucket(&self, bucket: usize) -> usize;

    /// Moves the element at `from` into the unoccupied slot at `to`.
    /// After the call, `from` no longer holds an element.
    fn move_element(&mut self, from: usize, to: usize);
}

/// Read-only probing over a table's metadata.
#[derive(Clone, Copy)]
pub struct Buckets<'a> {
    entries: &'a [MapEntry],
    scale: u8,
}

impl<'a> Buckets<'a> {
    /// Borrows the metadata of a table with `1 << scale` buckets.
    #[inline]
    pub fn new(entries: &'a [MapEntry], scale: u8) -> Self {
        debug_assert_eq!(entries.len(), bucket_count_for_scale(scale));
        Buckets { entries, scale }
    }

    #[inline]
    fn mask(&self) -> usize {
        self.entries.len() - 1
    }

    /// The bucket `hash` maps to in an empty table.
    #[inline]
    pub fn ideal_bucket(&self, hash: usize) -> usize {
        hash & self.mask()
    }

    /// The payload stored for an element with `hash`.
    #[inline]
    pub fn payload(&self, hash: usize) -> u8 {
        ((hash >> self.scale) & PAYLOAD_MASK as usize) as u8
    }

    /// Whether `bucket` holds an element.
    #[inline]
    pub fn is_occupied(&self, bucket: usize) -> bool {
        self.entries[bucket].is_occupied()
    }

    /// Probes from the ideal bucket of `hash`: stops at the first bucket
    /// whose payload matches, or at the first unoccupied bucket.
    pub fn lookup_first(&self, hash: usize) -> Probe {
        self.probe_from(self.ideal_bucket(hash), self.payload(hash))
    }

    /// Continues a probe past `after`, for when the candidate it returned
    /// failed the caller's equality check.
    pub fn lookup_next(&self, hash: usize, after: usize) -> Probe {
        self.probe_from((after + 1) & self.mask(), self.payload(hash))
    }

    #[inline]
    fn probe_from(&self, start: usize, payload: u8) -> Probe {
        let mask = self.mask();
        let mut bucket = start;
        // Terminates: at least one bucket is always unoccupied.
        loop {
            let entry = self.entries[bucket];
            if !entry.is_occupied() {
                return Probe {
                    bucket,
                    found: false,
                };
            }
            if entry.payload() == payload {
                return Probe {
                    bucket,
                    found: true,
                };
            }
            bucket = (bucket + 1) & mask;
        }
    }
}

/// Mutable probing: everything [`Buckets`] does, plus insertion and
/// deletion with backward-shift repair.
pub struct BucketsMut<'a> {
    entries: &'a mut [MapEntry],
    scale: u8,
}

impl<'a> BucketsMut<'a> {
    /// Borrows the metadata of a table with `1 << scale` buckets.
    #[inline]
    pub fn new(entries: &'a mut [MapEntry], scale: u8) -> Self {
        debug_assert_eq!(entries.len(), bucket_count_for_scale(scale));
        BucketsMut { entries, scale }
    }

    /// A read-only view of the same metadata.
    #[inline]
    pub fn as_read(&self) -> Buckets<'_> {
        Buckets {
            entries: self.entries,
            scale: self.scale,
        }
    }

    #[inline]
    fn mask(&self) -> usize {
        self.entries.len() - 1
    }

    /// Marks `bucket` occupied with the payload of `hash`.
    ///
    /// The bucket must be unoccupied and must have been produced by a probe
    /// for the same hash, or the chain invariant breaks.
    pub fn insert(&mut self, hash: usize, bucket: usize) {
        debug_assert!(!self.entries[bucket].is_occupied());
        let payload = self.as_read().payload(hash);
        self.entries[bucket] = MapEntry::occupied_with(payload);
    }

    /// Removes the entry at `bucket` (which holds an element hashing to
    /// `hash`) and repairs the collision chain around the hole.
    ///
    /// Panics if the bucket is unoccupied.
    pub fn delete(&mut self, hash: usize, bucket: usize, delegate: &mut impl RepairDelegate) {
        assert!(
            self.entries[bucket].is_occupied(),
            "delete of an unoccupied bucket"
        );
        let mask = self.mask();

        // Open the hole.
        self.entries[bucket] = MapEntry::EMPTY;

        // First bucket of the collision chain around the hole: walk back
        // from the removed element's ideal bucket until just past an
        // unoccupied bucket. Terminates because the hole itself is
        // unoccupied.
        let mut start = hash & mask;
        while self.entries[(start + mask) & mask].is_occupied() {
            start = (start + mask) & mask;
        }

        // Last bucket of the chain: walk forward from the hole until just
        // before the next unoccupied bucket.
        let mut last = bucket;
        let mut b = (bucket + 1) & mask;
        while self.entries[b].is_occupied() {
            last = b;
            b = (b + 1) & mask;
        }

        // Repeatedly pull the rearmost element that belongs on the arc
        // `(start, hole]` into the hole. Pulling the rearmost candidate (not
        // the nearest) keeps every element no later than its own chain
        // position, so the chain invariant holds at each step.
        let mut hole = bucket;
        while hole != last {
            let mut candidate = last;
            while candidate != hole {
                let ideal = delegate.ideal_bucket(candidate);
                // Wrap-aware test for `ideal` in `[start, hole]`.
                let belongs = if start <= hole {
                    ideal >= start && ideal <= hole
                } else {
                    ideal >= start || ideal <= hole
                };
                if belongs {
                    break;
                }
                candidate = (candidate + mask) & mask;
            }
            if candidate == hole {
                // Everything left sits at or after its ideal bucket.
                break;
            }

            // The payload byte travels with the element.
            self.entries[hole] = self.entries[candidate];
            self.entries[candidate] = MapEntry::EMPTY;
            delegate.move_element(candidate, hole);
            hole = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    // Model table: one slot per bucket holding the hash of the element that
    // lives there. The delegate moves slots the way real storage moves
    // elements.
    struct Model {
        slots: Vec<Option<usize>>,
        mask: usize,
    }

    impl Model {
        fn new(scale: u8) -> Self {
            let count = bucket_count_for_scale(scale);
            Model {
                slots: vec![None; count],
                mask: count - 1,
            }
        }
    }

    impl RepairDelegate for Model {
        fn ideal_bucket(&self, bucket: usize) -> usize {
            self.slots[bucket].expect("ideal_bucket of an empty slot") & self.mask
        }

        fn move_element(&mut self, from: usize, to: usize) {
            assert!(self.slots[to].is_none());
            self.slots[to] = self.slots[from].take();
        }
    }

    fn insert_hash(entries: &mut [MapEntry], scale: u8, model: &mut Model, hash: usize) -> usize {
        // The model stores distinct hashes, so every payload match is a
        // collision to step over.
        let mut probe = Buckets::new(entries, scale).lookup_first(hash);
        while probe.found {
            probe = Buckets::new(entries, scale).lookup_next(hash, probe.bucket);
        }
        BucketsMut::new(entries, scale).insert(hash, probe.bucket);
        model.slots[probe.bucket] = Some(hash);
        probe.bucket
    }

    fn find_hash(entries: &[MapEntry], scale: u8, model: &Model, hash: usize) -> Option<usize> {
        let buckets = Buckets::new(entries, scale);
        let mut probe = buckets.lookup_first(hash);
        while probe.found {
            if model.slots[probe.bucket] == Some(hash) {
                return Some(probe.bucket);
            }
            probe = buckets.lookup_next(hash, probe.bucket);
        }
        None
    }

    fn check_invariants(entries: &[MapEntry], scale: u8, model: &Model) {
        let buckets = Buckets::new(entries, scale);
        let mask = entries.len() - 1;
        for (bucket, slot) in model.slots.iter().enumerate() {
            match slot {
                None => assert!(!entries[bucket].is_occupied(), "bucket {}", bucket),
                Some(hash) => {
                    assert!(entries[bucket].is_occupied(), "bucket {}", bucket);
                    assert_eq!(
                        entries[bucket].payload(),
                        buckets.payload(*hash),
                        "payload at {}",
                        bucket
                    );
                    // Contiguous chain: everything between the ideal bucket
                    // and the element must be occupied.
                    let mut walk = hash & mask;
                    while walk != bucket {
                        assert!(entries[walk].is_occupied(), "chain hole at {}", walk);
                        walk = (walk + 1) & mask;
                    }
                }
            }
        }
    }

    #[test]
    fn sizing() {
        assert_eq!(scale_for_capacity(0), 0);
        assert_eq!(capacity_for_scale(0), 0);

        assert_eq!(scale_for_capacity(1), 3);
        assert_eq!(capacity_for_scale(3), 6);
        assert_eq!(scale_for_capacity(6), 3);
        assert_eq!(scale_for_capacity(7), 4);
        assert_eq!(capacity_for_scale(4), 12);
        assert_eq!(scale_for_capacity(13), 5);
        assert_eq!(capacity_for_scale(10), 768);
    }

    #[test]
    fn lookup_miss_on_empty_table() {
        let entries = vec![MapEntry::EMPTY; 16];
        let probe = Buckets::new(&entries, 4).lookup_first(0xDEAD);
        assert!(!probe.found);
        assert_eq!(probe.bucket, 0xDEAD & 15);
    }

    #[test]
    fn payload_culls_before_equality() {
        let scale = 4;
        let mut entries = vec![MapEntry::EMPTY; 16];
        let mut model = Model::new(scale);

        // Same ideal bucket (low bits), different payloads (next 7 bits).
        let a = 0x015; // bucket 5, payload 1
        let b = 0x025; // bucket 5, payload 2
        insert_hash(&mut entries, scale, &mut model, a);
        insert_hash(&mut entries, scale, &mut model, b);

        let probe = Buckets::new(&entries, scale).lookup_first(b);
        assert!(probe.found);
        assert_eq!(model.slots[probe.bucket], Some(b));
        check_invariants(&entries, scale, &model);
    }

    #[test]
    fn lookup_next_steps_over_payload_collisions() {
        let scale = 4;
        let mut entries = vec![MapEntry::EMPTY; 16];
        let mut model = Model::new(scale);

        // Same bucket and same payload: only equality (here, the model) can
        // tell them apart.
        let a = 0x035;
        let b = 0x1035; // differs above the payload bits
        assert_eq!(
            Buckets::new(&entries, scale).payload(a),
            Buckets::new(&entries, scale).payload(b)
        );
        insert_hash(&mut entries, scale, &mut model, a);
        insert_hash(&mut entries, scale, &mut model, b);

        assert!(find_hash(&entries, scale, &model, a).is_some());
        assert!(find_hash(&entries, scale, &model, b).is_some());
        check_invariants(&entries, scale, &model);
    }

    #[test]
    fn delete_shifts_chain_back() {
        let scale = 4;
        let mut entries = vec![MapEntry::EMPTY; 16];
        let mut model = Model::new(scale);

        // Three elements, all ideal bucket 2: they land at 2, 3, 4.
        let hashes = [0x102, 0x202, 0x302];
        for &h in &hashes {
            insert_hash(&mut entries, scale, &mut model, h);
        }
        assert_eq!(model.slots[2], Some(0x102));
        assert_eq!(model.slots[3], Some(0x202));
        assert_eq!(model.slots[4], Some(0x302));

        let bucket = find_hash(&entries, scale, &model, 0x102).unwrap();
        model.slots[bucket] = None;
        BucketsMut::new(&mut entries, scale).delete(0x102, bucket, &mut model);

        // Survivors shifted into the earliest legal buckets.
        assert_eq!(model.slots[2], Some(0x202));
        assert_eq!(model.slots[3], Some(0x302));
        assert_eq!(model.slots[4], None);
        assert!(find_hash(&entries, scale, &model, 0x202).is_some());
        assert!(find_hash(&entries, scale, &model, 0x302).is_some());
        check_invariants(&entries, scale, &model);
    }

    #[test]
    fn delete_leaves_unrelated_chain_alone() {
        let scale = 4;
        let mut entries = vec![MapEntry::EMPTY; 16];
        let mut model = Model::new(scale);

        // A chain at 2..4 from ideals 2 and 3, plus an element at its own
        // ideal bucket 9.
        for &h in &[0x102, 0x203, 0x303, 0x409] {
            insert_hash(&mut entries, scale, &mut model, h);
        }

        let bucket = find_hash(&entries, scale, &model, 0x203).unwrap();
        model.slots[bucket] = None;
        BucketsMut::new(&mut entries, scale).delete(0x203, bucket, &mut model);

        // 0x303 (ideal 3) must not move earlier than bucket 3, and bucket 9
        // is untouched.
        assert_eq!(model.slots[2], Some(0x102));
        assert_eq!(model.slots[3], Some(0x303));
        assert_eq!(model.slots[9], Some(0x409));
        check_invariants(&entries, scale, &model);
    }

    #[test]
    fn delete_repairs_wrapped_chain() {
        let scale = 4;
        let mut entries = vec![MapEntry::EMPTY; 16];
        let mut model = Model::new(scale);

        // Chain that wraps the table end: ideals 14, 14, 15, landing at 14,
        // 15, 0.
        for &h in &[0x10E, 0x20E, 0x30F] {
            insert_hash(&mut entries, scale, &mut model, h);
        }
        assert_eq!(model.slots[14], Some(0x10E));
        assert_eq!(model.slots[15], Some(0x20E));
        assert_eq!(model.slots[0], Some(0x30F));

        let bucket = find_hash(&entries, scale, &model, 0x10E).unwrap();
        model.slots[bucket] = None;
        BucketsMut::new(&mut entries, scale).delete(0x10E, bucket, &mut model);

        assert_eq!(model.slots[14], Some(0x20E));
        assert_eq!(model.slots[15], Some(0x30F));
        assert_eq!(model.slots[0], None);
        check_invariants(&entries, scale, &model);
    }

    #[test]
    fn collision_storm_survives_interleaved_deletes() {
        let scale = 8;
        let count = bucket_count_for_scale(scale);
        let mut entries = vec![MapEntry::EMPTY; count];
        let mut model = Model::new(scale);

        // 3/4 load, every element ideal bucket 7.
        let storm: Vec<usize> = (0..capacity_for_scale(scale))
            .map(|i| (i << scale) | 7)
            .collect();
        for &h in &storm {
            insert_hash(&mut entries, scale, &mut model, h);
        }
        check_invariants(&entries, scale, &model);

        // Remove every other element.
        for &h in storm.iter().step_by(2) {
            let bucket = find_hash(&entries, scale, &model, h).unwrap();
            model.slots[bucket] = None;
            BucketsMut::new(&mut entries, scale).delete(h, bucket, &mut model);
            check_invariants(&entries, scale, &model);
        }

        for (i, &h) in storm.iter().enumerate() {
            assert_eq!(find_hash(&entries, scale, &model, h).is_some(), i % 2 == 1);
        }
    }

    #[test]
    #[should_panic(expected = "delete of an unoccupied bucket")]
    fn delete_unoccupied_panics() {
        let mut entries = vec![MapEntry::EMPTY; 16];
        let mut model = Model::new(4);
        BucketsMut::new(&mut entries, 4).delete(0, 0, &mut model);
    }
}
