//! A value-semantic hash set over copy-on-write storage.
//!
//! [`HashSet<T>`] behaves like a value: [`Clone`] is O(1) and hands back a
//! handle to the same storage, and the first mutation through a handle that
//! is not the only owner deep-copies first. Reads never mutate, so any
//! number of clones can be read concurrently; a single mutator works in
//! place exactly when it holds the only handle.
//!
//! Elements are hashed with the crate's keyed SipHash-1-3 ([`crate::sip`]),
//! salted with a per-storage seed, so bucket order differs between
//! processes and between a table and its grown successor. Anything
//! `Hash + Eq` can be stored; mutating operations additionally require
//! `Clone` because copy-on-write must be able to duplicate elements.
//!
//! Probing is linear with a 7-bit payload filter and deletions repair the
//! collision chain by backward shifts (see [`crate::table`]), so the table
//! never needs tombstones and lookups never scan dead buckets.

use core::fmt;
use core::fmt::Debug;
use core::hash::Hash;
use core::hash::Hasher;

use crate::bitset::Bitset;
use crate::sip;
use crate::sip::SipHasher13;
use crate::storage::AllocError;
use crate::storage::Slots;
use crate::storage::Storage;
use crate::table;
use crate::table::Buckets;
use crate::table::BucketsMut;
use crate::table::MapEntry;
use crate::table::RepairDelegate;

/// Hashes one element under the process key, salted with a storage's seed.
///
/// The seed is fed as the first word of the message, so two storages with
/// different seeds disagree about every bucket.
fn hash_of<T: Hash + ?Sized>(seed: usize, value: &T) -> usize {
    let key = sip::process_key();
    let mut hasher = SipHasher13::new_with_keys(key.k0, key.k1);
    hasher.write_usize(seed);
    value.hash(&mut hasher);
    hasher.finalize() as usize
}

/// Moves a value known to be absent into `storage`. Skips payload
/// collisions without equality checks; only correct when the value cannot
/// already be present.
fn insert_fresh<T: Hash>(storage: &mut Storage<T>, seed: usize, value: T) {
    let hash = hash_of(seed, &value);
    let scale = storage.scale();

    let mut probe = Buckets::new(storage.metadata(), scale).lookup_first(hash);
    while probe.found {
        probe = Buckets::new(storage.metadata(), scale).lookup_next(hash, probe.bucket);
    }

    BucketsMut::new(storage.metadata_mut(), scale).insert(hash, probe.bucket);
    storage.write_element(probe.bucket, value);
    let count = storage.count() + 1;
    storage.set_count(count);
}

/// Rehashes elements during deletion repair and moves them between slots.
struct ChainRepair<'a, T> {
    slots: Slots<'a, T>,
    seed: usize,
    mask: usize,
}

impl<T: Hash> RepairDelegate for ChainRepair<'_, T> {
    fn ideal_bucket(&self, bucket: usize) -> usize {
        hash_of(self.seed, self.slots.element(bucket)) & self.mask
    }

    fn move_element(&mut self, from: usize, to: usize) {
        self.slots.move_element(from, to);
    }
}

/// A position in a set, tied to the storage that produced it.
///
/// Indices survive reads but not mutations: any operation that reallocates
/// or copies storage produces a new generation, and using an index from an
/// older generation panics. [`HashSet::end_index`] is one past the last
/// bucket and is valid only for comparison.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Index {
    bucket: usize,
    generation: usize,
}

/// A hash set with value semantics.
///
/// ```
/// use cow_hash::HashSet;
///
/// let mut primes: HashSet<u64> = [2, 3, 5, 7].into_iter().collect();
/// let snapshot = primes.clone(); // O(1), shares storage
///
/// primes.insert(11); // copies before writing
/// assert!(primes.contains(&11));
/// assert!(!snapshot.contains(&11));
/// ```
pub struct HashSet<T> {
    storage: Storage<T>,
}

impl<T> HashSet<T> {
    /// Creates an empty set. Does not allocate: every empty set shares one
    /// static storage block.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::new();
    /// assert!(set.is_empty());
    /// assert_eq!(set.capacity(), 0);
    /// ```
    pub fn new() -> Self {
        HashSet {
            storage: Storage::empty(),
        }
    }

    /// Creates a set able to hold `capacity` elements without rehashing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::with_capacity(100);
    /// assert!(set.capacity() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            return Self::new();
        }
        HashSet {
            storage: Storage::allocate(table::scale_for_capacity(capacity)),
        }
    }

    /// Number of elements in the set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set = HashSet::new();
    /// assert_eq!(set.len(), 0);
    /// set.insert(1);
    /// assert_eq!(set.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.storage.count()
    }

    /// Whether the set has no elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set = HashSet::new();
    /// assert!(set.is_empty());
    /// set.insert(1);
    /// assert!(!set.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.storage.count() == 0
    }

    /// Elements the set can hold before its next rehash.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::with_capacity(8);
    /// assert!(set.capacity() >= 8);
    /// ```
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Iterates over the elements, in storage order.
    ///
    /// The order is stable between mutations but not across them, and not
    /// across processes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u32> = (0..3).collect();
    /// let mut values: Vec<u32> = set.iter().copied().collect();
    /// values.sort_unstable();
    /// assert_eq!(values, [0, 1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            storage: &self.storage,
            bucket: 0,
            remaining: self.storage.count(),
        }
    }

    /// The position of the first element, or [`end_index`](Self::end_index)
    /// when the set is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let empty: HashSet<u64> = HashSet::new();
    /// assert_eq!(empty.start_index(), empty.end_index());
    ///
    /// let set: HashSet<u64> = (0..3).collect();
    /// assert!(set.start_index() < set.end_index());
    /// ```
    pub fn start_index(&self) -> Index {
        Index {
            bucket: self.next_occupied(0),
            generation: self.storage.generation(),
        }
    }

    /// The position one past the last bucket. Valid only for comparison.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u64> = (0..3).collect();
    /// let mut index = set.start_index();
    /// let mut count = 0;
    /// while index < set.end_index() {
    ///     count += 1;
    ///     index = set.index_after(index);
    /// }
    /// assert_eq!(count, 3);
    /// ```
    pub fn end_index(&self) -> Index {
        Index {
            bucket: self.storage.bucket_count(),
            generation: self.storage.generation(),
        }
    }

    /// The position after `index`, skipping unoccupied buckets.
    ///
    /// Panics if `index` is from another generation or already past the
    /// end.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u32> = (0..5).collect();
    /// let mut index = set.start_index();
    /// let mut total = 0;
    /// while index < set.end_index() {
    ///     total += *set.element_at(index);
    ///     index = set.index_after(index);
    /// }
    /// assert_eq!(total, 10);
    /// ```
    pub fn index_after(&self, index: Index) -> Index {
        assert!(
            index.generation == self.storage.generation()
                && index.bucket < self.storage.bucket_count(),
            "attempted to advance an invalid index"
        );
        Index {
            bucket: self.next_occupied(index.bucket + 1),
            generation: index.generation,
        }
    }

    /// Borrows the element at `index`.
    ///
    /// Panics if the index is from another generation, is the end index, or
    /// does not name an occupied bucket.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set = HashSet::new();
    /// set.insert(42u64);
    /// assert_eq!(*set.element_at(set.start_index()), 42);
    /// ```
    pub fn element_at(&self, index: Index) -> &T {
        self.storage.element(self.validate(index))
    }

    fn validate(&self, index: Index) -> usize {
        let valid = index.generation == self.storage.generation()
            && index.bucket < self.storage.bucket_count()
            && self.storage.metadata()[index.bucket].is_occupied();
        assert!(
            valid,
            "attempted to access an element using an invalid index"
        );
        index.bucket
    }

    fn next_occupied(&self, from: usize) -> usize {
        let metadata = self.storage.metadata();
        (from..metadata.len())
            .find(|&bucket| metadata[bucket].is_occupied())
            .unwrap_or(metadata.len())
    }
}

impl<T> HashSet<T>
where
    T: Hash + Eq,
{
    /// Whether an element equal to `value` is in the set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u32> = (0..3).collect();
    /// assert!(set.contains(&1));
    /// assert!(!set.contains(&9));
    /// ```
    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// Borrows the member equal to `value`, if any.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let set: HashSet<u32> = (0..3).collect();
    /// assert_eq!(set.get(&1), Some(&1));
    /// assert_eq!(set.get(&9), None);
    /// ```
    pub fn get(&self, value: &T) -> Option<&T> {
        if self.storage.count() == 0 {
            return None;
        }
        let hash = hash_of(self.storage.seed(), value);
        self.find_bucket(hash, value)
            .map(|bucket| self.storage.element(bucket))
    }

    /// Whether `self` and `other` share no elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let a: HashSet<u32> = (0..3).collect();
    /// let b: HashSet<u32> = (3..6).collect();
    /// assert!(a.is_disjoint(&b));
    /// assert!(!a.is_disjoint(&a));
    /// ```
    pub fn is_disjoint(&self, other: &Self) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().all(|value| !large.contains(value))
    }

    /// Whether every element of `self` is in `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let small: HashSet<u32> = (0..3).collect();
    /// let large: HashSet<u32> = (0..6).collect();
    /// assert!(small.is_subset(&large));
    /// assert!(!large.is_subset(&small));
    /// ```
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|value| other.contains(value))
    }

    /// Probes for `value`, stepping over payload collisions with equality.
    fn find_bucket(&self, hash: usize, value: &T) -> Option<usize> {
        let buckets = Buckets::new(self.storage.metadata(), self.storage.scale());
        let mut probe = buckets.lookup_first(hash);
        while probe.found {
            if self.storage.element(probe.bucket) == value {
                return Some(probe.bucket);
            }
            probe = buckets.lookup_next(hash, probe.bucket);
        }
        None
    }
}

impl<T> HashSet<T>
where
    T: Hash + Eq + Clone,
{
    /// Inserts `value` if no equal member exists.
    ///
    /// Returns whether the value was inserted, along with the member left
    /// in the set afterward: the existing member (unchanged) on a
    /// collision, the inserted value otherwise.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set = HashSet::new();
    /// let (inserted, _) = set.insert(7u64);
    /// assert!(inserted);
    ///
    /// let (inserted, member) = set.insert(7);
    /// assert!(!inserted);
    /// assert_eq!(*member, 7);
    /// assert_eq!(set.len(), 1);
    /// ```
    pub fn insert(&mut self, value: T) -> (bool, &T) {
        let hash = hash_of(self.storage.seed(), &value);
        if self.storage.count() != 0 {
            if let Some(bucket) = self.find_bucket(hash, &value) {
                return (false, self.storage.element(bucket));
            }
        }
        let bucket = self.prepare_insert(hash, &value);
        self.storage.write_element(bucket, value);
        (true, self.storage.element(bucket))
    }

    /// Inserts `value`, replacing and returning an equal member if one was
    /// present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set = HashSet::new();
    /// assert_eq!(set.update(7u64), None);
    /// assert_eq!(set.update(7), Some(7));
    /// assert_eq!(set.len(), 1);
    /// ```
    pub fn update(&mut self, value: T) -> Option<T> {
        let hash = hash_of(self.storage.seed(), &value);
        if self.storage.count() != 0 {
            if let Some(bucket) = self.find_bucket(hash, &value) {
                self.make_unique();
                return Some(self.storage.replace_element(bucket, value));
            }
        }
        let bucket = self.prepare_insert(hash, &value);
        self.storage.write_element(bucket, value);
        None
    }

    /// Removes and returns the member equal to `value`, if any.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = (0..3).collect();
    /// assert_eq!(set.remove(&1), Some(1));
    /// assert_eq!(set.remove(&1), None);
    /// assert_eq!(set.len(), 2);
    /// ```
    pub fn remove(&mut self, value: &T) -> Option<T> {
        if self.storage.count() == 0 {
            return None;
        }
        let hash = hash_of(self.storage.seed(), value);
        let bucket = self.find_bucket(hash, value)?;
        Some(self.remove_bucket(hash, bucket))
    }

    /// Removes and returns the element at `index`.
    ///
    /// Panics on an invalid index, like [`element_at`](Self::element_at).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = (0..3).collect();
    /// let removed = set.remove_at(set.start_index());
    /// assert_eq!(set.len(), 2);
    /// assert!(!set.contains(&removed));
    /// ```
    pub fn remove_at(&mut self, index: Index) -> T {
        let bucket = self.validate(index);
        let hash = hash_of(self.storage.seed(), self.storage.element(bucket));
        self.remove_bucket(hash, bucket)
    }

    /// Removes every element. Keeps the allocation when this handle is the
    /// only owner; otherwise detaches from the shared storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = (0..10).collect();
    /// let snapshot = set.clone();
    /// set.clear();
    /// assert!(set.is_empty());
    /// assert_eq!(snapshot.len(), 10);
    /// ```
    pub fn clear(&mut self) {
        if self.storage.count() == 0 {
            return;
        }
        if self.storage.is_unique() {
            self.storage.clear_in_place();
        } else {
            self.storage = Storage::empty();
        }
    }

    /// Ensures `additional` more elements can be inserted without another
    /// rehash. Aborts on allocation failure.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set: HashSet<u64> = HashSet::new();
    /// set.reserve(100);
    /// assert!(set.capacity() >= 100);
    /// ```
    pub fn reserve(&mut self, additional: usize) {
        let required = self
            .len()
            .checked_add(additional)
            .expect("capacity overflow");
        if required > self.storage.capacity() {
            self.rehash_into(Storage::allocate(table::scale_for_capacity(required)));
        }
    }

    /// Fallible [`reserve`](Self::reserve): on allocation failure the set
    /// is unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let mut set: HashSet<u64> = HashSet::new();
    /// assert!(set.try_reserve(100).is_ok());
    /// assert!(set.capacity() >= 100);
    /// ```
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let required = self
            .len()
            .checked_add(additional)
            .expect("capacity overflow");
        if required > self.storage.capacity() {
            self.rehash_into(Storage::try_allocate(table::scale_for_capacity(required))?);
        }
        Ok(())
    }

    /// Elements present in `self`, `other`, or both.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let a: HashSet<u32> = (0..4).collect();
    /// let b: HashSet<u32> = (2..6).collect();
    /// assert_eq!(a.union(&b), (0..6).collect());
    /// ```
    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for value in other.iter() {
            result.insert(value.clone());
        }
        result
    }

    /// Elements present in both `self` and `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let a: HashSet<u32> = (0..4).collect();
    /// let b: HashSet<u32> = (2..6).collect();
    /// assert_eq!(a.intersection(&b), (2..4).collect());
    /// ```
    pub fn intersection(&self, other: &Self) -> Self {
        if self.is_empty() || other.is_empty() {
            return Self::new();
        }
        // Mark the buckets of self that other also holds, then build the
        // result from the marked buckets in one pass.
        let mut marks = Bitset::new(self.storage.bucket_count());
        for value in other.iter() {
            if let Some(bucket) = self.find_bucket(hash_of(self.storage.seed(), value), value) {
                marks.insert(bucket);
            }
        }
        if marks.is_empty() {
            return Self::new();
        }

        let mut result = Self::with_capacity(marks.count());
        let seed = result.storage.seed();
        for bucket in marks.iter() {
            insert_fresh(
                &mut result.storage,
                seed,
                self.storage.element(bucket).clone(),
            );
        }
        result
    }

    /// Elements of `self` that are not in `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cow_hash::HashSet;
    ///
    /// let a: HashSet<u32> = (0..4).collect();
    /// let b: HashSet<u32> = (2..6).collect();
    /// assert_eq!(a.difference(&b), (0..2).collect());
    /// ```
    pub fn difference(&self, other: &Self) -> Self {
        if self.is_empty() {
            return Self::new();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut marks = Bitset::new(self.storage.bucket_count());
        for (bucket, entry) in self.storage.metadata().iter().enumerate() {
            if entry.is_occupied() && other.contains(self.storage.element(bucket)) {
                marks.insert(bucket);
            }
        }

        let keep = self.len() - marks.count();
        if keep == self.len() {
            return self.clone();
        }
        if keep == 0 {
            return Self::new();
        }

        let mut result = Self::with_capacity(keep);
        let seed = result.storage.seed();
        for (bucket, entry) in self.storage.metadata().iter().enumerate() {
            if entry.is_occupied() && !marks.contains(bucket) {
                insert_fresh(
                    &mut result.storage,
                    seed,
                    self.storage.element(bucket).clone(),
                );
            }
        }
        result
    }

    /// Detaches from shared storage without changing layout, so bucket
    /// positions stay valid.
    fn make_unique(&mut self) {
        if !self.storage.is_unique() {
            self.storage = self.storage.deep_copy();
        }
    }

    /// Readies storage for one insertion (unique, with room), claims the
    /// target bucket in the metadata, and bumps the count. Growth rehashes,
    /// so the caller's hash is recomputed as needed.
    ///
    /// `value` must not already be present.
    fn prepare_insert(&mut self, hash: usize, value: &T) -> usize {
        let mut hash = hash;
        if self.storage.count() == self.storage.capacity() {
            // Growth changes the scale, and with it the seed, the payload
            // bits, and every bucket assignment.
            let new_scale = if self.storage.capacity() == 0 {
                table::scale_for_capacity(1)
            } else {
                self.storage.scale() + 1
            };
            self.rehash_into(Storage::allocate(new_scale));
            hash = hash_of(self.storage.seed(), value);
        } else {
            self.make_unique();
        }

        let scale = self.storage.scale();
        let mut probe = Buckets::new(self.storage.metadata(), scale).lookup_first(hash);
        while probe.found {
            probe = Buckets::new(self.storage.metadata(), scale).lookup_next(hash, probe.bucket);
        }

        BucketsMut::new(self.storage.metadata_mut(), scale).insert(hash, probe.bucket);
        let count = self.storage.count() + 1;
        self.storage.set_count(count);
        probe.bucket
    }

    /// Moves (or clones, when shared) every element into `new` under its
    /// seed, then adopts it.
    fn rehash_into(&mut self, mut new: Storage<T>) {
        let seed = new.seed();
        let count = self.storage.count();

        if self.storage.is_unique() {
            for bucket in 0..self.storage.bucket_count() {
                if self.storage.metadata()[bucket].is_occupied() {
                    let value = self.storage.take_element(bucket);
                    self.storage.metadata_mut()[bucket] = MapEntry::EMPTY;
                    insert_fresh(&mut new, seed, value);
                }
            }
            self.storage.set_count(0);
        } else {
            for bucket in 0..self.storage.bucket_count() {
                if self.storage.metadata()[bucket].is_occupied() {
                    insert_fresh(&mut new, seed, self.storage.element(bucket).clone());
                }
            }
        }

        debug_assert_eq!(new.count(), count);
        self.storage = new;
    }

    /// Removes the element at an occupied bucket and repairs the chain.
    fn remove_bucket(&mut self, hash: usize, bucket: usize) -> T {
        // Copying first preserves the layout, so `bucket` stays correct.
        self.make_unique();

        let scale = self.storage.scale();
        let seed = self.storage.seed();
        let mask = self.storage.bucket_count() - 1;
        let count = self.storage.count();

        let value = self.storage.take_element(bucket);
        {
            let (metadata, slots) = self.storage.split_mut();
            let mut repair = ChainRepair { slots, seed, mask };
            BucketsMut::new(metadata, scale).delete(hash, bucket, &mut repair);
        }
        self.storage.set_count(count - 1);
        value
    }
}

impl<T> Clone for HashSet<T> {
    /// O(1): the clone shares storage until one side mutates.
    fn clone(&self) -> Self {
        HashSet {
            storage: self.storage.clone(),
        }
    }
}

impl<T> Default for HashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for HashSet<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T> PartialEq for HashSet<T>
where
    T: Hash + Eq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset(other)
    }
}

impl<T> Eq for HashSet<T> where T: Hash + Eq {}

impl<T> Extend<T> for HashSet<T>
where
    T: Hash + Eq + Clone,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T> FromIterator<T> for HashSet<T>
where
    T: Hash + Eq + Clone,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<'a, T> IntoIterator for &'a HashSet<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing iterator over a set's elements in bucket order.
///
/// Produced by [`HashSet::iter`]. The borrow keeps the set immutable for
/// the iterator's lifetime, so the storage generation cannot change under
/// it.
pub struct Iter<'a, T> {
    storage: &'a Storage<T>,
    bucket: usize,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let metadata = self.storage.metadata();
        loop {
            let bucket = self.bucket;
            self.bucket += 1;
            if metadata[bucket].is_occupied() {
                self.remaining -= 1;
                return Some(self.storage.element(bucket));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
