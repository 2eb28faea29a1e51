//! Tail-allocated, reference-counted element storage.
//!
//! One heap block holds everything a table needs: a header (reference
//! count, element count, capacity, hashing seed, scale), the per-bucket
//! metadata rounded up to whole machine words, and the element slots. A
//! single allocation keeps the metadata and the elements on the same cache
//! lines during probing and halves allocator traffic compared to split
//! blocks.
//!
//! `Storage<T>` is the owning handle. Cloning a handle bumps the reference
//! count; the storage contents are immutable while more than one handle
//! exists. A mutator must observe `is_unique()` before writing — the
//! container facade deep-copies first when it does not. Dropping the last
//! handle destroys every live element and frees the block.
//!
//! Every empty container shares one statically-allocated storage with a
//! single unoccupied bucket and zero capacity. The singleton is recognized
//! by address: it never participates in reference counting, `is_unique()`
//! is always false for it, and since its capacity is zero every insertion
//! is forced through the growth path before it could touch the block.
//!
//! The per-table hashing seed is currently the scale. Two tables of equal
//! capacity therefore probe in the same order, but a table and its grown
//! successor do not, which breaks the quadratic-merge pathology when the
//! elements of one table are poured into a fresh one. Every growth
//! rehashes, so switching to a per-instance random seed later only requires
//! changing `allocate`.

use alloc::alloc::alloc;
use alloc::alloc::dealloc;
use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::ptr::NonNull;
use core::slice;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use core::sync::atomic::fence;

use crate::table;
use crate::table::MapEntry;

/// Returned by the fallible reservation paths when the allocator refuses a
/// block. The container that requested growth is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("allocation of hash table storage failed")
    }
}

impl core::error::Error for AllocError {}

#[repr(C)]
struct Header {
    refcount: AtomicUsize,
    count: usize,
    capacity: usize,
    seed: usize,
    scale: u8,
}

const WORD_BYTES: usize = mem::size_of::<usize>();

// The singleton's metadata: one bucket, padded to a full word.
#[repr(C)]
struct EmptySingleton {
    header: Header,
    metadata: [MapEntry; WORD_BYTES],
}

static EMPTY: EmptySingleton = EmptySingleton {
    header: Header {
        refcount: AtomicUsize::new(1),
        count: 0,
        capacity: 0,
        seed: 0,
        scale: 0,
    },
    metadata: [MapEntry::EMPTY; WORD_BYTES],
};

/// Offsets of the two tail regions within a storage block.
#[derive(Clone, Copy)]
struct StorageLayout {
    layout: Layout,
    metadata_offset: usize,
    slots_offset: usize,
}

impl StorageLayout {
    fn new<T>(scale: u8) -> Self {
        let buckets = table::bucket_count_for_scale(scale);
        let metadata_layout =
            Layout::array::<usize>(buckets.div_ceil(WORD_BYTES)).expect("allocation size overflow");
        let slots_layout = Layout::array::<T>(buckets).expect("allocation size overflow");

        let (layout, metadata_offset) = Layout::new::<Header>().extend(metadata_layout).unwrap();
        let (layout, slots_offset) = layout.extend(slots_layout).unwrap();

        StorageLayout {
            layout,
            metadata_offset,
            slots_offset,
        }
    }
}

/// Owning handle to one reference-counted storage block.
pub(crate) struct Storage<T> {
    ptr: NonNull<Header>,
    _marker: PhantomData<T>,
}

// SAFETY: The storage is immutable while shared and the reference count is
// atomic, so handles follow Arc's rules: sending or sharing a handle is
// sending or sharing `T`s.
unsafe impl<T: Send + Sync> Send for Storage<T> {}
unsafe impl<T: Send + Sync> Sync for Storage<T> {}

impl<T> Storage<T> {
    /// A handle to the shared empty singleton.
    pub(crate) fn empty() -> Self {
        Storage {
            // The singleton is static; the pointer is trivially non-null.
            ptr: NonNull::from(&EMPTY.header),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn is_singleton(&self) -> bool {
        ptr::eq(self.ptr.as_ptr(), &EMPTY.header)
    }

    /// Allocates storage for `1 << scale` buckets, aborting on allocation
    /// failure.
    pub(crate) fn allocate(scale: u8) -> Self {
        match Self::try_allocate(scale) {
            Ok(storage) => storage,
            Err(_) => handle_alloc_error(StorageLayout::new::<T>(scale).layout),
        }
    }

    /// Allocates storage for `1 << scale` buckets.
    ///
    /// All metadata starts unoccupied; the seed is the scale.
    pub(crate) fn try_allocate(scale: u8) -> Result<Self, AllocError> {
        let layout = StorageLayout::new::<T>(scale);

        // SAFETY: The layout always covers at least the header, so its size
        // is non-zero. A null return is mapped to an error, and the header
        // and metadata region are initialized before the pointer escapes.
        unsafe {
            let raw = alloc(layout.layout);
            if raw.is_null() {
                return Err(AllocError);
            }

            raw.cast::<Header>().write(Header {
                refcount: AtomicUsize::new(1),
                count: 0,
                capacity: table::capacity_for_scale(scale),
                seed: scale as usize,
                scale,
            });
            ptr::write_bytes(
                raw.add(layout.metadata_offset),
                0,
                layout.slots_offset - layout.metadata_offset,
            );

            Ok(Storage {
                ptr: NonNull::new_unchecked(raw.cast()),
                _marker: PhantomData,
            })
        }
    }

    #[inline]
    fn header(&self) -> &Header {
        // SAFETY: The pointer came from a live allocation (or the static
        // singleton) and the header was initialized before the handle was
        // created.
        unsafe { self.ptr.as_ref() }
    }

    /// Base-2 log of the bucket count.
    #[inline]
    pub(crate) fn scale(&self) -> u8 {
        self.header().scale
    }

    /// Number of live elements.
    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.header().count
    }

    /// Maximum live elements before growth.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.header().capacity
    }

    /// Per-table hashing seed.
    #[inline]
    pub(crate) fn seed(&self) -> usize {
        self.header().seed
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        table::bucket_count_for_scale(self.scale())
    }

    /// Identity of this block, for index-validity checks.
    #[inline]
    pub(crate) fn generation(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Whether this handle is the only one. Always false for the singleton,
    /// which keeps it permanently copy-before-write.
    pub(crate) fn is_unique(&self) -> bool {
        !self.is_singleton() && self.header().refcount.load(Ordering::Acquire) == 1
    }

    #[inline]
    fn raw(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// The per-bucket metadata.
    #[inline]
    pub(crate) fn metadata(&self) -> &[MapEntry] {
        let layout = StorageLayout::new::<T>(self.scale());
        // SAFETY: The metadata region starts at `metadata_offset`, holds at
        // least `bucket_count` initialized bytes, and `MapEntry` is a
        // transparent byte.
        unsafe {
            slice::from_raw_parts(
                self.raw().add(layout.metadata_offset).cast(),
                self.bucket_count(),
            )
        }
    }

    /// Mutable metadata. The handle must be unique.
    #[inline]
    pub(crate) fn metadata_mut(&mut self) -> &mut [MapEntry] {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        let layout = StorageLayout::new::<T>(self.scale());
        // SAFETY: As `metadata`; uniqueness means no other handle can
        // observe the region.
        unsafe {
            slice::from_raw_parts_mut(
                self.raw().add(layout.metadata_offset).cast(),
                self.bucket_count(),
            )
        }
    }

    /// Records a new element count. The handle must be unique.
    #[inline]
    pub(crate) fn set_count(&mut self, count: usize) {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        debug_assert!(count <= self.capacity());
        // SAFETY: Uniqueness checked above; writing through the raw pointer
        // avoids forming a `&mut Header` over the atomic.
        unsafe {
            (*self.ptr.as_ptr()).count = count;
        }
    }

    #[inline]
    fn slot_ptr(&self, bucket: usize) -> *mut T {
        debug_assert!(bucket < self.bucket_count());
        let layout = StorageLayout::new::<T>(self.scale());
        // SAFETY: `bucket` is in range, so the offset stays inside the slot
        // region of the allocation.
        unsafe { self.raw().add(layout.slots_offset).cast::<T>().add(bucket) }
    }

    /// Borrows the element at an occupied bucket.
    #[inline]
    pub(crate) fn element(&self, bucket: usize) -> &T {
        debug_assert!(self.metadata()[bucket].is_occupied());
        // SAFETY: An occupied metadata byte guarantees the slot was
        // initialized and not yet moved out.
        unsafe { &*self.slot_ptr(bucket) }
    }

    /// Writes an element into an unoccupied bucket's slot. The caller marks
    /// the metadata; the handle must be unique.
    #[inline]
    pub(crate) fn write_element(&mut self, bucket: usize, value: T) {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        // SAFETY: The slot is unoccupied, so nothing is overwritten.
        unsafe { self.slot_ptr(bucket).write(value) }
    }

    /// Moves the element out of an occupied bucket. The caller clears the
    /// metadata around this call; the handle must be unique.
    #[inline]
    pub(crate) fn take_element(&mut self, bucket: usize) -> T {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        debug_assert!(self.metadata()[bucket].is_occupied());
        // SAFETY: Occupied metadata guarantees an initialized slot; the
        // caller transfers ownership by clearing the occupied bit.
        unsafe { self.slot_ptr(bucket).read() }
    }

    /// Swaps a new element into an occupied bucket, returning the old one.
    /// The metadata stays valid because equal elements share a hash.
    #[inline]
    pub(crate) fn replace_element(&mut self, bucket: usize, value: T) -> T {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        debug_assert!(self.metadata()[bucket].is_occupied());
        // SAFETY: Occupied metadata guarantees an initialized slot; the old
        // value is read out before the new one is written over it.
        unsafe {
            let old = self.slot_ptr(bucket).read();
            self.slot_ptr(bucket).write(value);
            old
        }
    }

    /// Drops every live element and resets the metadata and count, keeping
    /// the allocation. The handle must be unique.
    pub(crate) fn clear_in_place(&mut self) {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        // SAFETY: Occupied metadata identifies exactly the initialized
        // slots; each is dropped once, then the occupied bits are erased so
        // the block's own drop cannot revisit them.
        unsafe {
            if mem::needs_drop::<T>() && self.count() > 0 {
                for bucket in 0..self.bucket_count() {
                    if self.metadata()[bucket].is_occupied() {
                        ptr::drop_in_place(self.slot_ptr(bucket));
                    }
                }
            }
        }
        self.metadata_mut().fill(MapEntry::EMPTY);
        self.set_count(0);
    }

    /// Disjoint mutable views of the metadata and the element slots, for
    /// operations (deletion repair) that move elements while rewriting
    /// metadata. The handle must be unique.
    pub(crate) fn split_mut(&mut self) -> (&mut [MapEntry], Slots<'_, T>) {
        debug_assert!(self.is_unique(), "mutation of shared storage");
        let layout = StorageLayout::new::<T>(self.scale());
        let buckets = self.bucket_count();
        // SAFETY: The metadata and slot regions of the block never overlap,
        // so handing out one mutable view of each is no more aliased than a
        // split slice borrow. Both views inherit this borrow's lifetime.
        unsafe {
            let metadata =
                slice::from_raw_parts_mut(self.raw().add(layout.metadata_offset).cast(), buckets);
            let slots = Slots {
                base: self.raw().add(layout.slots_offset).cast(),
                len: buckets,
                _marker: PhantomData,
            };
            (metadata, slots)
        }
    }
}

/// Mutable view of a storage block's element slots, disjoint from its
/// metadata. Produced by [`Storage::split_mut`].
pub(crate) struct Slots<'a, T> {
    base: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut T>,
}

impl<T> Slots<'_, T> {
    /// Borrows the element at an occupied bucket. The caller is responsible
    /// for only asking about occupied buckets.
    #[inline]
    pub(crate) fn element(&self, bucket: usize) -> &T {
        debug_assert!(bucket < self.len);
        // SAFETY: In-range, and the probing layer only hands out occupied
        // buckets.
        unsafe { &*self.base.add(bucket) }
    }

    /// Moves the element at `from` into the vacant slot at `to`.
    #[inline]
    pub(crate) fn move_element(&mut self, from: usize, to: usize) {
        debug_assert!(from < self.len && to < self.len);
        // SAFETY: `from` holds an initialized element and `to` has been
        // vacated; after the move only `to` is considered initialized.
        unsafe {
            let value = self.base.add(from).read();
            self.base.add(to).write(value);
        }
    }
}

impl<T: Clone> Storage<T> {
    /// Allocates a block of the same scale holding clones of every element.
    ///
    /// The metadata is copied verbatim after the clones land, so a clone
    /// that panics leaks the clones made so far instead of leaving occupied
    /// metadata over uninitialized slots.
    pub(crate) fn deep_copy(&self) -> Self {
        let mut new = Self::allocate(self.scale());

        for (bucket, entry) in self.metadata().iter().enumerate() {
            if entry.is_occupied() {
                new.write_element(bucket, self.element(bucket).clone());
            }
        }

        new.metadata_mut().copy_from_slice(self.metadata());
        new.set_count(self.count());
        new
    }
}

impl<T> Clone for Storage<T> {
    fn clone(&self) -> Self {
        if !self.is_singleton() {
            // Relaxed suffices: the new handle is derived from an existing
            // one, which already synchronizes with the allocation.
            let old = self.header().refcount.fetch_add(1, Ordering::Relaxed);
            debug_assert!(old > 0);
        }
        Storage {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Storage<T> {
    fn drop(&mut self) {
        if self.is_singleton() {
            return;
        }
        if self.header().refcount.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        // Synchronize with every other handle's release decrement before
        // tearing the block down.
        fence(Ordering::Acquire);

        // SAFETY: This was the last handle. Occupied metadata identifies
        // exactly the initialized slots; after dropping them the block is
        // freed with the same layout it was allocated with.
        unsafe {
            if mem::needs_drop::<T>() && self.count() > 0 {
                for bucket in 0..self.bucket_count() {
                    if self.metadata()[bucket].is_occupied() {
                        ptr::drop_in_place(self.slot_ptr(bucket));
                    }
                }
            }
            dealloc(self.raw(), StorageLayout::new::<T>(self.scale()).layout);
        }
    }
}
