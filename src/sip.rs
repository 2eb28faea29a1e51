//! Keyed SipHash-1-3 and the process-wide hash key.
//!
//! Every container in this crate hashes elements with [`SipHasher13`], keyed
//! by a single 128-bit key that is chosen once per process. Randomizing the
//! key across processes randomizes bucket distributions, which defends
//! against accidental clustering and casual hash-flooding. It is not a
//! cryptographic guarantee: an attacker who can observe timing inside the
//! process can still learn the ordering.
//!
//! SipHash-1-3 runs one compression round per 8-byte block and three
//! finalization rounds. That is the same speed/strength point the Rust
//! standard library picked for its default hasher, and the `siphasher`
//! crate's `SipHasher13` is bit-for-bit compatible (the unit tests check
//! this).
//!
//! The key is published through a one-shot compare-and-exchange on a
//! word-sized slot: null means uninitialized, the first writer installs its
//! candidate with release ordering, and losers of the race free their
//! candidate and adopt the winner's. Readers load with acquire ordering, so
//! a non-null pointer always refers to a fully written key.

use alloc::boxed::Box;
use core::cmp;
use core::hash::Hasher;
use core::ptr;
use core::sync::atomic::AtomicPtr;
use core::sync::atomic::Ordering;

use cfg_if::cfg_if;

/// The process-wide 128-bit hash key.
///
/// Observable only through the hashers built from it; two processes will
/// almost surely disagree on every hash value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretKey {
    /// First key word.
    pub k0: u64,
    /// Second key word.
    pub k1: u64,
}

static PROCESS_KEY: AtomicPtr<SecretKey> = AtomicPtr::new(ptr::null_mut());

cfg_if! {
    if #[cfg(feature = "deterministic")] {
        fn fresh_key() -> SecretKey {
            // Fixed key for reproducible hashing across runs. Only suitable
            // for tests and fuzzing; it removes the flooding defense.
            SecretKey {
                k0: 0x5bd1e995_9e3779b9,
                k1: 0xcc9e2d51_85ebca6b,
            }
        }
    } else if #[cfg(feature = "std")] {
        fn fresh_key() -> SecretKey {
            let mut bytes = [0u8; 16];
            getrandom::getrandom(&mut bytes)
                .expect("failed to read OS entropy for the process hash key");
            let (lo, hi) = bytes.split_at(8);
            SecretKey {
                k0: u64::from_le_bytes(lo.try_into().unwrap()),
                k1: u64::from_le_bytes(hi.try_into().unwrap()),
            }
        }
    } else {
        fn fresh_key() -> SecretKey {
            // No entropy source without `std`: fall back to the fixed key.
            // Bucket order is then stable across processes and the flooding
            // defense is gone; embedders can restore randomization by
            // publishing their own key with `install_fixed_keys` before the
            // first hash.
            SecretKey {
                k0: 0x5bd1e995_9e3779b9,
                k1: 0xcc9e2d51_85ebca6b,
            }
        }
    }
}

/// Returns the process hash key, generating and publishing it on first use.
pub fn process_key() -> &'static SecretKey {
    let published = PROCESS_KEY.load(Ordering::Acquire);
    // SAFETY: A non-null pointer in PROCESS_KEY was produced by
    // `Box::into_raw` in `publish` and is never replaced or freed afterward,
    // so it is valid for the rest of the process lifetime.
    if let Some(key) = unsafe { published.as_ref() } {
        return key;
    }
    publish(fresh_key())
}

/// Claims the key slot with a caller-chosen key.
///
/// Returns `true` if the key was installed, `false` if some key (random or
/// fixed) had already been published; in that case nothing changes. Call
/// this before the first container operation to get deterministic hashing
/// in a test process.
pub fn install_fixed_keys(k0: u64, k1: u64) -> bool {
    let candidate = Box::into_raw(Box::new(SecretKey { k0, k1 }));
    match PROCESS_KEY.compare_exchange(
        ptr::null_mut(),
        candidate,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => true,
        Err(_) => {
            // SAFETY: `candidate` came from `Box::into_raw` above and lost
            // the race, so no other thread has seen it.
            drop(unsafe { Box::from_raw(candidate) });
            false
        }
    }
}

fn publish(key: SecretKey) -> &'static SecretKey {
    let candidate = Box::into_raw(Box::new(key));
    match PROCESS_KEY.compare_exchange(
        ptr::null_mut(),
        candidate,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        // SAFETY: We just installed `candidate`; it is never freed.
        Ok(_) => unsafe { &*candidate },
        Err(winner) => {
            // SAFETY: `candidate` lost the race and was never shared;
            // `winner` is non-null, published with release ordering, and
            // never replaced.
            unsafe {
                drop(Box::from_raw(candidate));
                &*winner
            }
        }
    }
}

const MAGIC0: u64 = 0x736f6d6570736575;
const MAGIC1: u64 = 0x646f72616e646f6d;
const MAGIC2: u64 = 0x6c7967656e657261;
const MAGIC3: u64 = 0x7465646279746573;

#[derive(Debug, Clone, Copy)]
struct State {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl State {
    #[inline]
    fn new(k0: u64, k1: u64) -> Self {
        State {
            v0: k0 ^ MAGIC0,
            v1: k1 ^ MAGIC1,
            v2: k0 ^ MAGIC2,
            v3: k1 ^ MAGIC3,
        }
    }

    #[inline]
    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    // One compression round per block (the "1" in 1-3).
    #[inline]
    fn compress(&mut self, m: u64) {
        self.v3 ^= m;
        self.round();
        self.v0 ^= m;
    }

    #[inline]
    fn finalize(mut self, length: usize, tail: u64) -> u64 {
        let b = ((length as u64 & 0xff) << 56) | tail;
        self.compress(b);
        self.v2 ^= 0xff;
        self.round();
        self.round();
        self.round();
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}

/// Loads up to 8 little-endian bytes of `buf[start..start + len]` into the
/// low bits of a word.
#[inline]
fn u8to64_le(buf: &[u8], start: usize, len: usize) -> u64 {
    debug_assert!(len <= 8);
    let mut out = 0u64;
    for (i, &byte) in buf[start..start + len].iter().enumerate() {
        out |= (byte as u64) << (8 * i);
    }
    out
}

/// An incremental SipHash-1-3 state.
///
/// Bytes are consumed little-endian through an 8-byte tail buffer; each full
/// block costs one compression round. The digest depends on the exact byte
/// stream, so the width of an appended integer is part of the message:
/// `write_u32(7)` and `write_u64(7)` produce different digests.
///
/// [`finalize`](Self::finalize) consumes the hasher; the trait method
/// [`finish`](Hasher::finish) finalizes a copy, matching the
/// `core::hash::Hasher` contract.
#[derive(Debug, Clone)]
pub struct SipHasher13 {
    state: State,
    length: usize,
    tail: u64,
    ntail: usize,
}

impl SipHasher13 {
    /// Creates a hasher keyed with the process key.
    pub fn new() -> Self {
        let key = process_key();
        Self::new_with_keys(key.k0, key.k1)
    }

    /// Creates a hasher keyed with `(k0, k1)`.
    pub fn new_with_keys(k0: u64, k1: u64) -> Self {
        SipHasher13 {
            state: State::new(k0, k1),
            length: 0,
            tail: 0,
            ntail: 0,
        }
    }

    /// Consumes the hasher and produces the 64-bit digest.
    pub fn finalize(self) -> u64 {
        self.state.finalize(self.length, self.tail)
    }
}

impl Default for SipHasher13 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for SipHasher13 {
    fn write(&mut self, msg: &[u8]) {
        let length = msg.len();
        self.length += length;

        let mut needed = 0;
        if self.ntail != 0 {
            needed = 8 - self.ntail;
            self.tail |= u8to64_le(msg, 0, cmp::min(length, needed)) << (8 * self.ntail);
            if length < needed {
                self.ntail += length;
                return;
            }
            self.state.compress(self.tail);
            self.ntail = 0;
        }

        let len = length - needed;
        let left = len & 0x7;

        let mut i = needed;
        while i < len - left {
            self.state.compress(u64::from_le_bytes(msg[i..i + 8].try_into().unwrap()));
            i += 8;
        }

        self.tail = u8to64_le(msg, i, left);
        self.ntail = left;
    }

    fn finish(&self) -> u64 {
        self.state.finalize(self.length, self.tail)
    }

    fn write_u8(&mut self, i: u8) {
        self.write(&[i]);
    }

    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    // Machine ints hash their native width; this is the one fixed choice the
    // whole crate relies on for determinism.
    fn write_usize(&mut self, i: usize) {
        self.write(&i.to_le_bytes());
    }

    fn write_i8(&mut self, i: i8) {
        self.write_u8(i as u8);
    }

    fn write_i16(&mut self, i: i16) {
        self.write_u16(i as u16);
    }

    fn write_i32(&mut self, i: i32) {
        self.write_u32(i as u32);
    }

    fn write_i64(&mut self, i: i64) {
        self.write_u64(i as u64);
    }

    fn write_isize(&mut self, i: isize) {
        self.write_usize(i as usize);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use rand::TryRngCore;
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn paper_key_and_message() {
        // The worked example from the SipHash paper: key 00..0f, message
        // 00..0e. The digest must match the reference implementation of the
        // 1-3 variant exactly.
        let (k0, k1) = (0x0706050403020100, 0x0f0e0d0c0b0a0908);
        let msg: Vec<u8> = (0u8..0x0F).collect();

        let mut ours = SipHasher13::new_with_keys(k0, k1);
        ours.write(&msg);

        let mut reference = siphasher::sip::SipHasher13::new_with_keys(k0, k1);
        Hasher::write(&mut reference, &msg);

        assert_eq!(ours.finalize(), reference.finish());
    }

    #[test]
    fn finish_equals_finalize() {
        let mut hasher = SipHasher13::new_with_keys(1, 2);
        hasher.write(b"split me");
        assert_eq!(hasher.finish(), hasher.clone().finalize());
    }

    #[test]
    fn chunking_is_invisible() {
        let msg = b"0123456789abcdefghijklmnop";
        for split in 0..msg.len() {
            let mut whole = SipHasher13::new_with_keys(7, 11);
            whole.write(msg);

            let mut parts = SipHasher13::new_with_keys(7, 11);
            parts.write(&msg[..split]);
            parts.write(&msg[split..]);

            assert_eq!(whole.finalize(), parts.finalize(), "split at {}", split);
        }
    }

    #[test]
    fn matches_reference_implementation() {
        let mut rng = OsRng;
        let k0 = rng.try_next_u64().unwrap();
        let k1 = rng.try_next_u64().unwrap();

        for len in 0..64usize {
            let msg: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31)).collect();

            let mut ours = SipHasher13::new_with_keys(k0, k1);
            ours.write(&msg);

            let mut reference = siphasher::sip::SipHasher13::new_with_keys(k0, k1);
            Hasher::write(&mut reference, &msg);

            assert_eq!(ours.finalize(), reference.finish(), "len {}", len);
        }
    }

    #[test]
    fn width_is_part_of_the_message() {
        let mut narrow = SipHasher13::new_with_keys(3, 5);
        narrow.write_u32(42);
        let mut wide = SipHasher13::new_with_keys(3, 5);
        wide.write_u64(42);
        assert_ne!(narrow.finalize(), wide.finalize());
    }

    #[test]
    fn order_is_part_of_the_message() {
        let mut xy = SipHasher13::new_with_keys(3, 5);
        xy.write_u64(1);
        xy.write_u64(2);
        let mut yx = SipHasher13::new_with_keys(3, 5);
        yx.write_u64(2);
        yx.write_u64(1);
        assert_ne!(xy.finalize(), yx.finalize());
    }

    #[test]
    fn process_key_is_stable() {
        let first = process_key();
        let second = process_key();
        assert_eq!(first, second);
        assert!(core::ptr::eq(first, second));

        // The slot is claimed now, so a fixed key can no longer win.
        assert!(!install_fixed_keys(1, 2));
        assert_eq!(process_key(), first);
    }
}
