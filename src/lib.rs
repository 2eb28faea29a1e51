#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod bitset;
pub mod hash_set;
pub mod sip;
pub mod table;

mod storage;

pub use hash_set::HashSet;
pub use hash_set::Index;
pub use sip::SipHasher13;
pub use storage::AllocError;
