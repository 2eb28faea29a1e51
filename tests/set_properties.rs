//! Container laws checked against `hashbrown` as a behavioral oracle.

use std::collections::HashSet as StdSet;

use cow_hash::HashSet;
use hashbrown::HashSet as Oracle;
use proptest::prelude::*;

proptest! {
    // Random operation sequences agree with the oracle step by step.
    #[test]
    fn matches_oracle(ops in prop::collection::vec((0u8..3, any::<u16>()), 1..200)) {
        let mut set: HashSet<u16> = HashSet::new();
        let mut oracle: Oracle<u16> = Oracle::new();

        for (op, value) in ops {
            match op {
                0 => {
                    let (inserted, member) = set.insert(value);
                    prop_assert_eq!(*member, value);
                    prop_assert_eq!(inserted, oracle.insert(value));
                }
                1 => {
                    prop_assert_eq!(set.remove(&value), oracle.take(&value));
                }
                _ => {
                    let replaced = set.update(value).is_some();
                    prop_assert_eq!(replaced, !oracle.insert(value));
                }
            }
            prop_assert_eq!(set.len(), oracle.len());
        }

        for value in set.iter() {
            prop_assert!(oracle.contains(value));
        }
        for value in oracle.iter() {
            prop_assert!(set.contains(value));
        }
    }

    // Inserting distinct values and removing them all, in reverse order,
    // returns to empty with every intermediate lookup correct.
    #[test]
    fn insert_all_remove_all(values in prop::collection::hash_set(any::<u32>(), 0..300)) {
        let values: Vec<u32> = values.into_iter().collect();
        let mut set = HashSet::new();
        for &value in &values {
            let (inserted, _) = set.insert(value);
            prop_assert!(inserted);
        }
        prop_assert_eq!(set.len(), values.len());

        for &value in values.iter().rev() {
            prop_assert_eq!(set.remove(&value), Some(value));
        }
        prop_assert!(set.is_empty());
        for &value in &values {
            prop_assert!(!set.contains(&value));
        }
    }

    // Mutating one handle after a clone never shows through the other.
    #[test]
    fn clones_are_independent(
        base in prop::collection::hash_set(any::<u16>(), 0..100),
        churn in prop::collection::vec(any::<u16>(), 1..100),
    ) {
        let original: HashSet<u16> = base.iter().copied().collect();
        let snapshot = original.clone();

        let mut mutated = original.clone();
        for value in churn {
            mutated.insert(value);
            mutated.remove(&value.wrapping_add(1));
        }

        prop_assert_eq!(snapshot.len(), base.len());
        for value in &base {
            prop_assert!(snapshot.contains(value));
        }
        prop_assert_eq!(&original, &snapshot);
    }

    // Iteration yields exactly the inserted elements, each once.
    #[test]
    fn iteration_covers_all_once(values in prop::collection::hash_set(any::<u32>(), 0..200)) {
        let set: HashSet<u32> = values.iter().copied().collect();

        let mut yielded: Vec<u32> = set.iter().copied().collect();
        yielded.sort_unstable();
        let mut expected: Vec<u32> = values.iter().copied().collect();
        expected.sort_unstable();
        prop_assert_eq!(yielded, expected);
    }

    // Set algebra agrees with the standard library's.
    #[test]
    fn algebra_matches_std(
        a in prop::collection::hash_set(0u16..500, 0..80),
        b in prop::collection::hash_set(0u16..500, 0..80),
    ) {
        let ca: HashSet<u16> = a.iter().copied().collect();
        let cb: HashSet<u16> = b.iter().copied().collect();

        let union: StdSet<u16> = ca.union(&cb).iter().copied().collect();
        prop_assert_eq!(union, a.union(&b).copied().collect::<StdSet<u16>>());

        let intersection: StdSet<u16> = ca.intersection(&cb).iter().copied().collect();
        prop_assert_eq!(intersection, a.intersection(&b).copied().collect::<StdSet<u16>>());

        let difference: StdSet<u16> = ca.difference(&cb).iter().copied().collect();
        prop_assert_eq!(difference, a.difference(&b).copied().collect::<StdSet<u16>>());

        prop_assert_eq!(ca.is_subset(&cb), a.is_subset(&b));
        prop_assert_eq!(ca.is_disjoint(&cb), a.is_disjoint(&b));
    }
}
