// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the bit codec and the superset table.

#[cfg(test)]
mod proptest {
    use crate::bits::Bits;
    use crate::layout::{Layout, VmacFields};
    use crate::superset::SupersetTable;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    // Strategy for a field value and a width it fits in
    fn field_strategy() -> impl Strategy<Value = (u64, u8)> {
        (0u8..=64u8).prop_flat_map(|width| {
            let max = match width {
                64 => u64::MAX,
                w => (1u64 << w) - 1,
            };
            (0..=max, Just(width))
        })
    }

    // Strategy for basic sets drawn from a small participant population so
    // that overlaps are common
    fn basic_sets_strategy() -> impl Strategy<Value = Vec<BTreeSet<u32>>> {
        prop::collection::vec(
            prop::collection::btree_set(1u32..=12, 0..=6),
            0..24,
        )
    }

    proptest! {
        /// Property: decoding an encoded value gives the value back
        #[test]
        fn prop_encode_decode((value, width) in field_strategy()) {
            let b = Bits::encode(value, width).unwrap();
            prop_assert_eq!(b.width(), width);
            prop_assert_eq!(b.decode(&[width]).unwrap(), vec![value]);
        }

        /// Property: a value one past the top of its field never encodes
        #[test]
        fn prop_overflow_rejected(width in 0u8..64u8) {
            prop_assert!(Bits::encode(1u64 << width, width).is_err());
        }

        /// Property: composed VMACs survive a trip through their MAC text
        #[test]
        fn prop_vmac_mac_text(
            sid in 0u64..64,
            membership in 0u64..(1 << 30),
            best_path in 0u64..4096,
        ) {
            let layout = Layout {
                superset_id_size: 6,
                membership_size: 30,
                best_path_size: 12,
            };
            let fields = VmacFields { superset_id: sid, membership, best_path };
            let vmac = layout.compose(&fields).unwrap();
            let mac = vmac.mac().unwrap();
            prop_assert_eq!(mac.len(), 17);
            let back = crate::Vmac::from_mac(&mac).unwrap();
            prop_assert_eq!(layout.decompose(&back).unwrap(), fields);
        }

        /// Property: incremental updates keep every fitting basic set
        /// covered, never exceed the size bound, and never move a
        /// participant that was already placed
        #[test]
        fn prop_incremental_cover(
            sets in basic_sets_strategy(),
            max in 1usize..=5,
        ) {
            let mut table = SupersetTable::new(max);
            for set in &sets {
                let before = table.supersets().to_vec();
                table.insert(set);

                for (old, new) in before.iter().zip(table.supersets()) {
                    prop_assert_eq!(old.as_slice(), &new[..old.len()]);
                }
                if set.is_empty() {
                    continue;
                }
                if set.len() <= max {
                    prop_assert!(table.covering(set).is_some());
                } else {
                    for p in set {
                        prop_assert!(!table.positions(*p).is_empty());
                    }
                }
            }
            for s in table.supersets() {
                prop_assert!(s.len() <= max);
                let distinct: BTreeSet<_> = s.iter().collect();
                prop_assert_eq!(distinct.len(), s.len());
            }
        }

        /// Property: a recomputed table covers every fitting basic set and
        /// respects the merge limit for merged supersets
        #[test]
        fn prop_recompute_cover(
            sets in basic_sets_strategy(),
            max in 1usize..=5,
            headroom in 0usize..=2,
        ) {
            let limit = max.saturating_sub(headroom).max(1);
            let table = SupersetTable::recompute(&sets, max, limit);
            for set in &sets {
                if !set.is_empty() && set.len() <= max {
                    prop_assert!(table.covering(set).is_some());
                }
                for p in set {
                    prop_assert!(!table.positions(*p).is_empty());
                }
            }
            for s in table.supersets() {
                prop_assert!(s.len() <= max);
            }
        }
    }
}
