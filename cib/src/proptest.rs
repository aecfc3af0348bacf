// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for cib convergence.

#[cfg(test)]
mod proptest {
    use crate::types::{UpdateType, Version};
    use crate::Cib;
    use proptest::prelude::*;
    use sdx_common::log::discard_logger;
    use sdx_types::{Prefix, SdxSet};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone)]
    struct Op {
        kind: UpdateType,
        ingress: u32,
        sender: u32,
        sdx_set: SdxSet,
    }

    // Operations over a handful of keys so that rows are overwritten,
    // duplicated and withdrawn often
    fn op_strategy() -> impl Strategy<Value = Op> {
        (
            prop::bool::ANY,
            1u32..=3,
            1u32..=4,
            prop::collection::btree_set(1u32..=8, 0..4),
        )
            .prop_map(|(withdraw, ingress, sender, sdx_set)| Op {
                kind: if withdraw {
                    UpdateType::Withdraw
                } else {
                    UpdateType::Announce
                },
                ingress,
                sender,
                sdx_set,
            })
    }

    fn prefix() -> Prefix {
        "10.0.0.0/8".parse().unwrap()
    }

    proptest! {
        /// Property: after any sequence of input updates, each local row is
        /// the union of the input rows that survive for its key
        #[test]
        fn prop_local_is_union_of_inputs(
            ops in prop::collection::vec(op_strategy(), 0..40)
        ) {
            let mut cib = Cib::in_memory(1, discard_logger());
            let mut model: BTreeMap<(u32, u32), SdxSet> = BTreeMap::new();

            for op in &ops {
                let u = cib
                    .update_in(
                        op.kind,
                        op.ingress,
                        prefix(),
                        op.sender,
                        op.sdx_set.clone(),
                        None,
                    )
                    .unwrap();
                let before = model.get(&(op.ingress, op.sender)).cloned();
                match op.kind {
                    UpdateType::Withdraw => {
                        model.remove(&(op.ingress, op.sender));
                    }
                    UpdateType::Announce => {
                        model.insert(
                            (op.ingress, op.sender),
                            op.sdx_set.clone(),
                        );
                    }
                }
                let after = model.get(&(op.ingress, op.sender)).cloned();
                prop_assert_eq!(u.changed, before != after);
                cib.update_loc(op.ingress, prefix()).unwrap();
            }

            for ingress in 1u32..=3 {
                let expected: Option<SdxSet> = {
                    let sets: Vec<&SdxSet> = model
                        .iter()
                        .filter(|((i, _), _)| *i == ingress)
                        .map(|(_, s)| s)
                        .collect();
                    if sets.is_empty() {
                        None
                    } else {
                        Some(sets.into_iter().flatten().copied().collect())
                    }
                };
                prop_assert_eq!(
                    cib.get_loc(ingress, prefix()).unwrap(),
                    expected
                );
            }
        }

        /// Property: versioned announces and withdraws produce the same
        /// local rows in any arrival order, namely the ones the newest
        /// message for each input row describes
        #[test]
        fn prop_local_order_independent(
            (ops, order) in prop::collection::vec(op_strategy(), 1..12)
                .prop_flat_map(|ops| {
                    let order: Vec<usize> = (0..ops.len()).collect();
                    (Just(ops), Just(order).prop_shuffle())
                }),
        ) {
            // message i is the i-th one sent
            let version = |i: usize| Version {
                timestamp: i as f64,
                random_value: 0,
            };
            let apply = |order: &[usize]| {
                let mut cib = Cib::in_memory(1, discard_logger());
                for i in order {
                    let op = &ops[*i];
                    cib.update_in(
                        op.kind,
                        op.ingress,
                        prefix(),
                        op.sender,
                        op.sdx_set.clone(),
                        Some(version(*i)),
                    )
                    .unwrap();
                    cib.update_loc(op.ingress, prefix()).unwrap();
                }
                (1u32..=3)
                    .map(|ingress| cib.get_loc(ingress, prefix()).unwrap())
                    .collect::<Vec<_>>()
            };

            let mut newest: BTreeMap<(u32, u32), &Op> = BTreeMap::new();
            for op in &ops {
                newest.insert((op.ingress, op.sender), op);
            }
            let expected: Vec<Option<SdxSet>> = (1u32..=3)
                .map(|ingress| {
                    let sets: Vec<&SdxSet> = newest
                        .iter()
                        .filter(|((i, _), op)| {
                            *i == ingress && op.kind == UpdateType::Announce
                        })
                        .map(|(_, op)| &op.sdx_set)
                        .collect();
                    if sets.is_empty() {
                        None
                    } else {
                        Some(sets.into_iter().flatten().copied().collect())
                    }
                })
                .collect();

            let sent: Vec<usize> = (0..ops.len()).collect();
            prop_assert_eq!(apply(&sent), expected.clone());
            prop_assert_eq!(apply(&order), expected);
        }
    }
}
