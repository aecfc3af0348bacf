// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Superset cover of the basic sets observed at the exchange.
//!
//! A basic set is the set of participants announcing a given prefix. The
//! table keeps a short list of supersets such that every basic set is a
//! subset of at least one of them, which lets a VMAC describe a basic set
//! as (superset id, membership bitmap). A participant's position inside a
//! superset is its bit in the bitmap and never changes until the whole
//! table is recomputed.

use itertools::Itertools;
use sdx_types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Participant ids ordered by bit position.
pub type Superset = Vec<ParticipantId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The table was rebuilt, `changes` lists every member of every
    /// superset.
    New,
    /// Members were appended to existing or fresh supersets.
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChange {
    pub participant_id: ParticipantId,
    pub superset: usize,
    pub position: usize,
}

/// Notification sent to participant controllers when superset membership
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersetChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub changes: Vec<MemberChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersetTable {
    supersets: Vec<Superset>,
    max_size: usize,
}

impl SupersetTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            supersets: Vec::new(),
            max_size,
        }
    }

    pub fn supersets(&self) -> &[Superset] {
        &self.supersets
    }

    pub fn get(&self, id: usize) -> Option<&Superset> {
        self.supersets.get(id)
    }

    pub fn len(&self) -> usize {
        self.supersets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supersets.is_empty()
    }

    /// Every (superset id, position) `participant` occupies.
    pub fn positions(&self, participant: ParticipantId) -> Vec<(usize, usize)> {
        self.supersets
            .iter()
            .enumerate()
            .filter_map(|(id, s)| {
                s.iter()
                    .position(|p| *p == participant)
                    .map(|pos| (id, pos))
            })
            .collect()
    }

    /// The first superset containing every member of `basic_set`.
    pub fn covering(
        &self,
        basic_set: &BTreeSet<ParticipantId>,
    ) -> Option<usize> {
        self.supersets
            .iter()
            .position(|s| basic_set.iter().all(|p| s.contains(p)))
    }

    /// The superset a VMAC for `basic_set` is expressed against. This is
    /// the first covering superset or, for sets too large to be covered,
    /// the one holding the most members with the lowest id winning ties.
    pub fn best_match(
        &self,
        basic_set: &BTreeSet<ParticipantId>,
    ) -> Option<usize> {
        if let Some(id) = self.covering(basic_set) {
            return Some(id);
        }
        self.supersets
            .iter()
            .enumerate()
            .map(|(id, s)| {
                (id, s.iter().filter(|p| basic_set.contains(*p)).count())
            })
            .filter(|(_, n)| *n > 0)
            // max_by_key keeps the last maximum, so reverse to favor low ids
            .rev()
            .max_by_key(|(_, n)| *n)
            .map(|(id, _)| id)
    }

    /// Make sure `basic_set` is covered, extending or allocating supersets
    /// as needed. Returns one change per newly placed member.
    pub fn insert(
        &mut self,
        basic_set: &BTreeSet<ParticipantId>,
    ) -> Vec<MemberChange> {
        if basic_set.is_empty() || self.covering(basic_set).is_some() {
            return Vec::new();
        }

        if basic_set.len() > self.max_size {
            return self.insert_oversized(basic_set);
        }

        let candidate = self
            .supersets
            .iter()
            .enumerate()
            .filter_map(|(id, s)| {
                let missing =
                    basic_set.iter().filter(|p| !s.contains(p)).count();
                let union = s.len() + missing;
                (union <= self.max_size).then_some((missing, id))
            })
            .min();

        match candidate {
            Some((_, id)) => {
                let missing: Vec<ParticipantId> = basic_set
                    .iter()
                    .filter(|p| !self.supersets[id].contains(p))
                    .copied()
                    .collect();
                self.append(id, missing)
            }
            None => self.allocate(basic_set.iter().copied().collect()),
        }
    }

    /// Members not held by any superset yet are chunked into new supersets
    /// in ascending id order.
    fn insert_oversized(
        &mut self,
        basic_set: &BTreeSet<ParticipantId>,
    ) -> Vec<MemberChange> {
        let uncovered: Vec<ParticipantId> = basic_set
            .iter()
            .filter(|p| !self.supersets.iter().any(|s| s.contains(p)))
            .copied()
            .collect();
        let mut changes = Vec::new();
        for chunk in uncovered.chunks(self.max_size) {
            changes.extend(self.allocate(chunk.to_vec()));
        }
        changes
    }

    fn append(
        &mut self,
        id: usize,
        members: Vec<ParticipantId>,
    ) -> Vec<MemberChange> {
        let superset = &mut self.supersets[id];
        let mut changes = Vec::with_capacity(members.len());
        for p in members {
            changes.push(MemberChange {
                participant_id: p,
                superset: id,
                position: superset.len(),
            });
            superset.push(p);
        }
        changes
    }

    fn allocate(&mut self, members: Vec<ParticipantId>) -> Vec<MemberChange> {
        self.supersets.push(Vec::new());
        let id = self.supersets.len() - 1;
        self.append(id, members)
    }

    /// Build a fresh table covering `basic_sets`.
    ///
    /// Oversized sets are split into chunks of `max_size`, sets contained in
    /// other sets are dropped, then the pair with the largest intersection
    /// is merged repeatedly while the merged set stays within `merge_limit`.
    /// Ties prefer the smaller union and then the lower indices.
    pub fn recompute<'a, I>(
        basic_sets: I,
        max_size: usize,
        merge_limit: usize,
    ) -> Self
    where
        I: IntoIterator<Item = &'a BTreeSet<ParticipantId>>,
    {
        let mut sets: Vec<BTreeSet<ParticipantId>> = Vec::new();
        for set in basic_sets {
            if set.len() > max_size {
                for chunk in &set.iter().chunks(max_size) {
                    sets.push(chunk.copied().collect());
                }
            } else if !set.is_empty() {
                sets.push(set.clone());
            }
        }

        // largest first, then lexicographic, so results are deterministic
        sets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        sets.dedup();
        let mut kept: Vec<BTreeSet<ParticipantId>> = Vec::new();
        for s in sets {
            if !kept.iter().any(|k| s.is_subset(k)) {
                kept.push(s);
            }
        }

        loop {
            let best = kept
                .iter()
                .enumerate()
                .tuple_combinations()
                .filter_map(|((i, a), (j, b))| {
                    let union = a.union(b).count();
                    (union <= merge_limit).then(|| {
                        let shared = a.intersection(b).count();
                        (std::cmp::Reverse(shared), union, i, j)
                    })
                })
                .min();
            let Some((_, _, i, j)) = best else {
                break;
            };
            let absorbed = kept.remove(j);
            kept[i].extend(absorbed);
            let merged = kept[i].clone();
            let mut idx = 0;
            kept.retain(|s| {
                let keep = idx == i || !s.is_subset(&merged);
                idx += 1;
                keep
            });
        }

        Self {
            supersets: kept
                .into_iter()
                .map(|s| s.into_iter().collect())
                .collect(),
            max_size,
        }
    }

    /// A full-replace notification describing the whole table.
    pub fn snapshot(&self) -> SupersetChange {
        SupersetChange {
            kind: ChangeKind::New,
            changes: self
                .supersets
                .iter()
                .enumerate()
                .flat_map(|(id, s)| {
                    s.iter().enumerate().map(move |(pos, p)| MemberChange {
                        participant_id: *p,
                        superset: id,
                        position: pos,
                    })
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ChangeKind, MemberChange, SupersetChange, SupersetTable};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn set(v: &[u32]) -> BTreeSet<u32> {
        v.iter().copied().collect()
    }

    fn change(p: u32, superset: usize, position: usize) -> MemberChange {
        MemberChange {
            participant_id: p,
            superset,
            position,
        }
    }

    #[test]
    fn covered_sets_are_free() {
        let mut t = SupersetTable::new(4);
        assert_eq!(
            t.insert(&set(&[2, 1])),
            vec![change(1, 0, 0), change(2, 0, 1)]
        );
        assert!(t.insert(&set(&[1])).is_empty());
        assert!(t.insert(&set(&[])).is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn extend_smallest_diff_lowest_index() {
        let mut t = SupersetTable::new(3);
        t.insert(&set(&[1, 2]));
        t.insert(&set(&[4, 5]));
        assert_eq!(t.supersets(), &[vec![1, 2], vec![4, 5]]);

        // only superset 0 can absorb the missing member
        assert_eq!(t.insert(&set(&[1, 3])), vec![change(3, 0, 2)]);
        // superset 0 is full, superset 1 has room
        assert_eq!(t.insert(&set(&[4, 6])), vec![change(6, 1, 2)]);
        // nothing has room for two more, allocate
        assert_eq!(
            t.insert(&set(&[7, 8])),
            vec![change(7, 2, 0), change(8, 2, 1)]
        );
        assert_eq!(t.supersets(), &[vec![1, 2, 3], vec![4, 5, 6], vec![7, 8]]);
    }

    #[test]
    fn oversized_sets_split_into_new_supersets() {
        let mut t = SupersetTable::new(2);
        assert_eq!(
            t.insert(&set(&[1, 2, 3])),
            vec![change(1, 0, 0), change(2, 0, 1), change(3, 1, 0)]
        );
        assert_eq!(t.supersets(), &[vec![1, 2], vec![3]]);

        // 4 is the only uncovered member and never extends superset 1
        assert_eq!(t.insert(&set(&[1, 2, 3, 4])), vec![change(4, 2, 0)]);
        assert_eq!(t.supersets(), &[vec![1, 2], vec![3], vec![4]]);

        // the superset holding the most members wins, lowest id on ties
        assert_eq!(t.best_match(&set(&[1, 2, 3, 4])), Some(0));
        assert_eq!(t.best_match(&set(&[3, 4])), Some(1));
        assert_eq!(t.best_match(&set(&[9])), None);
    }

    #[test]
    fn recompute_merges_overlapping_sets() {
        let sets = [
            set(&[1, 2]),
            set(&[2, 3]),
            set(&[1]),
            set(&[5, 6]),
            set(&[7]),
        ];
        let t = SupersetTable::recompute(&sets, 3, 3);
        // {1,2}+{2,3} share a member and merge first, then {5,6}+{7}
        assert_eq!(t.supersets(), &[vec![1, 2, 3], vec![5, 6, 7]]);
        for s in &sets {
            assert!(t.covering(s).is_some());
        }

        // a tighter merge limit leaves room for growth
        let t = SupersetTable::recompute(&sets, 3, 2);
        assert_eq!(t.len(), 4);
        assert!(t.supersets().iter().all(|s| s.len() <= 2));
    }

    #[test]
    fn recompute_splits_oversized() {
        let sets = [set(&[1, 2, 3, 4, 5])];
        let t = SupersetTable::recompute(&sets, 2, 2);
        assert_eq!(t.supersets(), &[vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn snapshot_wire_format() {
        let mut t = SupersetTable::new(2);
        t.insert(&set(&[1, 2]));
        t.insert(&set(&[3]));
        let snap = t.snapshot();
        assert_eq!(
            snap,
            SupersetChange {
                kind: ChangeKind::New,
                changes: vec![
                    change(1, 0, 0),
                    change(2, 0, 1),
                    change(3, 1, 0)
                ],
            }
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["type"], "new");
        assert_eq!(json["changes"][2]["participant_id"], 3);
        assert_eq!(json["changes"][2]["superset"], 1);
        assert_eq!(json["changes"][2]["position"], 0);
    }
}
