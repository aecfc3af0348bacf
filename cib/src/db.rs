// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::log::cib_log;
use crate::table::{MemTable, SledTable, Table};
use crate::types::{
    CibDump, InputKey, InputRow, LocalKey, OutputKey, OutputRow, Update,
    UpdateType, Version,
};
use crate::{INPUT, LOCAL, OUTPUT, WITHDRAWN};
use sdx_types::{ParticipantId, Prefix, SdxId, SdxSet};
use slog::Logger;
use std::collections::BTreeSet;

pub struct Cib {
    /// The exchange this cib belongs to.
    sdx_id: SdxId,
    input: Box<dyn Table<InputRow>>,
    /// Versions of withdrawn input rows, keyed like `input`.
    withdrawn: Box<dyn Table<Version>>,
    local: Box<dyn Table<SdxSet>>,
    output: Box<dyn Table<OutputRow>>,
    log: Logger,
}

impl Cib {
    /// A cib whose tables live in memory only.
    pub fn in_memory(sdx_id: SdxId, log: Logger) -> Self {
        Self {
            sdx_id,
            input: Box::new(MemTable::<InputRow>::default()),
            withdrawn: Box::new(MemTable::<Version>::default()),
            local: Box::new(MemTable::<SdxSet>::default()),
            output: Box::new(MemTable::<OutputRow>::default()),
            log,
        }
    }

    /// A cib stored in the sled database at `path`.
    pub fn persistent(
        sdx_id: SdxId,
        path: &str,
        log: Logger,
    ) -> Result<Self, Error> {
        Self::from_db(sdx_id, &sled::open(path)?, log)
    }

    /// A cib stored in trees of an already open sled database.
    pub fn from_db(
        sdx_id: SdxId,
        db: &sled::Db,
        log: Logger,
    ) -> Result<Self, Error> {
        Ok(Self {
            sdx_id,
            input: Box::new(SledTable::<InputRow>::open(db, INPUT)?),
            withdrawn: Box::new(SledTable::<Version>::open(db, WITHDRAWN)?),
            local: Box::new(SledTable::<SdxSet>::open(db, LOCAL)?),
            output: Box::new(SledTable::<OutputRow>::open(db, OUTPUT)?),
            log,
        })
    }

    pub fn sdx_id(&self) -> SdxId {
        self.sdx_id
    }

    /// Record what `sender_sdx` reported about the path behind `ingress`
    /// toward `prefix`.
    ///
    /// A withdraw deletes the input row. An announce stores `sdx_set` if it
    /// differs from the stored one. Messages carrying a version older than
    /// the stored row's are stale and ignored. A versioned withdraw leaves
    /// its version behind, so an announce it supersedes that arrives late
    /// is ignored as well. On equal versions the withdraw wins.
    #[allow(clippy::too_many_arguments)]
    pub fn update_in(
        &mut self,
        kind: UpdateType,
        ingress: ParticipantId,
        prefix: Prefix,
        sender_sdx: SdxId,
        sdx_set: SdxSet,
        version: Option<Version>,
    ) -> Result<Update<SdxSet>, Error> {
        let key = InputKey {
            ingress,
            prefix,
            sender_sdx,
        }
        .db_key();
        let stored = self.input.get(&key)?;
        let withdrawn = self.withdrawn.get(&key)?;
        let current = stored.as_ref().map(|r| r.sdx_set.clone());

        let stale = match (kind, &version) {
            (_, None) => false,
            (UpdateType::Withdraw, Some(v)) => {
                stored
                    .as_ref()
                    .and_then(|r| r.version)
                    .is_some_and(|s| v.is_older_than(&s))
                    || withdrawn.is_some_and(|w| v.is_older_than(&w))
            }
            (UpdateType::Announce, Some(v)) => {
                stored
                    .as_ref()
                    .and_then(|r| r.version)
                    .is_some_and(|s| v.is_older_than(&s))
                    || withdrawn.is_some_and(|w| !w.is_older_than(v))
            }
        };
        if stale {
            cib_log!(self, debug, INPUT, "stale {kind} ignored";
                "key" => &key
            );
            return Ok(Update::unchanged(current));
        }

        match kind {
            UpdateType::Withdraw => {
                if let Some(v) = version {
                    self.withdrawn.add(&key, &v)?;
                }
                let old = self.input.delete(&key)?.map(|r| r.sdx_set);
                if old.is_some() {
                    cib_log!(self, debug, INPUT, "row removed";
                        "key" => &key
                    );
                }
                Ok(Update {
                    changed: old.is_some(),
                    old,
                    new: None,
                })
            }
            UpdateType::Announce => {
                if withdrawn.is_some() {
                    self.withdrawn.delete(&key)?;
                }
                let changed = current.as_ref() != Some(&sdx_set);
                let version_changed = stored
                    .as_ref()
                    .is_some_and(|r| r.version != version);
                if changed || version_changed {
                    self.input.add(
                        &key,
                        &InputRow {
                            sdx_set: sdx_set.clone(),
                            version,
                        },
                    )?;
                }
                if changed {
                    cib_log!(self, debug, INPUT, "row updated";
                        "key" => &key,
                        "sdx_set" => format!("{sdx_set:?}")
                    );
                }
                Ok(Update {
                    changed,
                    old: current,
                    new: Some(sdx_set),
                })
            }
        }
    }

    /// Recompute the local row for (`ingress`, `prefix`) as the union of
    /// its input rows, deleting it if there are none.
    pub fn update_loc(
        &mut self,
        ingress: ParticipantId,
        prefix: Prefix,
    ) -> Result<Update<SdxSet>, Error> {
        let lk = LocalKey { ingress, prefix };
        let key = lk.db_key();
        let rows = self.input.scan(&lk.input_scan_prefix())?;
        let old = self.local.get(&key)?;

        if rows.is_empty() {
            let old = self.local.delete(&key)?;
            return Ok(Update {
                changed: old.is_some(),
                old,
                new: None,
            });
        }

        let merged: SdxSet = rows
            .into_iter()
            .flat_map(|(_, row)| row.sdx_set)
            .collect();
        if old.as_ref() == Some(&merged) {
            return Ok(Update::unchanged(old));
        }
        self.local.add(&key, &merged)?;
        cib_log!(self, debug, LOCAL, "row updated";
            "key" => &key,
            "sdx_set" => format!("{merged:?}")
        );
        Ok(Update {
            changed: true,
            old,
            new: Some(merged),
        })
    }

    /// Recompute the output row for (`egress`, `prefix`).
    ///
    /// The advertised set is the union of the local rows of every ingress
    /// participant in `ingress_participants`, plus this exchange. If none of
    /// them has a local row and no policy toward `egress` is active the row
    /// is deleted.
    pub fn update_out(
        &mut self,
        egress: ParticipantId,
        prefix: Prefix,
        receiver: ParticipantId,
        ingress_participants: &BTreeSet<ParticipantId>,
        policy: bool,
    ) -> Result<Update<OutputRow>, Error> {
        let key = OutputKey { egress, prefix }.db_key();
        let old = self.output.get(&key)?;

        let mut merged = SdxSet::new();
        let mut found = false;
        for ingress in ingress_participants {
            if let Some(set) = self.get_loc(*ingress, prefix)? {
                found = true;
                merged.extend(set);
            }
        }

        if !found && !policy {
            let old = self.output.delete(&key)?;
            if old.is_some() {
                cib_log!(self, debug, OUTPUT, "row removed";
                    "key" => &key
                );
            }
            return Ok(Update {
                changed: old.is_some(),
                old,
                new: None,
            });
        }

        merged.insert(self.sdx_id);
        let new = OutputRow {
            receiver,
            sdx_set: merged,
        };
        if old.as_ref() == Some(&new) {
            return Ok(Update::unchanged(old));
        }
        self.output.add(&key, &new)?;
        cib_log!(self, debug, OUTPUT, "row updated";
            "key" => &key,
            "receiver" => new.receiver,
            "sdx_set" => format!("{:?}", new.sdx_set)
        );
        Ok(Update {
            changed: true,
            old,
            new: Some(new),
        })
    }

    /// Drop the output row for (`egress`, `prefix`) regardless of inputs,
    /// used when the egress stops announcing the prefix.
    pub fn remove_out(
        &mut self,
        egress: ParticipantId,
        prefix: Prefix,
    ) -> Result<Option<OutputRow>, Error> {
        self.output.delete(&OutputKey { egress, prefix }.db_key())
    }

    pub fn get_in(
        &self,
        ingress: ParticipantId,
        prefix: Prefix,
        sender_sdx: SdxId,
    ) -> Result<Option<InputRow>, Error> {
        self.input.get(
            &InputKey {
                ingress,
                prefix,
                sender_sdx,
            }
            .db_key(),
        )
    }

    pub fn get_loc(
        &self,
        ingress: ParticipantId,
        prefix: Prefix,
    ) -> Result<Option<SdxSet>, Error> {
        self.local.get(&LocalKey { ingress, prefix }.db_key())
    }

    pub fn get_out(
        &self,
        egress: ParticipantId,
        prefix: Prefix,
    ) -> Result<Option<OutputRow>, Error> {
        self.output.get(&OutputKey { egress, prefix }.db_key())
    }

    /// Every output row for `prefix`, keyed by egress participant.
    pub fn outputs_for_prefix(
        &self,
        prefix: Prefix,
    ) -> Result<Vec<(ParticipantId, OutputRow)>, Error> {
        let mut result = Vec::new();
        for (key, row) in self.output.scan("")? {
            let k = OutputKey::from_db_key(&key)?;
            if k.prefix == prefix {
                result.push((k.egress, row));
            }
        }
        Ok(result)
    }

    /// Every output row, keyed by (egress participant, prefix).
    pub fn outputs(&self) -> Result<Vec<(OutputKey, OutputRow)>, Error> {
        self.output
            .scan("")?
            .into_iter()
            .map(|(k, row)| Ok((OutputKey::from_db_key(&k)?, row)))
            .collect()
    }

    /// Make sure everything written so far is durable.
    pub fn flush(&self) -> Result<(), Error> {
        self.input.flush()?;
        self.withdrawn.flush()?;
        self.local.flush()?;
        self.output.flush()
    }

    pub fn dump(&self) -> Result<CibDump, Error> {
        let input = self
            .input
            .scan("")?
            .into_iter()
            .map(|(k, row)| Ok((InputKey::from_db_key(&k)?, row)))
            .collect::<Result<Vec<_>, Error>>()?;
        let local = self
            .local
            .scan("")?
            .into_iter()
            .map(|(k, row)| Ok((LocalKey::from_db_key(&k)?, row)))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(CibDump {
            input,
            local,
            output: self.outputs()?,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::db::Cib;
    use crate::test::get_test_cib;
    use crate::types::{OutputRow, UpdateType, Version};
    use pretty_assertions::assert_eq;
    use sdx_common::log::discard_logger;
    use sdx_types::{Prefix, SdxSet};
    use std::collections::BTreeSet;

    fn pfx() -> Prefix {
        "10.0.0.0/8".parse().unwrap()
    }

    fn sdxs(v: &[u32]) -> SdxSet {
        v.iter().copied().collect()
    }

    fn announce(cib: &mut Cib, ingress: u32, sender: u32, set: &[u32]) -> bool {
        cib.update_in(
            UpdateType::Announce,
            ingress,
            pfx(),
            sender,
            sdxs(set),
            None,
        )
        .unwrap()
        .changed
    }

    fn input_idempotence(cib: &mut Cib) {
        assert!(announce(cib, 3, 2, &[2]));
        // the same content again is not a change
        assert!(!announce(cib, 3, 2, &[2]));
        assert!(announce(cib, 3, 2, &[2, 4]));

        let u = cib
            .update_in(UpdateType::Withdraw, 3, pfx(), 2, SdxSet::new(), None)
            .unwrap();
        assert!(u.changed);
        assert_eq!(u.old, Some(sdxs(&[2, 4])));
        assert_eq!(u.new, None);

        let u = cib
            .update_in(UpdateType::Withdraw, 3, pfx(), 2, SdxSet::new(), None)
            .unwrap();
        assert!(!u.changed);
    }

    fn local_union(cib: &mut Cib) {
        announce(cib, 3, 2, &[2]);
        announce(cib, 3, 4, &[4, 6]);
        // a different ingress participant is a different local row
        announce(cib, 7, 2, &[9]);

        let u = cib.update_loc(3, pfx()).unwrap();
        assert!(u.changed);
        assert_eq!(u.new, Some(sdxs(&[2, 4, 6])));
        assert!(!cib.update_loc(3, pfx()).unwrap().changed);

        cib.update_in(UpdateType::Withdraw, 3, pfx(), 4, SdxSet::new(), None)
            .unwrap();
        let u = cib.update_loc(3, pfx()).unwrap();
        assert_eq!(u.new, Some(sdxs(&[2])));

        cib.update_in(UpdateType::Withdraw, 3, pfx(), 2, SdxSet::new(), None)
            .unwrap();
        let u = cib.update_loc(3, pfx()).unwrap();
        assert!(u.changed);
        assert_eq!(u.new, None);
        assert_eq!(cib.get_loc(3, pfx()).unwrap(), None);
    }

    fn output_merge(cib: &mut Cib) {
        let feeders = BTreeSet::from([3, 7]);

        // nothing feeds the egress and no policy, so no row
        let u = cib.update_out(5, pfx(), 9, &feeders, false).unwrap();
        assert!(!u.changed);
        assert_eq!(cib.get_out(5, pfx()).unwrap(), None);

        // an active policy advertises at least this exchange
        let u = cib.update_out(5, pfx(), 9, &feeders, true).unwrap();
        assert!(u.changed);
        assert_eq!(
            u.new,
            Some(OutputRow {
                receiver: 9,
                sdx_set: sdxs(&[1])
            })
        );

        announce(cib, 3, 2, &[2]);
        cib.update_loc(3, pfx()).unwrap();
        announce(cib, 7, 4, &[4]);
        cib.update_loc(7, pfx()).unwrap();
        let u = cib.update_out(5, pfx(), 9, &feeders, true).unwrap();
        assert_eq!(u.new.map(|r| r.sdx_set), Some(sdxs(&[1, 2, 4])));
        assert!(!cib.update_out(5, pfx(), 9, &feeders, true).unwrap().changed);

        // a receiver change replaces the row
        let u = cib.update_out(5, pfx(), 10, &feeders, true).unwrap();
        assert!(u.changed);
        assert_eq!(u.old.map(|r| r.receiver), Some(9));

        assert_eq!(cib.outputs_for_prefix(pfx()).unwrap().len(), 1);
        let dump = cib.dump().unwrap();
        assert_eq!(dump.input.len(), 2);
        assert_eq!(dump.local.len(), 2);
        assert_eq!(dump.output.len(), 1);

        // feeders withdrawn and policy gone, row removed
        for (ingress, sender) in [(3, 2), (7, 4)] {
            cib.update_in(
                UpdateType::Withdraw,
                ingress,
                pfx(),
                sender,
                SdxSet::new(),
                None,
            )
            .unwrap();
            cib.update_loc(ingress, pfx()).unwrap();
        }
        let u = cib.update_out(5, pfx(), 10, &feeders, false).unwrap();
        assert!(u.changed);
        assert_eq!(u.new, None);
        assert!(cib.outputs_for_prefix(pfx()).unwrap().is_empty());
    }

    // A withdraw overtaking the announce it supersedes must win.
    fn withdraw_outlives_late_announce(cib: &mut Cib) {
        let v = |timestamp| {
            Some(Version {
                timestamp,
                random_value: 0,
            })
        };
        let u = cib
            .update_in(UpdateType::Withdraw, 3, pfx(), 2, SdxSet::new(), v(2.0))
            .unwrap();
        assert!(!u.changed);

        let u = cib
            .update_in(UpdateType::Announce, 3, pfx(), 2, sdxs(&[2]), v(1.0))
            .unwrap();
        assert!(!u.changed);
        assert_eq!(cib.get_in(3, pfx(), 2).unwrap(), None);
        cib.update_loc(3, pfx()).unwrap();
        assert_eq!(cib.get_loc(3, pfx()).unwrap(), None);

        // same version, the withdraw still wins
        let u = cib
            .update_in(UpdateType::Announce, 3, pfx(), 2, sdxs(&[2]), v(2.0))
            .unwrap();
        assert!(!u.changed);

        // a newer announce replaces the withdraw
        let u = cib
            .update_in(UpdateType::Announce, 3, pfx(), 2, sdxs(&[2]), v(3.0))
            .unwrap();
        assert!(u.changed);
        cib.update_loc(3, pfx()).unwrap();
        assert_eq!(cib.get_loc(3, pfx()).unwrap(), Some(sdxs(&[2])));

        // and the withdraw it replaced can no longer remove it
        let u = cib
            .update_in(UpdateType::Withdraw, 3, pfx(), 2, SdxSet::new(), v(2.0))
            .unwrap();
        assert!(!u.changed);
        assert!(cib.get_in(3, pfx(), 2).unwrap().is_some());
    }

    #[test]
    fn mem_input_idempotence() {
        input_idempotence(&mut Cib::in_memory(1, discard_logger()));
    }

    #[test]
    fn mem_local_union() {
        local_union(&mut Cib::in_memory(1, discard_logger()));
    }

    #[test]
    fn mem_output_merge() {
        output_merge(&mut Cib::in_memory(1, discard_logger()));
    }

    #[test]
    fn sled_input_idempotence() {
        let mut cib = get_test_cib("cib_input", 1).expect("test cib");
        input_idempotence(&mut cib);
    }

    #[test]
    fn sled_local_union() {
        let mut cib = get_test_cib("cib_local", 1).expect("test cib");
        local_union(&mut cib);
    }

    #[test]
    fn sled_output_merge() {
        let mut cib = get_test_cib("cib_output", 1).expect("test cib");
        output_merge(&mut cib);
    }

    #[test]
    fn mem_withdraw_outlives_late_announce() {
        let mut cib = Cib::in_memory(1, discard_logger());
        withdraw_outlives_late_announce(&mut cib);
    }

    #[test]
    fn sled_withdraw_outlives_late_announce() {
        let mut cib = get_test_cib("cib_withdrawn", 1).expect("test cib");
        withdraw_outlives_late_announce(&mut cib);
    }

    #[test]
    fn stale_versions_ignored() {
        let mut cib = Cib::in_memory(1, discard_logger());
        let v = |timestamp, random_value| {
            Some(Version {
                timestamp,
                random_value,
            })
        };

        let u = cib
            .update_in(UpdateType::Announce, 3, pfx(), 2, sdxs(&[2]), v(2.0, 1))
            .unwrap();
        assert!(u.changed);

        // an older announce does not overwrite
        let u = cib
            .update_in(
                UpdateType::Announce,
                3,
                pfx(),
                2,
                sdxs(&[2, 8]),
                v(1.0, 1),
            )
            .unwrap();
        assert!(!u.changed);
        assert_eq!(
            cib.get_in(3, pfx(), 2).unwrap().unwrap().sdx_set,
            sdxs(&[2])
        );

        // nor does an older withdraw delete
        let u = cib
            .update_in(
                UpdateType::Withdraw,
                3,
                pfx(),
                2,
                SdxSet::new(),
                v(1.5, 9),
            )
            .unwrap();
        assert!(!u.changed);
        assert!(cib.get_in(3, pfx(), 2).unwrap().is_some());

        // an unversioned message always applies
        let u = cib
            .update_in(UpdateType::Withdraw, 3, pfx(), 2, SdxSet::new(), None)
            .unwrap();
        assert!(u.changed);
    }

    #[test]
    fn persistent_reopen() {
        let path = format!("/tmp/cib_reopen_{}.db", std::process::id());
        let _ = std::fs::remove_dir_all(&path);
        {
            let mut cib = Cib::persistent(1, &path, discard_logger()).unwrap();
            announce(&mut cib, 3, 2, &[2]);
            cib.update_loc(3, pfx()).unwrap();
            cib.flush().unwrap();
        }
        let cib = Cib::persistent(1, &path, discard_logger()).unwrap();
        assert_eq!(cib.get_loc(3, pfx()).unwrap(), Some(sdxs(&[2])));
        assert_eq!(
            cib.get_in(3, pfx(), 2).unwrap().unwrap().sdx_set,
            sdxs(&[2])
        );
        drop(cib);
        let _ = std::fs::remove_dir_all(&path);
    }
}
