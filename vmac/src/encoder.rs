// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::VmacConfig;
use crate::error::Error;
use crate::layout::{Layout, Vmac, VmacFields};
use crate::log::vmac_log;
use crate::superset::{ChangeKind, SupersetChange, SupersetTable};
use crate::vnh::VnhTable;
use rib::RouteSource;
use sdx_types::{ForbiddenPaths, ParticipantId, Prefix, RouteUpdate};
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// Encodes forwarding state into VMACs for one exchange.
///
/// The encoder tracks the basic set of every prefix it has been told about,
/// keeps the superset table covering them, and hands out the VMAC values and
/// match/mask pairs the fabric and participant controllers install.
pub struct VmacEncoder {
    config: VmacConfig,
    layout: Layout,
    supersets: SupersetTable,
    vnhs: VnhTable,
    basic_sets: BTreeMap<Prefix, BTreeSet<ParticipantId>>,
    peers_in: BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,
    log: Logger,
}

impl VmacEncoder {
    pub fn new(
        config: VmacConfig,
        peers_in: BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,
        log: Logger,
    ) -> Result<Self, Error> {
        config.validate()?;
        config.validate_participants(peers_in.keys())?;
        Ok(Self {
            layout: config.layout(),
            supersets: SupersetTable::new(config.superset_limit()),
            vnhs: VnhTable::new(config.vnh_pool),
            basic_sets: BTreeMap::new(),
            peers_in,
            config,
            log,
        })
    }

    pub fn config(&self) -> &VmacConfig {
        &self.config
    }

    pub fn supersets(&self) -> &SupersetTable {
        &self.supersets
    }

    pub fn vnh(&self, prefix: &Prefix) -> Option<Ipv4Addr> {
        self.vnhs.vnh(prefix)
    }

    pub fn assign_vnh(&mut self, prefix: Prefix) -> Result<Ipv4Addr, Error> {
        self.vnhs.assign(prefix)
    }

    pub fn prefix_of(&self, vnh: &Ipv4Addr) -> Option<Prefix> {
        self.vnhs.prefix(vnh)
    }

    /// The participants announcing `prefix` as last seen by
    /// [`Self::update_supersets`].
    pub fn basic_set(&self, prefix: &Prefix) -> BTreeSet<ParticipantId> {
        self.basic_sets.get(prefix).cloned().unwrap_or_default()
    }

    /// Bring the superset table up to date with a batch of route updates
    /// that have already been applied to `rib`.
    ///
    /// Returns the membership changes participant controllers need to hear
    /// about, if any. A change of kind [`ChangeKind::New`] means the table
    /// was recomputed and replaces everything sent before. On error the
    /// superset table and the tracked basic sets are left as they were
    /// before the batch.
    pub fn update_supersets<R: RouteSource>(
        &mut self,
        rib: &R,
        updates: &[RouteUpdate],
    ) -> Result<Option<SupersetChange>, Error> {
        let supersets = self.supersets.clone();
        let basic_sets = self.basic_sets.clone();
        let result = self.apply_updates(rib, updates);
        if let Err(e) = &result {
            vmac_log!(self, warn, "superset update rolled back: {e}";
                "supersets" => supersets.len()
            );
            self.supersets = supersets;
            self.basic_sets = basic_sets;
        }
        result
    }

    fn apply_updates<R: RouteSource>(
        &mut self,
        rib: &R,
        updates: &[RouteUpdate],
    ) -> Result<Option<SupersetChange>, Error> {
        let mut changes = Vec::new();
        for u in updates {
            let basic_set = rib.participants_advertising(&u.prefix);
            if u.withdraw {
                // supersets never shrink, only the tracked basic set does
                if basic_set.is_empty() {
                    self.basic_sets.remove(&u.prefix);
                } else {
                    self.basic_sets.insert(u.prefix, basic_set);
                }
                continue;
            }
            self.vnhs.assign(u.prefix)?;
            changes.extend(self.supersets.insert(&basic_set));
            if !basic_set.is_empty() {
                self.basic_sets.insert(u.prefix, basic_set);
            }
        }

        let count = self.supersets.len();
        if count > self.config.superset_threshold
            || count > self.config.max_supersets()
        {
            vmac_log!(self, info, "superset threshold exceeded";
                "supersets" => count,
                "threshold" => self.config.superset_threshold
            );
            return self.recompute_all_supersets().map(Some);
        }

        if changes.is_empty() {
            return Ok(None);
        }
        vmac_log!(self, debug, "superset membership updated";
            "changes" => changes.len(),
            "supersets" => count
        );
        Ok(Some(SupersetChange {
            kind: ChangeKind::Update,
            changes,
        }))
    }

    /// Replace the superset table with one built from scratch over every
    /// tracked basic set.
    pub fn recompute_all_supersets(
        &mut self,
    ) -> Result<SupersetChange, Error> {
        let table = SupersetTable::recompute(
            self.basic_sets.values(),
            self.config.superset_limit(),
            self.config.initial_superset_limit(),
        );
        if table.len() > self.config.max_supersets() {
            vmac_log!(self, error, "superset id space exhausted";
                "needed" => table.len(),
                "available" => self.config.max_supersets()
            );
            return Err(Error::SupersetSpaceExhausted {
                needed: table.len(),
                available: self.config.max_supersets(),
            });
        }
        vmac_log!(self, info, "supersets recomputed";
            "before" => self.supersets.len(),
            "after" => table.len()
        );
        self.supersets = table;
        Ok(self.supersets.snapshot())
    }

    /// The VMAC stamped on traffic from `participant` toward the prefix
    /// behind `vnh`.
    ///
    /// The membership field flags every announcer of the prefix that
    /// `participant` may forward to and that is not a forbidden egress for
    /// it. The best path field carries the participant the route server
    /// selected, or zero if there is none.
    pub fn vmac<R: RouteSource>(
        &self,
        vnh: &Ipv4Addr,
        participant: ParticipantId,
        rib: &R,
        forbidden: &ForbiddenPaths,
    ) -> Result<Vmac, Error> {
        let Some(prefix) = self.vnhs.prefix(vnh) else {
            return self.layout.compose(&VmacFields::default());
        };
        let basic_set = self.basic_set(&prefix);
        let best_path = rib
            .best_path(participant, &prefix)
            .map(|r| u64::from(r.participant))
            .unwrap_or(0);

        let Some(id) = self.supersets.best_match(&basic_set) else {
            return self.layout.compose(&VmacFields {
                best_path,
                ..Default::default()
            });
        };

        let peers = self.peers_in.get(&participant);
        let mut membership = 0u64;
        for (position, member) in
            self.supersets.get(id).into_iter().flatten().enumerate()
        {
            let eligible = basic_set.contains(member)
                && peers.is_some_and(|p| p.contains(member))
                && !forbidden.is_forbidden(participant, &prefix, *member);
            if eligible {
                membership |= self.layout.membership_bit(position)?;
            }
        }

        self.layout.compose(&VmacFields {
            superset_id: id as u64,
            membership,
            best_path,
        })
    }

    /// Matches traffic whose best path next hop is `participant`.
    pub fn best_path_match(
        &self,
        participant: ParticipantId,
    ) -> Result<Vmac, Error> {
        self.layout.compose(&VmacFields {
            best_path: u64::from(participant),
            ..Default::default()
        })
    }

    pub fn best_path_mask(&self) -> Result<Vmac, Error> {
        self.layout.compose(&VmacFields {
            best_path: Layout::field_ones(self.layout.best_path_size)?,
            ..Default::default()
        })
    }

    /// Matches traffic that may be forwarded to `participant`, expressed
    /// against the first superset holding it. `None` if the participant is
    /// in no superset.
    pub fn participant_bit_match(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<Vmac>, Error> {
        match self.participant_bit_rules(participant)?.first() {
            Some((m, _)) => Ok(Some(*m)),
            None => Ok(None),
        }
    }

    pub fn participant_bit_mask(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<Vmac>, Error> {
        match self.participant_bit_rules(participant)?.first() {
            Some((_, m)) => Ok(Some(*m)),
            None => Ok(None),
        }
    }

    /// One (match, mask) pair per superset `participant` belongs to. A
    /// participant sitting in several supersets needs all of them
    /// installed to catch every basic set it appears in.
    pub fn participant_bit_rules(
        &self,
        participant: ParticipantId,
    ) -> Result<Vec<(Vmac, Vmac)>, Error> {
        let id_ones = Layout::field_ones(self.layout.superset_id_size)?;
        self.supersets
            .positions(participant)
            .into_iter()
            .map(|(id, position)| {
                let bit = self.layout.membership_bit(position)?;
                let m = self.layout.compose(&VmacFields {
                    superset_id: id as u64,
                    membership: bit,
                    best_path: 0,
                })?;
                let mask = self.layout.compose(&VmacFields {
                    superset_id: id_ones,
                    membership: bit,
                    best_path: 0,
                })?;
                Ok((m, mask))
            })
            .collect()
    }

    /// The VMAC identifying physical port `port` of `participant`. Port
    /// VMACs use the reserved all-ones superset id so they never collide
    /// with a superset encoding.
    pub fn participant_port_match(
        &self,
        participant: ParticipantId,
        port: usize,
    ) -> Result<Vmac, Error> {
        self.layout.compose(&VmacFields {
            superset_id: Layout::field_ones(self.layout.superset_id_size)?,
            membership: port as u64,
            best_path: u64::from(participant),
        })
    }

    pub fn participant_port_mask(&self) -> Result<Vmac, Error> {
        self.layout.compose(&VmacFields {
            superset_id: Layout::field_ones(self.layout.superset_id_size)?,
            membership: Layout::field_ones(self.layout.membership_size)?,
            best_path: Layout::field_ones(self.layout.best_path_size)?,
        })
    }

    /// The MAC address ARP answers with for the best path toward
    /// `participant`.
    pub fn next_hop_vmac(
        &self,
        participant: ParticipantId,
    ) -> Result<String, Error> {
        self.best_path_match(participant)?.mac()
    }
}
