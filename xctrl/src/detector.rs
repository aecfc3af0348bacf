// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-exchange loop detection.
//!
//! Every exchange tells the exchanges downstream of it which exchanges
//! traffic has already crossed on its way in. The [`LoopDetector`] keeps
//! that knowledge in the cib, decides which outbound policies are safe to
//! install, maintains the forbidden paths the VMAC encoder consults, and
//! produces the correctness messages that carry its own view further
//! downstream.
//!
//! Nothing here blocks or talks to the network. Every entry point returns
//! the messages that should be sent and leaves delivery to the caller.

use crate::error::Error;
use crate::log::detector_log;
use crate::messages::CorrectnessMessage;
use crate::topology::Topology;
use cib::{Cib, OutputRow};
use rib::RouteSource;
use sdx_types::{ForbiddenPaths, ParticipantId, Prefix, SdxId, SdxSet};
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};

/// A correctness message addressed to a federated exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub sdx: SdxId,
    pub message: CorrectnessMessage,
}

pub struct LoopDetector {
    topology: Topology,
    cib: Cib,

    /// Installed outbound policies keyed by (ingress, egress), with the
    /// prefixes each one was admitted for.
    policies: BTreeMap<(ParticipantId, ParticipantId), BTreeSet<Prefix>>,

    /// The exchanges last sent an announce for each (egress, prefix)
    /// output row. They are owed a withdraw once they stop being
    /// interested.
    announced: BTreeMap<(ParticipantId, Prefix), SdxSet>,

    forbidden: ForbiddenPaths,
    log: Logger,
}

impl LoopDetector {
    /// Build a detector over `cib`, which may hold output rows from an
    /// earlier run. The exchanges those rows were announced to are
    /// recovered from their receivers so that they can be withdrawn later.
    /// Policies are not kept across runs and have to be activated again.
    pub fn new(
        topology: Topology,
        cib: Cib,
        log: Logger,
    ) -> Result<Self, Error> {
        let mut announced = BTreeMap::new();
        for (key, row) in cib.outputs()? {
            let mut interested = topology.exchanges_hosting(row.receiver);
            interested.remove(&topology.sdx_id());
            if !interested.is_empty() {
                announced.insert((key.egress, key.prefix), interested);
            }
        }
        let detector = Self {
            topology,
            cib,
            policies: BTreeMap::new(),
            announced,
            forbidden: ForbiddenPaths::default(),
            log,
        };
        if !detector.announced.is_empty() {
            detector_log!(detector, info, "recovered announced output rows";
                "rows" => detector.announced.len()
            );
        }
        Ok(detector)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn cib(&self) -> &Cib {
        &self.cib
    }

    pub fn forbidden_paths(&self) -> &ForbiddenPaths {
        &self.forbidden
    }

    /// The egress participants `ingress` has active policies toward, with
    /// the prefixes each policy currently covers.
    pub fn activated_policies(
        &self,
        ingress: ParticipantId,
    ) -> BTreeMap<ParticipantId, BTreeSet<Prefix>> {
        self.policies
            .iter()
            .filter(|((i, _), _)| *i == ingress)
            .map(|((_, e), prefixes)| (*e, prefixes.clone()))
            .collect()
    }

    /// Merge a correctness message from a federated exchange.
    pub fn handle_correctness<R: RouteSource>(
        &mut self,
        rib: &R,
        msg: &CorrectnessMessage,
    ) -> Result<Vec<Outbound>, Error> {
        msg.validate()?;
        let ingress = msg.ingress_participant;
        let prefix = msg.prefix;

        if !self.topology.is_local(ingress) {
            detector_log!(self, warn, "message for participant not here";
                "sender_sdx" => msg.sender_sdx,
                "participant" => ingress,
                "prefix" => prefix.to_string()
            );
        }

        let input = self.cib.update_in(
            msg.kind,
            ingress,
            prefix,
            msg.sender_sdx,
            msg.sdx_set.clone().unwrap_or_default(),
            Some(msg.version()),
        )?;
        if !input.changed {
            detector_log!(self, trace, "correctness message absorbed";
                "sender_sdx" => msg.sender_sdx,
                "type" => msg.kind.to_string(),
                "prefix" => prefix.to_string()
            );
            return Ok(Vec::new());
        }
        detector_log!(self, debug, "correctness message merged";
            "sender_sdx" => msg.sender_sdx,
            "type" => msg.kind.to_string(),
            "participant" => ingress,
            "prefix" => prefix.to_string()
        );

        let local = self.cib.update_loc(ingress, prefix)?;
        if !local.changed {
            return Ok(Vec::new());
        }
        self.refresh_forbidden_for(rib, ingress, prefix)?;

        let mut out = Vec::new();
        for egress in self.fed_egresses(rib, ingress, prefix) {
            out.extend(self.refresh_output(rib, egress, prefix)?);
        }
        Ok(out)
    }

    /// React to a change in the routes for `prefix` that has already been
    /// applied to `rib`.
    pub fn handle_route_change<R: RouteSource>(
        &mut self,
        rib: &R,
        prefix: Prefix,
    ) -> Result<Vec<Outbound>, Error> {
        self.reconcile_policies(rib, prefix)?;

        let mut egresses = rib.participants_advertising(&prefix);
        egresses.extend(
            self.cib
                .outputs_for_prefix(prefix)?
                .into_iter()
                .map(|(egress, _)| egress),
        );

        let mut out = Vec::new();
        for egress in egresses {
            out.extend(self.refresh_output(rib, egress, prefix)?);
        }
        self.refresh_forbidden(rib, prefix)?;
        Ok(out)
    }

    /// Try to install an outbound policy steering traffic from `ingress`
    /// to `egress`.
    ///
    /// The policy is admitted for every prefix `egress` offers `ingress`
    /// whose output row does not already list this exchange, which would
    /// mean traffic steered there comes back. Returns false, installing
    /// nothing, when no such prefix exists.
    pub fn activate_policy<R: RouteSource>(
        &mut self,
        rib: &R,
        ingress: ParticipantId,
        egress: ParticipantId,
    ) -> Result<(bool, Vec<Outbound>), Error> {
        for p in [ingress, egress] {
            if !self.topology.is_local(p) {
                return Err(Error::UnknownParticipant(p));
            }
        }

        let mut safe = BTreeSet::new();
        let mut unsafe_count = 0usize;
        for prefix in rib.prefixes() {
            if !rib.candidates(ingress, &prefix).contains(&egress) {
                continue;
            }
            if self.loops_back(egress, prefix)? {
                unsafe_count += 1;
            } else {
                safe.insert(prefix);
            }
        }

        if safe.is_empty() {
            detector_log!(self, info, "policy {ingress} -> {egress} rejected";
                "unsafe_prefixes" => unsafe_count
            );
            return Ok((false, Vec::new()));
        }
        detector_log!(self, info, "policy {ingress} -> {egress} admitted";
            "safe_prefixes" => safe.len(),
            "unsafe_prefixes" => unsafe_count
        );

        self.policies
            .entry((ingress, egress))
            .or_default()
            .extend(safe.iter().copied());

        let mut out = Vec::new();
        for prefix in safe {
            out.extend(self.refresh_output(rib, egress, prefix)?);
        }
        Ok((true, out))
    }

    /// Remove the policy from `ingress` to `egress`. Returns false if there
    /// was none.
    pub fn deactivate_policy<R: RouteSource>(
        &mut self,
        rib: &R,
        ingress: ParticipantId,
        egress: ParticipantId,
    ) -> Result<(bool, Vec<Outbound>), Error> {
        let Some(prefixes) = self.policies.remove(&(ingress, egress)) else {
            return Ok((false, Vec::new()));
        };
        detector_log!(self, info, "policy {ingress} -> {egress} removed");
        let mut out = Vec::new();
        for prefix in prefixes {
            out.extend(self.refresh_output(rib, egress, prefix)?);
        }
        Ok((true, out))
    }

    /// Whether steering traffic for `prefix` to `egress` would bring it
    /// back through this exchange.
    fn loops_back(
        &self,
        egress: ParticipantId,
        prefix: Prefix,
    ) -> Result<bool, Error> {
        Ok(self
            .cib
            .get_out(egress, prefix)?
            .is_some_and(|row| row.sdx_set.contains(&self.topology.sdx_id())))
    }

    /// Keep the admitted prefixes of every installed policy in step with
    /// the routes for `prefix`.
    fn reconcile_policies<R: RouteSource>(
        &mut self,
        rib: &R,
        prefix: Prefix,
    ) -> Result<(), Error> {
        let keys: Vec<_> = self.policies.keys().copied().collect();
        for (ingress, egress) in keys {
            let eligible = rib.candidates(ingress, &prefix).contains(&egress);
            let admit = eligible && !self.loops_back(egress, prefix)?;
            let Some(prefixes) = self.policies.get_mut(&(ingress, egress))
            else {
                continue;
            };
            if !eligible && prefixes.remove(&prefix) {
                detector_log!(self, debug, "policy prefix dropped";
                    "ingress" => ingress,
                    "egress" => egress,
                    "prefix" => prefix.to_string()
                );
            } else if admit && prefixes.insert(prefix) {
                detector_log!(self, debug, "policy prefix admitted";
                    "ingress" => ingress,
                    "egress" => egress,
                    "prefix" => prefix.to_string()
                );
            }
        }
        Ok(())
    }

    fn policy_admits(
        &self,
        ingress: ParticipantId,
        egress: ParticipantId,
        prefix: &Prefix,
    ) -> bool {
        self.policies
            .get(&(ingress, egress))
            .is_some_and(|prefixes| prefixes.contains(prefix))
    }

    /// The egress participants traffic from `ingress` toward `prefix` may
    /// leave through: its best path plus any admitted policy.
    fn fed_egresses<R: RouteSource>(
        &self,
        rib: &R,
        ingress: ParticipantId,
        prefix: Prefix,
    ) -> BTreeSet<ParticipantId> {
        let mut egresses: BTreeSet<ParticipantId> = self
            .policies
            .iter()
            .filter(|((i, _), prefixes)| {
                *i == ingress && prefixes.contains(&prefix)
            })
            .map(|((_, e), _)| *e)
            .collect();
        if let Some(route) = rib.best_path(ingress, &prefix) {
            egresses.insert(route.participant);
        }
        egresses
    }

    /// The ingress participants whose traffic toward `prefix` leaves
    /// through `egress`.
    fn feeders<R: RouteSource>(
        &self,
        rib: &R,
        egress: ParticipantId,
        prefix: Prefix,
    ) -> BTreeSet<ParticipantId> {
        self.topology
            .local_participants()
            .iter()
            .copied()
            .filter(|i| *i != egress)
            .filter(|i| {
                self.policy_admits(*i, egress, &prefix)
                    || rib
                        .best_path(*i, &prefix)
                        .is_some_and(|r| r.participant == egress)
            })
            .collect()
    }

    /// Recompute the output row for (`egress`, `prefix`) and return the
    /// messages its change calls for.
    fn refresh_output<R: RouteSource>(
        &mut self,
        rib: &R,
        egress: ParticipantId,
        prefix: Prefix,
    ) -> Result<Vec<Outbound>, Error> {
        let Some(route) = rib.announced(&prefix, egress) else {
            if self.cib.remove_out(egress, prefix)?.is_some() {
                detector_log!(self, debug, "output removed";
                    "egress" => egress,
                    "prefix" => prefix.to_string()
                );
            }
            return Ok(self.propagate(egress, prefix, None));
        };

        let receiver = self.topology.receiver(egress, &route.as_path);
        let feeders = self.feeders(rib, egress, prefix);
        let policy = self.policies.iter().any(|((_, e), prefixes)| {
            *e == egress && prefixes.contains(&prefix)
        });

        let update = self
            .cib
            .update_out(egress, prefix, receiver, &feeders, policy)?;
        if !update.changed {
            return Ok(Vec::new());
        }
        Ok(self.propagate(egress, prefix, update.new.as_ref()))
    }

    /// Tell downstream exchanges about the current state of the output row
    /// for (`egress`, `prefix`). Exchanges that were told before but no
    /// longer host the receiver get a withdraw, the rest get the new set.
    fn propagate(
        &mut self,
        egress: ParticipantId,
        prefix: Prefix,
        row: Option<&OutputRow>,
    ) -> Vec<Outbound> {
        let sdx_id = self.topology.sdx_id();
        let previous =
            self.announced.remove(&(egress, prefix)).unwrap_or_default();
        let mut interested = match row {
            Some(row) => self.topology.exchanges_hosting(row.receiver),
            None => SdxSet::new(),
        };
        interested.remove(&sdx_id);

        let withdrawn: SdxSet =
            previous.difference(&interested).copied().collect();

        let mut out = Vec::new();
        for sdx in &withdrawn {
            out.push(Outbound {
                sdx: *sdx,
                message: CorrectnessMessage::withdraw(sdx_id, egress, prefix),
            });
        }
        if let Some(row) = row {
            for sdx in &interested {
                out.push(Outbound {
                    sdx: *sdx,
                    message: CorrectnessMessage::announce(
                        sdx_id,
                        egress,
                        prefix,
                        row.sdx_set.clone(),
                    ),
                });
            }
        }
        if !out.is_empty() {
            detector_log!(self, debug, "propagating output change";
                "egress" => egress,
                "prefix" => prefix.to_string(),
                "withdrawn" => format!("{withdrawn:?}"),
                "announced" => format!("{interested:?}")
            );
        }
        if !interested.is_empty() {
            self.announced.insert((egress, prefix), interested);
        }
        out
    }

    /// Recompute the forbidden egresses for `prefix` for every local
    /// ingress participant.
    fn refresh_forbidden<R: RouteSource>(
        &mut self,
        rib: &R,
        prefix: Prefix,
    ) -> Result<(), Error> {
        let ingresses: Vec<_> =
            self.topology.local_participants().iter().copied().collect();
        for ingress in ingresses {
            self.refresh_forbidden_for(rib, ingress, prefix)?;
        }
        Ok(())
    }

    /// An egress is forbidden for (`ingress`, `prefix`) when traffic
    /// arriving through `ingress` has crossed other exchanges, or the
    /// egress' route leads through participants of federated exchanges.
    fn refresh_forbidden_for<R: RouteSource>(
        &mut self,
        rib: &R,
        ingress: ParticipantId,
        prefix: Prefix,
    ) -> Result<(), Error> {
        let local = self.cib.get_loc(ingress, prefix)?.unwrap_or_default();
        let forbidden: BTreeSet<ParticipantId> = rib
            .candidates(ingress, &prefix)
            .into_iter()
            .filter(|egress| {
                !local.is_empty()
                    || rib.announced(&prefix, *egress).is_some_and(|r| {
                        !self
                            .topology
                            .path_exchanges(*egress, &r.as_path)
                            .is_empty()
                    })
            })
            .collect();

        let current = self
            .forbidden
            .get(ingress, &prefix)
            .cloned()
            .unwrap_or_default();
        for egress in current.difference(&forbidden) {
            self.forbidden.remove(ingress, &prefix, *egress);
            detector_log!(self, debug, "path allowed";
                "ingress" => ingress,
                "egress" => *egress,
                "prefix" => prefix.to_string()
            );
        }
        for egress in forbidden.difference(&current) {
            self.forbidden.insert(ingress, prefix, *egress);
            detector_log!(self, debug, "path forbidden";
                "ingress" => ingress,
                "egress" => *egress,
                "prefix" => prefix.to_string()
            );
        }
        Ok(())
    }
}
