// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Who is where in the federation, as seen from one exchange.

use crate::config::FederationConfig;
use crate::error::Error;
use sdx_types::{Asn, ParticipantId, SdxId, SdxSet};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    sdx_id: SdxId,
    local: BTreeSet<ParticipantId>,
    asn: BTreeMap<ParticipantId, Asn>,
    by_asn: BTreeMap<Asn, BTreeSet<ParticipantId>>,
    hosted_at: BTreeMap<ParticipantId, SdxSet>,
}

impl Topology {
    pub fn new(
        config: &FederationConfig,
        sdx_id: SdxId,
    ) -> Result<Self, Error> {
        let local = config
            .exchange(sdx_id)
            .ok_or(Error::UnknownExchange(sdx_id))?
            .participants
            .clone();

        let mut asn = BTreeMap::new();
        let mut by_asn: BTreeMap<Asn, BTreeSet<ParticipantId>> =
            BTreeMap::new();
        for p in &config.participants {
            asn.insert(p.id, p.asn);
            by_asn.entry(p.asn).or_default().insert(p.id);
        }

        let mut hosted_at: BTreeMap<ParticipantId, SdxSet> = BTreeMap::new();
        for x in &config.exchanges {
            for p in &x.participants {
                hosted_at.entry(*p).or_default().insert(x.id);
            }
        }

        Ok(Self {
            sdx_id,
            local,
            asn,
            by_asn,
            hosted_at,
        })
    }

    pub fn sdx_id(&self) -> SdxId {
        self.sdx_id
    }

    pub fn is_local(&self, participant: ParticipantId) -> bool {
        self.local.contains(&participant)
    }

    pub fn local_participants(&self) -> &BTreeSet<ParticipantId> {
        &self.local
    }

    pub fn asn(&self, participant: ParticipantId) -> Option<Asn> {
        self.asn.get(&participant).copied()
    }

    /// Every exchange `participant` is attached to, this one included.
    pub fn exchanges_hosting(&self, participant: ParticipantId) -> SdxSet {
        self.hosted_at
            .get(&participant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn participants_with_asn(&self, asn: Asn) -> BTreeSet<ParticipantId> {
        self.by_asn.get(&asn).cloned().unwrap_or_default()
    }

    /// The part of a route's AS path that lies beyond `egress`. Leading
    /// copies of the egress' own ASN are prepends and are skipped.
    pub fn downstream_asns<'a>(
        &self,
        egress: ParticipantId,
        as_path: &'a [Asn],
    ) -> &'a [Asn] {
        let Some(own) = self.asn(egress) else {
            return as_path;
        };
        let skip = as_path.iter().take_while(|a| **a == own).count();
        &as_path[skip..]
    }

    /// The participant a route through `egress` is handed to next: the
    /// lowest id participant owning the first downstream AS, or the egress
    /// itself when that AS is outside the federation.
    pub fn receiver(
        &self,
        egress: ParticipantId,
        as_path: &[Asn],
    ) -> ParticipantId {
        self.downstream_asns(egress, as_path)
            .first()
            .and_then(|asn| self.by_asn.get(asn))
            .and_then(|ps| ps.first().copied())
            .unwrap_or(egress)
    }

    /// The exchanges hosting any federation participant that appears on the
    /// AS path beyond `egress`.
    pub fn path_exchanges(
        &self,
        egress: ParticipantId,
        as_path: &[Asn],
    ) -> SdxSet {
        self.downstream_asns(egress, as_path)
            .iter()
            .flat_map(|asn| self.participants_with_asn(*asn))
            .flat_map(|p| self.exchanges_hosting(p))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::Topology;
    use crate::config::{ExchangeConfig, FederationConfig, ParticipantConfig};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn participant(id: u32, asn: u32) -> ParticipantConfig {
        ParticipantConfig {
            id,
            asn,
            ports: Vec::new(),
            peers_in: BTreeSet::new(),
            peers_out: BTreeSet::new(),
        }
    }

    fn exchange(id: u32, participants: &[u32]) -> ExchangeConfig {
        ExchangeConfig {
            id,
            address: format!("127.0.0.1:{}", 5550 + id).parse().unwrap(),
            route_address: None,
            participants: participants.iter().copied().collect(),
        }
    }

    #[test]
    fn path_lookups() {
        let config = FederationConfig {
            vmac: Default::default(),
            exchanges: vec![
                exchange(1, &[1, 2, 3]),
                exchange(2, &[3, 4]),
                exchange(3, &[4, 5]),
            ],
            participants: vec![
                participant(1, 65001),
                participant(2, 65002),
                participant(3, 65003),
                participant(4, 65004),
                participant(5, 65004),
            ],
            runtime: Default::default(),
        };
        let t = Topology::new(&config, 1).unwrap();
        assert!(t.is_local(3));
        assert!(!t.is_local(4));
        assert_eq!(t.exchanges_hosting(3), BTreeSet::from([1, 2]));
        assert_eq!(t.exchanges_hosting(9), BTreeSet::new());

        let path = [65003, 65003, 65004, 64999];
        assert_eq!(t.downstream_asns(3, &path), &[65004, 64999]);
        assert_eq!(t.receiver(3, &path), 4);
        assert_eq!(t.path_exchanges(3, &path), BTreeSet::from([2, 3]));

        // leaves the federation right away
        assert_eq!(t.receiver(3, &[65003, 64999]), 3);
        assert_eq!(t.path_exchanges(3, &[65003, 64999]), BTreeSet::new());

        assert!(Topology::new(&config, 7).is_err());
    }
}
