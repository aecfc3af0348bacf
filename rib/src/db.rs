// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory adj-RIB-in of the route server.
//!
//! Every announcing participant contributes at most one route per prefix.
//! Best paths are not cached, they are computed on query from the routes a
//! given ingress participant is allowed to use.

use crate::bestpath::bestpath;
use crate::error::Error;
use crate::log::rib_log;
use crate::RouteSource;
use sdx_types::{ParticipantId, Prefix, Route, RouteUpdate};
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};

/// Routes indexed by prefix, then by announcing participant.
type RibIn = BTreeMap<Prefix, BTreeMap<ParticipantId, Route>>;

pub struct Rib {
    rib_in: RibIn,

    /// For every participant, the participants it accepts routes from.
    peers_in: BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,

    log: Logger,
}

impl Rib {
    pub fn new(
        peers_in: BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,
        log: Logger,
    ) -> Self {
        Self {
            rib_in: RibIn::new(),
            peers_in,
            log,
        }
    }

    /// Apply an announcement or withdrawal. Returns whether the adj-RIB-in
    /// changed.
    pub fn apply(&mut self, update: RouteUpdate) -> Result<bool, Error> {
        if !self.peers_in.contains_key(&update.participant) {
            return Err(Error::UnknownParticipant(update.participant));
        }
        let prefix = update.prefix;
        let participant = update.participant;

        if update.withdraw {
            let Some(routes) = self.rib_in.get_mut(&prefix) else {
                return Ok(false);
            };
            let removed = routes.remove(&participant).is_some();
            if routes.is_empty() {
                self.rib_in.remove(&prefix);
            }
            if removed {
                rib_log!(self, debug, "withdraw {prefix} from {participant}";
                    "prefix" => prefix.to_string(),
                    "participant" => participant
                );
            }
            return Ok(removed);
        }

        let route: Route = update.into();
        let routes = self.rib_in.entry(prefix).or_default();
        if routes.get(&participant) == Some(&route) {
            return Ok(false);
        }
        rib_log!(self, debug, "announce {prefix} from {participant}";
            "prefix" => prefix.to_string(),
            "participant" => participant,
            "as_path" => format!("{:?}", route.as_path)
        );
        routes.insert(participant, route);
        Ok(true)
    }

    pub fn peers_in(
        &self,
        participant: ParticipantId,
    ) -> BTreeSet<ParticipantId> {
        self.peers_in
            .get(&participant)
            .cloned()
            .unwrap_or_default()
    }

    fn visible(&self, from: ParticipantId, to: ParticipantId) -> bool {
        from != to
            && self
                .peers_in
                .get(&to)
                .is_some_and(|peers| peers.contains(&from))
    }
}

impl RouteSource for Rib {
    fn prefixes(&self) -> BTreeSet<Prefix> {
        self.rib_in.keys().copied().collect()
    }

    fn participants_advertising(
        &self,
        prefix: &Prefix,
    ) -> BTreeSet<ParticipantId> {
        match self.rib_in.get(prefix) {
            Some(routes) => routes.keys().copied().collect(),
            None => BTreeSet::new(),
        }
    }

    fn announced(
        &self,
        prefix: &Prefix,
        participant: ParticipantId,
    ) -> Option<Route> {
        self.rib_in.get(prefix)?.get(&participant).cloned()
    }

    fn route(
        &self,
        prefix: &Prefix,
        from: ParticipantId,
        to: ParticipantId,
    ) -> Option<Route> {
        if !self.visible(from, to) {
            return None;
        }
        self.rib_in.get(prefix)?.get(&from).cloned()
    }

    fn candidates(
        &self,
        ingress: ParticipantId,
        prefix: &Prefix,
    ) -> BTreeSet<ParticipantId> {
        self.participants_advertising(prefix)
            .into_iter()
            .filter(|p| self.visible(*p, ingress))
            .collect()
    }

    fn best_path(
        &self,
        ingress: ParticipantId,
        prefix: &Prefix,
    ) -> Option<Route> {
        let routes = self.rib_in.get(prefix)?;
        bestpath(
            routes
                .values()
                .filter(|r| self.visible(r.participant, ingress)),
        )
        .cloned()
    }

    fn best_path_participants(
        &self,
        ingress: ParticipantId,
    ) -> BTreeMap<Prefix, ParticipantId> {
        self.rib_in
            .keys()
            .filter_map(|prefix| {
                self.best_path(ingress, prefix)
                    .map(|r| (*prefix, r.participant))
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::Rib;
    use crate::error::Error;
    use crate::RouteSource;
    use pretty_assertions::assert_eq;
    use sdx_common::log::discard_logger;
    use sdx_types::{Prefix, RouteUpdate};
    use std::collections::{BTreeMap, BTreeSet};
    use std::net::Ipv4Addr;

    fn rib() -> Rib {
        // 1 hears from everyone, 2 only from 3, 3 only from 1
        let peers = BTreeMap::from([
            (1, BTreeSet::from([2, 3, 4])),
            (2, BTreeSet::from([3])),
            (3, BTreeSet::from([1])),
            (4, BTreeSet::new()),
        ]);
        Rib::new(peers, discard_logger())
    }

    fn announce(p: u32, prefix: &str, as_path: Vec<u32>) -> RouteUpdate {
        RouteUpdate::announce(
            p,
            prefix.parse().unwrap(),
            as_path,
            Ipv4Addr::new(10, 0, 0, p as u8),
        )
    }

    #[test]
    fn announce_withdraw() {
        let mut rib = rib();
        let pfx: Prefix = "10.0.0.0/8".parse().unwrap();

        assert_eq!(rib.apply(announce(2, "10.0.0.0/8", vec![65002])), Ok(true));
        // duplicate announcements do not change anything
        assert_eq!(
            rib.apply(announce(2, "10.0.0.0/8", vec![65002])),
            Ok(false)
        );
        assert_eq!(
            rib.apply(announce(3, "10.0.0.0/8", vec![65003, 65010])),
            Ok(true)
        );
        assert_eq!(rib.participants_advertising(&pfx), BTreeSet::from([2, 3]));

        assert_eq!(rib.apply(RouteUpdate::withdraw(2, pfx)), Ok(true));
        assert_eq!(rib.apply(RouteUpdate::withdraw(2, pfx)), Ok(false));
        assert_eq!(rib.participants_advertising(&pfx), BTreeSet::from([3]));

        assert_eq!(rib.apply(RouteUpdate::withdraw(3, pfx)), Ok(true));
        assert!(rib.prefixes().is_empty());

        assert_eq!(
            rib.apply(announce(9, "10.0.0.0/8", vec![65009])),
            Err(Error::UnknownParticipant(9))
        );
    }

    #[test]
    fn best_path_respects_peering() {
        let mut rib = rib();
        let pfx: Prefix = "10.0.0.0/8".parse().unwrap();
        rib.apply(announce(2, "10.0.0.0/8", vec![65002])).unwrap();
        rib.apply(announce(3, "10.0.0.0/8", vec![65003, 65010]))
            .unwrap();

        // participant 1 sees both and prefers the shorter path
        assert_eq!(rib.best_path(1, &pfx).map(|r| r.participant), Some(2));
        assert_eq!(rib.candidates(1, &pfx), BTreeSet::from([2, 3]));

        // participant 2 only hears from 3
        assert_eq!(rib.best_path(2, &pfx).map(|r| r.participant), Some(3));
        assert!(rib.route(&pfx, 2, 2).is_none());

        // the raw entry ignores peering
        assert_eq!(
            rib.announced(&pfx, 3).map(|r| r.as_path),
            Some(vec![65003, 65010])
        );

        // participant 3 only hears from 1, which announces nothing
        assert!(rib.best_path(3, &pfx).is_none());
        assert!(rib.route(&pfx, 2, 3).is_none());

        assert_eq!(
            rib.best_path_participants(1),
            BTreeMap::from([(pfx, 2)])
        );
    }
}
