// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The route information base (rib).
//!
//! The SDX route server proper lives outside of this workspace. This crate
//! defines the queries the VMAC encoder and the loop detector make against
//! it ([`RouteSource`]) and provides an in-memory adj-RIB-in ([`Rib`]) that
//! answers them from route announce/withdraw events.

pub mod bestpath;
pub mod db;
pub mod error;
mod log;

pub use db::Rib;

use sdx_types::{ParticipantId, Prefix, Route};
use std::collections::{BTreeMap, BTreeSet};

pub const COMPONENT_RIB: &str = "rib";
pub const MOD_DB: &str = "database";

/// Route queries consumed from the BGP layer.
pub trait RouteSource {
    /// Every prefix currently announced by at least one participant.
    fn prefixes(&self) -> BTreeSet<Prefix>;

    /// The participants holding an adj-RIB-in entry for `prefix`.
    fn participants_advertising(
        &self,
        prefix: &Prefix,
    ) -> BTreeSet<ParticipantId>;

    /// The adj-RIB-in entry for `prefix` announced by `participant`,
    /// regardless of who may use it.
    fn announced(
        &self,
        prefix: &Prefix,
        participant: ParticipantId,
    ) -> Option<Route>;

    /// The route for `prefix` announced by `from`, as visible to `to`. A
    /// route is visible when `from` is one of `to`'s inbound peers.
    fn route(
        &self,
        prefix: &Prefix,
        from: ParticipantId,
        to: ParticipantId,
    ) -> Option<Route>;

    /// The participants `ingress` may forward traffic for `prefix` to.
    fn candidates(
        &self,
        ingress: ParticipantId,
        prefix: &Prefix,
    ) -> BTreeSet<ParticipantId>;

    /// The route currently selected by the decision process for traffic
    /// from `ingress` toward `prefix`.
    fn best_path(&self, ingress: ParticipantId, prefix: &Prefix)
        -> Option<Route>;

    /// The best-path egress participant for every prefix reachable from
    /// `ingress`.
    fn best_path_participants(
        &self,
        ingress: ParticipantId,
    ) -> BTreeMap<Prefix, ParticipantId>;
}
